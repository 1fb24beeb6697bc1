use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, trace};

use crate::reactive::signal::{Dependencies, Scope, Subscriber};
use crate::schedule::{FrameCallback, FrameScheduler};

type EffectFn = Box<dyn Fn(&mut Scope) + Send + Sync>;

/// A side effect that re-runs on the next frame after any cell it read changes.
///
/// The first run is queued on the scheduler rather than made inline. Dropping
/// the handle disposes the effect; a disposed effect never runs again even if
/// it is still queued.
pub struct Effect {
    inner: Arc<EffectInner>,
}

struct EffectInner {
    name: &'static str,
    me: Weak<EffectInner>,
    scheduler: FrameScheduler,
    body: EffectFn,
    deps: Mutex<Option<Dependencies>>,
    disposed: AtomicBool,
    runs: AtomicU64,
}

impl Effect {
    pub fn new(
        name: &'static str,
        scheduler: &FrameScheduler,
        body: impl Fn(&mut Scope) + Send + Sync + 'static,
    ) -> Self {
        let inner = Arc::new_cyclic(|me| EffectInner {
            name,
            me: me.clone(),
            scheduler: scheduler.clone(),
            body: Box::new(body),
            deps: Mutex::new(None),
            disposed: AtomicBool::new(false),
            runs: AtomicU64::new(0),
        });
        scheduler.schedule(inner.clone());
        Self { inner }
    }

    pub fn dispose(&self) {
        if !self.inner.disposed.swap(true, Ordering::AcqRel) {
            debug!(effect = self.inner.name, "effect disposed");
            self.inner.deps.lock().expect("effect poisoned").take();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    pub fn runs(&self) -> u64 {
        self.inner.runs.load(Ordering::Acquire)
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Subscriber for EffectInner {
    fn notify(&self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        if let Some(me) = self.me.upgrade() {
            self.scheduler.schedule(me);
        }
    }
}

impl FrameCallback for EffectInner {
    fn run_frame(&self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let mut deps = self.deps.lock().expect("effect poisoned");
        if deps.as_ref().is_some_and(|seen| !seen.changed()) {
            trace!(effect = self.name, "dependencies unchanged; skipping");
            return;
        }

        let mut scope = Scope::new();
        (self.body)(&mut scope);
        let next = scope.finish();
        let me: Weak<dyn Subscriber> = self.me.clone();
        next.subscribe(&me);
        let run = self.runs.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(effect = self.name, run, deps = next.len(), "effect ran");
        *deps = Some(next);
    }
}
