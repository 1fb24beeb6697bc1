//! Typed cells with dependency tracking.
//!
//! An [`Atom`] holds a value set from outside. A [`Computed`] derives a value
//! from other cells and memoizes it until one of the cells it read changes
//! version. Reads made through a [`Scope`] are recorded so the reader can be
//! notified and re-validated later; [`Atom::peek`] and [`Computed::peek`] read
//! without tracking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::trace;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Receives change notifications from the cells it depends on.
pub trait Subscriber: Send + Sync {
    fn notify(&self);
}

/// A cell that can be recorded as a dependency.
pub trait Source: Send + Sync {
    fn id(&self) -> NodeId;
    /// Version after bringing the cell up to date.
    fn version(&self) -> u64;
    fn subscribe(&self, subscriber: Weak<dyn Subscriber>);
}

#[derive(Default)]
struct Subscribers {
    list: Mutex<Vec<Weak<dyn Subscriber>>>,
}

impl Subscribers {
    fn add(&self, subscriber: Weak<dyn Subscriber>) {
        let mut list = self.list.lock().expect("subscriber list poisoned");
        list.retain(|existing| existing.strong_count() > 0);
        if !list.iter().any(|existing| Weak::ptr_eq(existing, &subscriber)) {
            list.push(subscriber);
        }
    }

    fn notify_all(&self) {
        let live: Vec<Arc<dyn Subscriber>> = {
            let list = self.list.lock().expect("subscriber list poisoned");
            list.iter().filter_map(Weak::upgrade).collect()
        };
        for subscriber in live {
            subscriber.notify();
        }
    }

    fn live(&self) -> usize {
        let list = self.list.lock().expect("subscriber list poisoned");
        list.iter().filter(|s| s.strong_count() > 0).count()
    }
}

/// Records the cells read during one evaluation.
#[derive(Default)]
pub struct Scope {
    reads: Vec<(Arc<dyn Source>, u64)>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, source: Arc<dyn Source>, version: u64) {
        let id = source.id();
        if !self.reads.iter().any(|(seen, _)| seen.id() == id) {
            self.reads.push((source, version));
        }
    }

    pub fn finish(self) -> Dependencies {
        Dependencies { reads: self.reads }
    }
}

/// Versions of the cells seen by the last evaluation.
#[derive(Default)]
pub struct Dependencies {
    reads: Vec<(Arc<dyn Source>, u64)>,
}

impl Dependencies {
    /// True if any recorded cell has moved past the version that was seen.
    pub fn changed(&self) -> bool {
        self.reads.iter().any(|(source, seen)| source.version() != *seen)
    }

    pub fn subscribe(&self, subscriber: &Weak<dyn Subscriber>) {
        for (source, _) in &self.reads {
            source.subscribe(subscriber.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.reads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }
}

/// A mutable cell. Setting an equal value is a no-op.
pub struct Atom<T> {
    inner: Arc<AtomInner<T>>,
}

struct AtomInner<T> {
    id: NodeId,
    name: &'static str,
    value: Mutex<T>,
    version: AtomicU64,
    subscribers: Subscribers,
}

impl<T> Clone for Atom<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Atom<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("name", &self.inner.name)
            .field("version", &self.inner.version.load(Ordering::Acquire))
            .finish()
    }
}

impl<T> Atom<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            inner: Arc::new(AtomInner {
                id: NodeId::next(),
                name,
                value: Mutex::new(value),
                version: AtomicU64::new(0),
                subscribers: Subscribers::default(),
            }),
        }
    }

    pub fn peek(&self) -> T {
        self.inner.value.lock().expect("atom poisoned").clone()
    }

    pub fn get(&self, scope: &mut Scope) -> T {
        let (value, version) = {
            let value = self.inner.value.lock().expect("atom poisoned");
            (value.clone(), self.inner.version.load(Ordering::Acquire))
        };
        scope.record(self.inner.clone(), version);
        value
    }

    /// Stores `value` and notifies subscribers. Returns whether anything changed.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.inner.value.lock().expect("atom poisoned");
            if *current == value {
                return false;
            }
            *current = value;
            let version = self.inner.version.fetch_add(1, Ordering::AcqRel) + 1;
            trace!(atom = self.inner.name, version, "atom changed");
        }
        self.inner.subscribers.notify_all();
        true
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) -> bool {
        let next = f(&self.peek());
        self.set(next)
    }

    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.live()
    }
}

impl<T: Send> Source for AtomInner<T> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn subscribe(&self, subscriber: Weak<dyn Subscriber>) {
        self.subscribers.add(subscriber);
    }
}

type ComputeFn<T> = Box<dyn Fn(&mut Scope) -> T + Send + Sync>;

/// A derived cell, recomputed lazily when a dependency's version moves.
///
/// The version of a computed cell only advances when the recomputed value
/// differs from the memoized one, so unchanged results do not ripple further.
pub struct Computed<T> {
    inner: Arc<ComputedInner<T>>,
}

struct ComputedInner<T> {
    id: NodeId,
    name: &'static str,
    me: Weak<ComputedInner<T>>,
    compute: ComputeFn<T>,
    memo: Mutex<Option<Memo<T>>>,
    version: AtomicU64,
    recomputes: AtomicU64,
    subscribers: Subscribers,
}

struct Memo<T> {
    value: T,
    deps: Dependencies,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Computed<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    pub fn new(
        name: &'static str,
        compute: impl Fn(&mut Scope) -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new_cyclic(|me| ComputedInner {
                id: NodeId::next(),
                name,
                me: me.clone(),
                compute: Box::new(compute),
                memo: Mutex::new(None),
                version: AtomicU64::new(0),
                recomputes: AtomicU64::new(0),
                subscribers: Subscribers::default(),
            }),
        }
    }

    pub fn peek(&self) -> T {
        self.inner.refresh().0
    }

    pub fn get(&self, scope: &mut Scope) -> T {
        let (value, version) = self.inner.refresh();
        scope.record(self.inner.clone(), version);
        value
    }

    /// How many times the value has actually been recomputed.
    pub fn recomputes(&self) -> u64 {
        self.inner.recomputes.load(Ordering::Acquire)
    }
}

impl<T> ComputedInner<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    fn refresh(&self) -> (T, u64) {
        let mut memo = self.memo.lock().expect("computed cell poisoned");
        if let Some(current) = memo.as_ref() {
            if !current.deps.changed() {
                return (current.value.clone(), self.version.load(Ordering::Acquire));
            }
        }

        let mut scope = Scope::new();
        let value = (self.compute)(&mut scope);
        let deps = scope.finish();
        let me: Weak<dyn Subscriber> = self.me.clone();
        deps.subscribe(&me);
        self.recomputes.fetch_add(1, Ordering::AcqRel);

        let changed = memo.as_ref().is_none_or(|current| current.value != value);
        if changed {
            let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
            trace!(computed = self.name, version, "computed value changed");
        }
        *memo = Some(Memo {
            value: value.clone(),
            deps,
        });
        (value, self.version.load(Ordering::Acquire))
    }
}

impl<T> Source for ComputedInner<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn version(&self) -> u64 {
        self.refresh().1
    }

    fn subscribe(&self, subscriber: Weak<dyn Subscriber>) {
        self.subscribers.add(subscriber);
    }
}

impl<T: Send> Subscriber for ComputedInner<T> {
    fn notify(&self) {
        self.subscribers.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn atom_set_bumps_version_only_on_change() {
        let atom = Atom::new("n", 1);
        assert!(!atom.set(1));
        assert_eq!(atom.version(), 0);
        assert!(atom.set(2));
        assert_eq!(atom.version(), 1);
        assert_eq!(atom.peek(), 2);
    }

    #[test]
    fn computed_memoizes_until_dependency_changes() {
        let a = Atom::new("a", 2);
        let b = Atom::new("b", 3);
        let product = {
            let (a, b) = (a.clone(), b.clone());
            Computed::new("product", move |cx| a.get(cx) * b.get(cx))
        };
        assert_eq!(product.peek(), 6);
        assert_eq!(product.peek(), 6);
        assert_eq!(product.recomputes(), 1);

        a.set(4);
        assert_eq!(product.peek(), 12);
        assert_eq!(product.recomputes(), 2);
    }

    #[test]
    fn unchanged_result_keeps_computed_version() {
        let n = Atom::new("n", 3);
        let parity = {
            let n = n.clone();
            Computed::new("parity", move |cx| n.get(cx) % 2)
        };
        let mut scope = Scope::new();
        assert_eq!(parity.get(&mut scope), 1);
        let deps = scope.finish();
        assert!(!deps.changed());

        n.set(5);
        // parity recomputes but stays odd, so readers of it see no change
        assert!(!deps.changed());
        assert_eq!(parity.recomputes(), 2);

        n.set(6);
        assert!(deps.changed());
    }

    #[test]
    fn chained_computeds_track_transitively() {
        let base = Atom::new("base", 1);
        let doubled = {
            let base = base.clone();
            Computed::new("doubled", move |cx| base.get(cx) * 2)
        };
        let label = {
            let doubled = doubled.clone();
            Computed::new("label", move |cx| format!("value={}", doubled.get(cx)))
        };
        assert_eq!(label.peek(), "value=2");
        base.set(5);
        assert_eq!(label.peek(), "value=10");
    }

    struct CountingSubscriber {
        hits: AtomicUsize,
    }

    impl Subscriber for CountingSubscriber {
        fn notify(&self) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn notifications_flow_through_computed_cells() {
        let base = Atom::new("base", 1);
        let derived = {
            let base = base.clone();
            Computed::new("derived", move |cx| base.get(cx) + 1)
        };
        let listener = Arc::new(CountingSubscriber {
            hits: AtomicUsize::new(0),
        });
        let mut scope = Scope::new();
        derived.get(&mut scope);
        let weak: Weak<dyn Subscriber> = Arc::downgrade(&listener) as Weak<dyn Subscriber>;
        scope.finish().subscribe(&weak);

        base.set(2);
        assert_eq!(listener.hits.load(Ordering::SeqCst), 1);
        base.set(2);
        assert_eq!(listener.hits.load(Ordering::SeqCst), 1);

        drop(listener);
        base.set(3);
        assert_eq!(base.subscriber_count(), 1); // only the computed cell remains
    }
}
