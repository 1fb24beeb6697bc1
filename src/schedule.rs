use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

/// Work that should run at most once per frame.
pub trait FrameCallback: Send + Sync {
    fn run_frame(&self);
}

/// What drives frame boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClock {
    /// A tokio timer fires this long after the first callback of a frame is queued.
    Interval(Duration),
    /// Frames only happen when [`FrameScheduler::flush`] is called.
    Manual,
}

/// Coalesces redraw requests into frames.
///
/// Scheduling the same callback several times before the frame runs queues it
/// once; distinct callbacks run once each, in the order they were first queued.
#[derive(Clone)]
pub struct FrameScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    clock: FrameClock,
    queue: Mutex<FrameQueue>,
    frames: AtomicU64,
}

#[derive(Default)]
struct FrameQueue {
    pending: Vec<Arc<dyn FrameCallback>>,
    /// Set from the first schedule of a frame until that frame has flushed.
    frame_requested: bool,
}

impl FrameScheduler {
    pub fn new(clock: FrameClock) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                clock,
                queue: Mutex::new(FrameQueue::default()),
                frames: AtomicU64::new(0),
            }),
        }
    }

    pub fn manual() -> Self {
        Self::new(FrameClock::Manual)
    }

    pub fn clock(&self) -> FrameClock {
        self.inner.clock
    }

    pub fn schedule(&self, callback: Arc<dyn FrameCallback>) {
        let request_frame = {
            let mut queue = self.inner.queue.lock().expect("frame queue poisoned");
            if !queue.pending.iter().any(|queued| Arc::ptr_eq(queued, &callback)) {
                queue.pending.push(callback);
            }
            !std::mem::replace(&mut queue.frame_requested, true)
        };
        if request_frame {
            self.request_frame();
        }
    }

    /// Runs every queued callback once and returns how many ran.
    ///
    /// Callbacks scheduled while the frame is running are kept for the next frame.
    pub fn flush(&self) -> usize {
        let batch = {
            let mut queue = self.inner.queue.lock().expect("frame queue poisoned");
            std::mem::take(&mut queue.pending)
        };
        for callback in &batch {
            callback.run_frame();
        }
        let frame = self.inner.frames.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(frame, callbacks = batch.len(), "frame flushed");

        let follow_up = {
            let mut queue = self.inner.queue.lock().expect("frame queue poisoned");
            queue.frame_requested = !queue.pending.is_empty();
            queue.frame_requested
        };
        if follow_up {
            self.request_frame();
        }
        batch.len()
    }

    /// True when nothing is queued and no frame is pending.
    pub fn is_idle(&self) -> bool {
        let queue = self.inner.queue.lock().expect("frame queue poisoned");
        queue.pending.is_empty() && !queue.frame_requested
    }

    pub fn pending(&self) -> usize {
        self.inner.queue.lock().expect("frame queue poisoned").pending.len()
    }

    pub fn frames(&self) -> u64 {
        self.inner.frames.load(Ordering::Relaxed)
    }

    fn request_frame(&self) {
        let FrameClock::Interval(interval) = self.inner.clock else {
            return;
        };
        match Handle::try_current() {
            Ok(handle) => {
                debug!(?interval, "frame requested");
                let scheduler = self.clone();
                handle.spawn(async move {
                    sleep(interval).await;
                    scheduler.flush();
                });
            }
            Err(err) => {
                warn!("no tokio runtime to drive frames; waiting for a manual flush: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter {
        runs: AtomicUsize,
    }

    impl FrameCallback for Counter {
        fn run_frame(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Recorder {
        tag: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl FrameCallback for Recorder {
        fn run_frame(&self) {
            self.log.lock().unwrap().push(self.tag);
        }
    }

    #[test]
    fn same_callback_runs_once_per_frame() {
        let scheduler = FrameScheduler::manual();
        let counter = Arc::new(Counter::default());
        for _ in 0..5 {
            scheduler.schedule(counter.clone());
        }
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.flush(), 1);
        assert_eq!(counter.runs.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_idle());
        assert_eq!(scheduler.flush(), 0);
        assert_eq!(counter.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_callbacks_run_in_enqueue_order() {
        let scheduler = FrameScheduler::manual();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = Arc::new(Recorder { tag: "a", log: log.clone() });
        let b = Arc::new(Recorder { tag: "b", log: log.clone() });
        scheduler.schedule(b.clone());
        scheduler.schedule(a.clone());
        scheduler.schedule(b.clone());
        scheduler.flush();
        assert_eq!(*log.lock().unwrap(), vec!["b", "a"]);
    }

    struct Rescheduler {
        scheduler: FrameScheduler,
        me: std::sync::Weak<Rescheduler>,
        runs: AtomicUsize,
    }

    impl FrameCallback for Rescheduler {
        fn run_frame(&self) {
            if self.runs.fetch_add(1, Ordering::SeqCst) == 0 {
                if let Some(me) = self.me.upgrade() {
                    self.scheduler.schedule(me);
                }
            }
        }
    }

    #[test]
    fn callbacks_queued_during_a_frame_wait_for_the_next() {
        let scheduler = FrameScheduler::manual();
        let cb = Arc::new_cyclic(|me| Rescheduler {
            scheduler: scheduler.clone(),
            me: me.clone(),
            runs: AtomicUsize::new(0),
        });
        scheduler.schedule(cb.clone());
        assert_eq!(scheduler.flush(), 1);
        assert!(!scheduler.is_idle());
        assert_eq!(scheduler.flush(), 1);
        assert_eq!(cb.runs.load(Ordering::SeqCst), 2);
        assert!(scheduler.is_idle());
    }

    #[tokio::test]
    async fn interval_clock_flushes_on_its_own() {
        let scheduler = FrameScheduler::new(FrameClock::Interval(Duration::from_millis(5)));
        let counter = Arc::new(Counter::default());
        scheduler.schedule(counter.clone());
        scheduler.schedule(counter.clone());
        for _ in 0..200 {
            if scheduler.is_idle() {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert!(scheduler.is_idle());
        assert_eq!(counter.runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.frames(), 1);
    }
}
