use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::events::SharingState;
use crate::export::{NamedFile, canary_jpeg_share_file, canary_share_file};
use crate::tasks::canvas::CanvasState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShareError {
    /// The user dismissed the share sheet.
    #[error("share aborted")]
    Aborted,

    #[error("target cannot share this file")]
    Unsupported,

    #[error("share failed: {0}")]
    Failed(String),
}

/// Something that can take a file off our hands, such as a platform share sheet.
pub trait ShareTarget: Send + Sync {
    fn can_share(&self, files: &[NamedFile]) -> bool;

    fn share(&self, file: NamedFile) -> BoxFuture<'static, Result<(), ShareError>>;
}

/// Drives a share hand-off and exposes its progress.
///
/// `Success` and `Error` fall back to `Inert` after the reset delay unless a
/// newer share started in the meantime. An aborted share resets immediately.
#[derive(Clone)]
pub struct ShareController {
    target: Arc<dyn ShareTarget>,
    state: Arc<watch::Sender<SharingState>>,
    reset_delay: Duration,
    generation: Arc<AtomicU64>,
}

impl ShareController {
    pub fn new(target: Arc<dyn ShareTarget>, reset_delay: Duration) -> Self {
        let (state, _) = watch::channel(SharingState::Inert);
        Self {
            target,
            state: Arc::new(state),
            reset_delay,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether the target accepts files at all, probed with a canary file.
    pub fn is_available(&self) -> bool {
        let canary = canary_jpeg_share_file().unwrap_or_else(|err| {
            warn!(%err, "falling back to empty canary file");
            canary_share_file()
        });
        self.target.can_share(&[canary])
    }

    pub fn state(&self) -> SharingState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SharingState> {
        self.state.subscribe()
    }

    pub async fn share(&self, canvas: &CanvasState) -> Result<(), ShareError> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let file = match canvas.file_to_share() {
            Ok(file) => file,
            Err(err) => {
                error!(%err, "failed to export canvas for sharing");
                return Err(self.fail(generation, ShareError::Failed(err.to_string())));
            }
        };
        if !self.target.can_share(std::slice::from_ref(&file)) {
            warn!(name = %file.name, "share target refused file");
            return Err(self.fail(generation, ShareError::Unsupported));
        }

        self.state.send_replace(SharingState::Sharing);
        let name = file.name.clone();
        match self.target.share(file).await {
            Ok(()) => {
                info!(%name, "shared composition");
                self.state.send_replace(SharingState::Success);
                self.reset_later(generation);
                Ok(())
            }
            Err(ShareError::Aborted) => {
                debug!(%name, "share aborted");
                self.state.send_replace(SharingState::Inert);
                Err(ShareError::Aborted)
            }
            Err(err) => {
                error!(%name, %err, "share failed");
                Err(self.fail(generation, err))
            }
        }
    }

    fn fail(&self, generation: u64, err: ShareError) -> ShareError {
        self.state.send_replace(SharingState::Error);
        self.reset_later(generation);
        err
    }

    fn reset_later(&self, generation: u64) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.state.send_replace(SharingState::Inert);
            return;
        };
        let state = Arc::clone(&self.state);
        let latest = Arc::clone(&self.generation);
        let delay = self.reset_delay;
        handle.spawn(async move {
            sleep(delay).await;
            if latest.load(Ordering::Acquire) == generation {
                state.send_replace(SharingState::Inert);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::render::surface::CanvasHandle;
    use crate::schedule::FrameScheduler;
    use crate::tasks::canvas::CanvasAttachment;
    use crate::tasks::slots::DefaultResizer;
    use futures::FutureExt;
    use std::sync::Mutex;

    struct ScriptedTarget {
        accepts: bool,
        outcome: Result<(), ShareError>,
        shared: Mutex<Vec<String>>,
    }

    impl ScriptedTarget {
        fn new(accepts: bool, outcome: Result<(), ShareError>) -> Arc<Self> {
            Arc::new(Self {
                accepts,
                outcome,
                shared: Mutex::new(Vec::new()),
            })
        }
    }

    impl ShareTarget for ScriptedTarget {
        fn can_share(&self, files: &[NamedFile]) -> bool {
            self.accepts && files.iter().all(|file| file.mime == "image/jpeg")
        }

        fn share(&self, file: NamedFile) -> BoxFuture<'static, Result<(), ShareError>> {
            self.shared.lock().unwrap().push(file.name);
            futures::future::ready(self.outcome.clone()).boxed()
        }
    }

    async fn painted_state() -> (CanvasState, CanvasAttachment) {
        let state = CanvasState::with_parts(
            &Configuration::default(),
            FrameScheduler::manual(),
            Arc::new(DefaultResizer),
        );
        let attachment = state.attach_to_canvas(CanvasHandle::new());
        state.settled().await;
        (state, attachment)
    }

    #[test]
    fn availability_follows_canary_probe() {
        let yes = ShareController::new(ScriptedTarget::new(true, Ok(())), Duration::from_secs(5));
        let no = ShareController::new(ScriptedTarget::new(false, Ok(())), Duration::from_secs(5));
        assert!(yes.is_available());
        assert!(!no.is_available());
    }

    #[tokio::test]
    async fn success_resets_after_delay() {
        let (state, _attachment) = painted_state().await;
        let target = ScriptedTarget::new(true, Ok(()));
        let controller = ShareController::new(target.clone(), Duration::from_millis(20));

        controller.share(&state).await.unwrap();
        assert_eq!(controller.state(), SharingState::Success);
        assert_eq!(*target.shared.lock().unwrap(), vec!["framed-4x5-canvas".to_string()]);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(controller.state(), SharingState::Inert);
    }

    #[tokio::test]
    async fn aborted_share_goes_straight_back_to_inert() {
        let (state, _attachment) = painted_state().await;
        let controller =
            ShareController::new(ScriptedTarget::new(true, Err(ShareError::Aborted)), Duration::from_secs(5));
        assert_eq!(controller.share(&state).await, Err(ShareError::Aborted));
        assert_eq!(controller.state(), SharingState::Inert);
    }

    #[tokio::test]
    async fn refused_file_reports_error_then_resets() {
        let (state, _attachment) = painted_state().await;
        let controller = ShareController::new(ScriptedTarget::new(false, Ok(())), Duration::from_millis(20));
        assert_eq!(controller.share(&state).await, Err(ShareError::Unsupported));
        assert_eq!(controller.state(), SharingState::Error);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(controller.state(), SharingState::Inert);
    }
}
