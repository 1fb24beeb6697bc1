use tokio::select;
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::events::{ShareMessage, SourceBlob};
use crate::tasks::canvas::CanvasState;

/// Waits for the first `load-image` message that carries a file.
///
/// Other messages are skipped. Returns `None` if the channel closes or
/// `cancel` fires first.
pub async fn await_shared_image(
    rx: &mut Receiver<ShareMessage>,
    cancel: &CancellationToken,
) -> Option<SourceBlob> {
    loop {
        select! {
            biased;
            _ = cancel.cancelled() => return None,
            message = rx.recv() => match message {
                None => {
                    debug!("share channel closed");
                    return None;
                }
                Some(ShareMessage { action, file: Some(file) }) if action == ShareMessage::LOAD_IMAGE => {
                    return Some(file);
                }
                Some(ShareMessage { action, file: None }) if action == ShareMessage::LOAD_IMAGE => {
                    warn!("load-image message without a file");
                }
                Some(ShareMessage { action, .. }) => {
                    debug!(%action, "ignoring share message");
                }
            },
        }
    }
}

/// Loads the one image handed over by a share target, if any, as a fresh selection.
pub async fn run(
    mut rx: Receiver<ShareMessage>,
    state: CanvasState,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let Some(blob) = await_shared_image(&mut rx, &cancel).await else {
        return Ok(());
    };
    info!(name = blob.name(), bytes = blob.len(), "received shared image");
    state.set_images(blob, None).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn blob(name: &str) -> SourceBlob {
        SourceBlob::new(Some(name.to_string()), vec![0u8; 4])
    }

    #[tokio::test]
    async fn skips_unrelated_messages() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(ShareMessage {
            action: "ping".into(),
            file: Some(blob("wrong")),
        })
        .await
        .unwrap();
        tx.send(ShareMessage {
            action: ShareMessage::LOAD_IMAGE.into(),
            file: None,
        })
        .await
        .unwrap();
        tx.send(ShareMessage::load_image(blob("right"))).await.unwrap();

        let got = await_shared_image(&mut rx, &CancellationToken::new()).await;
        assert_eq!(got.unwrap().name(), Some("right"));
    }

    #[tokio::test]
    async fn closed_channel_yields_nothing() {
        let (tx, mut rx) = mpsc::channel::<ShareMessage>(1);
        drop(tx);
        assert!(await_shared_image(&mut rx, &CancellationToken::new()).await.is_none());
    }

    #[tokio::test]
    async fn cancellation_stops_waiting() {
        let (_tx, mut rx) = mpsc::channel::<ShareMessage>(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(await_shared_image(&mut rx, &cancel).await.is_none());
    }
}
