use thiserror::Error;

use crate::processing::resize::ResizeError;

/// Library error type for composition operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Decoding or scaling a source image failed, or was cancelled.
    #[error(transparent)]
    Resize(#[from] ResizeError),

    /// The destination canvas could not be written to.
    #[error("destination canvas unavailable: {0}")]
    Canvas(String),

    /// An export was requested before any destination canvas was attached.
    #[error("no destination canvas attached")]
    Detached,

    /// JPEG serialization failed.
    #[error("failed to encode JPEG: {0}")]
    Encode(#[from] image::ImageError),

    /// A picked or shared file does not carry an image media type.
    #[error("unsupported media type: {0}")]
    UnsupportedMedia(String),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error only reports that the work was superseded.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Resize(err) if err.is_cancelled())
    }
}
