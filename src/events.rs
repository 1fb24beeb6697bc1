use std::fmt;
use std::path::Path;
use std::sync::Arc;

use image::ImageFormat;

/// Raw image data as handed over by a file picker or a share target.
///
/// The bytes are immutable once wrapped; clones share the same buffer.
#[derive(Clone)]
pub struct SourceBlob {
    name: Option<String>,
    media_type: Option<String>,
    bytes: Arc<[u8]>,
}

impl SourceBlob {
    pub fn new(name: Option<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name,
            media_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    /// Reads a picked file from disk, guessing its media type from the extension.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        let blob = Self::new(name, bytes);
        Ok(match ImageFormat::from_path(path) {
            Ok(format) => blob.with_media_type(format.to_mime_type()),
            Err(_) => blob,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Blobs without a declared media type are accepted and sniffed at decode time.
    pub fn is_image(&self) -> bool {
        self.media_type
            .as_deref()
            .is_none_or(|media_type| media_type.starts_with("image/"))
    }
}

impl fmt::Debug for SourceBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceBlob")
            .field("name", &self.name)
            .field("media_type", &self.media_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A message posted to the page by the share-target handler.
///
/// Only `action == "load-image"` carrying a file is meaningful; everything
/// else is ignored by the listener.
#[derive(Debug, Clone)]
pub struct ShareMessage {
    pub action: String,
    pub file: Option<SourceBlob>,
}

impl ShareMessage {
    pub const LOAD_IMAGE: &'static str = "load-image";

    pub fn load_image(file: SourceBlob) -> Self {
        Self {
            action: Self::LOAD_IMAGE.to_string(),
            file: Some(file),
        }
    }
}

/// Progress of the resize/paint pipeline, surfaced to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingState {
    #[default]
    Inert,
    Processing,
    Error,
}

/// Progress of a share hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SharingState {
    #[default]
    Inert,
    Sharing,
    Success,
    Error,
}
