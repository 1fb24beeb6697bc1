use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};
use tracing::info;

use crate::config::AspectRatio;
use crate::error::Error;

pub const JPEG_MIME: &str = "image/jpeg";
pub const CANARY_FILE_NAME: &str = "framed-share-canary-file";

/// An in-memory file ready to be saved or shared.
#[derive(Clone, PartialEq, Eq)]
pub struct NamedFile {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for NamedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedFile")
            .field("name", &self.name)
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Encodes the composed canvas as an opaque baseline JPEG.
pub fn encode_jpeg(canvas: &RgbaImage, quality: u8) -> Result<Vec<u8>, Error> {
    let rgb = DynamicImage::ImageRgba8(canvas.clone()).into_rgb8();
    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode_image(&rgb)?;
    Ok(out.into_inner())
}

/// `framed-[diptych-]<aspect id>-<names joined by "-">`, or `canvas` when no
/// source names are known.
pub fn output_filename<'a>(
    aspect_ratio: AspectRatio,
    diptych: bool,
    names: impl IntoIterator<Item = &'a str>,
) -> String {
    let names: Vec<&str> = names.into_iter().filter(|name| !name.is_empty()).collect();
    let stem = if names.is_empty() {
        "canvas".to_string()
    } else {
        names.join("-")
    };
    let kind = if diptych { "diptych-" } else { "" };
    format!("framed-{kind}{}-{stem}", aspect_ratio.id())
}

/// Empty JPEG-typed file used to ask a share target whether it accepts files at all.
pub fn canary_share_file() -> NamedFile {
    NamedFile {
        name: CANARY_FILE_NAME.to_string(),
        mime: JPEG_MIME.to_string(),
        bytes: Vec::new(),
    }
}

/// Like [`canary_share_file`] but with a real 1×1 white JPEG body, for targets
/// that inspect the payload.
pub fn canary_jpeg_share_file() -> Result<NamedFile, Error> {
    let pixel = RgbaImage::from_pixel(1, 1, image::Rgba([255, 255, 255, 255]));
    Ok(NamedFile {
        bytes: encode_jpeg(&pixel, 75)?,
        ..canary_share_file()
    })
}

/// Receives an exported file, e.g. a save dialog.
pub trait FileSaver {
    fn save(&self, file: &NamedFile) -> Result<(), Error>;
}

/// Writes exported files into a directory, creating it on first use.
#[derive(Debug, Clone)]
pub struct DirectorySaver {
    dir: PathBuf,
}

impl DirectorySaver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where `file` ends up, with a `.jpg` extension added for JPEG payloads
    /// whose name does not already carry one.
    pub fn target_path(&self, file: &NamedFile) -> PathBuf {
        let has_ext = Path::new(&file.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));
        if file.mime == JPEG_MIME && !has_ext {
            self.dir.join(format!("{}.jpg", file.name))
        } else {
            self.dir.join(&file.name)
        }
    }
}

impl FileSaver for DirectorySaver {
    fn save(&self, file: &NamedFile) -> Result<(), Error> {
        fs::create_dir_all(&self.dir)?;
        let path = self.target_path(file);
        fs::write(&path, &file.bytes)?;
        info!(path = %path.display(), bytes = file.bytes.len(), "saved composition");
        Ok(())
    }
}
