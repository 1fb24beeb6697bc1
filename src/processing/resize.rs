use std::io::Cursor;
use std::sync::Arc;

use fast_image_resize as fir;
use image::{ImageFormat, ImageReader, RgbaImage, imageops};
use jpeg_decoder::{Decoder as JpegDecoder, PixelFormat};
use thiserror::Error;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::events::SourceBlob;
use crate::processing::layout::fit_dimensions;

#[derive(Debug, Clone, Error)]
pub enum ResizeError {
    /// The request was superseded; callers treat this as a no-op.
    #[error("resize cancelled")]
    Cancelled,

    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("failed to scale image: {0}")]
    Scale(String),

    #[error("resize worker failed: {0}")]
    Worker(String),
}

impl ResizeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResizeError::Cancelled)
    }
}

#[derive(Debug, Clone)]
pub struct ResizeOptions {
    pub max_width: u32,
    pub max_height: u32,
    pub allow_upscale: bool,
    pub cancel: CancellationToken,
}

impl ResizeOptions {
    pub fn new(max_width: u32, max_height: u32) -> Self {
        Self {
            max_width,
            max_height,
            allow_upscale: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn allow_upscale(mut self, allow: bool) -> Self {
        self.allow_upscale = allow;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn check(&self) -> Result<(), ResizeError> {
        if self.cancel.is_cancelled() {
            Err(ResizeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Decodes `source`, corrects its EXIF orientation and scales it to fill
/// `max_width`×`max_height` as much as possible while keeping its proportions.
pub async fn resize(source: &SourceBlob, options: ResizeOptions) -> Result<RgbaImage, ResizeError> {
    options.check()?;
    let bytes = Arc::clone(source.bytes());
    let worker_options = options.clone();
    run_cancellable(&options.cancel, move || decode_and_scale(&bytes, &worker_options)).await
}

/// Same fit as [`resize`] for an already decoded, upright bitmap.
pub async fn resize_bitmap(
    source: Arc<RgbaImage>,
    options: ResizeOptions,
) -> Result<Arc<RgbaImage>, ResizeError> {
    options.check()?;
    let (w, h) = source.dimensions();
    let target = fit_dimensions(w, h, 1, options.max_width, options.max_height, options.allow_upscale);
    if target == (w, h) {
        return Ok(source);
    }
    run_cancellable(&options.cancel, move || scale_rgba(&source, target.0, target.1))
        .await
        .map(Arc::new)
}

async fn run_cancellable<T, F>(cancel: &CancellationToken, job: F) -> Result<T, ResizeError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ResizeError> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(job);
    let out = select! {
        biased;
        _ = cancel.cancelled() => return Err(ResizeError::Cancelled),
        joined = handle => joined.map_err(|err| ResizeError::Worker(err.to_string()))?,
    };
    // The worker may have finished after the token fired.
    if cancel.is_cancelled() {
        return Err(ResizeError::Cancelled);
    }
    out
}

fn decode_and_scale(bytes: &[u8], options: &ResizeOptions) -> Result<RgbaImage, ResizeError> {
    let orientation = read_orientation(bytes).unwrap_or(1);
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| ResizeError::Decode(err.to_string()))?;
    let format = reader.format();
    let (raw_w, raw_h) = reader
        .into_dimensions()
        .map_err(|err| ResizeError::Decode(err.to_string()))?;
    let (target_w, target_h) = fit_dimensions(
        raw_w,
        raw_h,
        orientation,
        options.max_width,
        options.max_height,
        options.allow_upscale,
    );
    trace!(raw_w, raw_h, orientation, target_w, target_h, "computed resize target");

    let decoded = decode_rgba(bytes, format, target_w, target_h)?;
    options.check()?;
    let scaled = scale_rgba(&decoded, target_w, target_h)?;
    Ok(apply_orientation(scaled, orientation))
}

fn decode_rgba(
    bytes: &[u8],
    format: Option<ImageFormat>,
    target_w: u32,
    target_h: u32,
) -> Result<RgbaImage, ResizeError> {
    if matches!(format, Some(ImageFormat::Jpeg)) {
        match decode_jpeg_scaled(bytes, target_w, target_h) {
            Ok(img) => return Ok(img),
            Err(err) => {
                debug!("scaled JPEG decode failed, falling back: {err}");
            }
        }
    }

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| ResizeError::Decode(err.to_string()))?;
    Ok(reader
        .decode()
        .map_err(|err| ResizeError::Decode(err.to_string()))?
        .to_rgba8())
}

/// Lets the JPEG decoder drop DCT coefficients when the target is much smaller
/// than the stored image. The result is never smaller than the request.
fn decode_jpeg_scaled(bytes: &[u8], target_w: u32, target_h: u32) -> Result<RgbaImage, ResizeError> {
    use jpeg_decoder::Error as JpegError;

    let describe = |err: JpegError| match err {
        JpegError::Unsupported(feature) => {
            ResizeError::Decode(format!("unsupported JPEG feature: {feature:?}"))
        }
        other => ResizeError::Decode(other.to_string()),
    };

    let mut decoder = JpegDecoder::new(Cursor::new(bytes));
    let request_w = target_w.clamp(1, u16::MAX as u32) as u16;
    let request_h = target_h.clamp(1, u16::MAX as u32) as u16;
    decoder.scale(request_w, request_h).map_err(describe)?;
    let pixels = decoder.decode().map_err(describe)?;
    let info = decoder
        .info()
        .ok_or_else(|| ResizeError::Decode("missing image info while decoding JPEG".into()))?;
    let width = info.width as u32;
    let height = info.height as u32;

    let rgba = match info.pixel_format {
        PixelFormat::RGB24 => {
            let mut rgba = Vec::with_capacity(pixels.len() / 3 * 4);
            for chunk in pixels.chunks_exact(3) {
                rgba.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
            }
            rgba
        }
        PixelFormat::L8 => {
            let mut rgba = Vec::with_capacity(pixels.len() * 4);
            for &v in &pixels {
                rgba.extend_from_slice(&[v, v, v, 255]);
            }
            rgba
        }
        PixelFormat::CMYK32 | PixelFormat::L16 => {
            return Err(ResizeError::Decode(format!(
                "pixel format {:?} not handled by the scaled decoder",
                info.pixel_format
            )));
        }
    };

    RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| ResizeError::Decode("decoded JPEG buffer has the wrong length".into()))
}

pub(crate) fn read_orientation(bytes: &[u8]) -> Option<u16> {
    let mut cursor = Cursor::new(bytes);
    let exif = exif::Reader::new().read_from_container(&mut cursor).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let value = field.value.get_uint(0)?;
    Some(value as u16)
}

/// Turns stored pixels upright according to their EXIF orientation.
fn apply_orientation(img: RgbaImage, orientation: u16) -> RgbaImage {
    match orientation {
        2 => imageops::flip_horizontal(&img),
        3 => imageops::rotate180(&img),
        4 => imageops::flip_vertical(&img),
        // transpose
        5 => imageops::flip_horizontal(&imageops::rotate90(&img)),
        6 => imageops::rotate90(&img),
        // transverse
        7 => imageops::flip_horizontal(&imageops::rotate270(&img)),
        8 => imageops::rotate270(&img),
        _ => img,
    }
}

fn scale_rgba(source: &RgbaImage, target_w: u32, target_h: u32) -> Result<RgbaImage, ResizeError> {
    if target_w == 0 || target_h == 0 {
        return Err(ResizeError::Scale("resize dimensions must be positive".into()));
    }
    if source.width() == target_w && source.height() == target_h {
        return Ok(source.clone());
    }

    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        source.as_raw(),
        fir::PixelType::U8x4,
    )
    .map_err(|err| ResizeError::Scale(err.to_string()))?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom));
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .map_err(|err| ResizeError::Scale(err.to_string()))?;
    RgbaImage::from_raw(target_w, target_h, dst_image.into_vec())
        .ok_or_else(|| ResizeError::Scale("resized buffer has the wrong length".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use image::{ImageEncoder, Rgba};

    // JPEG 2x1 with EXIF orientation 6 (rotate 90 CW), base64 encoded
    const ORIENT6_JPEG: &str = concat!(
        "/9j/4AAQSkZJRgABAQAAAQABAAD/4QAiRXhpZgAATU0AKgAAAAgAAQESAAMAAAABAAYAAAAAAAD/2wBDAAgGBgcGBQgHBwcJCQgKDBQNDAsLDBkSEw8UHRofHh0aHBwgJC4nICIsIxwcKDcpLDAxNDQ0Hyc5PTgyPC4zNDL/",
        "2wBDAQkJCQwLDBgNDRgyIRwhMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjL/wAARCAABAAIDASIAAhEBAxEB/8QAHwAAAQUBAQEBAQEAAAAAAAAAAAECAwQFBgcICQoL/8QAtRAAAgEDAwIEAwUFBAQAAAF9AQIDAAQRBRIhMUEGE1FhByJxFDKBkaEII0KxwRVS0fAkM2JyggkKFhcYGRolJicoKSo0NTY3ODk6Q0RFRkdISUpTVFVWV1hZWmNkZWZnaGlqc3R1dnd4eXqDhIWGh4iJipKTlJWWl5iZmqKjpKWmp6ipqrKztLW2t7i5usLDxMXGx8jJytLT1NXW19jZ2uHi4+Tl5ufo6erx8vP09fb3+Pn6/8QAHwEAAwEBAQEBAQEBAQAAAAAAAAECAwQFBgcICQoL/8QAtREAAgECBAQDBAcFBAQAAQJ3AAECAxEEBSExBhJBUQdhcRMiMoEIFEKRobHBCSMzUvAVYnLRChYkNOEl8RcYGRomJygpKjU2Nzg5OkNERUZHSElKU1RVVldYWVpjZGVmZ2hpanN0dXZ3eHl6goOEhYaHiImKkpOUlZaXmJmaoqOkpaanqKmqsrO0tba3uLm6wsPExcbHyMnK0tPU1dbX2Nna4uPk5ebn6Onq8vP09fb3+Pn6/9oADAMBAAIRAxEAPwDi6KKK+ZP3E//Z"
    );

    fn orient6_blob() -> SourceBlob {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(ORIENT6_JPEG)
            .unwrap();
        SourceBlob::new(Some("orient6.jpg".into()), bytes)
    }

    fn png_blob(w: u32, h: u32) -> SourceBlob {
        let img = RgbaImage::from_pixel(w, h, Rgba([200, 100, 50, 255]));
        let mut out = Vec::new();
        image::codecs::png::PngEncoder::new(&mut out)
            .write_image(img.as_raw(), w, h, image::ExtendedColorType::Rgba8)
            .unwrap();
        SourceBlob::new(Some("plain.png".into()), out)
    }

    #[test]
    fn reads_orientation_tag() {
        let blob = orient6_blob();
        assert_eq!(read_orientation(blob.bytes()), Some(6));
        assert_eq!(read_orientation(png_blob(2, 2).bytes()), None);
    }

    #[tokio::test]
    async fn applies_orientation_six() {
        let img = resize(&orient6_blob(), ResizeOptions::new(100, 100))
            .await
            .unwrap();
        assert_eq!(img.dimensions(), (1, 2));
    }

    #[tokio::test]
    async fn keeps_size_when_upscale_not_allowed() {
        let img = resize(&png_blob(30, 20), ResizeOptions::new(300, 300))
            .await
            .unwrap();
        assert_eq!(img.dimensions(), (30, 20));
    }

    #[tokio::test]
    async fn fills_box_when_upscale_allowed() {
        let img = resize(
            &png_blob(30, 20),
            ResizeOptions::new(300, 300).allow_upscale(true),
        )
        .await
        .unwrap();
        assert_eq!(img.dimensions(), (300, 200));
    }

    #[tokio::test]
    async fn downscales_to_fit_box() {
        let img = resize(&png_blob(300, 200), ResizeOptions::new(150, 150))
            .await
            .unwrap();
        assert_eq!(img.dimensions(), (150, 100));
        assert_eq!(img.get_pixel(75, 50), &Rgba([200, 100, 50, 255]));
    }

    #[tokio::test]
    async fn rejects_before_decoding_when_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        // Not an image at all: a decode attempt would fail with Decode instead.
        let garbage = SourceBlob::new(None, vec![1u8, 2, 3]);
        let err = resize(&garbage, ResizeOptions::new(10, 10).with_cancel(cancel))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn cancelling_mid_decode_reports_cancelled() {
        let cancel = CancellationToken::new();
        let blob = png_blob(3000, 3000);
        let task = tokio::spawn({
            let options = ResizeOptions::new(100, 100).with_cancel(cancel.clone());
            async move { resize(&blob, options).await }
        });
        // Let the task hand the decode to the blocking pool before cancelling.
        tokio::task::yield_now().await;
        cancel.cancel();
        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_returns_while_worker_is_still_blocked() {
        let cancel = CancellationToken::new();
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let worker_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            run_cancellable(&worker_cancel, move || {
                started_tx.send(()).unwrap();
                let _ = release_rx.recv();
                Ok(42u32)
            })
            .await
        });

        tokio::task::spawn_blocking(move || started_rx.recv().unwrap())
            .await
            .unwrap();
        cancel.cancel();
        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        release_tx.send(()).unwrap();
    }

    #[tokio::test]
    async fn reports_decode_failures() {
        let garbage = SourceBlob::new(None, vec![1u8, 2, 3]);
        let err = resize(&garbage, ResizeOptions::new(10, 10)).await.unwrap_err();
        assert!(matches!(err, ResizeError::Decode(_)));
    }

    #[tokio::test]
    async fn bitmap_resize_returns_same_bitmap_when_already_fitting() {
        let source = Arc::new(RgbaImage::new(40, 30));
        let out = resize_bitmap(Arc::clone(&source), ResizeOptions::new(40, 40))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&source, &out));
    }

    #[test]
    fn orientation_transforms_swap_dimensions() {
        let img = RgbaImage::new(4, 2);
        for o in 5..=8 {
            assert_eq!(apply_orientation(img.clone(), o).dimensions(), (2, 4));
        }
        for o in 1..=4 {
            assert_eq!(apply_orientation(img.clone(), o).dimensions(), (4, 2));
        }
    }
}
