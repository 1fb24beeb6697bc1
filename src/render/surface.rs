use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use image::RgbaImage;

use crate::error::Error;

/// Shared handle to the destination pixels a canvas state paints into.
///
/// Clones refer to the same surface. The handle remembers which state last
/// attached to it; paints from any other owner are refused.
#[derive(Clone)]
pub struct CanvasHandle {
    inner: Arc<SurfaceInner>,
}

struct SurfaceInner {
    pixels: Mutex<RgbaImage>,
    owner: AtomicU64,
    paints: AtomicU64,
}

/// Owner value of a surface nobody has attached to.
pub const NO_OWNER: u64 = 0;

impl CanvasHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SurfaceInner {
                pixels: Mutex::new(RgbaImage::new(0, 0)),
                owner: AtomicU64::new(NO_OWNER),
                paints: AtomicU64::new(0),
            }),
        }
    }

    pub fn claim(&self, owner: u64) {
        self.inner.owner.store(owner, Ordering::Release);
    }

    /// Clears the owner if it is still `owner`.
    pub fn release(&self, owner: u64) {
        let _ = self
            .inner
            .owner
            .compare_exchange(owner, NO_OWNER, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn same_surface(&self, other: &CanvasHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn owner(&self) -> u64 {
        self.inner.owner.load(Ordering::Acquire)
    }

    /// Runs `draw` against the pixels if `owner` still owns the surface.
    ///
    /// Returns `Ok(false)` without touching the pixels when ownership moved on.
    pub fn paint<F>(&self, owner: u64, draw: F) -> Result<bool, Error>
    where
        F: FnOnce(&mut RgbaImage),
    {
        let mut pixels = self
            .inner
            .pixels
            .lock()
            .map_err(|err| Error::Canvas(err.to_string()))?;
        if self.owner() != owner {
            return Ok(false);
        }
        draw(&mut *pixels);
        self.inner.paints.fetch_add(1, Ordering::AcqRel);
        Ok(true)
    }

    pub fn snapshot(&self) -> Result<RgbaImage, Error> {
        self.inner
            .pixels
            .lock()
            .map(|pixels| pixels.clone())
            .map_err(|err| Error::Canvas(err.to_string()))
    }

    pub fn dimensions(&self) -> Result<(u32, u32), Error> {
        self.inner
            .pixels
            .lock()
            .map(|pixels| pixels.dimensions())
            .map_err(|err| Error::Canvas(err.to_string()))
    }

    /// Number of completed paints.
    pub fn paints(&self) -> u64 {
        self.inner.paints.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for CanvasHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanvasHandle")
            .field("owner", &self.owner())
            .field("paints", &self.paints())
            .finish()
    }
}

impl Default for CanvasHandle {
    fn default() -> Self {
        Self::new()
    }
}
