use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{self, BoxFuture, Shared};
use image::RgbaImage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::events::SourceBlob;
use crate::processing::layout::BoundingBox;
use crate::processing::resize::{self, ResizeError, ResizeOptions};

/// Identifies a committed source image for the lifetime of a canvas state.
pub type ImageId = u64;

/// Seam over the resize service so slot and canvas logic can be driven with
/// controlled timing.
pub trait Resizer: Send + Sync + 'static {
    fn resize_blob(
        &self,
        blob: SourceBlob,
        options: ResizeOptions,
    ) -> BoxFuture<'static, Result<RgbaImage, ResizeError>>;

    fn resize_bitmap(
        &self,
        bitmap: Arc<RgbaImage>,
        options: ResizeOptions,
    ) -> BoxFuture<'static, Result<Arc<RgbaImage>, ResizeError>>;
}

/// Decodes and scales on the blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultResizer;

impl Resizer for DefaultResizer {
    fn resize_blob(
        &self,
        blob: SourceBlob,
        options: ResizeOptions,
    ) -> BoxFuture<'static, Result<RgbaImage, ResizeError>> {
        async move { resize::resize(&blob, options).await }.boxed()
    }

    fn resize_bitmap(
        &self,
        bitmap: Arc<RgbaImage>,
        options: ResizeOptions,
    ) -> BoxFuture<'static, Result<Arc<RgbaImage>, ResizeError>> {
        resize::resize_bitmap(bitmap, options).boxed()
    }
}

/// What a slot is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRequest {
    pub image: ImageId,
    pub bbox: BoundingBox,
    pub allow_upscale: bool,
}

pub type SlotOutput = Result<Option<Arc<RgbaImage>>, ResizeError>;
pub type SlotFuture = Shared<BoxFuture<'static, SlotOutput>>;

/// Holds the layout-sized bitmap for one image position.
///
/// Each new request cancels the previous one and bumps the slot generation;
/// a resize only commits if its generation is still current when it finishes.
#[derive(Clone)]
pub struct ResizeSlot {
    name: &'static str,
    resizer: Arc<dyn Resizer>,
    state: Arc<Mutex<SlotState>>,
}

#[derive(Default)]
struct SlotState {
    generation: u64,
    in_flight: Option<InFlight>,
    committed: Option<(SlotRequest, Arc<RgbaImage>)>,
}

struct InFlight {
    request: SlotRequest,
    cancel: CancellationToken,
    future: SlotFuture,
}

impl ResizeSlot {
    pub fn new(name: &'static str, resizer: Arc<dyn Resizer>) -> Self {
        Self {
            name,
            resizer,
            state: Arc::new(Mutex::new(SlotState::default())),
        }
    }

    /// Future yielding the bitmap for `request`, or `None` for an empty slot.
    ///
    /// A request equal to the committed one resolves immediately; one equal to
    /// the request in flight shares its future.
    pub fn resolve(&self, request: Option<(SlotRequest, Arc<RgbaImage>)>) -> SlotFuture {
        let mut state = self.state.lock().expect("resize slot poisoned");
        let Some((request, source)) = request else {
            Self::supersede(&mut state);
            state.committed = None;
            return ready(Ok(None));
        };

        let reusable = state
            .committed
            .as_ref()
            .filter(|(committed, _)| *committed == request)
            .map(|(_, bitmap)| Arc::clone(bitmap));
        if let Some(bitmap) = reusable {
            trace!(slot = self.name, image = request.image, "reusing committed bitmap");
            Self::supersede(&mut state);
            return ready(Ok(Some(bitmap)));
        }
        if let Some(in_flight) = &state.in_flight {
            if in_flight.request == request {
                trace!(slot = self.name, image = request.image, "joining in-flight resize");
                return in_flight.future.clone();
            }
        }

        let generation = Self::supersede(&mut state);
        let cancel = CancellationToken::new();
        let options = ResizeOptions::new(request.bbox.max_width, request.bbox.max_height)
            .allow_upscale(request.allow_upscale)
            .with_cancel(cancel.clone());
        debug!(
            slot = self.name,
            image = request.image,
            generation,
            max_w = request.bbox.max_width,
            max_h = request.bbox.max_height,
            "resizing for layout"
        );
        let pending = self.resizer.resize_bitmap(source, options);
        let slot = Arc::clone(&self.state);
        let name = self.name;
        let future = async move {
            let outcome = pending.await;
            let mut state = slot.lock().expect("resize slot poisoned");
            if state.generation != generation {
                debug!(slot = name, generation, latest = state.generation, "dropping stale resize");
                return Err(ResizeError::Cancelled);
            }
            // A failed resize is not joined again; the next identical request retries.
            state.in_flight = None;
            let bitmap = outcome?;
            state.committed = Some((request, Arc::clone(&bitmap)));
            Ok(Some(bitmap))
        }
        .boxed()
        .shared();

        state.in_flight = Some(InFlight {
            request,
            cancel,
            future: future.clone(),
        });
        future
    }

    pub fn committed(&self) -> Option<Arc<RgbaImage>> {
        let state = self.state.lock().expect("resize slot poisoned");
        state.committed.as_ref().map(|(_, bitmap)| Arc::clone(bitmap))
    }

    fn supersede(state: &mut SlotState) -> u64 {
        if let Some(previous) = state.in_flight.take() {
            previous.cancel.cancel();
        }
        state.generation += 1;
        state.generation
    }
}

fn ready(output: SlotOutput) -> SlotFuture {
    future::ready(output).boxed().shared()
}
