use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::future::{join, try_join};
use image::{Rgba, RgbaImage};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::{AspectRatio, Configuration, SplitType};
use crate::error::Error;
use crate::events::{ProcessingState, SourceBlob};
use crate::export::{self, FileSaver, JPEG_MIME, NamedFile};
use crate::processing::color::{BackgroundColor, hex_to_rgba};
use crate::processing::layout::{BoundingBox, bounding_box};
use crate::processing::resize::{ResizeError, ResizeOptions};
use crate::reactive::effect::Effect;
use crate::reactive::signal::{Atom, Computed};
use crate::render::drawing::{draw_diptych, draw_single};
use crate::render::surface::CanvasHandle;
use crate::schedule::{FrameClock, FrameScheduler};
use crate::tasks::slots::{DefaultResizer, ImageId, ResizeSlot, Resizer, SlotRequest};

static NEXT_STATE_ID: AtomicU64 = AtomicU64::new(1);

const PRIMARY: usize = 0;
const SECONDARY: usize = 1;

/// A picked image after its first-pass resize.
///
/// Equality is identity: two picks of the same file are different images.
#[derive(Clone)]
pub struct SourceImage {
    id: ImageId,
    name: Option<String>,
    bitmap: Arc<RgbaImage>,
}

impl SourceImage {
    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn bitmap(&self) -> &Arc<RgbaImage> {
        &self.bitmap
    }
}

impl PartialEq for SourceImage {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for SourceImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceImage")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("dimensions", &self.bitmap.dimensions())
            .finish()
    }
}

/// Everything one paint needs, derived from the composition parameters.
#[derive(Clone, PartialEq)]
struct RedrawPlan {
    aspect_ratio: AspectRatio,
    split: SplitType,
    border: u32,
    fill: Rgba<u8>,
    diptych: bool,
    bbox: BoundingBox,
    images: [Option<SourceImage>; 2],
}

/// The composition state of one editing session.
///
/// Setters are synchronous and only queue a redraw; the attached canvas is
/// repainted on the next frame. Clones share the same state.
#[derive(Clone)]
pub struct CanvasState {
    inner: Arc<StateInner>,
}

struct StateInner {
    id: u64,
    config: Configuration,
    scheduler: FrameScheduler,
    resizer: Arc<dyn Resizer>,

    background: Atom<BackgroundColor>,
    aspect_ratio: Atom<AspectRatio>,
    border: Atom<u32>,
    split: Atom<SplitType>,
    images: [Atom<Option<SourceImage>>; 2],
    processing: Atom<ProcessingState>,

    color_hex: Computed<String>,
    is_diptych: Computed<bool>,
    plan: Computed<RedrawPlan>,

    slots: [ResizeSlot; 2],
    selections: Mutex<[Selection; 2]>,
    next_image: AtomicU64,

    paint_generation: AtomicU64,
    paints_in_flight: AtomicUsize,
    paint_done: Notify,

    attached: Mutex<Option<Attached>>,
    next_attachment: AtomicU64,
}

/// Latest pick for one image position.
#[derive(Default)]
struct Selection {
    ticket: u64,
    cancel: CancellationToken,
    pending: bool,
}

/// One position's share of a pick; it commits only while its ticket is current.
struct Ticket {
    slot: usize,
    ticket: u64,
    cancel: CancellationToken,
}

struct Attached {
    id: u64,
    canvas: CanvasHandle,
    _redraw: Effect,
}

/// Keeps a canvas attached; dropping it (or calling [`detach`](Self::detach))
/// stops repainting.
#[must_use = "dropping the attachment detaches the canvas"]
pub struct CanvasAttachment {
    state: Weak<StateInner>,
    id: u64,
}

impl CanvasAttachment {
    pub fn detach(self) {}
}

impl Drop for CanvasAttachment {
    fn drop(&mut self) {
        if let Some(inner) = self.state.upgrade() {
            inner.detach(self.id);
        }
    }
}

impl CanvasState {
    pub fn new(config: &Configuration) -> Self {
        Self::with_parts(
            config,
            FrameScheduler::new(config.frame_clock()),
            Arc::new(DefaultResizer),
        )
    }

    pub fn with_parts(
        config: &Configuration,
        scheduler: FrameScheduler,
        resizer: Arc<dyn Resizer>,
    ) -> Self {
        let background = Atom::new("background", config.background_color);
        let aspect_ratio = Atom::new("aspect-ratio", config.aspect_ratio);
        let border = Atom::new("border", config.border.min(config.max_border));
        let split = Atom::new("split", config.split);
        let images: [Atom<Option<SourceImage>>; 2] =
            [Atom::new("primary", None), Atom::new("secondary", None)];

        let color_hex = {
            let background = background.clone();
            Computed::new("color-hex", move |cx| background.get(cx).to_hex())
        };
        let is_diptych = {
            let [primary, secondary] = images.clone();
            Computed::new("is-diptych", move |cx| {
                primary.get(cx).is_some() && secondary.get(cx).is_some()
            })
        };
        let plan = {
            let (aspect_ratio, border, split) = (aspect_ratio.clone(), border.clone(), split.clone());
            let (color_hex, is_diptych) = (color_hex.clone(), is_diptych.clone());
            let [primary, secondary] = images.clone();
            Computed::new("redraw-plan", move |cx| {
                let aspect_ratio = aspect_ratio.get(cx);
                let border = border.get(cx);
                let split = split.get(cx);
                let fill = hex_to_rgba(&color_hex.get(cx)).unwrap_or(Rgba([255, 255, 255, 255]));
                let diptych = is_diptych.get(cx);
                let (primary, secondary) = (primary.get(cx), secondary.get(cx));
                let images = if diptych {
                    [primary, secondary]
                } else {
                    [primary.or(secondary), None]
                };
                RedrawPlan {
                    aspect_ratio,
                    split,
                    border,
                    fill,
                    diptych,
                    bbox: bounding_box(aspect_ratio, border, split, diptych),
                    images,
                }
            })
        };

        let slots = [
            ResizeSlot::new("primary", Arc::clone(&resizer)),
            ResizeSlot::new("secondary", Arc::clone(&resizer)),
        ];
        let id = NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed);
        debug!(state = id, clock = ?scheduler.clock(), "canvas state created");

        Self {
            inner: Arc::new(StateInner {
                id,
                config: config.clone(),
                scheduler,
                resizer,
                background,
                aspect_ratio,
                border,
                split,
                images,
                processing: Atom::new("processing", ProcessingState::Inert),
                color_hex,
                is_diptych,
                plan,
                slots,
                selections: Mutex::new(Default::default()),
                next_image: AtomicU64::new(1),
                paint_generation: AtomicU64::new(0),
                paints_in_flight: AtomicUsize::new(0),
                paint_done: Notify::new(),
                attached: Mutex::new(None),
                next_attachment: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.inner.config
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.inner.scheduler
    }

    pub fn set_background_color(&self, color: BackgroundColor) {
        if self.inner.background.set(color) {
            debug!(%color, "background colour changed");
        }
    }

    /// Parses and applies a colour; malformed input keeps the current colour.
    pub fn set_background_color_str(&self, raw: &str) -> bool {
        match raw.parse::<BackgroundColor>() {
            Ok(color) => {
                self.set_background_color(color);
                true
            }
            Err(err) => {
                warn!(%err, "ignoring background colour");
                false
            }
        }
    }

    pub fn set_aspect_ratio(&self, aspect_ratio: AspectRatio) {
        if self.inner.aspect_ratio.set(aspect_ratio) {
            debug!(aspect_ratio = aspect_ratio.id(), "aspect ratio changed");
        }
    }

    pub fn select_aspect_ratio(&self, id: &str) -> bool {
        match AspectRatio::from_id(id) {
            Some(aspect_ratio) => {
                self.set_aspect_ratio(aspect_ratio);
                true
            }
            None => {
                warn!(id, "unknown aspect ratio; ignoring");
                false
            }
        }
    }

    /// Sets the border, clamped to `max-border`.
    pub fn set_border(&self, border: u32) {
        let max = self.inner.config.max_border;
        if border > max {
            warn!(border, max, "border clamped");
        }
        if self.inner.border.set(border.min(max)) {
            debug!(border = border.min(max), "border changed");
        }
    }

    pub fn set_split_type(&self, split: SplitType) {
        if self.inner.split.set(split) {
            debug!(split = split.as_str(), "split changed");
        }
    }

    /// Loads a fresh selection of one or two images.
    ///
    /// A single image clears the second slot. A newer pick for a slot
    /// supersedes this one for that slot only; a fully superseded selection
    /// returns `Ok(())` without committing.
    pub async fn set_images(&self, primary: SourceBlob, secondary: Option<SourceBlob>) -> Result<(), Error> {
        check_media(&primary)?;
        if let Some(secondary) = &secondary {
            check_media(secondary)?;
        }
        let [first_ticket, second_ticket] = self.inner.begin_selection([PRIMARY, SECONDARY]);
        info!(
            primary = primary.name(),
            secondary = secondary.as_ref().and_then(|blob| blob.name()),
            "loading selection"
        );

        let first = self.inner.first_pass(primary, first_ticket.cancel.clone());
        let second = async {
            match secondary {
                Some(blob) => self
                    .inner
                    .first_pass(blob, second_ticket.cancel.clone())
                    .await
                    .map(Some),
                None => Ok(None),
            }
        };
        let (first, second) = join(first, second).await;
        self.inner
            .finish_selection([(first_ticket, first.map(Some)), (second_ticket, second)])
    }

    /// Replaces the first image, keeping the second.
    pub async fn set_primary_image(&self, blob: SourceBlob) -> Result<(), Error> {
        self.set_one(PRIMARY, blob).await
    }

    /// Replaces the second image, keeping the first.
    pub async fn set_secondary_image(&self, blob: SourceBlob) -> Result<(), Error> {
        self.set_one(SECONDARY, blob).await
    }

    async fn set_one(&self, slot: usize, blob: SourceBlob) -> Result<(), Error> {
        check_media(&blob)?;
        let [ticket] = self.inner.begin_selection([slot]);
        let outcome = self.inner.first_pass(blob, ticket.cancel.clone()).await;
        self.inner.finish_selection([(ticket, outcome.map(Some))])
    }

    pub fn clear_images(&self) {
        let tickets = self.inner.begin_selection([PRIMARY, SECONDARY]);
        // Empty outcomes cannot fail.
        let _ = self.inner.finish_selection(tickets.map(|ticket| (ticket, Ok(None))));
    }

    /// Starts painting into `canvas` on every frame where the composition changed.
    ///
    /// Attaching again replaces the previous destination.
    pub fn attach_to_canvas(&self, canvas: CanvasHandle) -> CanvasAttachment {
        let id = self.inner.next_attachment.fetch_add(1, Ordering::Relaxed);
        canvas.claim(self.inner.id);

        let weak = Arc::downgrade(&self.inner);
        let target = canvas.clone();
        let redraw = Effect::new("redraw", &self.inner.scheduler, move |cx| {
            if let Some(inner) = weak.upgrade() {
                let plan = inner.plan.get(cx);
                StateInner::start_paint(&inner, &target, plan);
            }
        });

        let previous = self
            .inner
            .attached
            .lock()
            .expect("attachment poisoned")
            .replace(Attached {
                id,
                canvas: canvas.clone(),
                _redraw: redraw,
            });
        if let Some(previous) = previous {
            if !previous.canvas.same_surface(&canvas) {
                previous.canvas.release(self.inner.id);
            }
            debug!(state = self.inner.id, "replaced canvas attachment");
        }
        debug!(state = self.inner.id, attachment = id, "canvas attached");

        CanvasAttachment {
            state: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn canvas(&self) -> Option<CanvasHandle> {
        let attached = self.inner.attached.lock().expect("attachment poisoned");
        attached.as_ref().map(|attached| attached.canvas.clone())
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        self.inner.aspect_ratio.peek()
    }

    pub fn border(&self) -> u32 {
        self.inner.border.peek()
    }

    pub fn split_type(&self) -> SplitType {
        self.inner.split.peek()
    }

    pub fn background_color(&self) -> BackgroundColor {
        self.inner.background.peek()
    }

    pub fn color_hex(&self) -> String {
        self.inner.color_hex.peek()
    }

    pub fn is_diptych(&self) -> bool {
        self.inner.is_diptych.peek()
    }

    pub fn processing_state(&self) -> ProcessingState {
        self.inner.processing.peek()
    }

    pub fn primary_image(&self) -> Option<SourceImage> {
        self.inner.images[PRIMARY].peek()
    }

    pub fn secondary_image(&self) -> Option<SourceImage> {
        self.inner.images[SECONDARY].peek()
    }

    /// Bitmap currently held by the layout slot, if its resize has committed.
    pub fn layout_bitmap(&self, slot: usize) -> Option<Arc<RgbaImage>> {
        self.inner.slots.get(slot).and_then(ResizeSlot::committed)
    }

    /// Runs the queued frame now.
    pub fn flush_frame(&self) -> usize {
        self.inner.scheduler.flush()
    }

    /// Waits until no frame is queued and no paint is running.
    ///
    /// With a manual clock the queued frames are flushed here.
    pub async fn settled(&self) {
        let inner = &self.inner;
        loop {
            let notified = inner.paint_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let queued = !inner.scheduler.is_idle();
            let clock = inner.scheduler.clock();
            if queued && clock == FrameClock::Manual {
                inner.scheduler.flush();
                continue;
            }
            let painting = inner.paints_in_flight.load(Ordering::Acquire) > 0;
            if !queued && !painting {
                return;
            }
            match clock {
                FrameClock::Interval(interval) if !painting => sleep(interval).await,
                _ => notified.await,
            }
        }
    }

    /// File name the current composition is exported under.
    pub fn output_filename(&self) -> String {
        let plan = self.inner.plan.peek();
        let names: Vec<String> = plan
            .images
            .iter()
            .flatten()
            .filter_map(|image| image.name.clone())
            .collect();
        export::output_filename(plan.aspect_ratio, plan.diptych, names.iter().map(String::as_str))
    }

    /// Encodes the attached canvas as a JPEG named after the composition.
    pub fn file_to_share(&self) -> Result<NamedFile, Error> {
        let canvas = self.canvas().ok_or(Error::Detached)?;
        let pixels = canvas.snapshot()?;
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(Error::Canvas("nothing painted yet".to_string()));
        }
        let bytes = export::encode_jpeg(&pixels, self.inner.config.jpeg_quality)?;
        Ok(NamedFile {
            name: self.output_filename(),
            mime: JPEG_MIME.to_string(),
            bytes,
        })
    }

    pub fn save_file(&self, saver: &dyn FileSaver) -> Result<NamedFile, Error> {
        let file = self.file_to_share()?;
        saver.save(&file)?;
        Ok(file)
    }
}

fn check_media(blob: &SourceBlob) -> Result<(), Error> {
    if blob.is_image() {
        return Ok(());
    }
    let media_type = blob.media_type().unwrap_or_default().to_string();
    warn!(name = blob.name(), media_type, "rejecting non-image file");
    Err(Error::UnsupportedMedia(media_type))
}

impl StateInner {
    /// Cancels the pending picks for `slots` and hands out a ticket per slot.
    ///
    /// Each slot gets its own token, so a later pick for one position leaves
    /// the other half of a pending pair alone.
    fn begin_selection<const N: usize>(&self, slots: [usize; N]) -> [Ticket; N] {
        let mut selections = self.selections.lock().expect("selection poisoned");
        let tickets = slots.map(|slot| {
            let selection = &mut selections[slot];
            selection.cancel.cancel();
            selection.ticket += 1;
            selection.cancel = CancellationToken::new();
            selection.pending = true;
            Ticket {
                slot,
                ticket: selection.ticket,
                cancel: selection.cancel.clone(),
            }
        });
        self.processing.set(ProcessingState::Processing);
        tickets
    }

    async fn first_pass(&self, blob: SourceBlob, cancel: CancellationToken) -> Result<SourceImage, ResizeError> {
        let side = self.config.first_pass_max_dimension;
        let options = ResizeOptions::new(side, side)
            .allow_upscale(true)
            .with_cancel(cancel);
        let name = blob.name().map(str::to_owned);
        let bitmap = self.resizer.resize_blob(blob, options).await?;
        let id = self.next_image.fetch_add(1, Ordering::Relaxed);
        trace!(image = id, ?name, dimensions = ?bitmap.dimensions(), "first pass done");
        Ok(SourceImage {
            id,
            name,
            bitmap: Arc::new(bitmap),
        })
    }

    /// Commits the outcomes whose tickets are still current.
    ///
    /// A real failure in any current slot commits nothing.
    fn finish_selection<const N: usize>(
        &self,
        outcomes: [(Ticket, Result<Option<SourceImage>, ResizeError>); N],
    ) -> Result<(), Error> {
        // Held while committing so a newer selection cannot start in between.
        let mut selections = self.selections.lock().expect("selection poisoned");
        let mut commits = Vec::with_capacity(N);
        let mut failure = None;
        for (ticket, outcome) in outcomes {
            let selection = &mut selections[ticket.slot];
            if selection.ticket != ticket.ticket {
                debug!(slot = ticket.slot, "selection superseded");
                continue;
            }
            selection.pending = false;
            match outcome {
                Ok(image) => commits.push((ticket.slot, image)),
                Err(err) if err.is_cancelled() => trace!(slot = ticket.slot, "first pass cancelled"),
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }

        if let Some(err) = failure {
            error!(%err, "failed to load selected image");
            self.processing.set(ProcessingState::Error);
            return Err(err.into());
        }
        for (slot, image) in commits {
            self.images[slot].set(image);
        }
        if selections.iter().all(|selection| !selection.pending) {
            self.processing.set(ProcessingState::Inert);
        }
        Ok(())
    }

    fn start_paint(inner: &Arc<StateInner>, canvas: &CanvasHandle, plan: RedrawPlan) {
        let generation = inner.paint_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let Ok(handle) = Handle::try_current() else {
            error!(generation, "no tokio runtime to paint on");
            return;
        };

        let allow_upscale = inner.config.layout_allow_upscale;
        let [first, second] = plan.images.clone().map(|image| {
            image.map(|image| {
                let request = SlotRequest {
                    image: image.id,
                    bbox: plan.bbox,
                    allow_upscale,
                };
                (request, image.bitmap)
            })
        });
        let pending = try_join(
            inner.slots[PRIMARY].resolve(first),
            inner.slots[SECONDARY].resolve(second),
        );
        if plan.images.iter().any(Option::is_some) {
            inner.processing.set(ProcessingState::Processing);
        }
        trace!(
            generation,
            aspect_ratio = plan.aspect_ratio.id(),
            border = plan.border,
            diptych = plan.diptych,
            "paint scheduled"
        );

        inner.paints_in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlightPaint(Arc::clone(inner));
        let canvas = canvas.clone();
        handle.spawn(async move {
            let inner = &guard.0;
            match pending.await {
                Err(err) if err.is_cancelled() => {
                    trace!(generation, "paint superseded while resizing");
                    inner.settle_processing();
                }
                Err(err) => {
                    error!(generation, %err, "failed to resize images for paint");
                    inner.processing.set(ProcessingState::Error);
                }
                Ok((first, second)) => inner.paint(&canvas, &plan, generation, first, second),
            }
        });
    }

    fn paint(
        &self,
        canvas: &CanvasHandle,
        plan: &RedrawPlan,
        generation: u64,
        first: Option<Arc<RgbaImage>>,
        second: Option<Arc<RgbaImage>>,
    ) {
        let latest = self.paint_generation.load(Ordering::Acquire);
        if latest != generation {
            debug!(generation, latest, "newer paint started; skipping");
            self.settle_processing();
            return;
        }
        let gap_fraction = self.config.diptych_gap_fraction;
        let painted = canvas.paint(self.id, |dest| {
            if plan.diptych {
                draw_diptych(
                    dest,
                    first.as_deref(),
                    second.as_deref(),
                    plan.aspect_ratio,
                    plan.border,
                    plan.fill,
                    plan.split,
                    gap_fraction,
                );
            } else {
                draw_single(dest, first.as_deref(), plan.aspect_ratio, plan.fill);
            }
        });
        match painted {
            Ok(true) => debug!(generation, diptych = plan.diptych, "painted canvas"),
            Ok(false) => debug!(generation, "canvas owned by another state; not painting"),
            Err(err) => error!(generation, %err, "failed to paint canvas"),
        }
        self.settle_processing();
    }

    /// Drops a leftover `Processing` once no other paint or pick would clear it.
    ///
    /// Called from inside a paint task, which counts itself as in flight.
    fn settle_processing(&self) {
        if self.paints_in_flight.load(Ordering::Acquire) > 1 {
            return;
        }
        let selections = self.selections.lock().expect("selection poisoned");
        if selections.iter().any(|selection| selection.pending) {
            return;
        }
        if self.processing.peek() == ProcessingState::Processing {
            self.processing.set(ProcessingState::Inert);
        }
    }

    fn detach(&self, id: u64) {
        let detached = {
            let mut attached = self.attached.lock().expect("attachment poisoned");
            match attached.as_ref() {
                Some(current) if current.id == id => attached.take(),
                _ => None,
            }
        };
        if let Some(detached) = detached {
            detached.canvas.release(self.id);
            self.paint_generation.fetch_add(1, Ordering::AcqRel);
            debug!(state = self.id, attachment = id, "canvas detached");
        }
    }
}

/// Counts a paint task as running until it is dropped.
struct InFlightPaint(Arc<StateInner>);

impl Drop for InFlightPaint {
    fn drop(&mut self) {
        self.0.paints_in_flight.fetch_sub(1, Ordering::AcqRel);
        self.0.paint_done.notify_waiters();
    }
}

impl fmt::Debug for CanvasState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanvasState")
            .field("id", &self.inner.id)
            .field("aspect_ratio", &self.aspect_ratio())
            .field("border", &self.border())
            .field("split", &self.split_type())
            .field("background", &self.color_hex())
            .field("diptych", &self.is_diptych())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual_state() -> CanvasState {
        CanvasState::with_parts(
            &Configuration::default(),
            FrameScheduler::manual(),
            Arc::new(DefaultResizer),
        )
    }

    #[test]
    fn defaults_come_from_configuration() {
        let state = manual_state();
        assert_eq!(state.aspect_ratio(), AspectRatio::FourByFive);
        assert_eq!(state.border(), 64);
        assert_eq!(state.split_type(), SplitType::Horizontal);
        assert_eq!(state.color_hex(), "#ffffff");
        assert!(!state.is_diptych());
        assert_eq!(state.processing_state(), ProcessingState::Inert);
    }

    #[test]
    fn string_setters_reject_bad_input() {
        let state = manual_state();
        assert!(state.set_background_color_str("#336699"));
        assert!(!state.set_background_color_str("not a colour"));
        assert_eq!(state.color_hex(), "#336699");

        assert!(state.select_aspect_ratio("9x16"));
        assert!(!state.select_aspect_ratio("3x2"));
        assert_eq!(state.aspect_ratio(), AspectRatio::NineBySixteen);
    }

    #[test]
    fn border_is_clamped_to_max() {
        let state = manual_state();
        state.set_border(10_000);
        assert_eq!(state.border(), 500);
        state.set_border(0);
        assert_eq!(state.border(), 0);
    }

    #[test]
    fn setters_queue_one_frame() {
        let state = manual_state();
        let _attachment = state.attach_to_canvas(CanvasHandle::new());
        assert_eq!(state.scheduler().pending(), 1);
        state.set_border(12);
        state.set_split_type(SplitType::Vertical);
        state.set_background_color_str("#000000");
        assert_eq!(state.scheduler().pending(), 1);
    }

    #[test]
    fn filename_without_images_uses_canvas() {
        let state = manual_state();
        state.set_aspect_ratio(AspectRatio::Square);
        assert_eq!(state.output_filename(), "framed-1x1-canvas");
    }

    #[test]
    fn export_requires_an_attached_canvas() {
        let state = manual_state();
        assert!(matches!(state.file_to_share(), Err(Error::Detached)));
    }

    #[tokio::test]
    async fn background_only_paint_fills_canvas() {
        let state = manual_state();
        let canvas = CanvasHandle::new();
        let _attachment = state.attach_to_canvas(canvas.clone());
        state.set_background_color_str("#102030");
        state.settled().await;
        let pixels = canvas.snapshot().unwrap();
        assert_eq!(pixels.dimensions(), (1600, 2000));
        assert_eq!(*pixels.get_pixel(0, 0), Rgba([0x10, 0x20, 0x30, 255]));
    }

    #[tokio::test]
    async fn detached_state_stops_painting() {
        let state = manual_state();
        let canvas = CanvasHandle::new();
        let attachment = state.attach_to_canvas(canvas.clone());
        state.settled().await;
        let painted = canvas.paints();

        attachment.detach();
        state.set_aspect_ratio(AspectRatio::Square);
        state.settled().await;
        assert_eq!(canvas.paints(), painted);
        assert_eq!(canvas.dimensions().unwrap(), (1600, 2000));
    }

    #[tokio::test]
    async fn detaching_mid_paint_leaves_processing_inert() {
        let state = manual_state();
        let canvas = CanvasHandle::new();
        let attachment = state.attach_to_canvas(canvas.clone());
        let mut png = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(RgbaImage::from_pixel(300, 200, Rgba([9, 9, 9, 255])))
            .write_to(&mut png, image::ImageFormat::Png)
            .unwrap();
        state
            .set_images(SourceBlob::new(Some("p.png".into()), png.into_inner()), None)
            .await
            .unwrap();

        assert_eq!(state.flush_frame(), 1);
        assert_eq!(state.processing_state(), ProcessingState::Processing);
        attachment.detach();
        state.settled().await;

        assert_eq!(state.processing_state(), ProcessingState::Inert);
        assert_eq!(canvas.paints(), 0);
    }
}
