//! Per-player render subsystem.
//!
//! A [`VideoRenderer`] spawns one render thread, brings up the graphics
//! context and offscreen target on it, and from then on is the only route to
//! that GPU state. Decoder callbacks reach it through a cloneable
//! [`FrameNotifier`]; the owner observes progress through [`RenderEvent`]s.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use scheduler::{RenderScheduler, SchedulerError, TaskSubmitter};
use tracing::{debug, error, info, trace, warn};

use crate::compositor::{TextureCompositor, TextureSet};
use crate::context::{DisplayDriver, GraphicsContext};
use crate::error::PlayerError;
use crate::sink::{DecodedFrame, FrameLatch, FrameOutcome, FrameSink, FrameStats, NoopLatch, SinkOptions};
use crate::types::{
    ContextHandles, FrameTransform, PresentMode, RenderDimensions, RenderOptions, SharedContext,
    TextureId,
};

/// Notifications delivered to the owner of a [`VideoRenderer`].
#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    /// Setup finished; the offscreen texture can be registered with the host.
    Ready {
        offscreen_texture: TextureId,
        mode: PresentMode,
        dimensions: RenderDimensions,
        /// Allocated texture size. Only the `dimensions` corner at the
        /// texture origin holds the frame when the two differ.
        storage: RenderDimensions,
    },
    /// A frame was presented and the offscreen texture holds it.
    FramePresented { frame: u64 },
    Resized {
        dimensions: RenderDimensions,
        storage: RenderDimensions,
    },
    /// Forwarded from the decoder. GPU state is unaffected.
    DecoderError { reason: String },
    /// A fatal GPU error; the instance has released its GPU state.
    Failed { error: PlayerError },
    Disposed,
}

/// Callbacks a decoder invokes, from any thread.
pub trait DecoderEvents: Send + Sync {
    fn on_frame(&self, source: TextureId, transform: Option<FrameTransform>);
    fn on_size_changed(&self, width: u32, height: u32);
    fn on_error(&self, reason: &str);
}

/// Snapshot of render-thread state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderStats {
    pub frames: FrameStats,
    pub dimensions: RenderDimensions,
    pub storage: RenderDimensions,
}

struct RenderState<D: DisplayDriver> {
    compositor: TextureCompositor<D::Gl>,
    sink: FrameSink,
    context: GraphicsContext<D>,
}

impl<D: DisplayDriver> RenderState<D> {
    fn bring_up(
        driver: D,
        shared: SharedContext,
        options: &RenderOptions,
        latch: Box<dyn FrameLatch>,
    ) -> Result<Self, PlayerError> {
        let mut context = GraphicsContext::initialize(driver, shared, &options.context)?;
        let gl = context.load_gl()?;
        let compositor = TextureCompositor::setup(gl, options.initial_size, options.dimension_policy)?;
        let sink = FrameSink::new(context.present_mode(), SinkOptions::from(options), latch);
        Ok(Self {
            compositor,
            sink,
            context,
        })
    }

    /// Compositor resources first, then the context.
    fn release(mut self) {
        self.compositor.dispose();
        self.context.teardown();
    }
}

type RenderSlot<D> = Option<RenderState<D>>;

#[derive(Debug)]
struct Gate {
    accepting: AtomicBool,
    failed: AtomicBool,
}

impl Gate {
    fn is_open(&self) -> bool {
        self.accepting.load(Ordering::Acquire) && !self.failed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    fn fail(&self) {
        self.failed.store(true, Ordering::Release);
    }
}

/// Progress events (`FramePresented`, `Resized`, `DecoderError`) held for an
/// owner that is not reading. Further progress events are dropped.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// `Ready`, `Failed` and `Disposed` are each sent at most once per instance.
const LIFECYCLE_EVENTS: usize = 3;

/// Bounded owner-facing event channel with room reserved for lifecycle events.
#[derive(Debug)]
struct EventQueue {
    sender: Sender<RenderEvent>,
    progress: Mutex<()>,
    dropped: AtomicU64,
}

impl EventQueue {
    fn new() -> (Self, Receiver<RenderEvent>) {
        let (sender, receiver) = bounded(EVENT_QUEUE_CAPACITY + LIFECYCLE_EVENTS);
        let queue = Self {
            sender,
            progress: Mutex::new(()),
            dropped: AtomicU64::new(0),
        };
        (queue, receiver)
    }

    fn lifecycle(&self, event: RenderEvent) {
        if let Err(err) = self.sender.try_send(event) {
            warn!(event = ?err.into_inner(), "lifecycle event not delivered");
        }
    }

    fn progress(&self, event: RenderEvent) {
        // Serialised so progress events never eat into the lifecycle reserve.
        let _guard = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        if self.sender.len() >= EVENT_QUEUE_CAPACITY || self.sender.try_send(event).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(dropped, "event queue full; progress event dropped");
        }
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Handle for decoder callbacks. Cheap to clone and usable from any thread.
pub struct FrameNotifier<D: DisplayDriver> {
    submitter: TaskSubmitter<RenderSlot<D>>,
    gate: Arc<Gate>,
    events: Arc<EventQueue>,
    max_texture_size: u32,
    sync_timeout: Option<Duration>,
}

impl<D: DisplayDriver> Clone for FrameNotifier<D> {
    fn clone(&self) -> Self {
        Self {
            submitter: self.submitter.clone(),
            gate: Arc::clone(&self.gate),
            events: Arc::clone(&self.events),
            max_texture_size: self.max_texture_size,
            sync_timeout: self.sync_timeout,
        }
    }
}

impl<D: DisplayDriver> fmt::Debug for FrameNotifier<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameNotifier")
            .field("submitter", &self.submitter)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl<D: DisplayDriver> FrameNotifier<D> {
    /// Queues a draw of `frame` behind all earlier work and returns.
    pub fn frame_available(&self, frame: DecodedFrame) -> Result<(), PlayerError> {
        if !self.gate.is_open() {
            trace!(texture = %frame.source, "frame notification after shutdown dropped");
            return Err(PlayerError::Unavailable);
        }
        let gate = Arc::clone(&self.gate);
        let events = Arc::clone(&self.events);
        self.submitter
            .run_async(move |slot| draw_frame(slot, &frame, &gate, &events))
            .map_err(|err| match err {
                SchedulerError::Closed(_) => PlayerError::Unavailable,
                other => PlayerError::Scheduler(other),
            })
    }

    /// Resizes the offscreen target on the render thread and waits for it.
    pub fn update_size(&self, width: u32, height: u32) -> Result<(), PlayerError> {
        let dimensions = RenderDimensions::new(width, height);
        if !dimensions.fits(self.max_texture_size) {
            warn!(%dimensions, max = self.max_texture_size, "resize rejected");
            return Err(PlayerError::InvalidDimensions {
                dimensions,
                max: self.max_texture_size,
            });
        }
        if !self.gate.is_open() {
            return Err(PlayerError::Unavailable);
        }

        let gate = Arc::clone(&self.gate);
        let events = Arc::clone(&self.events);
        self.run_sync(move |slot| {
            let state = slot.as_mut().ok_or(PlayerError::Unavailable)?;
            if let Err(err) = state.compositor.update_size(dimensions) {
                let err = PlayerError::from(err);
                fail(slot, &gate, &events, err.clone());
                return Err(err);
            }
            let storage = state.compositor.storage_size();
            events.progress(RenderEvent::Resized { dimensions, storage });
            Ok(())
        })
    }

    /// Forwards a decoder failure to the owner.
    pub fn decoder_error(&self, reason: &str) {
        warn!(reason, "decoder reported an error");
        self.events.progress(RenderEvent::DecoderError {
            reason: reason.to_string(),
        });
    }

    fn run_sync<F, R>(&self, task: F) -> Result<R, PlayerError>
    where
        F: FnOnce(&mut RenderSlot<D>) -> Result<R, PlayerError> + Send + 'static,
        R: Send + 'static,
    {
        submit_sync(&self.submitter, self.sync_timeout, task)
    }
}

impl<D: DisplayDriver> DecoderEvents for FrameNotifier<D> {
    fn on_frame(&self, source: TextureId, transform: Option<FrameTransform>) {
        if let Err(err) = self.frame_available(DecodedFrame::new(source, transform)) {
            debug!(%err, "frame notification not queued");
        }
    }

    fn on_size_changed(&self, width: u32, height: u32) {
        if let Err(err) = self.update_size(width, height) {
            warn!(%err, width, height, "decoder resize failed");
        }
    }

    fn on_error(&self, reason: &str) {
        self.decoder_error(reason);
    }
}

fn submit_sync<S: 'static, F, R>(
    submitter: &TaskSubmitter<S>,
    timeout: Option<Duration>,
    task: F,
) -> Result<R, PlayerError>
where
    F: FnOnce(&mut S) -> Result<R, PlayerError> + Send + 'static,
    R: Send + 'static,
{
    let outcome = match timeout {
        Some(timeout) => submitter.run_sync_timeout(task, timeout),
        None => submitter.run_sync(task),
    };
    match outcome {
        Ok(result) => result,
        Err(SchedulerError::Closed(_)) => Err(PlayerError::Unavailable),
        Err(err) => Err(PlayerError::Scheduler(err)),
    }
}

fn draw_frame<D: DisplayDriver>(
    slot: &mut RenderSlot<D>,
    frame: &DecodedFrame,
    gate: &Gate,
    events: &EventQueue,
) {
    if !gate.is_open() {
        trace!("queued frame dropped during shutdown");
        return;
    }
    let Some(state) = slot.as_mut() else {
        return;
    };
    match state.sink.on_frame(&mut state.context, &mut state.compositor, frame) {
        Ok(FrameOutcome::Presented { frame, .. }) => {
            events.progress(RenderEvent::FramePresented { frame });
        }
        Ok(FrameOutcome::Rejected) => {}
        Err(err) => fail(slot, gate, events, err.into()),
    }
}

/// Tears the instance down on the render thread after a fatal error.
fn fail<D: DisplayDriver>(slot: &mut RenderSlot<D>, gate: &Gate, events: &EventQueue, err: PlayerError) {
    error!(%err, "render subsystem failed; releasing GPU state");
    gate.fail();
    if let Some(state) = slot.take() {
        state.release();
    }
    events.lifecycle(RenderEvent::Failed { error: err });
}

/// Render subsystem for one player instance.
///
/// Dropping it disposes it; call [`dispose`](Self::dispose) to observe the
/// outcome.
pub struct VideoRenderer<D: DisplayDriver> {
    scheduler: RenderScheduler<RenderSlot<D>>,
    notifier: FrameNotifier<D>,
    events: Receiver<RenderEvent>,
    textures: TextureSet,
    mode: PresentMode,
    disposed: bool,
}

impl<D: DisplayDriver> VideoRenderer<D> {
    /// Starts the render thread and performs setup on it. Returns once the
    /// offscreen texture exists.
    pub fn new(driver: D, shared: SharedContext, options: RenderOptions) -> Result<Self, PlayerError> {
        Self::with_latch(driver, shared, options, Box::new(NoopLatch))
    }

    pub fn with_latch(
        driver: D,
        shared: SharedContext,
        options: RenderOptions,
        latch: Box<dyn FrameLatch>,
    ) -> Result<Self, PlayerError> {
        let dimensions = options.initial_size;
        if !dimensions.fits(options.max_texture_size) {
            return Err(PlayerError::InvalidDimensions {
                dimensions,
                max: options.max_texture_size,
            });
        }

        let scheduler = RenderScheduler::spawn(options.thread_name.clone(), || None::<RenderState<D>>)?;
        let submitter = scheduler.submitter();
        let max_texture_size = options.max_texture_size;
        let sync_timeout = options.sync_timeout;

        let (textures, mode, storage) = submit_sync(&submitter, sync_timeout, move |slot: &mut RenderSlot<D>| {
            let state = RenderState::bring_up(driver, shared, &options, latch)?;
            let textures = state.compositor.textures().ok_or(PlayerError::Unavailable)?;
            let mode = state.context.present_mode();
            let storage = state.compositor.storage_size();
            *slot = Some(state);
            Ok((textures, mode, storage))
        })?;

        let (events, events_rx) = EventQueue::new();
        let notifier = FrameNotifier {
            submitter,
            gate: Arc::new(Gate {
                accepting: AtomicBool::new(true),
                failed: AtomicBool::new(false),
            }),
            events: Arc::new(events),
            max_texture_size,
            sync_timeout,
        };
        notifier.events.lifecycle(RenderEvent::Ready {
            offscreen_texture: textures.destination,
            mode,
            dimensions,
            storage,
        });
        info!(
            thread = scheduler.thread_name(),
            offscreen = %textures.destination,
            %mode,
            %dimensions,
            "video renderer ready"
        );

        Ok(Self {
            scheduler,
            notifier,
            events: events_rx,
            textures,
            mode,
            disposed: false,
        })
    }

    /// Destination texture the host composites from.
    pub fn offscreen_texture(&self) -> TextureId {
        self.textures.destination
    }

    /// External texture the decoder must write frames into.
    pub fn source_texture(&self) -> TextureId {
        self.textures.source
    }

    pub fn present_mode(&self) -> PresentMode {
        self.mode
    }

    pub fn notifier(&self) -> FrameNotifier<D> {
        self.notifier.clone()
    }

    pub fn events(&self) -> Receiver<RenderEvent> {
        self.events.clone()
    }

    /// Progress events discarded because the owner left the queue full.
    pub fn dropped_events(&self) -> u64 {
        self.notifier.events.dropped()
    }

    pub fn frame_available(&self, frame: DecodedFrame) -> Result<(), PlayerError> {
        self.notifier.frame_available(frame)
    }

    pub fn update_size(&self, width: u32, height: u32) -> Result<(), PlayerError> {
        self.notifier.update_size(width, height)
    }

    pub fn is_failed(&self) -> bool {
        self.notifier.gate.failed.load(Ordering::Acquire)
    }

    /// Raw handles of the live context.
    pub fn context_handles(&self) -> Result<ContextHandles, PlayerError> {
        self.query(|state| state.context.handles().ok_or(PlayerError::Unavailable))
    }

    pub fn stats(&self) -> Result<RenderStats, PlayerError> {
        self.query(|state| {
            Ok(RenderStats {
                frames: state.sink.stats(),
                dimensions: state.compositor.dimensions(),
                storage: state.compositor.storage_size(),
            })
        })
    }

    fn query<R, F>(&self, read: F) -> Result<R, PlayerError>
    where
        F: FnOnce(&RenderState<D>) -> Result<R, PlayerError> + Send + 'static,
        R: Send + 'static,
    {
        if self.disposed || self.is_failed() {
            return Err(PlayerError::Unavailable);
        }
        self.notifier.run_sync(move |slot| {
            let state = slot.as_ref().ok_or(PlayerError::Unavailable)?;
            read(state)
        })
    }

    /// Stops accepting notifications, releases compositor resources and the
    /// context on the render thread, then joins it. Later calls are no-ops.
    pub fn dispose(&mut self) -> Result<(), PlayerError> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        self.notifier.gate.close();

        let released = self.scheduler.run_sync(|slot: &mut RenderSlot<D>| {
            if let Some(state) = slot.take() {
                state.release();
            }
        });
        let stopped = self.scheduler.shutdown();
        self.notifier.events.lifecycle(RenderEvent::Disposed);
        debug!(thread = self.scheduler.thread_name(), "video renderer disposed");

        match (released, stopped) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(err), _) | (_, Err(err)) => Err(PlayerError::Scheduler(err)),
        }
    }
}

impl<D: DisplayDriver> Drop for VideoRenderer<D> {
    fn drop(&mut self) {
        if let Err(err) = self.dispose() {
            warn!(%err, "video renderer dispose failed during drop");
        }
    }
}

impl<D: DisplayDriver> fmt::Debug for VideoRenderer<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoRenderer")
            .field("scheduler", &self.scheduler)
            .field("textures", &self.textures)
            .field("mode", &self.mode)
            .field("disposed", &self.disposed)
            .finish()
    }
}
