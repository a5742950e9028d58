use std::thread;
use std::time::Duration;

use renderer::error::SetupError;
use renderer::headless::{DriverFault, GlFault, HeadlessDriver};
use renderer::{
    DecodedFrame, DecoderEvents, FrameTransform, PlayerError, PresentMode, RenderDimensions, RenderEvent,
    RenderOptions, SharedContext, VideoRenderer, EVENT_QUEUE_CAPACITY,
};

const WAIT: Duration = Duration::from_secs(5);

fn start(shared: SharedContext) -> (VideoRenderer<HeadlessDriver>, HeadlessDriver) {
    let driver = HeadlessDriver::new();
    let probe = driver.clone();
    let renderer = VideoRenderer::new(driver, shared, RenderOptions::default()).expect("renderer");
    (renderer, probe)
}

fn frame(renderer: &VideoRenderer<HeadlessDriver>) -> DecodedFrame {
    DecodedFrame::new(renderer.source_texture(), Some(FrameTransform::IDENTITY))
}

fn presented(events: &crossbeam_channel::Receiver<RenderEvent>) -> Vec<u64> {
    events
        .try_iter()
        .filter_map(|event| match event {
            RenderEvent::FramePresented { frame } => Some(frame),
            _ => None,
        })
        .collect()
}

#[test]
fn first_frame_draws_two_passes_and_swaps_once() {
    let (renderer, probe) = start(SharedContext::None);
    let events = renderer.events();
    assert!(renderer.offscreen_texture().get() > 0);
    assert_eq!(renderer.present_mode(), PresentMode::OffscreenAndOnscreen);

    renderer.frame_available(frame(&renderer)).expect("queued");
    let stats = renderer.stats().expect("stats");
    assert_eq!(stats.frames.frames_presented, 1);

    let draws = probe.gl().draws();
    assert_eq!(draws.len(), 2);
    assert!(draws[0].framebuffer.is_some());
    assert!(draws[1].framebuffer.is_none());
    assert_eq!(draws[1].texture, Some(renderer.offscreen_texture()));
    assert_eq!(probe.swap_count(), 1);
    assert!(!renderer.is_failed());
    assert_eq!(presented(&events), vec![1]);
}

#[test]
fn resize_changes_viewport_of_following_frames() {
    let (renderer, probe) = start(SharedContext::None);
    renderer.update_size(1920, 1080).expect("resize");
    renderer.frame_available(frame(&renderer)).expect("queued");

    let stats = renderer.stats().expect("stats");
    assert_eq!(stats.dimensions, RenderDimensions::new(1920, 1080));
    assert_eq!(stats.storage, RenderDimensions::new(1920, 1080));
    assert_eq!(stats.frames.frames_presented, 1);
    assert!(probe
        .gl()
        .draws()
        .iter()
        .all(|draw| draw.viewport == RenderDimensions::new(1920, 1080)));
    assert!(renderer
        .events()
        .try_iter()
        .any(|event| event
            == RenderEvent::Resized {
                dimensions: RenderDimensions::new(1920, 1080),
                storage: RenderDimensions::new(1920, 1080),
            }));
}

#[test]
fn shared_context_only_runs_offscreen_pass() {
    let (renderer, probe) = start(SharedContext::from_raw(0x5000));
    assert_eq!(renderer.present_mode(), PresentMode::OffscreenOnly);

    for _ in 0..5 {
        renderer.frame_available(frame(&renderer)).expect("queued");
    }
    let stats = renderer.stats().expect("stats");
    assert_eq!(stats.frames.offscreen_passes, 5);
    assert_eq!(stats.frames.onscreen_passes, 0);
    assert!(probe.gl().draws().iter().all(|draw| draw.framebuffer.is_some()));
}

#[test]
fn concurrent_producers_never_interleave_draws() {
    let (renderer, probe) = start(SharedContext::None);
    let producers: Vec<_> = (0..4)
        .map(|_| {
            let notifier = renderer.notifier();
            let source = renderer.source_texture();
            thread::spawn(move || {
                for _ in 0..25 {
                    notifier.on_frame(source, None);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer");
    }

    let stats = renderer.stats().expect("stats");
    assert_eq!(stats.frames.frames_presented, 100);

    let gl = probe.gl();
    let draws = gl.draws();
    assert_eq!(draws.len(), 200);
    let render_thread = draws[0].thread;
    assert_ne!(render_thread, thread::current().id());
    assert!(draws.iter().all(|draw| draw.thread == render_thread));
    assert!(draws.windows(2).all(|pair| pair[0].seq < pair[1].seq));
    // Each frame is an offscreen draw immediately followed by its onscreen draw.
    for pair in draws.chunks(2) {
        assert!(pair[0].framebuffer.is_some());
        assert!(pair[1].framebuffer.is_none());
    }
    assert_eq!(gl.foreign_calls(), 0);
}

#[test]
fn attachments_stay_in_step_across_resize_sequences() {
    let (renderer, probe) = start(SharedContext::None);
    let gl = probe.gl();
    let notifier = renderer.notifier();
    let source = renderer.source_texture();
    let producer = thread::spawn(move || {
        for _ in 0..50 {
            notifier.on_frame(source, None);
        }
    });

    let sizes = [(1920, 1080), (320, 240), (4096, 2160), (1, 1), (641, 479)];
    for (width, height) in sizes {
        renderer.update_size(width, height).expect("resize");
        let stats = renderer.stats().expect("stats");
        assert_eq!(stats.dimensions, RenderDimensions::new(width, height));
    }
    producer.join().expect("producer");
    let stats = renderer.stats().expect("stats");
    assert!(!renderer.is_failed());
    assert_eq!(stats.frames.frames_presented, 50);
    assert_eq!(gl.foreign_calls(), 0);
}

#[test]
fn dispose_releases_everything_and_is_idempotent() {
    let (mut renderer, probe) = start(SharedContext::None);
    let events = renderer.events();
    renderer.frame_available(frame(&renderer)).expect("queued");

    renderer.dispose().expect("dispose");
    renderer.dispose().expect("second dispose");

    assert!(probe.gl().live_objects().is_empty());
    assert!(probe.live_driver_objects().is_empty());
    assert_eq!(probe.gl().foreign_calls(), 0);
    assert_eq!(renderer.frame_available(frame(&renderer)), Err(PlayerError::Unavailable));
    assert_eq!(renderer.update_size(800, 600), Err(PlayerError::Unavailable));
    let disposed = events
        .try_iter()
        .filter(|event| *event == RenderEvent::Disposed)
        .count();
    assert_eq!(disposed, 1);
}

#[test]
fn swap_failure_tears_instance_down() {
    let driver = HeadlessDriver::new();
    driver.inject(DriverFault::SwapFailsAfter(2));
    let probe = driver.clone();
    let renderer = VideoRenderer::new(driver, SharedContext::None, RenderOptions::default()).expect("renderer");
    let events = renderer.events();

    for _ in 0..4 {
        // Notifications after the failure may be refused; either is fine.
        let _ = renderer.frame_available(frame(&renderer));
    }

    let failed = loop {
        match events.recv_timeout(WAIT).expect("event") {
            RenderEvent::Failed { error } => break error,
            _ => continue,
        }
    };
    assert!(matches!(failed, PlayerError::Swap(_)));
    assert!(renderer.is_failed());
    assert_eq!(probe.swap_count(), 2);
    assert!(probe.gl().live_objects().is_empty());
    assert!(probe.live_driver_objects().is_empty());
    assert_eq!(renderer.update_size(800, 600), Err(PlayerError::Unavailable));
    assert_eq!(renderer.stats(), Err(PlayerError::Unavailable));
}

#[test]
fn failed_setup_leaves_no_allocations() {
    let driver = HeadlessDriver::new();
    driver.gl().inject(GlFault::IncompleteFramebuffer);
    let probe = driver.clone();

    let err = VideoRenderer::new(driver, SharedContext::None, RenderOptions::default())
        .err()
        .expect("setup must fail");
    assert!(matches!(
        err,
        PlayerError::Setup(SetupError::IncompleteFramebuffer { .. })
    ));
    assert!(probe.gl().live_objects().is_empty());
    assert!(probe.live_driver_objects().is_empty());
}

#[test]
fn decoder_resize_from_foreign_thread_is_applied_before_next_frame() {
    let (renderer, probe) = start(SharedContext::None);
    let notifier = renderer.notifier();
    let source = renderer.source_texture();
    thread::spawn(move || {
        notifier.on_size_changed(1280, 720);
        notifier.on_frame(source, None);
    })
    .join()
    .expect("decoder thread");

    renderer.stats().expect("stats");
    let draws = probe.gl().draws();
    assert_eq!(draws.len(), 2);
    assert!(draws
        .iter()
        .all(|draw| draw.viewport == RenderDimensions::new(1280, 720)));
}

#[test]
fn power_of_two_policy_rounds_storage_and_scales_onscreen_sampling() {
    let driver = HeadlessDriver::new();
    let probe = driver.clone();
    let options = RenderOptions {
        dimension_policy: renderer::DimensionPolicy::PowerOfTwo,
        ..RenderOptions::default()
    };
    let renderer = VideoRenderer::new(driver, SharedContext::None, options).expect("renderer");
    renderer.update_size(1920, 1080).expect("resize");
    let stats = renderer.stats().expect("stats");
    assert_eq!(stats.dimensions, RenderDimensions::new(1920, 1080));
    assert_eq!(stats.storage, RenderDimensions::new(2048, 2048));
    assert!(renderer.events().try_iter().any(|event| event
        == RenderEvent::Resized {
            dimensions: RenderDimensions::new(1920, 1080),
            storage: RenderDimensions::new(2048, 2048),
        }));

    renderer.frame_available(frame(&renderer)).expect("queued");
    renderer.stats().expect("stats");
    let draws = probe.gl().draws();
    let onscreen = draws[1].transform.expect("onscreen transform");
    assert_eq!(onscreen[0], 1920.0 / 2048.0);
    assert_eq!(onscreen[5], 1080.0 / 2048.0);
}

#[test]
fn events_left_unread_do_not_grow_without_bound() {
    let (renderer, _probe) = start(SharedContext::None);
    let notifier = renderer.notifier();
    let source = renderer.source_texture();
    thread::spawn(move || {
        for _ in 0..2_000 {
            notifier.on_frame(source, None);
        }
    })
    .join()
    .expect("decoder thread");

    let stats = renderer.stats().expect("stats");
    assert_eq!(stats.frames.frames_presented, 2_000);
    assert!(renderer.events().len() <= EVENT_QUEUE_CAPACITY);
    assert!(renderer.dropped_events() > 0);
}
