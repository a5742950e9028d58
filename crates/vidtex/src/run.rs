use std::path::Path;
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use renderconfig::RenderConfig;
use renderer::headless::{DriverFault, HeadlessDriver};
use renderer::{DecoderEvents, FrameTransform, RenderOptions, SharedContext, VideoRenderer};
use tracing_subscriber::EnvFilter;

use crate::cli::SimulateArgs;
use crate::options;
use crate::report::SimulationReport;

/// Stand-in for a host context pointer when simulating a shared context.
const SIMULATED_HOST_CONTEXT: usize = 0x1000;

/// `RUST_LOG` wins over the configured filter; logs go to stderr so stdout
/// stays machine-readable.
pub fn initialise_tracing(config_filter: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config_filter.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub fn load_config(path: Option<&Path>) -> Result<RenderConfig> {
    match path {
        Some(path) => RenderConfig::load(path)
            .with_context(|| format!("failed to load render config {}", path.display())),
        None => Ok(RenderConfig::default()),
    }
}

pub fn simulate(args: SimulateArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    initialise_tracing(config.log_filter());

    let options = options::render_options(&config);
    let report = simulate_player(&args, options)?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(failure) = &report.failure {
        bail!("render subsystem failed: {failure}");
    }
    Ok(())
}

fn simulate_player(args: &SimulateArgs, options: RenderOptions) -> Result<SimulationReport> {
    let driver = HeadlessDriver::new();
    if let Some(swaps) = args.fail_after_swaps {
        driver.inject(DriverFault::SwapFailsAfter(swaps));
    }
    let probe = driver.clone();
    let shared = if args.shared {
        SharedContext::from_raw(SIMULATED_HOST_CONTEXT)
    } else {
        SharedContext::None
    };

    let mut renderer =
        VideoRenderer::new(driver, shared, options).context("failed to start video renderer")?;
    let events = renderer.events();
    let mut report = SimulationReport::new(
        renderer.present_mode(),
        renderer.offscreen_texture().get(),
        renderer.source_texture().get(),
    );

    let notifier = renderer.notifier();
    let source = renderer.source_texture();
    let frames = args.frames;
    let resizes = args.resize.clone();
    let decoder = thread::Builder::new()
        .name("simulated-decoder".into())
        .spawn(move || {
            let mut sent = 0;
            let produce = |sent: &mut u32| {
                for _ in 0..frames {
                    notifier.on_frame(source, Some(FrameTransform::flip_vertical()));
                    *sent += 1;
                }
            };
            produce(&mut sent);
            for size in resizes {
                notifier.on_size_changed(size.width, size.height);
                produce(&mut sent);
            }
            sent
        })
        .context("failed to spawn decoder thread")?;
    report.frames_sent = decoder
        .join()
        .map_err(|_| anyhow!("decoder thread panicked"))?;

    // Queued behind every frame, so the counts are final.
    match renderer.stats() {
        Ok(stats) => report.record_stats(&stats),
        Err(err) => tracing::warn!(%err, "render stats unavailable"),
    }

    let gl = probe.gl();
    report.draws = gl.draws().len();
    report.swaps = probe.swap_count();

    report.dropped_events = renderer.dropped_events();
    renderer.dispose().context("failed to dispose video renderer")?;
    for event in events.try_iter() {
        report.record_event(&event);
    }
    report.foreign_thread_calls = gl.foreign_calls();
    report.leaked_gl_objects = gl.live_objects().total();
    report.leaked_driver_objects = probe.live_driver_objects().len();
    tracing::info!(
        draws = report.draws,
        swaps = report.swaps,
        events = report.events.len(),
        "simulation finished"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderer::RenderDimensions;

    fn args() -> SimulateArgs {
        SimulateArgs {
            config: None,
            frames: 2,
            resize: Vec::new(),
            shared: false,
            fail_after_swaps: None,
        }
    }

    #[test]
    fn simulation_presents_every_frame_and_leaks_nothing() {
        let mut args = args();
        args.resize = vec![RenderDimensions::new(800, 600)];
        let report = simulate_player(&args, RenderOptions::default()).expect("simulate");

        assert_eq!(report.frames_sent, 4);
        let frames = report.frames.expect("frames");
        assert_eq!(frames.presented, 4);
        assert_eq!(frames.onscreen_passes, 4);
        assert_eq!(report.draws, 8);
        assert_eq!(report.swaps, 4);
        assert_eq!(report.dimensions.map(|size| (size.width, size.height)), Some((800, 600)));
        assert_eq!(report.leaked_gl_objects, 0);
        assert_eq!(report.leaked_driver_objects, 0);
        assert_eq!(report.foreign_thread_calls, 0);
        assert!(report.failure.is_none());
        assert_eq!(report.events.last().map(String::as_str), Some("disposed"));
    }

    #[test]
    fn swap_failure_is_reported() {
        let mut args = args();
        args.fail_after_swaps = Some(1);
        let report = simulate_player(&args, RenderOptions::default()).expect("simulate");

        assert!(report.failure.is_some());
        assert!(report.frames.is_none());
        assert_eq!(report.swaps, 1);
        assert_eq!(report.leaked_gl_objects, 0);
        assert_eq!(report.leaked_driver_objects, 0);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        assert!(load_config(Some(Path::new("/nonexistent/vidtex.toml"))).is_err());
    }
}
