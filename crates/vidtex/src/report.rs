use renderer::{PresentMode, RenderDimensions, RenderEvent, RenderStats};
use serde::Serialize;

/// JSON summary printed by `vidtex simulate`.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub mode: String,
    pub offscreen_texture: u32,
    pub source_texture: u32,
    pub frames_sent: u32,
    pub frames: Option<FrameCounts>,
    pub dimensions: Option<Size>,
    pub storage: Option<Size>,
    pub draws: usize,
    pub swaps: u64,
    pub foreign_thread_calls: usize,
    pub events: Vec<String>,
    pub dropped_events: u64,
    pub failure: Option<String>,
    pub leaked_gl_objects: usize,
    pub leaked_driver_objects: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl From<RenderDimensions> for Size {
    fn from(dimensions: RenderDimensions) -> Self {
        Self {
            width: dimensions.width,
            height: dimensions.height,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FrameCounts {
    pub received: u64,
    pub presented: u64,
    pub rejected: u64,
    pub offscreen_passes: u64,
    pub onscreen_passes: u64,
}

impl SimulationReport {
    pub fn new(mode: PresentMode, offscreen_texture: u32, source_texture: u32) -> Self {
        Self {
            mode: mode.to_string(),
            offscreen_texture,
            source_texture,
            frames_sent: 0,
            frames: None,
            dimensions: None,
            storage: None,
            draws: 0,
            swaps: 0,
            foreign_thread_calls: 0,
            events: Vec::new(),
            dropped_events: 0,
            failure: None,
            leaked_gl_objects: 0,
            leaked_driver_objects: 0,
        }
    }

    pub fn record_stats(&mut self, stats: &RenderStats) {
        let frames = &stats.frames;
        self.frames = Some(FrameCounts {
            received: frames.frames_received,
            presented: frames.frames_presented,
            rejected: frames.frames_rejected,
            offscreen_passes: frames.offscreen_passes,
            onscreen_passes: frames.onscreen_passes,
        });
        self.dimensions = Some(stats.dimensions.into());
        self.storage = Some(stats.storage.into());
    }

    pub fn record_event(&mut self, event: &RenderEvent) {
        if let RenderEvent::Failed { error } = event {
            self.failure = Some(error.to_string());
        }
        self.events.push(describe_event(event));
    }
}

fn describe_event(event: &RenderEvent) -> String {
    match event {
        RenderEvent::Ready {
            offscreen_texture,
            mode,
            dimensions,
            storage,
        } => format!("ready texture={offscreen_texture} mode={mode} size={dimensions} storage={storage}"),
        RenderEvent::FramePresented { frame } => format!("frame {frame}"),
        RenderEvent::Resized { dimensions, storage } if dimensions == storage => {
            format!("resized {dimensions}")
        }
        RenderEvent::Resized { dimensions, storage } => {
            format!("resized {dimensions} (storage {storage})")
        }
        RenderEvent::DecoderError { reason } => format!("decoder error: {reason}"),
        RenderEvent::Failed { error } => format!("failed: {error}"),
        RenderEvent::Disposed => "disposed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderer::{PlayerError, TextureId};

    #[test]
    fn failure_event_is_recorded() {
        let mut report = SimulationReport::new(PresentMode::OffscreenOnly, 2, 1);
        report.record_event(&RenderEvent::FramePresented { frame: 1 });
        report.record_event(&RenderEvent::Failed {
            error: PlayerError::Unavailable,
        });
        assert_eq!(report.events[0], "frame 1");
        assert!(report.events[1].starts_with("failed: "));
        assert!(report.failure.is_some());
    }

    #[test]
    fn ready_event_names_texture_and_mode() {
        let texture = TextureId::new(7).expect("texture");
        let text = describe_event(&RenderEvent::Ready {
            offscreen_texture: texture,
            mode: PresentMode::OffscreenAndOnscreen,
            dimensions: RenderDimensions::new(640, 480),
            storage: RenderDimensions::new(1024, 512),
        });
        assert_eq!(
            text,
            "ready texture=7 mode=offscreen+onscreen size=640x480 storage=1024x512"
        );
    }

    #[test]
    fn resize_mentions_storage_only_when_padded() {
        let exact = describe_event(&RenderEvent::Resized {
            dimensions: RenderDimensions::new(320, 240),
            storage: RenderDimensions::new(320, 240),
        });
        assert_eq!(exact, "resized 320x240");
        let padded = describe_event(&RenderEvent::Resized {
            dimensions: RenderDimensions::new(1920, 1080),
            storage: RenderDimensions::new(2048, 2048),
        });
        assert_eq!(padded, "resized 1920x1080 (storage 2048x2048)");
    }

    #[test]
    fn serializes_as_json() {
        let report = SimulationReport::new(PresentMode::OffscreenOnly, 2, 1);
        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["mode"], "offscreen-only");
        assert_eq!(json["failure"], serde_json::Value::Null);
    }
}
