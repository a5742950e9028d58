//! Maps a parsed [`RenderConfig`] onto the renderer's [`RenderOptions`].

use renderconfig::{DimensionPolicySetting, RenderConfig};
use renderer::{ContextAttributes, DimensionPolicy, GlesVersion, RenderDimensions, RenderOptions};

pub fn render_options(config: &RenderConfig) -> RenderOptions {
    let render = &config.render;
    let context = &config.context;
    RenderOptions {
        initial_size: RenderDimensions::new(render.width, render.height),
        dimension_policy: match render.dimension_policy {
            DimensionPolicySetting::Exact => DimensionPolicy::Exact,
            DimensionPolicySetting::PowerOfTwo => DimensionPolicy::PowerOfTwo,
        },
        max_texture_size: render.max_texture_size,
        alpha_blending: render.alpha_blending,
        finish_before_swap: render.finish_before_swap,
        context: ContextAttributes {
            version: if context.gles_version >= 3 {
                GlesVersion::Gles3
            } else {
                GlesVersion::Gles2
            },
            red_bits: context.red_bits,
            green_bits: context.green_bits,
            blue_bits: context.blue_bits,
            alpha_bits: context.alpha_bits,
            depth_bits: context.depth_bits,
        },
        thread_name: render.thread_name.clone(),
        sync_timeout: render.sync_timeout,
    }
}

/// Human-readable summary lines for `config check`.
pub fn describe(options: &RenderOptions) -> Vec<String> {
    let timeout = options
        .sync_timeout
        .map(|timeout| format!("{timeout:?}"))
        .unwrap_or_else(|| "none".to_string());
    let attrs = &options.context;
    vec![
        format!("initial size: {}", options.initial_size),
        format!(
            "storage: {} ({})",
            options.dimension_policy.storage_for(options.initial_size),
            options.dimension_policy
        ),
        format!("max texture size: {}", options.max_texture_size),
        format!(
            "context: GLES {} rgba {}/{}/{}/{} depth {}",
            attrs.version.major(),
            attrs.red_bits,
            attrs.green_bits,
            attrs.blue_bits,
            attrs.alpha_bits,
            attrs.depth_bits
        ),
        format!("alpha blending: {}", options.alpha_blending),
        format!("finish before swap: {}", options.finish_before_swap),
        format!("render thread: {}", options.thread_name),
        format!("sync timeout: {timeout}"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn default_config_matches_default_options() {
        assert_eq!(render_options(&RenderConfig::default()), RenderOptions::default());
    }

    #[test]
    fn maps_every_section() {
        let config = RenderConfig::from_toml_str(
            r#"
version = 1
[render]
width = 1920
height = 1080
dimension_policy = "power-of-two"
finish_before_swap = false
sync_timeout = "250ms"
[context]
gles_version = 3
depth_bits = 0
"#,
        )
        .expect("config");
        let options = render_options(&config);
        assert_eq!(options.initial_size, RenderDimensions::new(1920, 1080));
        assert_eq!(options.dimension_policy, DimensionPolicy::PowerOfTwo);
        assert!(!options.finish_before_swap);
        assert_eq!(options.sync_timeout, Some(Duration::from_millis(250)));
        assert_eq!(options.context.version, GlesVersion::Gles3);
        assert_eq!(options.context.depth_bits, 0);
    }

    #[test]
    fn description_shows_rounded_storage() {
        let options = RenderOptions {
            initial_size: RenderDimensions::new(1920, 1080),
            dimension_policy: DimensionPolicy::PowerOfTwo,
            ..RenderOptions::default()
        };
        let lines = describe(&options);
        assert!(lines.contains(&"storage: 2048x2048 (power-of-two)".to_string()));
        assert!(lines.contains(&"sync timeout: none".to_string()));
    }
}
