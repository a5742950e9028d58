use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

pub const CONFIG_VERSION: u32 = 1;

/// Largest texture side any supported GLES driver is asked for.
const TEXTURE_SIZE_CEILING: u32 = 16384;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DimensionPolicySetting {
    #[default]
    Exact,
    PowerOfTwo,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RenderConfig {
    pub version: u32,
    #[serde(default)]
    pub render: RenderSection,
    #[serde(default)]
    pub context: ContextSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderSection {
    pub width: u32,
    pub height: u32,
    pub dimension_policy: DimensionPolicySetting,
    pub max_texture_size: u32,
    pub alpha_blending: bool,
    pub finish_before_swap: bool,
    pub thread_name: String,
    #[serde(
        deserialize_with = "deserialize_duration_opt",
        serialize_with = "serialize_duration_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub sync_timeout: Option<Duration>,
}

impl Default for RenderSection {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            dimension_policy: DimensionPolicySetting::Exact,
            max_texture_size: 4096,
            alpha_blending: true,
            finish_before_swap: true,
            thread_name: "video-render".to_string(),
            sync_timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextSection {
    pub gles_version: u8,
    pub red_bits: u8,
    pub green_bits: u8,
    pub blue_bits: u8,
    pub alpha_bits: u8,
    pub depth_bits: u8,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            gles_version: 2,
            red_bits: 8,
            green_bits: 8,
            blue_bits: 8,
            alpha_bits: 8,
            depth_bits: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            render: RenderSection::default(),
            context: ContextSection::default(),
            logging: LoggingSection::default(),
        }
    }
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            u64::try_from(v)
                .map(|secs| Some(Duration::from_secs(secs)))
                .map_err(|_| E::custom("duration must be non-negative"))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }
    }

    deserializer.deserialize_any(Visitor)
}

fn serialize_duration_opt<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(duration) => serializer.serialize_str(&humantime::format_duration(*duration).to_string()),
        None => serializer.serialize_none(),
    }
}

impl RenderConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: RenderConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn log_filter(&self) -> Option<&str> {
        self.logging.filter.as_deref()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected {CONFIG_VERSION}",
                self.version
            )));
        }

        let render = &self.render;
        if render.max_texture_size == 0 || render.max_texture_size > TEXTURE_SIZE_CEILING {
            return Err(ConfigError::Invalid(format!(
                "render.max_texture_size must be within 1..={TEXTURE_SIZE_CEILING}"
            )));
        }
        for (key, value) in [("render.width", render.width), ("render.height", render.height)] {
            if value == 0 || value > render.max_texture_size {
                return Err(ConfigError::Invalid(format!(
                    "{key} must be within 1..={} (got {value})",
                    render.max_texture_size
                )));
            }
        }
        if render.thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid("render.thread_name may not be empty".into()));
        }
        if render.sync_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(ConfigError::Invalid(
                "render.sync_timeout must be greater than zero".into(),
            ));
        }

        let context = &self.context;
        if !matches!(context.gles_version, 2 | 3) {
            return Err(ConfigError::Invalid(format!(
                "context.gles_version must be 2 or 3 (got {})",
                context.gles_version
            )));
        }
        for (key, bits) in [
            ("context.red_bits", context.red_bits),
            ("context.green_bits", context.green_bits),
            ("context.blue_bits", context.blue_bits),
        ] {
            if bits == 0 || bits > 8 {
                return Err(ConfigError::Invalid(format!("{key} must be within 1..=8")));
            }
        }
        if context.alpha_bits > 8 {
            return Err(ConfigError::Invalid("context.alpha_bits must be within 0..=8".into()));
        }
        if !matches!(context.depth_bits, 0 | 16 | 24) {
            return Err(ConfigError::Invalid(format!(
                "context.depth_bits must be 0, 16 or 24 (got {})",
                context.depth_bits
            )));
        }

        if let Some(filter) = &self.logging.filter {
            if filter.trim().is_empty() {
                return Err(ConfigError::Invalid("logging.filter may not be empty".into()));
            }
        }

        Ok(())
    }
}
