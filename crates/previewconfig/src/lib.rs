use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::Deserialize;

pub const DEFAULT_FREQUENCY_HZ: f32 = 1.0;
pub const DEFAULT_SURFACE_SIZE: (u32, u32) = (1280, 720);
pub const DEFAULT_CLEAR_COLOR: [f32; 3] = [0.2, 0.3, 0.3];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Rate of the `phase` oscillator, either in Hz or in beats per minute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Oscillator {
    Frequency(f32),
    Bpm(f32),
}

impl Oscillator {
    pub fn hz(self) -> f32 {
        match self {
            Oscillator::Frequency(hz) => hz,
            Oscillator::Bpm(bpm) => bpm / 60.0,
        }
    }

    pub fn validate(self) -> Result<Self, ConfigError> {
        let (label, value) = match self {
            Oscillator::Frequency(value) => ("frequency", value),
            Oscillator::Bpm(value) => ("bpm", value),
        };
        if !value.is_finite() || value <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "{label} must be a positive number, got {value}"
            )));
        }
        Ok(self)
    }
}

impl Default for Oscillator {
    fn default() -> Self {
        Oscillator::Frequency(DEFAULT_FREQUENCY_HZ)
    }
}

impl fmt::Display for Oscillator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Oscillator::Frequency(hz) => write!(f, "{hz} Hz"),
            Oscillator::Bpm(bpm) => write!(f, "{bpm} bpm ({} Hz)", bpm / 60.0),
        }
    }
}

/// Picks the last oscillator setting in application order, or the 1 Hz default.
pub fn resolve_oscillator(settings: impl IntoIterator<Item = Oscillator>) -> Oscillator {
    settings.into_iter().last().unwrap_or_default()
}

/// Optional on-disk preview settings; every field may be overridden from the CLI.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreviewFile {
    #[serde(default = "default_version")]
    pub version: u32,
    pub shader: Option<PathBuf>,
    pub watch_dir: Option<PathBuf>,
    #[serde(default)]
    pub textures: Vec<PathBuf>,
    pub frequency: Option<f32>,
    pub bpm: Option<f32>,
    #[serde(default, deserialize_with = "deserialize_duration_opt")]
    pub watch_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_size_opt")]
    pub size: Option<(u32, u32)>,
    pub clear_color: Option<[f32; 3]>,
    /// Set when both rates are present and `bpm` appears after `frequency`.
    #[serde(skip)]
    bpm_last: bool,
}

fn default_version() -> u32 {
    1
}

impl Default for PreviewFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            shader: None,
            watch_dir: None,
            textures: Vec::new(),
            frequency: None,
            bpm: None,
            watch_timeout: None,
            size: None,
            clear_color: None,
            bpm_last: false,
        }
    }
}

impl PreviewFile {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let mut raw: PreviewFile = toml::from_str(input)?;
        if raw.frequency.is_some() && raw.bpm.is_some() {
            let table: toml::Table = input.parse()?;
            let position = |key: &str| table.keys().position(|candidate| candidate == key);
            raw.bpm_last = position("bpm") > position("frequency");
        }
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// The file's oscillator setting, if it has one.
    ///
    /// When both `frequency` and `bpm` are present the one written last wins,
    /// matching how repeated command-line flags resolve.
    pub fn oscillator(&self) -> Option<Oscillator> {
        let frequency = self.frequency.map(Oscillator::Frequency);
        let bpm = self.bpm.map(Oscillator::Bpm);
        if self.bpm_last {
            bpm.or(frequency)
        } else {
            frequency.or(bpm)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if let Some(hz) = self.frequency {
            Oscillator::Frequency(hz).validate()?;
        }
        if let Some(bpm) = self.bpm {
            Oscillator::Bpm(bpm).validate()?;
        }

        if let Some(timeout) = self.watch_timeout {
            if timeout.is_zero() {
                return Err(ConfigError::Invalid(
                    "watch_timeout must be greater than zero".into(),
                ));
            }
        }

        if let Some((width, height)) = self.size {
            if width == 0 || height == 0 {
                return Err(ConfigError::Invalid(format!(
                    "size must be non-zero, got {width}x{height}"
                )));
            }
        }

        if let Some(color) = self.clear_color {
            validate_color(color)?;
        }

        for texture in &self.textures {
            if texture.as_os_str().is_empty() {
                return Err(ConfigError::Invalid("texture path may not be empty".into()));
            }
        }

        Ok(())
    }
}

/// Parses `WIDTHxHEIGHT`, e.g. `1280x720`.
pub fn parse_size(raw: &str) -> Result<(u32, u32), ConfigError> {
    let invalid = || ConfigError::Invalid(format!("invalid size '{raw}'; expected WIDTHxHEIGHT"));
    let (width, height) = raw
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(invalid)?;
    let width: u32 = width.trim().parse().map_err(|_| invalid())?;
    let height: u32 = height.trim().parse().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        return Err(invalid());
    }
    Ok((width, height))
}

/// Parses `R,G,B` with components in `[0, 1]`.
pub fn parse_color(raw: &str) -> Result<[f32; 3], ConfigError> {
    let invalid = || ConfigError::Invalid(format!("invalid color '{raw}'; expected R,G,B"));
    let parts: Vec<f32> = raw
        .split(',')
        .map(|part| part.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid())?;
    let color: [f32; 3] = parts.try_into().map_err(|_| invalid())?;
    validate_color(color)
}

fn validate_color(color: [f32; 3]) -> Result<[f32; 3], ConfigError> {
    if color
        .iter()
        .any(|component| !component.is_finite() || !(0.0..=1.0).contains(component))
    {
        return Err(ConfigError::Invalid(format!(
            "color components must lie in [0, 1], got {color:?}"
        )));
    }
    Ok(color)
}

/// Parses a humantime duration such as `5s` or `250ms`.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let duration = humantime::parse_duration(raw.trim())
        .map_err(|err| ConfigError::Invalid(format!("invalid duration '{raw}': {err}")))?;
    if duration.is_zero() {
        return Err(ConfigError::Invalid("duration must be greater than zero".into()));
    }
    Ok(duration)
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
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if !v.is_finite() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }
    }

    deserializer.deserialize_any(Visitor)
}

fn deserialize_size_opt<'de, D>(deserializer: D) -> Result<Option<(u32, u32)>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper {
        Str(String),
        Pair([u32; 2]),
    }

    let helper: Option<Helper> = Option::deserialize(deserializer)?;
    match helper {
        None => Ok(None),
        Some(Helper::Str(raw)) => parse_size(&raw).map(Some).map_err(de::Error::custom),
        Some(Helper::Pair([width, height])) => Ok(Some((width, height))),
    }
}
