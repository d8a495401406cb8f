//! Typed CRT and capture preferences.
//!
//! Everything the post-processing pipeline reads from the user lives here as
//! plain structs deserialised from TOML. Values are validated once when a
//! config is loaded (or when a [`PreferenceStore`] is updated) so the render
//! path never has to second-guess them.

mod exposure;
mod store;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use exposure::{ExposureMode, ParseExposureModeError};
pub use store::{PreferenceStore, PreferenceStoreBuilder, Validate};

/// Upper bound on frames accumulated for a single screenshot.
pub const MAX_EXPOSURES: u32 = 64;
/// Upper bound on frames discarded before accumulation starts.
pub const MAX_WARMUP_FRAMES: u32 = 120;
/// Black-level correction above this value washes the picture out entirely.
pub const MAX_BLACK_LEVEL: f32 = 0.25;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialise configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to read configuration at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Visual parameters of the CRT simulation.
///
/// Amounts are unit-interval floats; the boolean toggles decide whether the
/// matching stage runs at all.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CrtPreferences {
    /// CRT simulation on; when off the picture is drawn pixel-perfect.
    pub enabled: bool,
    /// Phosphor persistence used in pixel-perfect mode.
    pub pixel_perfect_fade: f32,
    pub phosphor: bool,
    pub phosphor_latency: f32,
    pub phosphor_bloom: f32,
    pub ghosting: bool,
    pub ghosting_amount: f32,
    pub sharpness: f32,
    pub curve: bool,
    pub curve_amount: f32,
    pub scanlines: bool,
    pub scanlines_intensity: f32,
    pub mask: bool,
    pub mask_intensity: f32,
    pub noise: bool,
    pub noise_level: f32,
    pub fringing: bool,
    pub fringing_amount: f32,
    pub black_level: f32,
}

impl Default for CrtPreferences {
    fn default() -> Self {
        Self {
            enabled: true,
            pixel_perfect_fade: 0.4,
            phosphor: true,
            phosphor_latency: 0.5,
            phosphor_bloom: 0.4,
            ghosting: false,
            ghosting_amount: 0.2,
            sharpness: 0.3,
            curve: true,
            curve_amount: 0.5,
            scanlines: true,
            scanlines_intensity: 0.3,
            mask: true,
            mask_intensity: 0.1,
            noise: true,
            noise_level: 0.05,
            fringing: true,
            fringing_amount: 0.15,
            black_level: 0.05,
        }
    }
}

impl CrtPreferences {
    /// Returns a copy adjusted for a screenshot exposure.
    ///
    /// Longer exposures stretch phosphor persistence and bloom so the capture
    /// looks like a camera held open over several frames. Scaled values never
    /// exceed 1.0.
    pub fn scaled_for(&self, mode: ExposureMode) -> Self {
        let factor = mode.phosphor_scale();
        let mut scaled = self.clone();
        scaled.phosphor_latency = (self.phosphor_latency * factor).min(1.0);
        scaled.phosphor_bloom = (self.phosphor_bloom * factor).min(1.0);
        scaled.pixel_perfect_fade = (self.pixel_perfect_fade * factor).min(1.0);
        scaled
    }

    fn unit_fields(&self) -> [(&'static str, f32); 11] {
        [
            ("pixel_perfect_fade", self.pixel_perfect_fade),
            ("phosphor_latency", self.phosphor_latency),
            ("phosphor_bloom", self.phosphor_bloom),
            ("ghosting_amount", self.ghosting_amount),
            ("sharpness", self.sharpness),
            ("curve_amount", self.curve_amount),
            ("scanlines_intensity", self.scanlines_intensity),
            ("mask_intensity", self.mask_intensity),
            ("noise_level", self.noise_level),
            ("fringing_amount", self.fringing_amount),
            ("black_level", self.black_level),
        ]
    }
}

impl Validate for CrtPreferences {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in self.unit_fields() {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "crt.{name} must be between 0.0 and 1.0 (got {value})"
                )));
            }
        }
        if self.black_level > MAX_BLACK_LEVEL {
            return Err(ConfigError::Invalid(format!(
                "crt.black_level must not exceed {MAX_BLACK_LEVEL} (got {})",
                self.black_level
            )));
        }
        Ok(())
    }
}

/// How many frames each exposure mode accumulates.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub short_exposures: u32,
    pub long_exposures: u32,
    pub very_long_exposures: u32,
    /// Frames processed (but not captured) before accumulation begins.
    pub warmup_frames: u32,
    /// Where screenshots are written; the working directory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            short_exposures: 1,
            long_exposures: 6,
            very_long_exposures: 12,
            warmup_frames: 0,
            output_dir: None,
        }
    }
}

impl CaptureSettings {
    pub fn exposures_for(&self, mode: ExposureMode) -> u32 {
        match mode {
            ExposureMode::Short => self.short_exposures,
            ExposureMode::Long => self.long_exposures,
            ExposureMode::VeryLong => self.very_long_exposures,
        }
    }

    pub fn output_dir(&self) -> &Path {
        self.output_dir.as_deref().unwrap_or_else(|| Path::new("."))
    }
}

impl Validate for CaptureSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        for mode in ExposureMode::ALL {
            let count = self.exposures_for(mode);
            if count == 0 || count > MAX_EXPOSURES {
                return Err(ConfigError::Invalid(format!(
                    "capture exposures for '{mode}' must be between 1 and {MAX_EXPOSURES} (got {count})"
                )));
            }
        }
        if self.warmup_frames > MAX_WARMUP_FRAMES {
            return Err(ConfigError::Invalid(format!(
                "capture.warmup_frames must not exceed {MAX_WARMUP_FRAMES} (got {})",
                self.warmup_frames
            )));
        }
        Ok(())
    }
}

/// Top-level `crt.toml` layout.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CrtConfig {
    pub version: u32,
    #[serde(default)]
    pub crt: CrtPreferences,
    #[serde(default)]
    pub capture: CaptureSettings,
}

impl Default for CrtConfig {
    fn default() -> Self {
        Self {
            version: 1,
            crt: CrtPreferences::default(),
            capture: CaptureSettings::default(),
        }
    }
}

impl CrtConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: CrtConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl Validate for CrtConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }
        self.crt.validate()?;
        self.capture.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_config_with_defaults() {
        let config = CrtConfig::from_toml_str(
            r#"
version = 1

[crt]
phosphor_latency = 0.8
curve = false

[capture]
long_exposures = 4
"#,
        )
        .unwrap();

        assert!((config.crt.phosphor_latency - 0.8).abs() < f32::EPSILON);
        assert!(!config.crt.curve);
        assert!(config.crt.scanlines);
        assert_eq!(config.capture.long_exposures, 4);
        assert_eq!(config.capture.short_exposures, 1);
    }

    #[test]
    fn rejects_out_of_range_amounts() {
        let err = CrtConfig::from_toml_str(
            r#"
version = 1

[crt]
noise_level = 1.5
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("noise_level"));
    }

    #[test]
    fn rejects_unknown_version() {
        let err = CrtConfig::from_toml_str("version = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_exposures() {
        let err = CrtConfig::from_toml_str(
            r#"
version = 1

[capture]
very_long_exposures = 0
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("verylong"));
    }

    #[test]
    fn rejects_excessive_black_level() {
        let prefs = CrtPreferences {
            black_level: 0.5,
            ..CrtPreferences::default()
        };
        assert!(prefs.validate().is_err());
    }

    #[test]
    fn scaling_clamps_to_unit_range() {
        let prefs = CrtPreferences {
            phosphor_latency: 0.7,
            phosphor_bloom: 0.3,
            ..CrtPreferences::default()
        };

        let short = prefs.scaled_for(ExposureMode::Short);
        assert_eq!(short, prefs);

        let very_long = prefs.scaled_for(ExposureMode::VeryLong);
        assert!((very_long.phosphor_latency - 1.0).abs() < f32::EPSILON);
        assert!((very_long.phosphor_bloom - 0.6).abs() < 1e-6);
        assert!(very_long.validate().is_ok());
    }

    #[test]
    fn default_config_survives_toml_serialisation() {
        let config = CrtConfig::default();
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("[crt]"));
        assert_eq!(CrtConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = Path::new("/nonexistent/crtshot/crt.toml");
        assert_eq!(CrtConfig::load_or_default(path).unwrap(), CrtConfig::default());
    }
}
