use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Screenshot exposure length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureMode {
    Short,
    Long,
    #[serde(alias = "very-long", alias = "very_long")]
    VeryLong,
}

impl ExposureMode {
    pub const ALL: [ExposureMode; 3] = [Self::Short, Self::Long, Self::VeryLong];

    /// Tag used in output filenames and logs.
    pub fn tag(self) -> &'static str {
        match self {
            ExposureMode::Short => "short",
            ExposureMode::Long => "long",
            ExposureMode::VeryLong => "verylong",
        }
    }

    /// Multiplier applied to phosphor latency and bloom for this exposure.
    pub fn phosphor_scale(self) -> f32 {
        match self {
            ExposureMode::Short => 1.0,
            ExposureMode::Long => 1.5,
            ExposureMode::VeryLong => 2.0,
        }
    }
}

impl Default for ExposureMode {
    fn default() -> Self {
        Self::Short
    }
}

impl fmt::Display for ExposureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown exposure mode '{0}' (expected short, long, or verylong)")]
pub struct ParseExposureModeError(String);

impl FromStr for ExposureMode {
    type Err = ParseExposureModeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "short" | "single" => Ok(ExposureMode::Short),
            "long" | "double" => Ok(ExposureMode::Long),
            "verylong" | "very-long" | "very_long" | "triple" => Ok(ExposureMode::VeryLong),
            _ => Err(ParseExposureModeError(value.trim().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases() {
        assert_eq!("SHORT".parse::<ExposureMode>(), Ok(ExposureMode::Short));
        assert_eq!("double".parse::<ExposureMode>(), Ok(ExposureMode::Long));
        assert_eq!(
            " very-long ".parse::<ExposureMode>(),
            Ok(ExposureMode::VeryLong)
        );
        assert!("forever".parse::<ExposureMode>().is_err());
    }

    #[test]
    fn tags_are_filename_safe() {
        for mode in ExposureMode::ALL {
            assert!(mode.tag().chars().all(|c| c.is_ascii_lowercase()));
            assert_eq!(mode.to_string().parse::<ExposureMode>(), Ok(mode));
        }
    }
}
