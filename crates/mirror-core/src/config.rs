use crate::debounce::DEFAULT_COOLDOWN;
use crate::matcher::DEFAULT_THRESHOLD;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Default spatial reduction applied before detection.
pub const DEFAULT_DOWNSAMPLE_FACTOR: f32 = 0.25;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("threshold must be a finite, non-negative distance, got {0}")]
    InvalidThreshold(f32),
    #[error("cooldown must be a finite, non-negative number of seconds, got {0}")]
    InvalidCooldown(f32),
    #[error("downsample factor must be in (0, 1], got {0}")]
    InvalidDownsampleFactor(f32),
}

impl ConfigError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidThreshold(_) => "invalid_threshold",
            Self::InvalidCooldown(_) => "invalid_cooldown",
            Self::InvalidDownsampleFactor(_) => "invalid_downsample_factor",
        }
    }
}

/// Recognition session tuning.
///
/// Only obtainable through [`RecognitionConfig::new`], [`Default`] or
/// [`RecognitionOptions`], so every instance holds validated values.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionConfig {
    threshold: f32,
    cooldown: Duration,
    downsample_factor: f32,
}

/// Check a match threshold: a finite, non-negative distance.
pub fn validate_threshold(threshold: f32) -> Result<f32, ConfigError> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(ConfigError::InvalidThreshold(threshold));
    }
    Ok(threshold)
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
            downsample_factor: DEFAULT_DOWNSAMPLE_FACTOR,
        }
    }
}

impl RecognitionConfig {
    /// Build a config from raw option values, validating each one.
    pub fn new(
        threshold: f32,
        cooldown_seconds: f32,
        downsample_factor: f32,
    ) -> Result<Self, ConfigError> {
        let threshold = validate_threshold(threshold)?;
        let cooldown = Duration::try_from_secs_f32(cooldown_seconds)
            .map_err(|_| ConfigError::InvalidCooldown(cooldown_seconds))?;
        if !(downsample_factor > 0.0 && downsample_factor <= 1.0) {
            return Err(ConfigError::InvalidDownsampleFactor(downsample_factor));
        }
        Ok(Self {
            threshold,
            cooldown,
            downsample_factor,
        })
    }

    /// Maximum Euclidean distance for a match.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Minimum gap between two events for the same identity.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Detection runs on a copy scaled by this factor, in (0, 1].
    pub fn downsample_factor(&self) -> f32 {
        self.downsample_factor
    }
}

/// Serialized form, as found in config files.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognitionOptions {
    pub threshold: f32,
    pub cooldown_seconds: f32,
    pub downsample_factor: f32,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            cooldown_seconds: DEFAULT_COOLDOWN.as_secs_f32(),
            downsample_factor: DEFAULT_DOWNSAMPLE_FACTOR,
        }
    }
}

impl TryFrom<RecognitionOptions> for RecognitionConfig {
    type Error = ConfigError;

    fn try_from(opts: RecognitionOptions) -> Result<Self, Self::Error> {
        Self::new(opts.threshold, opts.cooldown_seconds, opts.downsample_factor)
    }
}
