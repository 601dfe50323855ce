use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{MicVizError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub analyser: AnalyserConfig,
    pub display: DisplayConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.analyser.validate()?;
        self.display.validate()
    }
}

/// Capture request settings handed to the audio backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub initial_gain: f32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// Preferred input device name; `None` picks the host default.
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            initial_gain: 1.0,
            echo_cancellation: true,
            noise_suppression: true,
            // Keep off so the meters reflect raw levels.
            auto_gain_control: false,
            device: None,
        }
    }
}

/// Parameters of the analysis node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyserConfig {
    pub window_size: usize,
    pub smoothing_time_constant: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            window_size: 2048,
            smoothing_time_constant: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

impl AnalyserConfig {
    pub const MIN_WINDOW: usize = 32;
    pub const MAX_WINDOW: usize = 32_768;

    pub fn validate(&self) -> Result<()> {
        let size = self.window_size;
        if !size.is_power_of_two() || !(Self::MIN_WINDOW..=Self::MAX_WINDOW).contains(&size) {
            return Err(MicVizError::InvalidConfig(format!(
                "window size {size} must be a power of two between {} and {}",
                Self::MIN_WINDOW,
                Self::MAX_WINDOW
            )));
        }
        if !(0.0..1.0).contains(&self.smoothing_time_constant) {
            return Err(MicVizError::InvalidConfig(format!(
                "smoothing time constant {} must be in [0, 1)",
                self.smoothing_time_constant
            )));
        }
        if !(self.min_decibels < self.max_decibels) {
            return Err(MicVizError::InvalidConfig(format!(
                "min decibels {} must be below max decibels {}",
                self.min_decibels, self.max_decibels
            )));
        }
        Ok(())
    }

    /// Number of frequency bins exposed by the node.
    pub fn bin_count(&self) -> usize {
        self.window_size / 2
    }
}

/// Logical sizes of the two drawing surfaces plus refresh settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub device_pixel_ratio: f32,
    pub refresh_rate: u32,
    pub meter_size: [f32; 2],
    pub spectrum_size: [f32; 2],
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            device_pixel_ratio: 1.0,
            refresh_rate: 60,
            meter_size: [320.0, 160.0],
            spectrum_size: [640.0, 256.0],
        }
    }
}

impl DisplayConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.device_pixel_ratio.is_finite() && self.device_pixel_ratio > 0.0) {
            return Err(MicVizError::InvalidConfig(format!(
                "device pixel ratio {} must be positive",
                self.device_pixel_ratio
            )));
        }
        if self.refresh_rate == 0 {
            return Err(MicVizError::InvalidConfig(
                "refresh rate must be at least 1 Hz".to_string(),
            ));
        }
        Ok(())
    }
}
