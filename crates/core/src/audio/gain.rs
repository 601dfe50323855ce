use std::{
    fmt,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

/// User-facing gain control value, always within [`GainSetting::MIN`] and
/// [`GainSetting::MAX`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainSetting(f32);

impl GainSetting {
    pub const MIN: f32 = 0.25;
    pub const MAX: f32 = 4.0;
    /// Granularity of the slider that drives this value.
    pub const STEP: f32 = 0.05;
    pub const DEFAULT: f32 = 1.0;

    /// Builds a setting from an arbitrary value, clamping into range.
    /// Non-finite input falls back to the default.
    pub fn new(value: f32) -> Self {
        if value.is_finite() {
            Self(value.clamp(Self::MIN, Self::MAX))
        } else {
            Self::default()
        }
    }

    /// Like [`GainSetting::new`], but lands on the nearest slider step.
    pub fn snapped(value: f32) -> Self {
        Self::new((value / Self::STEP).round() * Self::STEP)
    }

    pub fn value(self) -> f32 {
        self.0
    }
}

impl Default for GainSetting {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl fmt::Display for GainSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}x", self.0)
    }
}

/// The live gain node sitting between the capture source and the analyser.
///
/// Read on the capture thread once per block, written from the control side.
#[derive(Debug)]
pub struct GainStage {
    bits: AtomicU32,
    connected: AtomicBool,
}

impl GainStage {
    pub fn new(gain: GainSetting) -> Self {
        Self {
            bits: AtomicU32::new(gain.value().to_bits()),
            connected: AtomicBool::new(true),
        }
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set_gain(&self, gain: GainSetting) {
        self.bits.store(gain.value().to_bits(), Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Detaches the stage; subsequent blocks are dropped instead of analysed.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_into_range() {
        assert_eq!(GainSetting::new(10.0).value(), 4.0);
        assert_eq!(GainSetting::new(0.01).value(), 0.25);
        assert_eq!(GainSetting::new(1.5).value(), 1.5);
        assert_eq!(GainSetting::new(f32::NAN).value(), 1.0);
    }

    #[test]
    fn snaps_to_slider_steps() {
        assert!((GainSetting::snapped(1.337).value() - 1.35).abs() < 1e-6);
        assert!((GainSetting::snapped(0.26).value() - 0.25).abs() < 1e-6);
        assert_eq!(GainSetting::snapped(9.0).value(), 4.0);
        assert_eq!(GainSetting::snapped(f32::NAN).value(), 1.0);
    }

    #[test]
    fn displays_like_the_slider_readout() {
        assert_eq!(GainSetting::new(1.0).to_string(), "1.00x");
        assert_eq!(GainSetting::new(2.35).to_string(), "2.35x");
    }

    #[test]
    fn stage_updates_and_disconnects() {
        let stage = GainStage::new(GainSetting::new(2.0));
        assert_eq!(stage.gain(), 2.0);
        stage.set_gain(GainSetting::new(0.5));
        assert_eq!(stage.gain(), 0.5);
        assert!(stage.is_connected());
        stage.disconnect();
        assert!(!stage.is_connected());
    }
}
