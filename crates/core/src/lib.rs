//! Core library for the Mic Visualiser.
//!
//! Captures a microphone signal through a `source → gain → analysis` chain and
//! draws two views of it, a level meter and a bar spectrum, each on its own
//! refresh-driven render loop. Each module owns one subsystem: capture
//! lifecycle (`audio`), the analysis node (`analysis`), frame scheduling
//! (`timeline`), drawing (`render`) and the control surface (`control`).

pub mod analysis;
pub mod audio;
pub mod config;
pub mod control;
pub mod error;
pub mod render;
pub mod timeline;

pub use analysis::{AnalysisSnapshot, Analyser, AnalyserHandle, LevelReading};
pub use audio::{
    AudioContext, CaptureBackend, CaptureConstraints, CaptureStream, ChainInput, GainSetting,
    SessionState, SignalChainManager, StartOutcome,
};
pub use config::{AnalyserConfig, AppConfig, AudioConfig, DisplayConfig};
pub use control::ControlSurface;
pub use error::{CaptureError, MicVizError, Result};
pub use render::{LevelMeter, LogicalSize, RenderLoop, Renderer, SpectrumView, Surface};
pub use timeline::{FrameClock, FrameToken, Scheduler};
