use crate::{
    audio::{GainSetting, SessionState, SignalChainManager},
    AnalyserHandle, CaptureError,
};

/// Message shown to the user when the microphone cannot be opened.
pub const CAPTURE_FAILED_MESSAGE: &str = "Microphone access denied or unavailable.";

/// The surface the start/stop buttons and gain slider talk to. It forwards to
/// the signal chain and keeps the last user-facing error message.
#[derive(Debug)]
pub struct ControlSurface {
    chain: SignalChainManager,
    error: Option<String>,
}

impl ControlSurface {
    pub fn new(chain: SignalChainManager) -> Self {
        Self { chain, error: None }
    }

    pub fn start(&mut self) -> Result<(), CaptureError> {
        self.error = None;
        self.chain.start().map_err(|err| {
            self.error = Some(CAPTURE_FAILED_MESSAGE.to_string());
            err
        })
    }

    pub fn stop(&mut self) {
        self.chain.stop();
    }

    pub fn is_active(&self) -> bool {
        self.chain.is_active()
    }

    pub fn gain(&self) -> GainSetting {
        self.chain.gain()
    }

    pub fn set_gain(&mut self, value: f32) {
        self.chain.set_gain(value);
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    /// Session state as shown to the user: an idle session holding an
    /// unacknowledged capture error reads as [`SessionState::Error`].
    pub fn status(&self) -> SessionState {
        match (self.chain.state(), &self.error) {
            (SessionState::Idle, Some(_)) => SessionState::Error,
            (state, _) => state,
        }
    }

    pub fn analyser(&self) -> Option<&AnalyserHandle> {
        self.chain.analyser()
    }

    pub fn chain(&self) -> &SignalChainManager {
        &self.chain
    }
}
