/// Result alias that carries the custom [`MicVizError`] type.
pub type Result<T> = std::result::Result<T, MicVizError>;

/// Failures that can occur while acquiring the capture device or building the
/// signal chain. This is the only error surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// The platform refused access to the microphone.
    #[error("microphone permission denied")]
    PermissionDenied,
    /// No usable input device could be found or opened.
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),
    /// The device was found but the stream or chain could not be built.
    #[error("failed to construct capture chain: {0}")]
    Construction(String),
}

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum MicVizError {
    /// Free-form message for conditions that do not warrant their own variant.
    #[error("{0}")]
    Message(String),
    /// A configuration value is out of its accepted range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("fft failure: {0}")]
    Fft(#[from] realfft::FftError),
}

impl MicVizError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for MicVizError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for MicVizError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
