use thiserror::Error;
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("sample rate must be greater than zero")]
    InvalidSampleRate,
    #[error("channel count must be greater than zero")]
    InvalidChannelCount,
    #[error("history capacity must be greater than zero")]
    InvalidCapacity,
    #[error("invalid filter configuration: {0}")]
    InvalidFilter(String),
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("failed to open serial port {port}: {source}")]
    PortOpen {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("device link closed unexpectedly")]
    LinkClosed,
    #[error("device I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("acquisition is already running")]
    AlreadyRunning,
    #[error("acquisition thread panicked")]
    ThreadPanicked,
    #[error("acquisition thread did not stop within {0:?}")]
    StopTimedOut(std::time::Duration),
    #[error("failed to parse configuration: {0}")]
    Config(#[from] serde_json::Error),
}
