use thiserror::Error;

/// Errors surfaced by the capture session, the device directory and the
/// capture backends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("no device selected")]
    NoDeviceSelected,

    #[error("capture already running")]
    AlreadyCapturing,

    #[error("capture primitive failed: {0}")]
    PrimitiveFailure(String),

    /// A single subscriber's send or receive failed. Never propagated to
    /// capture or to other subscribers.
    #[error("transport failed: {0}")]
    TransportFailure(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}
