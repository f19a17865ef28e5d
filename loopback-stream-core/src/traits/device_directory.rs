use std::fmt;

use crate::models::audio_models::{EndpointListing, WaveFormat};
use crate::models::error::StreamError;
use crate::traits::capture_provider::CaptureProvider;

/// Enumerates audio endpoints and resolves identifiers to capturable devices.
pub trait DeviceDirectory: Send + Sync {
    /// Active render and capture endpoints.
    fn list_endpoints(&self) -> Result<EndpointListing, StreamError>;

    /// Resolve `device_id` against every active endpoint regardless of
    /// direction. Loopback capture reads a render endpoint's mix.
    ///
    /// Returns `StreamError::DeviceNotFound` when nothing matches.
    fn resolve(&self, device_id: &str) -> Result<CaptureDeviceRef, StreamError>;
}

/// A resolved, capturable endpoint.
///
/// Owned exclusively by the capture session and replaced wholesale on
/// re-selection.
pub struct CaptureDeviceRef {
    pub id: String,
    pub name: String,
    pub format: WaveFormat,
    provider: Box<dyn CaptureProvider>,
}

impl CaptureDeviceRef {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        format: WaveFormat,
        provider: Box<dyn CaptureProvider>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            format,
            provider,
        }
    }

    pub fn provider(&self) -> &dyn CaptureProvider {
        self.provider.as_ref()
    }
}

impl fmt::Debug for CaptureDeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureDeviceRef")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}
