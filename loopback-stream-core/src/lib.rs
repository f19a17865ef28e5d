//! # loopback-stream-core
//!
//! Platform-agnostic core of the loopback streaming server.
//!
//! Owns the capture session state machine, frame-aligned decimation and
//! the fan-out of decimated audio to connected subscribers. Platform
//! backends (Windows WASAPI) implement `DeviceDirectory` and
//! `CaptureProvider` and plug into the generic `CaptureSession`.
//!
//! ## Architecture
//!
//! ```text
//! loopback-stream-core (this crate)
//! ├── traits/       ← DeviceDirectory, CaptureProvider, CaptureHandle
//! ├── models/       ← StreamError, CaptureState, WaveFormat, SessionStatus, etc.
//! ├── processing/   ← decimate, DecimationParameters
//! ├── broadcast/    ← Broadcaster, Subscription
//! ├── session/      ← CaptureSession (lifecycle orchestrator)
//! └── mock          ← in-memory backend (feature `mock`)
//! ```

pub mod broadcast;
pub mod models;
pub mod processing;
pub mod session;
pub mod traits;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export key types at crate root for convenience.
pub use broadcast::broadcaster::{Broadcaster, StreamMessage, Subscription};
pub use models::audio_models::{EndpointFlow, EndpointInfo, EndpointListing, EndpointState, SampleEncoding, WaveFormat};
pub use models::config::StreamConfiguration;
pub use models::error::StreamError;
pub use models::state::CaptureState;
pub use models::status::{DeviceSummary, DiagnosticsSnapshot, SessionStatus, StreamFormat, WaveFormatStatus};
pub use processing::decimator::{decimate, DecimationParameters};
pub use session::capture_session::CaptureSession;
pub use traits::capture_provider::{AudioBufferCallback, CaptureHandle, CaptureProvider, StopCallback};
pub use traits::device_directory::{CaptureDeviceRef, DeviceDirectory};
