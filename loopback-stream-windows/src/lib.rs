//! # loopback-stream-windows
//!
//! Windows WASAPI backend for loopback-stream.
//!
//! Provides:
//! - `WasapiDirectory`: endpoint listing and resolution via the MMDevice API
//! - `WasapiLoopbackCapture`: loopback capture of a render endpoint (or
//!   plain capture of an input endpoint) by ID
//!
//! ## Platform Requirements
//! - Windows 10 1703+ (build 15063)
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use loopback_stream_core::{CaptureSession, StreamConfiguration};
//! use loopback_stream_windows::WasapiDirectory;
//!
//! let session = CaptureSession::new(WasapiDirectory::new(), StreamConfiguration::default())?;
//! session.select_device("{0.0.0.00000000}.{...}")?;
//! session.start_capture()?;
//! ```

#[cfg(target_os = "windows")]
mod com;
#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod wasapi_loopback;

#[cfg(target_os = "windows")]
pub use device_enumerator::WasapiDirectory;
#[cfg(target_os = "windows")]
pub use wasapi_loopback::WasapiLoopbackCapture;
