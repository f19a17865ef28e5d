//! In-memory device directory and capture provider.
//!
//! Buffers and faults are injected by hand through a [`MockTap`], one per
//! endpoint, so the capture session and the server can be exercised without
//! audio hardware.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::audio_models::{
    EndpointFlow, EndpointInfo, EndpointListing, EndpointState, SampleEncoding, WaveFormat,
};
use crate::models::error::StreamError;
use crate::traits::capture_provider::{AudioBufferCallback, CaptureHandle, CaptureProvider, StopCallback};
use crate::traits::device_directory::{CaptureDeviceRef, DeviceDirectory};

/// 48 kHz, 16-bit stereo PCM.
pub fn pcm_stereo_48k() -> WaveFormat {
    WaveFormat {
        sample_rate: 48000,
        bits_per_sample: 16,
        channels: 2,
        encoding: SampleEncoding::Pcm,
    }
}

#[derive(Default)]
struct TapState {
    on_buffer: Option<AudioBufferCallback>,
    on_stopped: Option<StopCallback>,
    /// Stop notification of the most recently stopped run.
    previous_on_stopped: Option<StopCallback>,
    start_count: usize,
    stop_count: usize,
    fail_next_start: Option<StreamError>,
}

/// Test-side control of one mock endpoint.
#[derive(Default)]
pub struct MockTap {
    state: Mutex<TapState>,
}

impl MockTap {
    /// Push one buffer through the running capture, as the OS would.
    /// Returns `false` when nothing is capturing.
    pub fn deliver(&self, data: &[u8]) -> bool {
        let callback = self.state.lock().on_buffer.clone();
        match callback {
            Some(on_buffer) => {
                on_buffer(data);
                true
            }
            None => false,
        }
    }

    /// Simulate the endpoint stopping on its own, e.g. device removal.
    pub fn fail(&self, error: StreamError) -> bool {
        let on_stopped = {
            let mut state = self.state.lock();
            state.on_buffer = None;
            let on_stopped = state.on_stopped.take();
            if on_stopped.is_some() {
                state.previous_on_stopped = on_stopped.clone();
            }
            on_stopped
        };
        match on_stopped {
            Some(on_stopped) => {
                on_stopped(Some(error));
                true
            }
            None => false,
        }
    }

    /// Invoke the stop notification of an earlier, already stopped run, as a
    /// backend whose thread exits late would. Returns `false` if no run has
    /// been stopped yet.
    pub fn fire_stale_stop(&self, error: Option<StreamError>) -> bool {
        let on_stopped = self.state.lock().previous_on_stopped.clone();
        match on_stopped {
            Some(on_stopped) => {
                on_stopped(error);
                true
            }
            None => false,
        }
    }

    /// Make the next `start` fail with `error`.
    pub fn fail_next_start(&self, error: StreamError) {
        self.state.lock().fail_next_start = Some(error);
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().on_buffer.is_some()
    }

    pub fn start_count(&self) -> usize {
        self.state.lock().start_count
    }

    pub fn stop_count(&self) -> usize {
        self.state.lock().stop_count
    }
}

struct MockProvider {
    tap: Arc<MockTap>,
}

impl CaptureProvider for MockProvider {
    fn start(
        &self,
        on_buffer: AudioBufferCallback,
        on_stopped: StopCallback,
    ) -> Result<Box<dyn CaptureHandle>, StreamError> {
        let mut state = self.tap.state.lock();
        if let Some(error) = state.fail_next_start.take() {
            return Err(error);
        }
        if state.on_buffer.is_some() {
            return Err(StreamError::PrimitiveFailure("mock endpoint already capturing".into()));
        }
        state.on_buffer = Some(on_buffer);
        state.on_stopped = Some(on_stopped);
        state.start_count += 1;

        Ok(Box::new(MockHandle {
            tap: Arc::clone(&self.tap),
            stopped: false,
        }))
    }
}

struct MockHandle {
    tap: Arc<MockTap>,
    stopped: bool,
}

impl CaptureHandle for MockHandle {
    fn stop(&mut self) -> Result<(), StreamError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        let mut state = self.tap.state.lock();
        state.on_buffer = None;
        if let Some(on_stopped) = state.on_stopped.take() {
            state.previous_on_stopped = Some(on_stopped);
        }
        state.stop_count += 1;
        Ok(())
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

struct MockEndpoint {
    flow: EndpointFlow,
    id: String,
    name: String,
    format: WaveFormat,
    tap: Arc<MockTap>,
}

#[derive(Default)]
struct DirectoryState {
    endpoints: Vec<MockEndpoint>,
    listing_error: Option<StreamError>,
}

/// Device directory over a fixed, test-controlled set of endpoints.
///
/// Clones share the same endpoints.
#[derive(Clone, Default)]
pub struct MockDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an endpoint and return its tap.
    pub fn add_endpoint(
        &self,
        flow: EndpointFlow,
        id: &str,
        name: &str,
        format: WaveFormat,
    ) -> Arc<MockTap> {
        let tap = Arc::new(MockTap::default());
        self.state.lock().endpoints.push(MockEndpoint {
            flow,
            id: id.to_string(),
            name: name.to_string(),
            format,
            tap: Arc::clone(&tap),
        });
        tap
    }

    pub fn tap(&self, id: &str) -> Option<Arc<MockTap>> {
        self.state
            .lock()
            .endpoints
            .iter()
            .find(|e| e.id == id)
            .map(|e| Arc::clone(&e.tap))
    }

    /// Make `list_endpoints` fail until cleared with `None`.
    pub fn set_listing_error(&self, error: Option<StreamError>) {
        self.state.lock().listing_error = error;
    }
}

impl DeviceDirectory for MockDirectory {
    fn list_endpoints(&self) -> Result<EndpointListing, StreamError> {
        let state = self.state.lock();
        if let Some(error) = &state.listing_error {
            return Err(error.clone());
        }

        let collect = |flow: EndpointFlow| -> Vec<EndpointInfo> {
            state
                .endpoints
                .iter()
                .filter(|e| e.flow == flow)
                .enumerate()
                .map(|(index, e)| EndpointInfo {
                    index,
                    name: e.name.clone(),
                    id: e.id.clone(),
                    state: EndpointState::Active,
                    is_default: index == 0,
                })
                .collect()
        };

        Ok(EndpointListing {
            render_devices: collect(EndpointFlow::Render),
            capture_devices: collect(EndpointFlow::Capture),
            error: None,
        })
    }

    fn resolve(&self, device_id: &str) -> Result<CaptureDeviceRef, StreamError> {
        let state = self.state.lock();
        let endpoint = state
            .endpoints
            .iter()
            .find(|e| e.id == device_id)
            .ok_or_else(|| StreamError::DeviceNotFound(device_id.to_string()))?;

        Ok(CaptureDeviceRef::new(
            endpoint.id.clone(),
            endpoint.name.clone(),
            endpoint.format,
            Box::new(MockProvider {
                tap: Arc::clone(&endpoint.tap),
            }),
        ))
    }
}
