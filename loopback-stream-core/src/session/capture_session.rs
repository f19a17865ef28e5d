use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockUpgradableReadGuard};

use crate::broadcast::broadcaster::Broadcaster;
use crate::models::audio_models::EndpointListing;
use crate::models::config::StreamConfiguration;
use crate::models::error::StreamError;
use crate::models::state::CaptureState;
use crate::models::status::{DeviceSummary, DiagnosticsSnapshot, SessionStatus, StreamFormat, WaveFormatStatus};
use crate::processing::decimator::DecimationParameters;
use crate::traits::capture_provider::{AudioBufferCallback, CaptureHandle, StopCallback};
use crate::traits::device_directory::{CaptureDeviceRef, DeviceDirectory};

/// One running capture.
struct ActiveCapture {
    generation: u64,
    handle: Box<dyn CaptureHandle>,
    format: StreamFormat,
    started_at: DateTime<Utc>,
}

/// Session data per phase. The active handle exists only while capturing.
enum SessionState {
    Idle,
    DeviceSelected {
        device: CaptureDeviceRef,
    },
    Capturing {
        device: CaptureDeviceRef,
        run: ActiveCapture,
    },
}

impl SessionState {
    fn phase(&self) -> CaptureState {
        match self {
            Self::Idle => CaptureState::Idle,
            Self::DeviceSelected { .. } => CaptureState::DeviceSelected,
            Self::Capturing { .. } => CaptureState::Capturing,
        }
    }

    fn device(&self) -> Option<&CaptureDeviceRef> {
        match self {
            Self::Idle => None,
            Self::DeviceSelected { device } | Self::Capturing { device, .. } => Some(device),
        }
    }
}

/// Counters updated from the capture thread.
#[derive(Default)]
struct CaptureCounters {
    buffers_delivered: AtomicU64,
    bytes_captured: AtomicU64,
}

/// Owns the capture lifecycle and feeds the decimate-and-broadcast pipeline.
///
/// ```text
/// [CaptureProvider] → on_buffer → [Decimator] → [Broadcaster] → subscribers
/// ```
///
/// Select, start and stop are serialized by the control lock and run to
/// completion, including waiting for the capture thread to exit. `status`
/// only takes the state lock for reading and never waits on the control
/// lock. The capture thread's stop notification takes the state lock but
/// never the control lock, so a control call joining that thread cannot
/// deadlock with it.
pub struct CaptureSession<D: DeviceDirectory> {
    directory: D,
    config: StreamConfiguration,
    broadcaster: Arc<Broadcaster>,
    control: Mutex<()>,
    state: Arc<RwLock<SessionState>>,
    next_generation: AtomicU64,
    counters: Arc<CaptureCounters>,
}

type ControlGuard<'a> = MutexGuard<'a, ()>;

impl<D: DeviceDirectory> CaptureSession<D> {
    pub fn new(directory: D, config: StreamConfiguration) -> Result<Self, StreamError> {
        config.validate().map_err(StreamError::InvalidConfiguration)?;

        Ok(Self {
            directory,
            broadcaster: Broadcaster::new(config.subscriber_queue_depth),
            config,
            control: Mutex::new(()),
            state: Arc::new(RwLock::new(SessionState::Idle)),
            next_generation: AtomicU64::new(0),
            counters: Arc::new(CaptureCounters::default()),
        })
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn config(&self) -> &StreamConfiguration {
        &self.config
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn state(&self) -> CaptureState {
        self.state.read().phase()
    }

    /// Render and capture endpoints. Enumeration failures yield an empty
    /// listing carrying the error message.
    pub fn list_devices(&self) -> EndpointListing {
        match self.directory.list_endpoints() {
            Ok(listing) => listing,
            Err(e) => {
                log::warn!("Device enumeration failed: {}", e);
                EndpointListing::degraded(e.to_string())
            }
        }
    }

    /// Select the endpoint to capture from. Transitions: idle/device_selected
    /// → device_selected; capturing → (stop) → device_selected.
    ///
    /// On failure the current selection and any running capture are left
    /// untouched.
    pub fn select_device(&self, device_id: &str) -> Result<DeviceSummary, StreamError> {
        let guard = self.control.lock();
        self.select_locked(&guard, device_id)
    }

    /// Start capture. Transitions: device_selected → capturing.
    pub fn start_capture(&self) -> Result<StreamFormat, StreamError> {
        let guard = self.control.lock();
        self.start_locked(&guard)
    }

    /// Stop capture. Transitions: capturing → device_selected. A no-op in any
    /// other phase; never fails.
    ///
    /// Returns whether a capture was running.
    pub fn stop_capture(&self) -> bool {
        let guard = self.control.lock();
        self.halt_locked(&guard)
    }

    /// Consistent snapshot of phase, selection, format and subscribers.
    pub fn status(&self) -> SessionStatus {
        let state = self.state.read();
        let run = match &*state {
            SessionState::Capturing { run, .. } => Some(run),
            _ => None,
        };

        SessionStatus {
            is_capturing: run.is_some(),
            phase: state.phase(),
            selected_device: state.device().map(|d| DeviceSummary {
                name: d.name.clone(),
                id: d.id.clone(),
            }),
            connected_clients: self.broadcaster.live_count(),
            wave_format: run.map(|r| WaveFormatStatus::from(&r.format)),
            capture_started_at: run.map(|r| r.started_at),
            diagnostics: self.diagnostics(),
        }
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            buffers_delivered: self.counters.buffers_delivered.load(Ordering::Relaxed),
            bytes_captured: self.counters.bytes_captured.load(Ordering::Relaxed),
            bytes_broadcast: self.broadcaster.bytes_broadcast(),
            frames_dropped: self.broadcaster.frames_dropped(),
        }
    }

    // --- Transitions (control lock held) ---

    fn select_locked(&self, guard: &ControlGuard<'_>, device_id: &str) -> Result<DeviceSummary, StreamError> {
        let device = self.directory.resolve(device_id)?;
        let summary = DeviceSummary {
            name: device.name.clone(),
            id: device.id.clone(),
        };

        if self.halt_locked(guard) {
            log::info!("Capture stopped for device switch");
        }

        log::info!("Selected device '{}' ({}), {}", device.name, device.id, device.format);
        *self.state.write() = SessionState::DeviceSelected { device };
        Ok(summary)
    }

    fn start_locked(&self, _guard: &ControlGuard<'_>) -> Result<StreamFormat, StreamError> {
        // Upgradable: status readers proceed, the stop notification waits.
        let state = self.state.upgradable_read();
        let device = match &*state {
            SessionState::Idle => return Err(StreamError::NoDeviceSelected),
            SessionState::Capturing { .. } => return Err(StreamError::AlreadyCapturing),
            SessionState::DeviceSelected { device } => device,
        };

        let params = DecimationParameters::for_format(&device.format, self.config.downsample_factor)?;
        let format = StreamFormat::new(&device.format, params.factor);
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let announced = Arc::new(AtomicBool::new(false));

        let handle = device
            .provider()
            .start(
                self.buffer_callback(params, Arc::clone(&announced)),
                self.stop_callback(generation),
            )
            .map_err(|e| {
                log::error!("Failed to start capture on '{}': {}", device.name, e);
                match e {
                    StreamError::PrimitiveFailure(_) => e,
                    other => StreamError::PrimitiveFailure(other.to_string()),
                }
            })?;

        // Handshake reaches every subscriber before the first broadcast buffer.
        self.broadcaster.announce(format.clone());
        announced.store(true, Ordering::SeqCst);

        log::info!(
            "Capture started on '{}': {} → {} Hz (factor {})",
            device.name,
            device.format,
            format.sample_rate,
            params.factor
        );

        let run = ActiveCapture {
            generation,
            handle,
            format: format.clone(),
            started_at: Utc::now(),
        };

        let mut state = RwLockUpgradableReadGuard::upgrade(state);
        let SessionState::DeviceSelected { device } = mem::replace(&mut *state, SessionState::Idle) else {
            unreachable!("session left device_selected while the upgradable guard was held");
        };
        *state = SessionState::Capturing { device, run };

        Ok(format)
    }

    /// Stop and release the running capture, if any. Returns whether one ran.
    fn halt_locked(&self, _guard: &ControlGuard<'_>) -> bool {
        let stopped = {
            let mut state = self.state.write();
            match mem::replace(&mut *state, SessionState::Idle) {
                SessionState::Capturing { device, run } => {
                    let name = device.name.clone();
                    *state = SessionState::DeviceSelected { device };
                    Some((name, run))
                }
                other => {
                    *state = other;
                    None
                }
            }
        };

        let Some((name, mut run)) = stopped else {
            return false;
        };

        // Join the capture thread outside the state lock.
        if let Err(e) = run.handle.stop() {
            log::warn!("Error stopping capture on '{}': {}", name, e);
        }
        // Withdraw only after the last buffer of this run was broadcast.
        self.broadcaster.withdraw();

        log::info!("Capture stopped on '{}'", name);
        true
    }

    // --- Capture-thread callbacks ---

    /// Buffers arriving before the run's handshake is announced are counted
    /// but not broadcast.
    fn buffer_callback(&self, params: DecimationParameters, announced: Arc<AtomicBool>) -> AudioBufferCallback {
        let broadcaster = Arc::clone(&self.broadcaster);
        let counters = Arc::clone(&self.counters);

        Arc::new(move |data: &[u8]| {
            counters.buffers_delivered.fetch_add(1, Ordering::Relaxed);
            counters
                .bytes_captured
                .fetch_add(data.len() as u64, Ordering::Relaxed);
            if !announced.load(Ordering::SeqCst) {
                return;
            }

            let decimated = params.apply(data);
            if !decimated.is_empty() {
                broadcaster.broadcast(Bytes::from(decimated));
            }
        })
    }

    fn stop_callback(&self, generation: u64) -> StopCallback {
        let state = Arc::downgrade(&self.state);
        let broadcaster = Arc::clone(&self.broadcaster);

        Arc::new(move |error: Option<StreamError>| {
            primitive_stopped(&state, &broadcaster, generation, error);
        })
    }
}

impl<D: DeviceDirectory> Drop for CaptureSession<D> {
    fn drop(&mut self) {
        let guard = self.control.lock();
        self.halt_locked(&guard);
    }
}

/// The capture primitive ended on its own. Falls back to device_selected if
/// `generation` is still the running capture; stale notifications are ignored.
fn primitive_stopped(
    state: &Weak<RwLock<SessionState>>,
    broadcaster: &Broadcaster,
    generation: u64,
    error: Option<StreamError>,
) {
    let Some(state) = state.upgrade() else {
        return;
    };

    let stopped = {
        let mut state = state.write();
        match mem::replace(&mut *state, SessionState::Idle) {
            SessionState::Capturing { device, run } if run.generation == generation => {
                let name = device.name.clone();
                *state = SessionState::DeviceSelected { device };
                // Under the state lock so a following start's announce wins.
                broadcaster.withdraw();
                Some((name, run))
            }
            other => {
                *state = other;
                None
            }
        }
    };

    let Some((name, mut run)) = stopped else {
        return;
    };

    match error {
        Some(e) => log::error!("Capture on '{}' stopped unexpectedly: {}", name, e),
        None => log::warn!("Capture on '{}' ended", name),
    }
    // Runs on the capture thread; backends skip joining themselves.
    if let Err(e) = run.handle.stop() {
        log::debug!("Releasing stopped capture on '{}': {}", name, e);
    }
}
