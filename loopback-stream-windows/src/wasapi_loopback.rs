//! WASAPI loopback capture for a specific endpoint.
//!
//! Captures the audio mix going to a render endpoint using
//! `AUDCLNT_STREAMFLAGS_LOOPBACK`. Capture endpoints are opened as plain
//! shared-mode inputs. No special permissions needed on Windows.
//!
//! Buffers are delivered as raw bytes in the endpoint's mix format, so the
//! frame size seen by the decimator is the format's block alignment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use windows::core::PCWSTR;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::*;

use loopback_stream_core::{AudioBufferCallback, CaptureHandle, CaptureProvider, EndpointFlow, StopCallback, StreamError};

use crate::com::ComApartment;
use crate::device_enumerator::{DeviceEnumerator, MixFormat};

/// Capture provider bound to one endpoint ID.
pub struct WasapiLoopbackCapture {
    device_id: String,
    flow: EndpointFlow,
}

impl WasapiLoopbackCapture {
    pub fn new(device_id: String, flow: EndpointFlow) -> Self {
        Self { device_id, flow }
    }
}

impl CaptureProvider for WasapiLoopbackCapture {
    fn start(
        &self,
        on_buffer: AudioBufferCallback,
        on_stopped: StopCallback,
    ) -> Result<Box<dyn CaptureHandle>, StreamError> {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = sync_channel::<Result<(), StreamError>>(1);

        let device_id = self.device_id.clone();
        let flow = self.flow;
        let thread_running = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("wasapi-loopback-capture".into())
            .spawn(move || {
                let outcome = capture_loop(&device_id, flow, &thread_running, &on_buffer, &ready_tx);
                let was_running = thread_running.swap(false, Ordering::SeqCst);

                match outcome {
                    Err(CaptureFault::Open(e)) => {
                        let _ = ready_tx.send(Err(e));
                    }
                    Err(CaptureFault::Stream(e)) if was_running => on_stopped(Some(e)),
                    Err(CaptureFault::Stream(e)) => {
                        log::debug!("Capture error after stop request: {}", e);
                    }
                    Ok(()) if was_running => on_stopped(None),
                    Ok(()) => {}
                }
            })
            .map_err(|e| StreamError::PrimitiveFailure(format!("failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(LoopbackHandle {
                running,
                thread: Some(handle),
            })),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(StreamError::PrimitiveFailure("capture thread exited during open".into()))
            }
        }
    }
}

/// A running WASAPI capture thread.
struct LoopbackHandle {
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CaptureHandle for LoopbackHandle {
    fn stop(&mut self) -> Result<(), StreamError> {
        self.running.store(false, Ordering::SeqCst);

        let Some(handle) = self.thread.take() else {
            return Ok(());
        };
        // Called from the stop notification: the thread is already exiting.
        if handle.thread().id() == thread::current().id() {
            return Ok(());
        }
        handle
            .join()
            .map_err(|_| StreamError::PrimitiveFailure("capture thread panicked".into()))
    }
}

impl Drop for LoopbackHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

enum CaptureFault {
    /// Failed before delivery began; reported synchronously from `start`.
    Open(StreamError),
    /// Failed while delivering; reported through the stop notification.
    Stream(StreamError),
}

/// Capture loop running on a dedicated thread.
///
/// Sequence:
/// 1. CoInitializeEx (MTA)
/// 2. Open the endpoint by ID
/// 3. Activate IAudioClient
/// 4. Initialize in shared mode, with LOOPBACK for render endpoints
/// 5. Get IAudioCaptureClient
/// 6. Register with MMCSS
/// 7. Start, signal ready, poll for buffers
fn capture_loop(
    device_id: &str,
    flow: EndpointFlow,
    running: &AtomicBool,
    on_buffer: &AudioBufferCallback,
    ready: &SyncSender<Result<(), StreamError>>,
) -> Result<(), CaptureFault> {
    let _com = ComApartment::enter().map_err(CaptureFault::Open)?;

    unsafe {
        let enumerator = DeviceEnumerator::new().map_err(CaptureFault::Open)?;
        let device = enumerator.device(device_id).map_err(CaptureFault::Open)?;

        let audio_client: IAudioClient = device
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| CaptureFault::Open(StreamError::PrimitiveFailure(format!("Activate failed: {}", e))))?;

        let mix_format = MixFormat::query(&audio_client).map_err(CaptureFault::Open)?;
        let block_align = mix_format.block_align();

        let stream_flags = match flow {
            EndpointFlow::Render => AUDCLNT_STREAMFLAGS_LOOPBACK | AUDCLNT_STREAMFLAGS_NOPERSIST,
            EndpointFlow::Capture => AUDCLNT_STREAMFLAGS_NOPERSIST,
        };

        // 100ms in 100ns units
        let buffer_duration = 1_000_000;

        audio_client
            .Initialize(
                AUDCLNT_SHAREMODE_SHARED,
                stream_flags,
                buffer_duration,
                0,
                mix_format.as_ptr(),
                None,
            )
            .map_err(|e| {
                CaptureFault::Open(StreamError::PrimitiveFailure(format!(
                    "IAudioClient::Initialize failed: {}",
                    e
                )))
            })?;

        let capture_client: IAudioCaptureClient = audio_client
            .GetService()
            .map_err(|e| CaptureFault::Open(StreamError::PrimitiveFailure(format!("GetService failed: {}", e))))?;

        // MMCSS registration for real-time priority
        let mut task_index: u32 = 0;
        let task_name: Vec<u16> = "Pro Audio\0".encode_utf16().collect();
        let _mmcss_handle = AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index);

        audio_client.Start().map_err(|e| {
            CaptureFault::Open(StreamError::PrimitiveFailure(format!("IAudioClient::Start failed: {}", e)))
        })?;

        let _ = ready.send(Ok(()));
        log::debug!("WASAPI capture running on {}", device_id);

        let result = poll_buffers(&capture_client, block_align, running, on_buffer);
        let _ = audio_client.Stop();
        result.map_err(CaptureFault::Stream)
    }
}

/// Drain packets every 10ms until `running` clears or the client fails.
unsafe fn poll_buffers(
    capture_client: &IAudioCaptureClient,
    block_align: usize,
    running: &AtomicBool,
    on_buffer: &AudioBufferCallback,
) -> Result<(), StreamError> {
    let fault = |call: &str, e: windows::core::Error| StreamError::PrimitiveFailure(format!("{} failed: {}", call, e));

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(10));

        let mut packet_length = capture_client
            .GetNextPacketSize()
            .map_err(|e| fault("GetNextPacketSize", e))?;

        while packet_length > 0 {
            let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
            let mut num_frames: u32 = 0;
            let mut flags: u32 = 0;

            capture_client
                .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, None, None)
                .map_err(|e| fault("GetBuffer", e))?;

            if num_frames > 0 && !buffer_ptr.is_null() {
                let byte_len = num_frames as usize * block_align;

                if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 {
                    let silence = vec![0u8; byte_len];
                    on_buffer(&silence);
                } else {
                    let data = std::slice::from_raw_parts(buffer_ptr as *const u8, byte_len);
                    on_buffer(data);
                }
            }

            capture_client
                .ReleaseBuffer(num_frames)
                .map_err(|e| fault("ReleaseBuffer", e))?;

            packet_length = capture_client
                .GetNextPacketSize()
                .map_err(|e| fault("GetNextPacketSize", e))?;
        }
    }

    Ok(())
}
