use std::sync::Arc;

use crate::models::error::StreamError;

/// Callback invoked when a filled capture buffer is available.
///
/// Parameters:
/// - `data`: Raw interleaved PCM bytes in the endpoint's native wave format.
///   Holds whole frames, but consumers must not rely on it.
pub type AudioBufferCallback = Arc<dyn Fn(&[u8]) + Send + Sync + 'static>;

/// Callback invoked once when a running capture ends without being asked to.
///
/// `Some(error)` carries the fault (device removed, client invalidated);
/// `None` means the stream drained normally.
pub type StopCallback = Arc<dyn Fn(Option<StreamError>) + Send + Sync + 'static>;

/// The OS capture primitive bound to one resolved endpoint.
///
/// Implemented by:
/// - `WasapiLoopbackCapture` (Windows)
/// - `MockProvider` (tests)
pub trait CaptureProvider: Send + Sync {
    /// Open the endpoint and begin delivering buffers via `on_buffer`.
    ///
    /// Open-time faults are returned here. Faults after delivery began are
    /// reported through `on_stopped`. Both callbacks fire on the capture
    /// thread; keep work in them minimal.
    fn start(
        &self,
        on_buffer: AudioBufferCallback,
        on_stopped: StopCallback,
    ) -> Result<Box<dyn CaptureHandle>, StreamError>;
}

/// A running capture. Dropping the handle stops it.
pub trait CaptureHandle: Send + Sync {
    /// Halt delivery and release OS resources. Calling it twice is a no-op.
    ///
    /// Must not deadlock when invoked from inside `on_stopped`, i.e. on the
    /// capture thread itself.
    fn stop(&mut self) -> Result<(), StreamError>;
}
