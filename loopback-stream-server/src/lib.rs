//! # loopback-stream-server
//!
//! HTTP control surface and WebSocket stream over a [`CaptureSession`].
//!
//! ## Endpoints
//!
//! | Method | Path                 | Description |
//! |--------|----------------------|-------------|
//! | GET    | `/api/audio/devices` | Render and capture endpoints |
//! | POST   | `/api/audio/select`  | Select an endpoint, body `{ "deviceId": ... }` |
//! | POST   | `/api/audio/start`   | Start capture on the selected endpoint |
//! | POST   | `/api/audio/stop`    | Stop capture (idempotent) |
//! | GET    | `/api/audio/status`  | Session snapshot |
//! | GET    | `/ws/audio`          | JSON handshake, then binary PCM |

pub mod config;
pub mod error;
pub mod routes;
pub mod stream_handler;

use std::future::Future;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

use loopback_stream_core::{CaptureSession, DeviceDirectory};

use crate::config::ServerArgs;
use crate::error::ServerError;

/// Shared state passed to all request handlers.
pub struct AppState<D: DeviceDirectory> {
    pub session: Arc<CaptureSession<D>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl<D: DeviceDirectory> AppState<D> {
    pub fn new(session: Arc<CaptureSession<D>>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            session,
            shutdown: Arc::new(shutdown),
        }
    }

    /// Ask every open stream connection to close.
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

impl<D: DeviceDirectory> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

pub fn router<D: DeviceDirectory + 'static>(state: AppState<D>) -> Router {
    Router::new()
        .route("/api/audio/devices", get(routes::list_devices::<D>))
        .route("/api/audio/select", post(routes::select_device::<D>))
        .route("/api/audio/start", post(routes::start_capture::<D>))
        .route("/api/audio/stop", post(routes::stop_capture::<D>))
        .route("/api/audio/status", get(routes::status::<D>))
        .route("/ws/audio", get(stream_handler::stream_socket::<D>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve `state` on `listener` until `signal` resolves, then close stream
/// connections and stop capture.
pub async fn serve<D, F>(listener: TcpListener, state: AppState<D>, signal: F) -> Result<(), ServerError>
where
    D: DeviceDirectory + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state.clone());
    let on_signal = state.clone();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            log::info!("Shutting down");
            on_signal.begin_shutdown();
        })
        .await?;

    let session = Arc::clone(&state.session);
    let stopped = tokio::task::spawn_blocking(move || session.stop_capture())
        .await
        .unwrap_or(false);
    if stopped {
        log::info!("Capture stopped on shutdown");
    }
    Ok(())
}

/// Build the session for `directory`, apply startup selection and serve
/// until Ctrl-C.
pub async fn run<D: DeviceDirectory + 'static>(args: ServerArgs, directory: D) -> Result<(), ServerError> {
    let session = Arc::new(CaptureSession::new(directory, args.stream_configuration())?);

    if let Some(device_id) = &args.device {
        match session.select_device(device_id) {
            Ok(device) => {
                if args.autostart {
                    if let Err(e) = session.start_capture() {
                        log::warn!("Autostart on '{}' failed: {}", device.name, e);
                    }
                }
            }
            Err(e) => log::warn!("Startup selection of '{}' failed: {}", device_id, e),
        }
    }

    let listener = TcpListener::bind(args.bind)
        .await
        .map_err(|source| ServerError::Bind { addr: args.bind, source })?;
    log::info!("Listening on http://{}", args.bind);

    serve(listener, AppState::new(session), shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
