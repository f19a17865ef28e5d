//! Control surface handlers.
//!
//! Session transitions may join the capture thread, so they run on the
//! blocking pool rather than on a runtime worker.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use loopback_stream_core::{CaptureSession, DeviceDirectory, EndpointListing, SessionStatus};

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectRequest {
    pub device_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl ControlResponse {
    fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            device_id: None,
        }
    }
}

async fn blocking<D, T, F>(session: &Arc<CaptureSession<D>>, op: F) -> Result<T, ApiError>
where
    D: DeviceDirectory + 'static,
    T: Send + 'static,
    F: FnOnce(&CaptureSession<D>) -> T + Send + 'static,
{
    let session = Arc::clone(session);
    tokio::task::spawn_blocking(move || op(&session))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))
}

pub async fn list_devices<D: DeviceDirectory + 'static>(State(state): State<AppState<D>>) -> Result<Json<EndpointListing>, ApiError> {
    let listing = blocking(&state.session, |session| session.list_devices()).await?;
    Ok(Json(listing))
}

pub async fn select_device<D: DeviceDirectory + 'static>(
    State(state): State<AppState<D>>,
    Json(request): Json<SelectRequest>,
) -> Result<Json<ControlResponse>, ApiError> {
    let device_id = request.device_id;
    let id = device_id.clone();
    let selected = blocking(&state.session, move |session| session.select_device(&id))
        .await?
        .inspect_err(|e| log::warn!("Select '{}' failed: {}", device_id, e))?;

    Ok(Json(ControlResponse {
        message: format!("Selected {}", selected.name),
        device_id: Some(selected.id),
    }))
}

pub async fn start_capture<D: DeviceDirectory + 'static>(State(state): State<AppState<D>>) -> Result<Json<ControlResponse>, ApiError> {
    let format = blocking(&state.session, |session| session.start_capture())
        .await?
        .inspect_err(|e| log::warn!("Start capture failed: {}", e))?;

    Ok(Json(ControlResponse::message(format!(
        "Capture started at {} Hz",
        format.sample_rate
    ))))
}

pub async fn stop_capture<D: DeviceDirectory + 'static>(State(state): State<AppState<D>>) -> Result<Json<ControlResponse>, ApiError> {
    let was_capturing = blocking(&state.session, |session| session.stop_capture()).await?;

    let message = if was_capturing {
        "Capture stopped"
    } else {
        "Capture was not running"
    };
    Ok(Json(ControlResponse::message(message)))
}

pub async fn status<D: DeviceDirectory + 'static>(State(state): State<AppState<D>>) -> Json<SessionStatus> {
    Json(state.session.status())
}
