use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use loopback_stream_core::StreamError;

/// A failed control call, rendered as `{ "error": message }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Stream(StreamError::DeviceNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Stream(StreamError::NoDeviceSelected) => StatusCode::BAD_REQUEST,
            ApiError::Stream(StreamError::InvalidConfiguration(_)) => StatusCode::BAD_REQUEST,
            ApiError::Stream(StreamError::AlreadyCapturing) => StatusCode::CONFLICT,
            ApiError::Stream(StreamError::PrimitiveFailure(_))
            | ApiError::Stream(StreamError::TransportFailure(_))
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Fatal errors returned from the binary.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("no capture backend for platform '{0}'")]
    UnsupportedPlatform(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_stream_errors_to_status_codes() {
        let cases = [
            (StreamError::DeviceNotFound("x".into()), StatusCode::NOT_FOUND),
            (StreamError::NoDeviceSelected, StatusCode::BAD_REQUEST),
            (StreamError::AlreadyCapturing, StatusCode::CONFLICT),
            (StreamError::PrimitiveFailure("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status_code(), expected);
        }
    }

    #[test]
    fn message_is_the_stream_error_text() {
        let error = ApiError::from(StreamError::DeviceNotFound("{abc}".into()));
        assert_eq!(error.to_string(), "device not found: {abc}");
    }
}
