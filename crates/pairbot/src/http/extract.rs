//! Request body extractor and error responses.

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::de::DeserializeOwned;
use tracing::error;

use crate::api::ErrorResponse;

/// Error returned by API handlers, rendered as `{ok:false,error}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Client error with a 400 status.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Error carrying an extractor rejection's own status, such as 413 for
    /// a body over the size limit.
    pub fn rejected(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// HTTP status of this error.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<pairbot_core::Error> for ApiError {
    fn from(err: pairbot_core::Error) -> Self {
        let status = if err.is_validation() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed: {}", self.message);
        }
        (self.status, Json(ErrorResponse::new(self.message))).into_response()
    }
}

/// Request body decoded from JSON or from a URL-encoded form.
///
/// An empty body decodes to `T::default()`, so missing fields are reported
/// by validation rather than by the decoder. Bodies over the router's
/// `DefaultBodyLimit` are rejected with 413.
pub struct ApiBody<T>(pub T);

impl<S, T> FromRequest<S> for ApiBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Default + Send,
{
    type Rejection = ApiError;

    fn from_request(
        req: Request,
        state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            let is_form = req
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .is_some_and(|value| {
                    value
                        .to_ascii_lowercase()
                        .starts_with("application/x-www-form-urlencoded")
                });

            if is_form {
                let Form(value) = Form::<T>::from_request(req, state)
                    .await
                    .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;
                return Ok(ApiBody(value));
            }

            // Honours `DefaultBodyLimit`
            let bytes = Bytes::from_request(req, state)
                .await
                .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok(ApiBody(T::default()));
            }

            let value = serde_json::from_slice(&bytes)
                .map_err(|e| ApiError::bad_request(format!("Invalid JSON: {e}")))?;
            Ok(ApiBody(value))
        }
    }
}
