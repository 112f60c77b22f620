//! JSend envelopes for the control surface.
//!
//! `success` carries the command result in `data`, `fail` carries a message for requests
//! the agent refused (unknown command, bad path, ...), and `error` is reserved for
//! failures on the agent's side.

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JSendStatus {
    Error,
    Fail,
    Success,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JSend<T: Serialize> {
    pub data: T,
    pub status: JSendStatus,
}

impl<T: Serialize> JSend<T> {
    pub fn success(data: T) -> Json<JSend<T>> {
        Json(JSend {
            data,
            status: JSendStatus::Success,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FailData {
    pub message: String,
}

/// Body of `error` responses; JSend puts the message at the top level.
#[derive(Debug, Serialize, Deserialize)]
pub struct JSendError {
    pub message: String,
    pub status: JSendStatus,
}

/// A handler failure, rendered as JSend `fail` (4xx) or `error` (5xx).
#[derive(Debug)]
pub enum ApiError {
    Fail(StatusCode, String),
    Error(StatusCode, String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Fail(code, message) => (
                code,
                Json(JSend {
                    data: FailData { message },
                    status: JSendStatus::Fail,
                }),
            )
                .into_response(),
            ApiError::Error(code, message) => (
                code,
                Json(JSendError {
                    message,
                    status: JSendStatus::Error,
                }),
            )
                .into_response(),
        }
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::BAD_REQUEST, message.into())
    }

    /// The command was understood but could not be carried out.
    pub fn unprocessable(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::UNPROCESSABLE_ENTITY, message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::SERVICE_UNAVAILABLE, message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Error(StatusCode::INTERNAL_SERVER_ERROR, message.into())
    }
}

/// `axum::Json` that rejects with a JSend `fail` instead of plain text.
pub struct AppJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, ApiError> {
        let rejection = match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => return Ok(AppJson(value)),
            Err(rejection) => rejection,
        };

        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid command: {}", err.body_text()),
            JsonRejection::JsonSyntaxError(_) => "Malformed JSON in request body".into(),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing Content-Type: application/json header".into()
            }
            _ => "Failed to read request body".into(),
        };
        Err(ApiError::bad_request(message))
    }
}
