use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sentry::integrations::anyhow::capture_anyhow;
use serde::{Deserialize, Serialize};
use upscaler_service::UpscaleError;
use upscaler_service::service::DecodeError;

/// Why a request could not be answered with an image.
#[derive(Debug)]
pub enum ResponseError {
    /// The image key could not be decoded.
    BadRequest(anyhow::Error),
    /// The upscaler is shutting down. Answered with an empty body.
    Unavailable,
    /// Producing or serving the image failed.
    Internal(anyhow::Error),
}

impl From<DecodeError> for ResponseError {
    fn from(err: DecodeError) -> Self {
        Self::BadRequest(anyhow::Error::new(err).context("malformed image key"))
    }
}

impl From<UpscaleError> for ResponseError {
    fn from(err: UpscaleError) -> Self {
        match err {
            UpscaleError::Closed => Self::Unavailable,
            err => Self::Internal(anyhow::Error::new(err).context("failed to upscale image")),
        }
    }
}

impl From<anyhow::Error> for ResponseError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<axum::http::Error> for ResponseError {
    fn from(err: axum::http::Error) -> Self {
        Self::Internal(err.into())
    }
}

impl IntoResponse for ResponseError {
    fn into_response(self) -> Response {
        match self {
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE.into_response(),
            Self::BadRequest(err) => {
                (StatusCode::BAD_REQUEST, Json(ApiErrorResponse::from(&err))).into_response()
            }
            Self::Internal(err) => {
                capture_anyhow(&err);
                let body = Json(ApiErrorResponse::from(&err));
                (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
            }
        }
    }
}

/// The JSON body of an error response.
#[derive(Serialize, Deserialize, Default, Debug, PartialEq)]
pub struct ApiErrorResponse {
    pub detail: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl From<&anyhow::Error> for ApiErrorResponse {
    fn from(err: &anyhow::Error) -> Self {
        let mut chain = err.chain().map(|err| err.to_string());
        Self {
            detail: chain.next().unwrap_or_default(),
            causes: chain.collect(),
        }
    }
}
