use axum::{
    extract::{rejection::JsonRejection, FromRequest},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sdserve_core::ParamError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Model not loaded")]
    ModelNotLoaded,
    #[error("Invalid JSON body: {0}")]
    InvalidJson(String),
    #[error(transparent)]
    InvalidParams(#[from] ParamError),
    #[error("{0}")]
    Generation(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidJson(_) | Self::InvalidParams(_) => StatusCode::BAD_REQUEST,
            Self::ModelNotLoaded | Self::Generation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidJson(rejection.body_text())
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// `Json` extractor whose rejections render as `{"error": ...}` with a 400.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(ApiError::ModelNotLoaded.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            ApiError::InvalidParams(ParamError::MissingPrompt).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::InvalidJson("eof".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Generation("CUDA out of memory".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn messages_pass_through() {
        assert_eq!(ApiError::ModelNotLoaded.to_string(), "Model not loaded");
        assert_eq!(
            ApiError::from(ParamError::MissingPrompt).to_string(),
            "Missing 'prompt' in request"
        );
        assert_eq!(ApiError::Generation("boom".into()).to_string(), "boom");
    }
}
