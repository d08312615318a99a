use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::context::RequestContext;
use crate::jsonrpc::message::{self, RpcError, INTERNAL_ERROR, PARSE_ERROR};

/// Optional capabilities a failure exposes to the error encoder.
///
/// Failures without an explicit code are reported as internal errors.
pub trait RpcFailure: std::error::Error + Send + Sync {
    fn error_code(&self) -> Option<i64> {
        None
    }

    /// Headers merged into the transport response.
    fn headers(&self) -> Option<HeaderMap> {
        None
    }

    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Failures that abort an exchange before any request is dispatched.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("read body error: {0}")]
    ReadBody(String),
    #[error("request body could not be decoded: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("request batch is empty")]
    EmptyBatch,
}

impl RpcFailure for TransportError {
    fn error_code(&self) -> Option<i64> {
        Some(PARSE_ERROR)
    }

    fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}

impl RpcFailure for RpcError {
    fn error_code(&self) -> Option<i64> {
        Some(self.code)
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid target url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("params encode error: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("exchange failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("response body could not be decoded (status {status}): {source}")]
    Decode {
        status: StatusCode,
        #[source]
        source: serde_json::Error,
    },
    #[error("result decode error: {0}")]
    Result(#[source] serde_json::Error),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("call cancelled")]
    Cancelled,
    /// Domain error produced by an error decoder hook.
    #[error("{0}")]
    Domain(Box<dyn std::error::Error + Send + Sync>),
}

/// Writes `failure` as a single JSON-RPC error response.
///
/// The id comes from the context, so transport-level failures carry `null`.
pub fn default_error_encoder(ctx: &RequestContext, failure: &dyn RpcFailure) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(message::CONTENT_TYPE),
    );
    if let Some(extra) = failure.headers() {
        headers.extend(extra);
    }

    let error = RpcError::new(
        failure.error_code().unwrap_or(INTERNAL_ERROR),
        failure.to_string(),
    );
    tracing::warn!(code = error.code, error = %error.message, "request rejected");

    (
        failure.status_code(),
        headers,
        Json(message::Response::failure(ctx.request_id().cloned(), error)),
    )
        .into_response()
}
