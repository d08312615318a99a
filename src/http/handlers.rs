//! Axum handlers for the JSON-RPC endpoint
//!
//! Only POST is served. The body is read up to the configured limit, handed
//! to [`Server::serve`](crate::jsonrpc::server::Server::serve) and the shaped
//! reply is written back with the JSON-RPC content type.

use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::context::RequestContext;
use crate::errors::TransportError;
use crate::jsonrpc::{message, server::Reply};
use crate::AppState;

const MUST_POST: &str = "405 must POST\n";

pub async fn rpc_endpoint(State(state): State<AppState>, request: Request) -> Response {
    serve_rpc(&state, request, None).await
}

/// Same as [`rpc_endpoint`], with the method taken from the path.
pub async fn rpc_method_endpoint(
    State(state): State<AppState>,
    Path(method): Path<String>,
    request: Request,
) -> Response {
    serve_rpc(&state, request, Some(method.as_str())).await
}

async fn serve_rpc(state: &AppState, request: Request, url_method: Option<&str>) -> Response {
    if request.method() != Method::POST {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            MUST_POST,
        )
            .into_response();
    }

    let server = &state.server;
    let (parts, body) = request.into_parts();
    let ctx = server.run_before(RequestContext::new(), &parts);

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(err) => {
            return server.encode_error(&ctx, &TransportError::ReadBody(err.to_string()));
        }
    };

    let reply = match server.serve(&ctx, &body, url_method).await {
        Ok(reply) => reply,
        Err(err) => return server.encode_error(&ctx, &err),
    };

    let mut headers = HeaderMap::new();
    server.run_after(ctx, &mut headers);

    let encoded = match &reply {
        Reply::Empty => return (StatusCode::OK, headers).into_response(),
        Reply::Single(response) => serde_json::to_vec(response),
        Reply::Batch(responses) => serde_json::to_vec(responses),
    };

    match encoded {
        Ok(payload) => {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(message::CONTENT_TYPE),
            );
            (StatusCode::OK, headers, Body::from(payload)).into_response()
        }
        Err(err) => {
            error!(error = %err, "failed to serialize reply");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
