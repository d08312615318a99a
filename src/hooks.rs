//! Before/after hooks run around an exchange
//!
//! Hooks receive the current [`RequestContext`] and return the context that
//! later hooks, codecs and endpoints will see.

use std::sync::Arc;

use axum::http::{request::Parts, HeaderMap, HeaderName, HeaderValue};
use uuid::Uuid;

use crate::client::ExchangeResponse;
use crate::context::{RequestContext, SESSION_ID_HEADER, USER_ID_HEADER};

/// Runs on the outgoing client request after its body is set.
pub type ClientRequestFn =
    Arc<dyn Fn(RequestContext, &mut reqwest::Request) -> RequestContext + Send + Sync>;
/// Runs on the received client response before the result is decoded.
pub type ClientResponseFn =
    Arc<dyn Fn(RequestContext, &ExchangeResponse) -> RequestContext + Send + Sync>;
/// Runs on the inbound HTTP request before its body is read.
pub type ServerRequestFn = Arc<dyn Fn(RequestContext, &Parts) -> RequestContext + Send + Sync>;
/// Runs on the response headers before anything is written.
pub type ServerResponseFn =
    Arc<dyn Fn(RequestContext, &mut HeaderMap) -> RequestContext + Send + Sync>;

pub fn set_authorization_header(token: impl Into<String>) -> ClientRequestFn {
    let bearer = format!("Bearer {}", token.into());
    Arc::new(move |ctx: RequestContext, request: &mut reqwest::Request| {
        set_header(request.headers_mut(), "authorization", &bearer);
        ctx
    })
}

pub fn set_user_id_header(user_id: Uuid) -> ClientRequestFn {
    Arc::new(move |ctx: RequestContext, request: &mut reqwest::Request| {
        set_header(request.headers_mut(), USER_ID_HEADER, &user_id.to_string());
        ctx
    })
}

pub fn set_session_id_header(session_id: Uuid) -> ClientRequestFn {
    Arc::new(move |ctx: RequestContext, request: &mut reqwest::Request| {
        set_header(
            request.headers_mut(),
            SESSION_ID_HEADER,
            &session_id.to_string(),
        );
        ctx
    })
}

/// Forwards the propagated context headers (identity, tracing) to the callee.
/// Headers already set on the request win.
pub fn propagate_context_headers() -> ClientRequestFn {
    Arc::new(|ctx: RequestContext, request: &mut reqwest::Request| {
        for (key, value) in ctx.propagated_headers() {
            if !request.headers().contains_key(key) {
                set_header(request.headers_mut(), key, value);
            }
        }
        ctx
    })
}

/// Copies the inbound HTTP headers into the context.
pub fn capture_request_headers() -> ServerRequestFn {
    Arc::new(|mut ctx: RequestContext, parts: &Parts| {
        ctx.absorb_http_headers(&parts.headers);
        ctx
    })
}

fn set_header(headers: &mut HeaderMap, key: &str, value: &str) {
    match (
        HeaderName::from_bytes(key.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => tracing::warn!(header = %key, "skipping header with invalid name or value"),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    fn outgoing() -> reqwest::Request {
        reqwest::Client::new()
            .post("http://127.0.0.1:9/add")
            .build()
            .expect("request build")
    }

    #[test]
    fn sets_identity_headers() {
        let user_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let mut request = outgoing();

        let mut ctx = RequestContext::new();
        for hook in [
            set_authorization_header("t0ken"),
            set_user_id_header(user_id),
            set_session_id_header(session_id),
        ] {
            ctx = hook(ctx, &mut request);
        }

        assert_eq!(request.headers()["authorization"], "Bearer t0ken");
        assert_eq!(request.headers()["x-user-id"], user_id.to_string().as_str());
        assert_eq!(
            request.headers()["x-session-id"],
            session_id.to_string().as_str()
        );
    }

    #[test]
    fn propagates_context_headers_without_overriding() {
        let mut request = outgoing();
        request
            .headers_mut()
            .insert("x-trace-id", HeaderValue::from_static("explicit"));
        let ctx = RequestContext::new()
            .with_header("x-trace-id", "from-context")
            .with_header("x-b3-spanid", "span-1")
            .with_header("accept", "text/html");

        propagate_context_headers()(ctx, &mut request);

        assert_eq!(request.headers()["x-trace-id"], "explicit");
        assert_eq!(request.headers()["x-b3-spanid"], "span-1");
        assert!(request.headers().get("accept").is_none());
    }

    #[test]
    fn captures_inbound_headers() {
        let (parts, _) = Request::builder()
            .header("X-User-Id", "u-1")
            .body(())
            .expect("request build")
            .into_parts();

        let ctx = capture_request_headers()(RequestContext::new(), &parts);

        assert_eq!(ctx.owner_id(), Some("u-1"));
    }
}
