//! Per-call context passed through hooks, codecs and endpoints
//!
//! Carries the header metadata that travels between services, the id of the
//! request being served, and the cancellation token bounding the call.

use std::collections::BTreeMap;

use axum::http::HeaderMap;
use tokio_util::sync::CancellationToken;

use crate::jsonrpc::message::RequestId;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const SESSION_ID_HEADER: &str = "x-session-id";

/// Header keys that are forwarded by default when a service calls another one.
pub const PROPAGATED_HEADERS: &[&str] = &[
    USER_ID_HEADER,
    "x-trace-id",
    "user-agent",
    SESSION_ID_HEADER,
    "authorization",
    "x-requested-with",
    "x-authorization-provider",
    "x-b3-traceid",
    "x-b3-spanid",
    "x-b3-parentspanid",
    "x-b3-sampled",
    "x-b3-flags",
    "b3",
];

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    headers: BTreeMap<String, String>,
    request_id: Option<RequestId>,
    cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context whose lifetime is bound to `cancellation`.
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn with_request_id(mut self, request_id: Option<RequestId>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// Adds a header value; keys are lowercased and empty values ignored.
    pub fn with_header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.insert_header(key, value);
        self
    }

    pub fn insert_header(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            return;
        }
        self.headers.insert(key.to_ascii_lowercase(), value);
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Headers from [`PROPAGATED_HEADERS`] plus any other `x-` prefixed key.
    pub fn propagated_headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers()
            .filter(|(key, _)| PROPAGATED_HEADERS.contains(key) || key.starts_with("x-"))
    }

    /// Copies every readable inbound header into the context.
    pub fn absorb_http_headers(&mut self, headers: &HeaderMap) {
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                self.insert_header(name.as_str(), value);
            }
        }
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.header(USER_ID_HEADER)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn header_keys_are_case_insensitive() {
        let context = RequestContext::new().with_header("X-User-Id", "42");

        assert_eq!(context.header("x-user-id"), Some("42"));
        assert_eq!(context.owner_id(), Some("42"));
    }

    #[test]
    fn empty_header_values_are_ignored() {
        let context = RequestContext::new().with_header("x-trace-id", "");

        assert_eq!(context.header("x-trace-id"), None);
    }

    #[test]
    fn absorbs_inbound_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("X-B3-TraceId", HeaderValue::from_static("abc"));
        headers.insert("content-length", HeaderValue::from_static("12"));

        let mut context = RequestContext::new();
        context.absorb_http_headers(&headers);

        assert_eq!(context.header("x-b3-traceid"), Some("abc"));
        let propagated: Vec<_> = context.propagated_headers().collect();
        assert_eq!(propagated, vec![("x-b3-traceid", "abc")]);
    }

    #[test]
    fn cancellation_follows_the_supplied_token() {
        let parent = CancellationToken::new();
        let context = RequestContext::new().with_cancellation(parent.child_token());

        assert!(!context.is_cancelled());
        parent.cancel();
        assert!(context.is_cancelled());
    }
}
