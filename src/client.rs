//! JSON-RPC client bound to one remote method
//!
//! A [`Client`] posts to `<base>/<method>`, so servers can route on the path
//! as well as on the body. Each call is one exchange: no retries, no
//! batching.

use std::{fmt, sync::Arc};

use bytes::Bytes;
use reqwest::{
    header::{self, HeaderMap},
    StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::context::RequestContext;
use crate::errors::ClientError;
use crate::hooks::{ClientRequestFn, ClientResponseFn};
use crate::jsonrpc::{
    id::{RequestIdGenerator, UuidGenerator},
    message::{self, RawResponse, Request, RpcError},
};

pub type RequestEncoder<Req> =
    Arc<dyn Fn(&RequestContext, &Req) -> Result<Value, ClientError> + Send + Sync>;
pub type ResponseDecoder<Res> =
    Arc<dyn Fn(&RequestContext, RawResponse) -> Result<Res, ClientError> + Send + Sync>;
/// Interprets a wire error. Returning `Ok` discards the error and lets the
/// response decoder run on the result as if the call had succeeded.
pub type ErrorDecoder = Arc<dyn Fn(&RequestContext, &Value) -> Result<(), ClientError> + Send + Sync>;

/// What the after hooks see of a completed exchange.
#[derive(Debug, Clone)]
pub struct ExchangeResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub struct Client<Req, Res> {
    method: String,
    endpoint: Url,
    http: reqwest::Client,
    encoder: RequestEncoder<Req>,
    decoder: ResponseDecoder<Res>,
    error_decoder: Option<ErrorDecoder>,
    before: Vec<ClientRequestFn>,
    after: Vec<ClientResponseFn>,
    request_id: Arc<dyn RequestIdGenerator>,
}

impl<Req, Res> Client<Req, Res>
where
    Req: Serialize + 'static,
    Res: DeserializeOwned + 'static,
{
    pub fn new(base_url: &str, method: impl Into<String>) -> Result<Self, ClientError> {
        let method = method.into();
        let endpoint = Url::parse(&format!("{}/{}", base_url.trim_end_matches('/'), method))?;

        Ok(Self {
            method,
            endpoint,
            http: reqwest::Client::new(),
            encoder: Arc::new(encode_params::<Req>),
            decoder: Arc::new(decode_result::<Res>),
            error_decoder: None,
            before: Vec::new(),
            after: Vec::new(),
            request_id: Arc::new(UuidGenerator::new()),
        })
    }
}

impl<Req, Res> Client<Req, Res> {
    /// Replaces the HTTP client, e.g. to share a connection pool or set timeouts.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_encoder(
        mut self,
        encoder: impl Fn(&RequestContext, &Req) -> Result<Value, ClientError> + Send + Sync + 'static,
    ) -> Self {
        self.encoder = Arc::new(encoder);
        self
    }

    pub fn with_decoder(
        mut self,
        decoder: impl Fn(&RequestContext, RawResponse) -> Result<Res, ClientError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.decoder = Arc::new(decoder);
        self
    }

    pub fn with_error_decoder(
        mut self,
        decoder: impl Fn(&RequestContext, &Value) -> Result<(), ClientError> + Send + Sync + 'static,
    ) -> Self {
        self.error_decoder = Some(Arc::new(decoder));
        self
    }

    pub fn with_request_id_generator(mut self, generator: impl RequestIdGenerator + 'static) -> Self {
        self.request_id = Arc::new(generator);
        self
    }

    /// Appends a hook run, in registration order, on the outgoing request.
    pub fn before(mut self, hook: ClientRequestFn) -> Self {
        self.before.push(hook);
        self
    }

    /// Appends a hook run, in registration order, on the received response.
    pub fn after(mut self, hook: ClientResponseFn) -> Self {
        self.after.push(hook);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Performs one call.
    ///
    /// The exchange is abandoned as soon as `ctx` is cancelled; the call then
    /// returns [`ClientError::Cancelled`] without waiting for the peer.
    pub async fn call(&self, ctx: &RequestContext, request: &Req) -> Result<Res, ClientError> {
        let cancellation = ctx.cancellation().child_token();
        let _release = cancellation.clone().drop_guard();
        let mut ctx = ctx.clone().with_cancellation(cancellation.clone());

        let params = (self.encoder)(&ctx, request)?;
        let id = self.request_id.generate();
        let envelope = Request::new(self.method.as_str(), Some(params), Some(id.clone()));
        let body = serde_json::to_vec(&envelope).map_err(ClientError::Encode)?;

        let mut outgoing = self
            .http
            .post(self.endpoint.clone())
            .header(header::CONTENT_TYPE, message::CONTENT_TYPE)
            .body(body)
            .build()?;

        ctx = ctx.with_request_id(Some(id));
        for hook in &self.before {
            ctx = hook(ctx, &mut outgoing);
        }

        let received = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                debug!(method = %self.method, "call cancelled before the exchange completed");
                return Err(ClientError::Cancelled);
            }
            received = self.exchange(outgoing) => received?,
        };

        let mut response: RawResponse =
            serde_json::from_slice(&received.body).map_err(|source| ClientError::Decode {
                status: received.status,
                source,
            })?;

        if let (Some(error), Some(decode_error)) =
            (response.error.as_ref(), self.error_decoder.as_ref())
        {
            decode_error(&ctx, error)?;
            response.error = None;
        }

        for hook in &self.after {
            ctx = hook(ctx, &received);
        }

        (self.decoder)(&ctx, response)
    }

    async fn exchange(&self, outgoing: reqwest::Request) -> Result<ExchangeResponse, ClientError> {
        let response = self.http.execute(outgoing).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        debug!(method = %self.method, status = status.as_u16(), "exchange completed");
        Ok(ExchangeResponse {
            status,
            headers,
            body,
        })
    }
}

impl<Req, Res> fmt::Debug for Client<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("method", &self.method)
            .field("endpoint", &self.endpoint.as_str())
            .field("before_hooks", &self.before.len())
            .field("after_hooks", &self.after.len())
            .finish()
    }
}

fn encode_params<Req: Serialize>(_ctx: &RequestContext, request: &Req) -> Result<Value, ClientError> {
    serde_json::to_value(request).map_err(ClientError::Encode)
}

/// Surfaces a wire error as the call's failure, otherwise decodes the result.
fn decode_result<Res: DeserializeOwned>(
    _ctx: &RequestContext,
    response: RawResponse,
) -> Result<Res, ClientError> {
    if let Some(error) = response.error {
        return Err(ClientError::Rpc(RpcError::from_value(error)));
    }
    serde_json::from_value(response.result.unwrap_or(Value::Null)).map_err(ClientError::Result)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::jsonrpc::message::{RequestId, METHOD_NOT_FOUND};

    #[test]
    fn endpoint_appends_method_to_base_url() {
        let client: Client<Vec<i64>, i64> =
            Client::new("http://127.0.0.1:8080/rpc/", "add").expect("valid url");

        assert_eq!(client.endpoint().as_str(), "http://127.0.0.1:8080/rpc/add");
        assert_eq!(client.method(), "add");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let result: Result<Client<(), ()>, _> = Client::new("not a url", "add");

        assert!(matches!(result, Err(ClientError::InvalidUrl(_))));
    }

    #[test]
    fn default_decoder_surfaces_wire_errors() {
        let response = RawResponse {
            jsonrpc: "2.0".to_string(),
            id: None,
            result: None,
            error: Some(json!({"code": METHOD_NOT_FOUND, "message": "method add not found"})),
        };

        match decode_result::<i64>(&RequestContext::new(), response) {
            Err(ClientError::Rpc(error)) => assert_eq!(error.code, METHOD_NOT_FOUND),
            other => panic!("expected rpc error, got {other:?}"),
        }
    }

    #[test]
    fn default_decoder_reads_result() {
        let response = RawResponse {
            result: Some(json!([1, 2])),
            ..RawResponse::default()
        };

        let decoded: Vec<u8> =
            decode_result(&RequestContext::new(), response).expect("valid result");
        assert_eq!(decoded, vec![1, 2]);
    }

    #[test]
    fn exchange_body_decodes_into_raw_response() {
        let exchange = ExchangeResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from_static(br#"{"jsonrpc":"2.0","id":18446744073709551616,"result":3}"#),
        };

        let raw: RawResponse = serde_json::from_slice(&exchange.body).expect("valid body");

        assert_eq!(
            raw.id,
            Some(RequestId::Number("18446744073709551616".to_string()))
        );
        assert_eq!(raw.result, Some(json!(3)));
    }

    #[tokio::test]
    async fn cancelled_context_returns_before_any_exchange() {
        let client: Client<Vec<i64>, i64> =
            Client::new("http://192.0.2.1:81", "add").expect("valid url");
        let ctx = RequestContext::new();
        ctx.cancellation().cancel();

        let result = client.call(&ctx, &vec![1, 2]).await;

        assert!(matches!(result, Err(ClientError::Cancelled)));
    }
}
