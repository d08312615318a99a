//! Transport-independent JSON-RPC dispatch
//!
//! [`Server::serve`] takes a raw body, fans the requests out to their codecs
//! on a [`JoinSet`] and shapes the collected responses. The HTTP binding in
//! [`crate::http`] only adds verb checks, body limits and hooks around it.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use axum::{
    http::{request::Parts, HeaderMap},
    response::Response as HttpResponse,
};
use futures::FutureExt;
use serde::de;
use serde_json::value::RawValue;
use tokio::task::JoinSet;
use tracing::{debug, error, warn, Instrument, Span};

use crate::context::RequestContext;
use crate::errors::{default_error_encoder, RpcFailure, TransportError};
use crate::hooks::{ServerRequestFn, ServerResponseFn};
use crate::jsonrpc::{
    codec::{CodecMap, Invocation},
    message::{Request, RequestId, Response, RpcError},
};

/// Renders a failure that happened before dispatch as a transport response.
pub type ErrorEncoder =
    Arc<dyn Fn(&RequestContext, &dyn RpcFailure) -> HttpResponse + Send + Sync>;

/// Shaped output of one exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Only notifications were received.
    Empty,
    Single(Response),
    Batch(Vec<Response>),
}

pub struct Server {
    codecs: Arc<CodecMap>,
    before: Vec<ServerRequestFn>,
    after: Vec<ServerResponseFn>,
    error_encoder: ErrorEncoder,
    span: Span,
}

/// Outcome of routing one request before anything runs.
enum Dispatch {
    Done(Option<Response>),
    Invoke {
        id: Option<RequestId>,
        method: String,
        invocation: Invocation,
    },
}

impl Server {
    pub fn new(codecs: CodecMap) -> Self {
        Self {
            codecs: Arc::new(codecs),
            before: Vec::new(),
            after: Vec::new(),
            error_encoder: Arc::new(default_error_encoder),
            span: tracing::info_span!("jsonrpc_server"),
        }
    }

    /// Appends a hook run on the inbound request before its body is read.
    pub fn before(mut self, hook: ServerRequestFn) -> Self {
        self.before.push(hook);
        self
    }

    /// Appends a hook run on the response headers before they are written.
    pub fn after(mut self, hook: ServerResponseFn) -> Self {
        self.after.push(hook);
        self
    }

    pub fn with_error_encoder(
        mut self,
        encoder: impl Fn(&RequestContext, &dyn RpcFailure) -> HttpResponse + Send + Sync + 'static,
    ) -> Self {
        self.error_encoder = Arc::new(encoder);
        self
    }

    /// Span under which dispatch and every invocation are recorded.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn codecs(&self) -> &CodecMap {
        &self.codecs
    }

    pub fn run_before(&self, mut ctx: RequestContext, parts: &Parts) -> RequestContext {
        for hook in &self.before {
            ctx = hook(ctx, parts);
        }
        ctx
    }

    pub fn run_after(&self, mut ctx: RequestContext, headers: &mut HeaderMap) -> RequestContext {
        for hook in &self.after {
            ctx = hook(ctx, headers);
        }
        ctx
    }

    pub fn encode_error(&self, ctx: &RequestContext, failure: &dyn RpcFailure) -> HttpResponse {
        (self.error_encoder)(ctx, failure)
    }

    /// Dispatches a single request or a batch.
    ///
    /// `url_method` is the method resolved by the transport, if any. Every
    /// invocation runs on its own task under a token derived from `ctx`;
    /// dropping the returned future cancels and aborts them all.
    pub async fn serve(
        &self,
        ctx: &RequestContext,
        body: &[u8],
        url_method: Option<&str>,
    ) -> Result<Reply, TransportError> {
        self.dispatch(ctx, body, url_method)
            .instrument(self.span.clone())
            .await
    }

    async fn dispatch(
        &self,
        ctx: &RequestContext,
        body: &[u8],
        url_method: Option<&str>,
    ) -> Result<Reply, TransportError> {
        let (requests, batched) = parse_body(body)?;
        let received = requests.len();

        let cancellation = ctx.cancellation().child_token();
        let _release = cancellation.clone().drop_guard();

        let mut slots: Vec<Option<Response>> = vec![None; received];
        let mut tasks = JoinSet::new();
        for (index, request) in requests.into_iter().enumerate() {
            match self.route(request, url_method) {
                Dispatch::Done(response) => slots[index] = response,
                Dispatch::Invoke {
                    id,
                    method,
                    invocation,
                } => {
                    let ctx = ctx
                        .clone()
                        .with_cancellation(cancellation.clone())
                        .with_request_id(id.clone());
                    let task = invoke(ctx, method, id, invocation);
                    tasks.spawn(
                        async move { (index, task.await) }.instrument(self.span.clone()),
                    );
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, response)) => slots[index] = response,
                Err(err) => error!(error = %err, "invocation task did not complete"),
            }
        }

        let mut responses: Vec<Response> = slots.into_iter().flatten().collect();
        debug!(
            requests = received,
            responses = responses.len(),
            batched,
            "dispatch finished"
        );

        let reply = if responses.is_empty() {
            Reply::Empty
        } else if batched {
            Reply::Batch(responses)
        } else {
            responses.pop().map_or(Reply::Empty, Reply::Single)
        };
        Ok(reply)
    }

    fn route(&self, mut request: Request, url_method: Option<&str>) -> Dispatch {
        let id = request.id.take();

        if let Some(url_method) = url_method {
            if request.method.is_empty() {
                request.method = url_method.to_string();
            } else if request.method != url_method {
                let message = format!("incorrect method: {url_method} != {}", request.method);
                return reject(id, RpcError::method_not_found(message));
            }
        }

        let Some(codec) = self.codecs.get(&request.method) else {
            let message = format!("method {} not found", request.method);
            return reject(id, RpcError::method_not_found(message));
        };

        let params = request.params;
        match panic::catch_unwind(AssertUnwindSafe(|| codec.decode(params))) {
            Ok(Ok(invocation)) => Dispatch::Invoke {
                id,
                method: request.method,
                invocation,
            },
            Ok(Err(err)) => reject(
                id,
                RpcError::invalid_params(format!("decode params error: {err}")),
            ),
            Err(_) => {
                error!(method = %request.method, id = ?id, "params decoder panicked");
                Dispatch::Done(
                    id.map(|id| Response::failure(Some(id), RpcError::internal("params decoder panicked"))),
                )
            }
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("codecs", &self.codecs)
            .field("before_hooks", &self.before.len())
            .field("after_hooks", &self.after.len())
            .finish()
    }
}

/// Splits the body into requests; the flag records whether it was an array.
///
/// Members are decoded from their own text, never through `Value`, so
/// numeric ids keep their exact spelling.
fn parse_body(body: &[u8]) -> Result<(Vec<Request>, bool), TransportError> {
    let first = body.iter().find(|byte| !byte.is_ascii_whitespace());
    if first != Some(&b'[') {
        let request = serde_json::from_slice::<Request>(body).map_err(TransportError::Decode)?;
        return Ok((vec![request], false));
    }

    let members =
        serde_json::from_slice::<Vec<Box<RawValue>>>(body).map_err(TransportError::Decode)?;
    if members.is_empty() {
        return Err(TransportError::EmptyBatch);
    }

    members
        .iter()
        .map(|member| {
            if !member.get().starts_with('{') {
                return Err(TransportError::Decode(de::Error::custom(
                    "batch member is not a request object",
                )));
            }
            serde_json::from_str::<Request>(member.get()).map_err(TransportError::Decode)
        })
        .collect::<Result<Vec<_>, _>>()
        .map(|requests| (requests, true))
}

fn reject(id: Option<RequestId>, error: RpcError) -> Dispatch {
    debug!(id = ?id, code = error.code, error = %error.message, "request rejected");
    Dispatch::Done(id.map(|id| Response::failure(Some(id), error)))
}

/// Runs one invocation to completion. Notifications still run but yield
/// nothing.
async fn invoke(
    ctx: RequestContext,
    method: String,
    id: Option<RequestId>,
    invocation: Invocation,
) -> Option<Response> {
    let result = match AssertUnwindSafe(invocation.invoke(ctx)).catch_unwind().await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            warn!(%method, id = ?id, error = %err, "invocation failed");
            let mut error = RpcError::internal(err.message());
            if let Some(data) = err.data() {
                error = error.with_data(data.clone());
            }
            return id.map(|id| Response::failure(Some(id), error));
        }
        Err(_) => {
            error!(%method, id = ?id, "endpoint panicked");
            return id.map(|id| Response::failure(Some(id), RpcError::internal("endpoint panicked")));
        }
    };

    let id = id?;
    match result.encode() {
        Ok(value) => Some(Response::success(id, value)),
        Err(err) => {
            error!(%method, %id, error = %err, "response encode failed");
            Some(Response::failure(
                Some(id),
                RpcError::internal(format!("response encode error: {err}")),
            ))
        }
    }
}
