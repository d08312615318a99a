//! Method codecs: how the server turns params into a typed call and back
//!
//! Each method is registered once with a decoder, an endpoint and an encoder.
//! The server only sees the type-erased [`MethodCodec`], so the registry can
//! hold methods with unrelated request and result types.

use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::context::RequestContext;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Invalid(String),
}

/// Failure returned by business logic.
///
/// Any `std::error::Error` converts into it with `?`, keeping only its
/// message. Structured details go in `data` and reach the caller as
/// `error.data`.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointError {
    message: String,
    data: Option<Value>,
}

impl EndpointError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl<E> From<E> for EndpointError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::new(err.to_string())
    }
}

/// Business logic behind one method.
#[async_trait]
pub trait Endpoint<Req, Res>: Send + Sync {
    async fn call(&self, ctx: RequestContext, request: Req) -> Result<Res, EndpointError>;
}

#[async_trait]
impl<Req, Res, F, Fut> Endpoint<Req, Res> for F
where
    Req: Send + 'static,
    Res: Send + 'static,
    F: Fn(RequestContext, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Res, EndpointError>> + Send + 'static,
{
    async fn call(&self, ctx: RequestContext, request: Req) -> Result<Res, EndpointError> {
        (self)(ctx, request).await
    }
}

type RunFn =
    Box<dyn FnOnce(RequestContext) -> BoxFuture<'static, Result<EncodableResult, EndpointError>> + Send>;

/// A decoded request waiting to be run.
pub struct Invocation {
    run: RunFn,
}

impl Invocation {
    pub async fn invoke(self, ctx: RequestContext) -> Result<EncodableResult, EndpointError> {
        (self.run)(ctx).await
    }
}

/// Result of a successful invocation. Serialization is deferred so that
/// notifications never pay for it.
pub struct EncodableResult {
    encode: Box<dyn FnOnce() -> Result<Value, CodecError> + Send>,
}

impl EncodableResult {
    pub fn encode(self) -> Result<Value, CodecError> {
        (self.encode)()
    }
}

pub trait MethodCodec: Send + Sync {
    /// Decodes params into a runnable invocation. An error here is reported
    /// to the caller as invalid params.
    fn decode(&self, params: Option<Value>) -> Result<Invocation, CodecError>;
}

type DecodeFn<Req> = Arc<dyn Fn(Option<Value>) -> Result<Req, CodecError> + Send + Sync>;
type EncodeFn<Res> = Arc<dyn Fn(Res) -> Result<Value, CodecError> + Send + Sync>;

pub struct TypedCodec<Req, Res> {
    decode: DecodeFn<Req>,
    endpoint: Arc<dyn Endpoint<Req, Res>>,
    encode: EncodeFn<Res>,
}

impl<Req, Res> TypedCodec<Req, Res>
where
    Req: DeserializeOwned + Send + 'static,
    Res: Serialize + Send + 'static,
{
    /// Codec using serde for both params and result.
    pub fn new(endpoint: impl Endpoint<Req, Res> + 'static) -> Self {
        Self {
            decode: Arc::new(decode_params::<Req>),
            endpoint: Arc::new(endpoint),
            encode: Arc::new(encode_result::<Res>),
        }
    }
}

impl<Req, Res> TypedCodec<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    pub fn from_parts(
        decode: impl Fn(Option<Value>) -> Result<Req, CodecError> + Send + Sync + 'static,
        endpoint: impl Endpoint<Req, Res> + 'static,
        encode: impl Fn(Res) -> Result<Value, CodecError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            decode: Arc::new(decode),
            endpoint: Arc::new(endpoint),
            encode: Arc::new(encode),
        }
    }

    pub fn with_decoder(
        mut self,
        decode: impl Fn(Option<Value>) -> Result<Req, CodecError> + Send + Sync + 'static,
    ) -> Self {
        self.decode = Arc::new(decode);
        self
    }

    pub fn with_encoder(
        mut self,
        encode: impl Fn(Res) -> Result<Value, CodecError> + Send + Sync + 'static,
    ) -> Self {
        self.encode = Arc::new(encode);
        self
    }
}

impl<Req, Res> MethodCodec for TypedCodec<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    fn decode(&self, params: Option<Value>) -> Result<Invocation, CodecError> {
        let request = (self.decode)(params)?;
        let endpoint = Arc::clone(&self.endpoint);
        let encode = Arc::clone(&self.encode);

        Ok(Invocation {
            run: Box::new(move |ctx: RequestContext| {
                async move {
                    let result = endpoint.call(ctx, request).await?;
                    Ok::<_, EndpointError>(EncodableResult {
                        encode: Box::new(move || encode(result)),
                    })
                }
                .boxed()
            }),
        })
    }
}

fn decode_params<Req: DeserializeOwned>(params: Option<Value>) -> Result<Req, CodecError> {
    Ok(serde_json::from_value(params.unwrap_or(Value::Null))?)
}

fn encode_result<Res: Serialize>(result: Res) -> Result<Value, CodecError> {
    Ok(serde_json::to_value(result)?)
}

/// Method name to codec mapping handed to a server at construction.
#[derive(Clone, Default)]
pub struct CodecMap {
    codecs: HashMap<String, Arc<dyn MethodCodec>>,
}

impl CodecMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, method: impl Into<String>, codec: impl MethodCodec + 'static) -> Self {
        self.insert(method, codec);
        self
    }

    pub fn insert(&mut self, method: impl Into<String>, codec: impl MethodCodec + 'static) {
        self.codecs.insert(method.into(), Arc::new(codec));
    }

    pub fn get(&self, method: &str) -> Option<&Arc<dyn MethodCodec>> {
        self.codecs.get(method)
    }

    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.codecs.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

impl fmt::Debug for CodecMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecMap")
            .field("methods", &self.methods())
            .finish()
    }
}
