use std::sync::Arc;

use axum::{middleware, routing::any, Router};

pub mod client;
pub mod config;
pub mod context;
pub mod errors;
pub mod hooks;
pub mod http;
pub mod jsonrpc;
pub mod logging;

use jsonrpc::server::Server;

#[derive(Clone)]
pub struct AppState {
    pub server: Arc<Server>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(server: Server, max_body_bytes: usize) -> Self {
        Self {
            server: Arc::new(server),
            max_body_bytes,
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/", any(http::handlers::rpc_endpoint))
        .route("/{method}", any(http::handlers::rpc_method_endpoint))
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}
