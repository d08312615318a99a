use jsonrpc_kit::{
    build_app,
    config::Config,
    context::RequestContext,
    hooks::capture_request_headers,
    jsonrpc::{
        codec::{CodecMap, EndpointError, TypedCodec},
        server::Server,
    },
    logging, AppState,
};
use serde_json::Value;
use tracing::info;

async fn add(_ctx: RequestContext, params: Vec<i64>) -> Result<i64, EndpointError> {
    params
        .iter()
        .try_fold(0_i64, |sum, value| sum.checked_add(*value))
        .ok_or_else(|| EndpointError::new("sum overflows i64"))
}

async fn echo(_ctx: RequestContext, params: Value) -> Result<Value, EndpointError> {
    Ok(params)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let bind_socket = config.bind_socket()?;

    let codecs = CodecMap::new()
        .register("add", TypedCodec::new(add))
        .register("echo", TypedCodec::new(echo));
    let methods = codecs.methods().join(",");
    let server = Server::new(codecs).before(capture_request_headers());

    let app = build_app(AppState::new(server, config.max_body_bytes));
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        methods = %methods,
        "server starting"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
