use anyhow::{Context, Result};
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Method},
    response::{IntoResponse, Response},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::{
    relay::{Relay, RelayRequest},
    telemetry,
};

/**
 * \brief 构建路由：任意路径与方法均交给中继处理。
 */
pub fn router(relay: Relay) -> Router {
    Router::new()
        .fallback(relay_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(relay)
}

/**
 * \brief 启动本地 HTTP 服务。
 * \param addr 监听地址，如 "127.0.0.1:8888"
 */
pub async fn run(addr: &str, relay: Relay) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {} failed", addr))?;
    serve(listener, relay).await
}

/**
 * \brief 在已绑定的监听器上提供服务。
 */
pub async fn serve(listener: tokio::net::TcpListener, relay: Relay) -> Result<()> {
    let local = listener.local_addr()?;
    telemetry::log_event(
        "server",
        &format!(
            "listening on http://{} provider={} model={}",
            local,
            relay.config().kind,
            relay.config().model
        ),
    );
    axum::serve(listener, router(relay)).await?;
    Ok(())
}

async fn relay_handler(
    State(relay): State<Relay>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body = if body.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&body).into_owned())
    };
    let resp = relay
        .handle(RelayRequest {
            method,
            headers,
            body,
        })
        .await;
    match resp.body {
        Some(body) => (resp.status, resp.headers, body).into_response(),
        None => (resp.status, resp.headers, Body::empty()).into_response(),
    }
}
