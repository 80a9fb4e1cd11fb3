//! HTTP server: router construction and the serve loop.

use crate::node::NodeHandle;
use crate::routes::{self, AppState};
use axum::routing::{get, post};
use axum::Router;
use botnet_kernel::sweeper::spawn_periodic;
use botnet_kernel::BotNetKernel;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Build the router for a node.
pub fn build_router(state: Arc<AppState>) -> Router {
    let proof_route = format!(
        "{}/{{challenge_id}}",
        state.kernel.config.challenge.well_known_path.trim_end_matches('/')
    );
    Router::new()
        .route("/rpc", post(routes::rpc))
        .route(&proof_route, get(routes::challenge_proof))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on an already-bound listener until the kernel shuts down.
pub async fn serve(state: Arc<AppState>, listener: TcpListener) -> std::io::Result<()> {
    let kernel = state.kernel.clone();
    let addr = listener.local_addr()?;

    let limiter = state.limiter.clone();
    let proofs = kernel.proofs.clone();
    let prune_every = kernel.config.rate_limits.window().max(Duration::from_secs(1));
    let pruner = spawn_periodic(
        "rate-limit-prune",
        prune_every,
        kernel.subscribe_shutdown(),
        move || {
            limiter.prune();
            let dropped = proofs.prune_expired();
            if dropped > 0 {
                debug!(dropped, "Pruned expired published proofs");
            }
        },
    );

    info!(%addr, node_id = %kernel.config.node_id, "BotNet RPC server listening");
    let app = build_router(state);
    let mut shutdown = kernel.subscribe_shutdown();
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
    })
    .await;

    pruner.abort();
    info!(%addr, "BotNet RPC server stopped");
    result
}

/// Bind the configured listen address and serve.
pub async fn run_server(
    kernel: Arc<BotNetKernel>,
    node: Arc<dyn NodeHandle>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(kernel.config.listen_addr).await?;
    serve(Arc::new(AppState::new(kernel, node)), listener).await
}
