//! Service bootstrap.
//!
//! Wires the pipeline together, starts exactly one worker for the
//! process, and serves the HTTP boundary until a shutdown signal arrives.
//! Shutdown stops command intake, lets the in-flight command finish, and
//! only then lets the process exit.

use std::sync::Arc;
use std::time::Duration;

use loadlab_operator::exec::worker::start_process_worker;
use loadlab_operator::{
    build_router, AppState, AuthVerifier, CommandQueue, ExecutionRegistry, FifoLock, KubeAdapter,
    QuotaPolicy, Worker,
};
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,loadlab_operator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting loadlab operator v{}", env!("CARGO_PKG_VERSION"));

    let settings = loadlab_operator::config::Settings::from_env()?;

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let registry = Arc::new(ExecutionRegistry::new());
    let queue = Arc::new(CommandQueue::new(registry.clone()));
    let lock = Arc::new(FifoLock::new());
    let cluster = Arc::new(KubeAdapter::new(client));
    let worker = Arc::new(Worker::new(
        queue.clone(),
        lock,
        registry.clone(),
        cluster.clone(),
    ));

    start_process_worker(&worker);

    let state = AppState {
        auth: Arc::new(AuthVerifier::new(settings.auth_signing_secret.clone())),
        policy: Arc::new(QuotaPolicy::new()),
        queue,
        registry,
        cluster,
    };

    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_request(DefaultOnRequest::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::INFO)),
            )
            .layer(CorsLayer::permissive())
            .layer(TimeoutLayer::new(Duration::from_secs(60))),
    );

    let listener = tokio::net::TcpListener::bind(settings.bind_addr).await?;
    info!("HTTP server listening on {}", settings.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Intake stops with the server; drain the worker before the process
    // exits so an in-flight mutation is never cut off.
    worker.graceful_shutdown().await;
    info!("Operator stopped");

    Ok(())
}

/// Resolves once the process is asked to shut down.
///
/// Listens for SIGINT and, on unix, SIGTERM (what the kubelet sends when
/// the pod is evicted). Resolution closes chat intake; the worker drain in
/// `main` runs after the server has stopped serving.
async fn shutdown_signal() {
    let interrupt = async {
        signal::ctrl_c()
            .await
            .expect("SIGINT handler installation failed");
        "SIGINT"
    };

    #[cfg(unix)]
    let evicted = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation failed")
            .recv()
            .await;
        "SIGTERM"
    };

    #[cfg(not(unix))]
    let evicted = std::future::pending::<&str>();

    let signal = tokio::select! {
        name = interrupt => name,
        name = evicted => name,
    };
    info!(phase = "system", signal, "Shutdown requested; closing chat intake");
}
