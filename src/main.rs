mod config;
mod docker;
mod error;
mod rate_limit;
mod relay;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::docker::DockerService;
use crate::rate_limit::RateLimiter;

/// How often idle rate-limit entries are dropped.
const LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: Config,
    pub docker: DockerService,
    pub pull_limiter: Arc<RateLimiter>,
    /// Shared by image, volume and network prune.
    pub prune_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let docker = DockerService::new(&config.docker_socket, config.engine_timeout_secs);
        let pull_limiter = Arc::new(RateLimiter::per_minute(
            config.pull_rate_limit,
            "Too many pull requests, please try again later",
        ));
        let prune_limiter = Arc::new(RateLimiter::per_minute(
            config.prune_rate_limit,
            "Too many prune requests, please try again later",
        ));

        Self {
            config,
            docker,
            pull_limiter,
            prune_limiter,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "dockyard=debug,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;
    tracing::info!(
        port = config.port,
        docker_socket = %config.docker_socket,
        cors_origins = ?config.cors_origins,
        "Starting dockyard"
    );

    let state = Arc::new(AppState::new(config.clone()));

    if state.docker.ping().await {
        tracing::info!("Docker connection established");
    } else {
        tracing::warn!(
            socket = %state.docker.socket_path(),
            "Could not connect to Docker; some features may not work"
        );
    }

    // Forget clients that stopped calling the throttled endpoints.
    let sweeper = {
        let state = state.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(LIMITER_SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                state.pull_limiter.sweep(now);
                state.prune_limiter.sweep(now);
            }
        })
    };

    let app = routes::app(state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!("Listening on 0.0.0.0:{}", config.port);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    sweeper.abort();

    Ok(())
}
