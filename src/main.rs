//! framesearch - Multimodal video frame retrieval services
//!
//! One binary, three roles: `search`, `file` and `core`.

use axum::Router;
use clap::Parser;
use framesearch::{
    state::{AppConfig, CoreState, FileState, Role, SearchState},
    web_api,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "framesearch", version, about = "Multimodal video frame retrieval")]
struct Cli {
    /// Service to run
    #[arg(value_enum)]
    role: Role,

    /// Overrides HOST
    #[arg(long)]
    host: Option<String>,

    /// Overrides PORT
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "framesearch=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    tracing::info!("Starting framesearch v{} ({:?})", env!("CARGO_PKG_VERSION"), cli.role);

    let mut config = AppConfig::from_env(cli.role)?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let mut background = None;
    let app = match config.role {
        Role::Search => {
            tracing::info!(
                modalities = ?config.search.modalities,
                embedding_url = ?config.search.embedding_url,
                ocr_enable = config.search.ocr_enable,
                vector_snapshot = ?config.search.vector_snapshot,
                work_dir = %config.work_dir.display(),
                "Search configuration"
            );
            let state = SearchState::build(&config).await?;
            tracing::info!(
                target_features = ?state.engine.target_features(),
                ocr = state.engine.supports_ocr(),
                "Search engine ready"
            );
            web_api::search_router(state)
        }
        Role::File => {
            tracing::info!(work_dir = %config.work_dir.display(), "File configuration");
            web_api::file_router(FileState::build(&config))
        }
        Role::Core => {
            tracing::info!(
                search_servers = %config.core.search_servers,
                file_servers = %config.core.file_servers,
                search_policy = ?config.core.search_policy,
                file_policy = ?config.core.file_policy,
                sync_interval_sec = config.core.sync_interval.as_secs(),
                "Core configuration"
            );
            let state = CoreState::build(&config)?;
            background = Some(state.router.clone().spawn_target_features_sync());
            web_api::core_router(state)
        }
    };

    let app: Router = app
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = background {
        task.abort();
    }
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
