use std::{path::PathBuf, sync::Arc};

use axum::{
    Router,
    routing::{delete, get, post},
};
use clap::Parser;
use http::{HeaderValue, header};
use reqwest::Client;
use tower_http::{
    limit::RequestBodyLimitLayer, services::ServeDir, set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

mod atomic_file;
mod call_log;
mod catalog;
mod config;
mod conversations;
mod dispatch;
mod observability;
mod prompts;
mod providers;
mod rate_limits;
mod routes;

#[cfg(test)]
mod tests;

/// Config file picked up from the working directory when `--config` is not given.
const DEFAULT_CONFIG_FILE: &str = "lcgpt.toml";

#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<dyn providers::Upstream>,
    pub dispatcher: Arc<dispatch::Dispatcher>,
    pub catalogue: Arc<catalog::CatalogueCache>,
    /// Latest quota telemetry from any upstream response.
    pub rate_limits: Arc<rate_limits::RateLimitSnapshot>,
    pub call_log: Arc<call_log::CallLog>,
    pub prompts: Arc<prompts::PromptStore>,
    pub conversations: Arc<conversations::ConversationArchive>,
}

impl AppState {
    /// Build state around the OpenAI-compatible client described by `config.upstream`.
    pub async fn new(
        config: config::AppConfig,
        http_client: Client,
    ) -> Result<Self, catalog::StoreError> {
        let upstream = Arc::new(providers::OpenAiUpstream::from_config(
            &config.upstream,
            http_client,
        ));
        Self::with_upstream(config, upstream).await
    }

    /// Build state around an arbitrary upstream.
    pub async fn with_upstream(
        config: config::AppConfig,
        upstream: Arc<dyn providers::Upstream>,
    ) -> Result<Self, catalog::StoreError> {
        let store = Arc::new(catalog::CapabilityStore::open(&config.catalog.state_path).await?);
        let rate_limits = Arc::new(rate_limits::RateLimitSnapshot::new());
        let call_log = Arc::new(call_log::CallLog::new(config.call_log.capacity));

        let dispatcher = Arc::new(dispatch::Dispatcher::new(
            upstream.clone(),
            store.clone(),
            rate_limits.clone(),
            call_log.clone(),
            dispatch::DispatchDefaults::from(&config.upstream),
        ));
        let catalogue = Arc::new(catalog::CatalogueCache::new(
            store,
            upstream.clone(),
            call_log.clone(),
            config.catalog.freshness(),
        ));

        let prompts = Arc::new(prompts::PromptStore::new(
            config.storage.prompts_path(),
            config.storage.default_prompt_path(),
        ));
        let conversations = Arc::new(conversations::ConversationArchive::new(
            config.storage.conversations_dir(),
            &config.storage.data_dir,
            &config.upstream.default_model,
        ));

        Ok(Self {
            upstream,
            dispatcher,
            catalogue,
            rate_limits,
            call_log,
            prompts,
            conversations,
        })
    }
}

/// CLI arguments
#[derive(Parser, Debug)]
#[command(version, about = "Chat mediator with adaptive model capability tracking", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./lcgpt.toml if it exists, otherwise
    /// built-in defaults)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the server (default)
    Serve,
    /// Write a default configuration file
    Init {
        /// Path to create the config file (defaults to ./lcgpt.toml)
        #[arg(short, long)]
        output: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

/// Default configuration written by `lcgpt init`.
fn default_config_toml() -> &'static str {
    r#"# lcgpt configuration

[server]
host = "127.0.0.1"
port = 3000

# [server.cors]
# enabled = true
# allowed_origins = ["http://localhost:5173"]

[upstream]
# Falls back to the OPENAI_API_KEY environment variable when unset.
# api_key = "${OPENAI_API_KEY}"
base_url = "https://api.openai.com/v1"
default_model = "gpt-4o-mini"
temperature = 0.7
default_reasoning_effort = "medium"

[catalog]
state_path = "data/model_catalog.jsonl"
freshness_secs = 86400

[call_log]
capacity = 300

# Prompt library and saved conversations
[storage]
data_dir = "data"

[ui]
enabled = true
assets_path = "public"

[observability.logging]
level = "info"
format = "compact"
"#
}

pub fn build_app(config: &config::AppConfig, state: AppState) -> Router {
    let mut app = Router::new()
        .route("/api/health", get(routes::health::health_check))
        .route("/api/chat", post(routes::api::chat))
        .route("/api/models", get(routes::api::list_models))
        .route("/api/ratelimits", get(routes::api::rate_limits))
        .route(
            "/api/logs",
            get(routes::api::list_logs).delete(routes::api::clear_logs),
        )
        .route(
            "/api/prompts",
            get(routes::library::list_prompts).post(routes::library::save_prompt),
        )
        .route(
            "/api/prompts/default",
            get(routes::library::get_default_prompt).post(routes::library::set_default_prompt),
        )
        .route("/api/prompts/{name}", delete(routes::library::delete_prompt))
        .route(
            "/api/conversations/save",
            post(routes::library::save_conversation),
        );

    app = add_ui_routes(app, &config.ui);

    // Layers are applied in reverse order, so CORS runs before tracing
    if let Some(cors_layer) = config.server.cors.clone().into_layer() {
        app = app.layer(cors_layer);
    }

    app.layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .with_state(state)
}

/// Serve the browser client from disk. API routes take precedence.
fn add_ui_routes(app: Router<AppState>, ui: &config::UiConfig) -> Router<AppState> {
    if !ui.enabled {
        return app;
    }
    if !ui.assets_path.is_dir() {
        tracing::warn!(path = %ui.assets_path.display(), "UI assets directory does not exist");
        return app;
    }

    tracing::info!(path = %ui.assets_path.display(), "Serving UI from filesystem");
    let cache_control = HeaderValue::from_str(&ui.cache_control)
        .unwrap_or_else(|_| HeaderValue::from_static("no-cache"));
    let serve_dir = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            cache_control,
        ))
        .service(ServeDir::new(&ui.assets_path));

    app.fallback_service(serve_dir)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Init { output, force }) => run_init(output, force),
        Some(Command::Serve) | None => run_server(args.config.as_deref()).await,
    }
}

/// Resolve the config path. `None` means run with built-in defaults.
fn resolve_config_path(explicit_path: Option<&str>) -> Result<Option<PathBuf>, String> {
    if let Some(path) = explicit_path {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(format!("Config file not found: {}", path.display()));
        }
        return Ok(Some(path));
    }

    let cwd_config = PathBuf::from(DEFAULT_CONFIG_FILE);
    Ok(cwd_config.exists().then_some(cwd_config))
}

fn run_init(output: Option<String>, force: bool) {
    let output_path = output
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    if output_path.exists() && !force {
        eprintln!(
            "Config file already exists: {}\nUse --force to overwrite.",
            output_path.display()
        );
        std::process::exit(1);
    }

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create directory {}: {}", parent.display(), e);
        std::process::exit(1);
    }

    if let Err(e) = std::fs::write(&output_path, default_config_toml()) {
        eprintln!("Failed to write config file: {}", e);
        std::process::exit(1);
    }

    println!("Created config file: {}", output_path.display());
    println!();
    println!("To start the server, run:");
    println!("  lcgpt serve --config {}", output_path.display());
}

async fn run_server(explicit_config_path: Option<&str>) {
    let config_path = match resolve_config_path(explicit_config_path) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let config = match &config_path {
        Some(path) => config::AppConfig::from_file(path),
        None => config::AppConfig::from_str(""),
    };
    let mut config = match config {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    config.upstream.resolve_api_key();

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    match &config_path {
        Some(path) => tracing::info!(config_file = %path.display(), "Starting lcgpt"),
        None => tracing::info!("Starting lcgpt with default configuration"),
    }
    if !config.upstream.has_api_key() {
        tracing::warn!(
            "No upstream API key configured; chat requests will fail until OPENAI_API_KEY or upstream.api_key is set"
        );
    }

    let http_client = match Client::builder().build() {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build HTTP client");
            std::process::exit(1);
        }
    };

    let state = match AppState::new(config.clone(), http_client).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open capability store");
            std::process::exit(1);
        }
    };
    let app = build_app(&config, state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %bind_addr, error = %e, "Failed to bind to address");
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on http://{}", bind_addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
