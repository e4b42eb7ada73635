use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod auth;
mod chat;
mod client;
mod debug;
mod error;
mod server;
mod session;
mod settings;
mod storage;
mod upstream;
#[cfg(test)]
mod testing;

use auth::AuthKeys;
use settings::{GenerationBackend, Settings, SettingsLayer};
use upstream::{CloudWatchMonitor, GenerationFunction, HttpGeneration, LambdaGeneration};

#[derive(Debug, Parser)]
#[command(name = "support_bot")]
#[command(about = "Support chatbot backend: chat history, JWT auth and CloudWatch debugging", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        #[arg(long)]
        listen: Option<String>,
        #[arg(long)]
        database_url: Option<String>,
        /// Expose Prometheus metrics on this address
        #[arg(long)]
        metrics_listen: Option<String>,
    },
    /// Mint a signed token for a user
    Token {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
    /// Chat from the terminal, saving each turn to the backend
    Chat {
        #[arg(long, default_value = "http://127.0.0.1:5000")]
        server: String,
        #[arg(long)]
        token: String,
        /// Continue an existing session instead of starting a new one
        #[arg(long)]
        session_id: Option<String>,
    },
    /// Print the saved chat sessions, newest first
    History {
        #[arg(long, default_value = "http://127.0.0.1:5000")]
        server: String,
        #[arg(long)]
        token: String,
    },
}

async fn load_aws(region: String) -> aws_config::SdkConfig {
    aws_config::from_env()
        .region(aws_config::Region::new(region))
        .load()
        .await
}

fn build_generator(backend: &GenerationBackend, aws: &aws_config::SdkConfig) -> Arc<dyn GenerationFunction> {
    match backend {
        GenerationBackend::Lambda { function_name } => Arc::new(LambdaGeneration::new(aws, function_name.clone())),
        GenerationBackend::Http { url, api_key } => Arc::new(HttpGeneration::new(url.clone(), api_key.clone())),
    }
}

async fn run_server(settings: Settings) -> anyhow::Result<()> {
    if let Some(addr) = settings.metrics_listen {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing metrics exporter")?;
        tracing::info!(%addr, "metrics exporter listening");
    }

    let repo = Arc::new(storage::SqliteRepository::initialize(settings.database_url.clone()).await?);
    let aws = load_aws(settings.aws_region.clone()).await;
    let generator = build_generator(&settings.generation, &aws);
    let state = server::AppState {
        chat: chat::ChatService::new(repo.clone()),
        debug: debug::DebugService::new(Arc::new(CloudWatchMonitor::new(&aws)), generator, repo, settings.window),
        auth: Arc::new(AuthKeys::from_secret(settings.jwt_secret.as_bytes())),
    };
    let app = server::router(state, settings.cors_origins.as_deref());
    server::serve(settings.listen, app).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let env = SettingsLayer::from_env()?;
    let defaults = SettingsLayer::defaults();
    match cli.command {
        Commands::Serve { listen, database_url, metrics_listen } => {
            let overrides = SettingsLayer { listen, database_url, metrics_listen, ..Default::default() };
            let settings = settings::resolve_settings(&defaults, &env, &overrides)?;
            run_server(settings).await?;
        }
        Commands::Token { user_id, ttl_secs } => {
            let merged = settings::merge_layers(&[&SettingsLayer { token_ttl_secs: ttl_secs, ..Default::default() }, &env, &defaults]);
            let secret = merged.jwt_secret.context("JWT_SECRET is not set")?;
            let ttl = merged.token_ttl_secs.unwrap_or(settings::DEFAULT_TOKEN_TTL_SECS);
            println!("{}", AuthKeys::from_secret(secret.as_bytes()).issue(&user_id, ttl)?);
        }
        Commands::Chat { server, token, session_id } => {
            let merged = settings::merge_layers(&[&env, &defaults]);
            let backend = settings::resolve_generation(&merged)?;
            let aws = load_aws(settings::region_of(&merged)).await;
            let generator = build_generator(&backend, &aws);
            let chat_client = client::ChatClient::new(client::normalize_base(&server)?, token);
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let last = client::converse(&chat_client, generator.as_ref(), stdin, tokio::io::stdout(), session_id).await?;
            if let Some(sid) = last {
                eprintln!("session: {}", sid);
            }
        }
        Commands::History { server, token } => {
            let chat_client = client::ChatClient::new(client::normalize_base(&server)?, token);
            print!("{}", client::render_history(&chat_client.history().await?));
        }
    }
    Ok(())
}
