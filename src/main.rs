use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tradewake::api::BinanceClient;
use tradewake::config::{load_settings, TradingMode};
use tradewake::db::{MemStore, PgStore, Store};
use tradewake::llm::OpenAiBackend;
use tradewake::service::TradingService;

#[derive(Parser, Debug)]
#[command(name = "tradewake", about = "Trigger-driven LLM trading control loop")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the trading mode (paper|live)
    #[arg(short, long)]
    mode: Option<String>,

    /// Enable price-driven wakes immediately instead of waiting for start()
    #[arg(long)]
    autostart: bool,
}

#[tokio::main]
async fn main() -> tradewake::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();

    tracing::info!("🚀 tradewake starting");

    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(mode) = &cli.mode {
        settings.trading.mode = match mode.to_ascii_lowercase().as_str() {
            "paper" => TradingMode::Paper,
            "live" => TradingMode::Live,
            other => return Err(anyhow::anyhow!("Unknown mode '{}', use paper or live", other).into()),
        };
    }

    // Collaborators from the environment
    let api_key = std::env::var("BINANCE_API_KEY").ok();
    let api_secret = std::env::var("BINANCE_API_SECRET").ok();
    let llm_key =
        std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY not found in environment")?;

    let gateway = Arc::new(BinanceClient::new(api_key, api_secret));
    let backend = Arc::new(OpenAiBackend::new(llm_key, settings.llm.clone()));
    let store = connect_store(&settings.database.url).await;

    let service = TradingService::build(settings, store, gateway, backend).await?;

    if cli.autostart {
        service.start().await?;
    }

    // Observer: mirror decision-cycle events into the log. Dashboards
    // subscribe the same way.
    let mut events = service.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::debug!("cycle event: {:?}", event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("observer lagged, {} events dropped", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut tasks = service.spawn_loops();
    tracing::info!("✅ All loops spawned. Press Ctrl+C to stop...");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("⚠️  Received Ctrl+C, shutting down...");
        }
        result = tasks.remove(0) => {
            tracing::error!("Trade stream task exited: {:?}", result);
        }
    }

    for task in tasks {
        task.abort();
    }

    tracing::info!("👋 tradewake stopped");
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tradewake=info".into()),
        )
        .init();
}

/// Prefer Postgres; fall back to the in-memory store so the loop can still
/// run (state is lost on restart in that case).
async fn connect_store(database_url: &str) -> Arc<dyn Store> {
    let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| database_url.to_string());

    match PgStore::new(&url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!(
                "Failed to connect to Postgres ({}), continuing with in-memory store",
                e
            );
            Arc::new(MemStore::new())
        }
    }
}
