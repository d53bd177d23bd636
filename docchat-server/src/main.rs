use clap::Parser;
use docchat_core::DocchatConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use docchat_server::http;
use docchat_server::state::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "docchat.toml")]
    config: String,

    /// Check the vector index connection and exit.
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match DocchatConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over service.log_level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    if let Err(e) = config.validate() {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    let state = match AppState::from_config(config).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to initialise backends: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match state.index.describe().await {
            Ok(stats) => println!(
                "✅ Vector index '{}' reachable: {} vectors, dimension {}",
                state.index.name(),
                stats.total_vectors,
                stats.dimension
            ),
            Err(e) => {
                println!("❌ Vector index check failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ docchat health check passed");
        return Ok(());
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    http::start_http_server(state, tx.subscribe()).await?;

    Ok(())
}
