use std::sync::Arc;

use clap::Parser;
use glaze_core::{
    EmbeddingConfig, GeminiEmbeddingClient, GeminiGenerationClient, GenerationConfig, GlazeConfig,
    PgStore,
};
use glaze_server::HttpState;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "glaze.toml")]
    config: String,

    /// Check database connectivity and exit
    #[arg(long)]
    health: bool,

    /// Apply the database schema and exit
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience, production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match GlazeConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    // Connect to DB
    let pool = match glaze_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match glaze_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }

        match glaze_core::db::check_pgvector(&pool).await {
            Ok(v) => println!("✅ pgvector version: {}", v),
            Err(e) => {
                println!("❌ pgvector check failed: {}", e);
                std::process::exit(1);
            }
        }

        println!("✅ Glaze DB health check passed");
        return Ok(());
    }

    if args.migrate {
        glaze_core::db::apply_schema(&pool).await?;
        println!("✅ Glaze schema applied");
        return Ok(());
    }

    let embedder =
        GeminiEmbeddingClient::new(EmbeddingConfig::from_settings(&config.embedding, None))?;
    let generator =
        GeminiGenerationClient::new(GenerationConfig::from_settings(&config.generation, None))?;
    tracing::info!(
        embedding_model = %config.embedding.model,
        generation_model = %config.generation.model,
        "Model clients ready"
    );

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

    let state = Arc::new(HttpState::with_pg_store(
        PgStore::new(pool),
        Arc::new(embedder),
        Arc::new(generator),
        config,
    ));

    glaze_server::start_http_server(state, tx.subscribe()).await?;

    Ok(())
}
