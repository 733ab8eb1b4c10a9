//! rowpoll - poll a SQL query and emit rows as JSON messages
//!
//! # Usage
//!
//! ```bash
//! # Poll until Ctrl+C (or max_polls / max_messages), one JSON message per line
//! rowpoll -c rowpoll.yaml run
//!
//! # Poll exactly once
//! rowpoll -c rowpoll.yaml run --once
//!
//! # Validate configuration
//! rowpoll -c rowpoll.yaml validate
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rowpoll::prelude::*;
use rowpoll::rdbc::connection::ConnectionFactory;

#[derive(Parser)]
#[command(name = "rowpoll")]
#[command(version, about = "Poll a SQL query and emit each row as a JSON message")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "rowpoll.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the configured query and print messages (default)
    Run {
        /// Poll once and exit
        #[arg(long)]
        once: bool,
    },
    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = RowpollConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    match cli.command.unwrap_or(Commands::Run { once: false }) {
        Commands::Run { once } => run(config, once).await,
        Commands::Validate => validate_config(&config),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // stdout carries the messages
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[cfg(feature = "postgres")]
fn connection_factory(config: &RowpollConfig) -> Result<Box<dyn ConnectionFactory>> {
    use rowpoll::rdbc::connection::DatabaseType;

    match config.connection_config()?.database_type() {
        DatabaseType::PostgreSQL => Ok(Box::new(rowpoll::rdbc::postgres::PgConnectionFactory)),
        other => anyhow::bail!("Unsupported database type: {}", other),
    }
}

#[cfg(not(feature = "postgres"))]
fn connection_factory(_config: &RowpollConfig) -> Result<Box<dyn ConnectionFactory>> {
    anyhow::bail!("rowpoll was built without a database driver; enable the 'postgres' feature")
}

async fn run(config: RowpollConfig, once: bool) -> Result<()> {
    info!("Starting rowpoll");

    let factory = connection_factory(&config)?;
    let source = QuerySourceBuilder::from_config(&config, factory.as_ref())
        .await
        .context("Failed to create query source")?
        .row_mapper(JsonRowMapper)
        .initialize(&config.registry());
    info!(query = ?source.query(), single = source.is_single_result(), "Query source ready");
    let source: Arc<dyn MessageSource<serde_json::Value>> = Arc::new(source);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let summary = run_source(
        source,
        &RunOptions::from_config(&config, once),
        shutdown,
        &mut std::io::stdout(),
    )
    .await
    .context("Query source failed")?;

    info!(end = ?summary.end, emitted = summary.emitted, "rowpoll stopped");
    if summary.failures > 0 {
        anyhow::bail!("{} poll(s) failed", summary.failures);
    }
    Ok(())
}

fn validate_config(config: &RowpollConfig) -> Result<()> {
    let spec = config.query_spec();

    println!("Configuration is valid");
    println!("  query:         {}", config.query.trim());
    println!("  dynamic:       {}", spec.is_dynamic());
    println!(
        "  result:        {}",
        if config.expect_single_result {
            "single row"
        } else {
            "all rows"
        }
    );
    println!("  poll interval: {}ms", config.poll_interval_ms);
    println!("  variables:     {}", config.variables.len());
    println!("  headers:       {}", config.headers.len());

    Ok(())
}
