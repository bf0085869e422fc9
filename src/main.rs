//! Grid and DCA trading bot
//!
//! Runs grid and dollar-cost-averaging strategies against an exchange
//! adapter, with every order action passing a portfolio risk gate.

mod engine;
mod error;
mod events;
mod exchange;
mod models;
mod trading;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal_macros::dec;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::engine::Engine;
use crate::exchange::PaperExchange;
use crate::trading::{EngineConfig, StrategyParams};

/// Grid/DCA trading bot CLI.
#[derive(Parser)]
#[command(name = "gridbot")]
#[command(about = "Grid and DCA trading strategies under a portfolio risk gate", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "GRIDBOT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine against the paper exchange
    Run {
        /// JSON configuration file
        #[arg(short, long, env = "GRIDBOT_CONFIG", default_value = "gridbot.json")]
        config: PathBuf,

        /// Compute and gate actions without dispatching them
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate a configuration file
    Validate {
        /// JSON configuration file
        #[arg(short, long, env = "GRIDBOT_CONFIG", default_value = "gridbot.json")]
        config: PathBuf,
    },

    /// Print an example configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { config, dry_run } => {
            let mut config = EngineConfig::from_file(&config)?;
            config.dry_run |= dry_run;

            info!(
                strategies = config.strategies.len(),
                tick_interval_ms = config.tick_interval_ms,
                dry_run = config.dry_run,
                "Starting gridbot"
            );

            let exchange = Arc::new(
                PaperExchange::new(config.paper.clone())
                    .context("Failed to create paper exchange")?,
            );
            let (tx, mut rx) = events::channel();
            let mut engine = Engine::new(config.clone(), exchange.clone())?.with_events(tx);

            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    match serde_json::to_string(&event) {
                        Ok(json) => info!(kind = event.kind(), event = %json, "Engine event"),
                        Err(e) => warn!(error = %e, "Failed to serialize event"),
                    }
                }
            });

            println!("\n=== Gridbot ===");
            println!("Quote asset:   {}", config.quote_asset);
            println!("Tick interval: {}ms", config.tick_interval_ms);
            println!("Mode:          {}", if config.dry_run { "DRY RUN (no orders sent)" } else { "PAPER TRADING" });
            for status in engine.strategy_statuses() {
                println!("Strategy:      {}", status);
            }
            println!("\nPress Ctrl+C to stop.");
            #[cfg(unix)]
            println!("Send SIGUSR1 to pid {} to clear an emergency stop.", std::process::id());
            println!();

            engine.run().await?;

            println!("\n{}", engine.stats());

            println!("\n=== Paper Account ===");
            println!("Fills:         {}", exchange.fill_count().await);
            println!("Fees Paid:     ${:.2}", exchange.fees_paid().await);
            println!("Open Orders:   {}", exchange.open_order_count().await);
            let quote = exchange.balance(&config.quote_asset).await;
            println!("{:<14} {} free, {} locked", format!("{}:", quote.asset), quote.free, quote.locked);
        }

        Commands::Validate { config } => {
            let config = EngineConfig::from_file(&config)?;
            config
                .risk
                .validate()
                .context("Invalid risk configuration")?;

            let (valid, rejected) = config.partition_strategies();
            println!("\n=== Configuration ===\n");
            for strategy in &valid {
                println!("  OK       {}", strategy.tag());
            }
            for (tag, e) in &rejected {
                println!("  INVALID  {} ({})", tag, e);
            }
            println!("\n{} valid, {} invalid", valid.len(), rejected.len());

            if valid.is_empty() {
                anyhow::bail!("No valid strategies configured");
            }
        }

        Commands::Config => {
            let config = EngineConfig::example();

            println!("\n=== Risk Limits ===\n");
            println!("  Max Position Size:    ${}", config.risk.max_position_size);
            println!("  Max Total Exposure:   ${}", config.risk.max_total_exposure);
            println!("  Max Drawdown:         {}%", config.risk.max_drawdown_pct * dec!(100));
            println!("  Max Orders/Symbol:    {}", config.risk.max_orders_per_symbol);

            println!("\n=== Strategies ===\n");
            for strategy in &config.strategies {
                match &strategy.params {
                    StrategyParams::Grid(grid) => println!(
                        "  {:<16} levels={} spacing={}%",
                        strategy.tag(),
                        grid.num_levels,
                        grid.spacing_pct * dec!(100)
                    ),
                    StrategyParams::Dca(dca) => println!(
                        "  {:<16} base=${} safety=${} x{}",
                        strategy.tag(),
                        dca.base_order_size,
                        dca.safety_order_size,
                        dca.max_safety_orders
                    ),
                }
            }

            println!("\n=== JSON ===\n");
            println!(
                "{}",
                serde_json::to_string_pretty(&config).context("Failed to serialize config")?
            );
        }
    }

    Ok(())
}
