//! Shelf Life CLI - look up products and compute expiry dates, online or not.
//!
//! Usage:
//!   shelfcheck load
//!   shelfcheck search "молоко"
//!   shelfcheck calc 000123 --date yesterday
//!   shelfcheck diagnostics
//!   shelfcheck serve  # Start the offline proxy

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use shelf_life::{config::AppConfig, search::highlight, utils, App};

/// Shelf Life - product catalog and expiry calculator
#[derive(Parser, Debug)]
#[command(name = "shelfcheck")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to ./shelflife.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Start without network access
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load the catalog and report where it came from
    Load,

    /// Search products by code or name
    Search {
        /// At least two characters
        query: String,
        /// Print names with HTML match markup
        #[arg(long)]
        html: bool,
    },

    /// Show one product
    Show {
        /// Product code
        code: String,
    },

    /// Compute the expiry date of a product
    Calc {
        /// Product code
        code: String,
        /// Production date (YYYY-MM-DD, DD.MM.YYYY, today, yesterday or tomorrow)
        #[arg(short, long, default_value = "today")]
        date: String,
    },

    /// Drop the cached catalog and reload it from the network
    Refresh,

    /// Reload from the network if online
    Sync,

    /// Check every data source
    Probe,

    /// Print diagnostic information
    Diagnostics,

    /// Remove the cached catalog
    ClearCache,

    /// Start the offline proxy
    #[cfg(feature = "proxy")]
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let mut config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if cli.offline {
        config.sync.start_online = false;
    }

    info!("Shelf Life {} starting...", shelf_life::VERSION);

    let app = App::from_config(&config)?;
    let result = run(&app, &config, cli.command).await;

    // Let the last fetched catalog reach the disk before the runtime goes away
    app.shutdown().await;
    result
}

#[cfg_attr(not(feature = "proxy"), allow(unused_variables))]
async fn run(app: &App, config: &AppConfig, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Load => {
            let status = app.load_products_data().await;
            match (&status.outcome, &status.error) {
                (Some(outcome), _) => println!(
                    "Loaded {} products from {}{}",
                    status.product_count,
                    outcome.state,
                    outcome
                        .source
                        .as_deref()
                        .map(|s| format!(" ({})", s))
                        .unwrap_or_default()
                ),
                (None, Some(error)) => println!("{}", error),
                (None, None) => println!("{} products", status.product_count),
            }
        }

        Commands::Search { query, html } => {
            app.load_products_data().await;
            let results = app.search(&query);

            if results.is_empty() {
                println!("No products match '{}'", query);
            }
            for product in results {
                let name = if html {
                    highlight(&product.name, &query)
                } else {
                    product.name.clone()
                };
                println!("{:<12} {} ({} дн.)", product.code, name, product.shelf_life_days);
            }
        }

        Commands::Show { code } => {
            app.load_products_data().await;
            let product = app.select_product(&code)?;

            println!("Код:           {}", product.code);
            println!("Наименование:  {}", product.name);
            println!("Срок годности: {} дн.", product.shelf_life_days);
            println!("В упаковке:    {}", product.quantity_per_pack);
            println!("Штрихкод:      {}", product.barcode);
            println!("Производитель: {}", product.manufacturer);
            if let Some(standard) = product.standard_notice() {
                println!("Стандарт:      {}", standard);
            }
        }

        Commands::Calc { code, date } => {
            app.load_products_data().await;
            let today = chrono::Local::now().date_naive();
            let production_date = utils::parse_date(&date, today)?;

            let product = app.select_product(&code)?;
            let result = app.calculate(&product.code, production_date)?;
            println!("{}", product);
            println!("{}", result);
            if result.is_expired() {
                println!("Срок годности истёк");
            }
        }

        Commands::Refresh => {
            let outcome = app.refresh().await?;
            println!("Refreshed: {} products from {}", outcome.products, outcome.state);
        }

        Commands::Sync => {
            if app.synchronize().await {
                println!("Synchronized: {} products", app.service().product_count());
            } else {
                println!("Synchronization skipped or failed");
            }
        }

        Commands::Probe => {
            let results = app.probe().await;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }

        Commands::Diagnostics => {
            app.load_products_data().await;
            let diagnostics = app.diagnostics().await;
            println!("{}", serde_json::to_string_pretty(&diagnostics)?);
        }

        Commands::ClearCache => {
            app.clear_cache().await?;
            println!("Cache cleared");
        }

        #[cfg(feature = "proxy")]
        Commands::Serve => {
            shelf_life::proxy::serve(config).await?;
        }
    }

    Ok(())
}
