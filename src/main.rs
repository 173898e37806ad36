//! Storefront export service
//!
//! Serves the catalog API with bounded, cursor-ordered, format-negotiated
//! streaming exports, and runs the same exports into local files.
//!
//! # Usage
//!
//! ```bash
//! # HTTP API with 50k synthetic products
//! storefront serve --port 8080 --seed 50000
//!
//! # Export in-stock products of category 3 to NDJSON
//! storefront export --seed 50000 --category-id 3 --in-stock true --out products.ndjson
//! ```

use storefront::cli::{CliInterface, Commands};
use storefront::config::Config;
use storefront::error::Result;
use storefront::{cli, server};
use tracing_subscriber::EnvFilter;

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Main application logic
///
/// This function orchestrates the application startup:
/// 1. Parse command-line arguments
/// 2. Load configuration
/// 3. Initialize logging
/// 4. Handle subcommands or start the service
///
/// # Returns
/// * `Result<()>` - Success or error
async fn run() -> Result<()> {
    let cli = CliInterface::new()?;

    initialize_logging(cli.config());

    if cli.handle_subcommand()? {
        return Ok(());
    }

    cli.config().validate()?;

    match cli.command() {
        Commands::Serve(_) => server::serve(cli.config().clone()).await,
        Commands::Export(args) => {
            let outcome = cli::run_export(cli.config(), &args).await?;
            match outcome.abort_reason() {
                None => Ok(()),
                Some(reason) => Err(reason.clone().into()),
            }
        }
        Commands::Config { .. } | Commands::Version => Ok(()),
    }
}

/// Initialize logging from configuration
///
/// `RUST_LOG` takes precedence over the configured level.
///
/// # Arguments
/// * `config` - Effective configuration
fn initialize_logging(config: &Config) {
    let logging = &config.logging;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match (logging.json, logging.timestamps) {
        (true, true) => subscriber.json().init(),
        (true, false) => subscriber.json().without_time().init(),
        (false, true) => subscriber.init(),
        (false, false) => subscriber.without_time().init(),
    }
}
