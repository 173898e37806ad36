//! Command-line interface for storefront
//!
//! This module handles:
//! - Command-line argument parsing using clap
//! - Configuration loading, environment and argument overrides
//! - The `export` subcommand, which streams an export into a local file
//! - The `config` subcommand for showing and validating configuration

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, LogLevel};
use crate::error::Result;
use crate::export::{
    BinaryOptions, ExportCoordinator, ExportFormat, ExportOutcome, ExportRequest, FileSink,
    ProgressTracker, SchemaRegistry,
};
use crate::filter::FilterParams;
use crate::model::{ProductRow, timestamp};
use crate::store;

/// Storefront export service
#[derive(Parser, Debug)]
#[command(
    name = "storefront",
    version,
    about = "Streaming catalog export service",
    long_about = "Serves the storefront catalog API with bounded, cursor-ordered exports
in NDJSON, JSON array or MessagePack, and runs the same exports into local files."
)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    pub config_file: Option<PathBuf>,

    /// Quiet mode (errors only)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Verbose mode (detailed logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Very verbose mode (trace logging)
    #[arg(long = "vv", global = true)]
    pub very_verbose: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Subcommands for storefront
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the HTTP API (default)
    Serve(ServeArgs),

    /// Export products into a file
    Export(ExportArgs),

    /// Show configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Validate configuration file
        #[arg(long)]
        validate: bool,
    },

    /// Show version information
    Version,
}

/// Arguments of `storefront serve`
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Bind address
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Listen port
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Synthetic products to load at startup
    #[arg(long, value_name = "ROWS")]
    pub seed: Option<u64>,
}

/// Arguments of `storefront export`
#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Output format (msgpack, ndjson, json)
    #[arg(short = 'f', long, value_name = "FORMAT", default_value = "ndjson")]
    pub format: ExportFormat,

    /// Output file; defaults to products.<ext> in the current directory
    #[arg(short = 'o', long = "out", value_name = "FILE")]
    pub out: Option<PathBuf>,

    /// Resume strictly after this product id
    #[arg(long, value_name = "ID")]
    pub cursor: Option<i64>,

    /// Row cap, lowered to the configured export limit
    #[arg(long, value_name = "ROWS")]
    pub limit: Option<u64>,

    /// Only products of this category
    #[arg(long, value_name = "ID")]
    pub category_id: Option<i64>,

    /// Inclusive lower price bound
    #[arg(long, value_name = "PRICE")]
    pub min_price: Option<f64>,

    /// Inclusive upper price bound
    #[arg(long, value_name = "PRICE")]
    pub max_price: Option<f64>,

    /// Stock flag
    #[arg(long, value_name = "BOOL")]
    pub in_stock: Option<bool>,

    /// Only products modified after this RFC 3339 timestamp
    #[arg(long, value_name = "TIMESTAMP", value_parser = parse_timestamp)]
    pub modified_after: Option<DateTime<Utc>>,

    /// Synthetic products to load into the memory store first
    #[arg(long, value_name = "ROWS")]
    pub seed: Option<u64>,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    timestamp::parse(raw).ok_or_else(|| format!("'{raw}' is not an RFC 3339 timestamp"))
}

impl ExportArgs {
    /// Filter parameters carried by the arguments
    pub fn filter(&self) -> FilterParams {
        FilterParams {
            category_id: self.category_id,
            min_price: self.min_price,
            max_price: self.max_price,
            in_stock: self.in_stock,
            modified_after: self.modified_after,
        }
    }

    /// Export request for the coordinator
    pub fn request(&self) -> ExportRequest {
        ExportRequest {
            filter: self.filter(),
            format: Some(self.format.as_str().to_string()),
            accept: None,
            cursor: self.cursor,
            limit: self.limit,
        }
    }

    /// Output path, derived from the format when not given
    pub fn output_path(&self) -> PathBuf {
        match &self.out {
            Some(out) => out.clone(),
            None => PathBuf::from(format!("products.{}", self.format.extension())),
        }
    }
}

/// CLI interface handler
pub struct CliInterface {
    /// Parsed command-line arguments
    args: CliArgs,

    /// Loaded configuration
    config: Config,
}

impl CliInterface {
    /// Parse the process arguments and load configuration
    ///
    /// # Returns
    /// * `Result<Self>` - New CLI interface or error
    pub fn new() -> Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    /// Build the interface from already parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let config = Self::load_config(&args)?;
        Ok(Self { args, config })
    }

    /// Load configuration from file and environment, then merge arguments
    ///
    /// # Arguments
    /// * `args` - Command-line arguments
    ///
    /// # Returns
    /// * `Result<Config>` - Loaded configuration or error
    fn load_config(args: &CliArgs) -> Result<Config> {
        let mut config = Config::load(args.config_file.as_deref())?;
        Self::apply_args_to_config(&mut config, args);
        Ok(config)
    }

    /// Apply command-line arguments to configuration
    fn apply_args_to_config(config: &mut Config, args: &CliArgs) {
        Self::apply_logging_args(config, args);

        match &args.command {
            Some(Commands::Serve(serve)) => {
                if let Some(bind) = &serve.bind {
                    config.server.bind = bind.clone();
                }
                if let Some(port) = serve.port {
                    config.server.port = port;
                }
                if let Some(seed) = serve.seed {
                    config.store.seed_rows = seed;
                }
            }
            Some(Commands::Export(export)) => {
                if let Some(seed) = export.seed {
                    config.store.seed_rows = seed;
                }
            }
            _ => {}
        }
    }

    fn apply_logging_args(config: &mut Config, args: &CliArgs) {
        config.logging.level = if args.very_verbose {
            LogLevel::Trace
        } else if args.verbose {
            LogLevel::Debug
        } else if args.quiet {
            LogLevel::Error
        } else {
            config.logging.level
        };
    }

    /// Get configuration reference
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get command-line arguments reference
    pub fn args(&self) -> &CliArgs {
        &self.args
    }

    /// Subcommand to run; `serve` when none was given
    pub fn command(&self) -> Commands {
        self.args
            .command
            .clone()
            .unwrap_or_else(|| Commands::Serve(ServeArgs::default()))
    }

    /// Handle subcommands that finish without starting the service
    ///
    /// # Returns
    /// * `Result<bool>` - true when the subcommand was handled here
    pub fn handle_subcommand(&self) -> Result<bool> {
        match &self.args.command {
            Some(Commands::Version) => {
                self.show_version();
                Ok(true)
            }
            Some(Commands::Config { show, validate }) => {
                self.handle_config_command(*show, *validate)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn show_version(&self) {
        println!("storefront {}", env!("CARGO_PKG_VERSION"));
    }

    fn handle_config_command(&self, show: bool, validate: bool) -> Result<()> {
        if validate {
            self.validate_config_file()?;
        }
        if show || !validate {
            self.show_config()?;
        }
        Ok(())
    }

    fn validate_config_file(&self) -> Result<()> {
        let path = self.get_config_path();
        println!("Validating configuration file: {}", path.display());

        if !path.exists() {
            println!("❌ Configuration file does not exist");
            return Ok(());
        }

        match Config::load(Some(path.as_path())) {
            Ok(config) => match config.validate() {
                Ok(_) => println!("✅ Configuration is valid"),
                Err(e) => println!("❌ Configuration validation failed: {}", e),
            },
            Err(e) => println!("❌ Failed to load configuration: {}", e),
        }

        Ok(())
    }

    fn show_config(&self) -> Result<()> {
        let path = self.get_config_path();
        println!("Configuration file: {}", path.display());
        println!();
        println!("=== Effective Configuration ===");
        println!();

        match self.config.to_toml() {
            Ok(toml_str) => println!("{}", toml_str),
            Err(e) => {
                eprintln!("Error formatting configuration: {}", e);
                println!("{:#?}", self.config);
            }
        }

        Ok(())
    }

    fn get_config_path(&self) -> PathBuf {
        self.args
            .config_file
            .clone()
            .unwrap_or_else(Config::default_config_path)
    }
}

/// Run `storefront export` into a file until done or Ctrl+C
///
/// # Arguments
/// * `config` - Effective configuration
/// * `args` - Export arguments
///
/// # Returns
/// * `Result<ExportOutcome>` - Terminal state of the export
pub async fn run_export(config: &Config, args: &ExportArgs) -> Result<ExportOutcome> {
    let path = args.output_path();
    let source = store::open_configured(&config.store).await?;
    let binary = BinaryOptions {
        validate_rows: config.export.validate_binary_rows,
        ..BinaryOptions::new(SchemaRegistry::new().with::<ProductRow>())
    };
    let coordinator =
        ExportCoordinator::<ProductRow>::new(source, config.export.clone(), binary.into());

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received, cancelling export");
            ctrl_c.cancel();
        }
    });

    let request = args.request();
    let limit = coordinator.effective_limit(request.limit);
    let tracker = ProgressTracker::new(Some(limit), !args.no_progress);
    let sink = FileSink::create(&path).await?;

    let (outcome, _sink) = coordinator
        .export_to_sink(request, sink, &cancel, Some(tracker))
        .await?;
    report_outcome(&path, &outcome);
    Ok(outcome)
}

fn report_outcome(path: &Path, outcome: &ExportOutcome) {
    match outcome.abort_reason() {
        None => {
            info!(
                rows = outcome.rows_written,
                bytes = outcome.bytes_written,
                truncated = outcome.truncated,
                "Export written to {}",
                path.display()
            );
            println!(
                "Exported {} rows ({} bytes) to {}{}",
                outcome.rows_written,
                outcome.bytes_written,
                path.display(),
                if outcome.truncated { " (limit reached)" } else { "" }
            );
        }
        Some(reason) => {
            println!(
                "Export aborted after {} rows: {}",
                outcome.rows_written, reason
            );
        }
    }
}
