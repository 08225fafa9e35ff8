//! Galena - a hashed key-value store with batch jobs and live sessions
//!
//! This is the main entry point for the Galena server.
#![allow(clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use galena::config::Config;
use galena::server::Server;
use tracing::{error, info};

/// Galena - a hashed key-value store with batch jobs and live sessions
///
/// Processes every `.job` file in the jobs directory while serving
/// interactive sessions on the registration pipe until stopped.
#[derive(Parser, Debug)]
#[command(name = "galena")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory scanned for `.job` files
    #[arg(value_name = "JOBS_DIR")]
    jobs_dir: PathBuf,

    /// Number of concurrent job workers
    #[arg(value_name = "WORKERS", value_parser = clap::value_parser!(u64).range(1..))]
    workers: u64,

    /// Maximum number of concurrent backup snapshots
    #[arg(value_name = "MAX_BACKUPS", value_parser = clap::value_parser!(u64).range(1..))]
    max_backups: u64,

    /// Registration pipe clients announce themselves on
    #[arg(value_name = "REGISTRY_PATH")]
    registry_path: PathBuf,

    /// Path to configuration file (TOML)
    #[arg(
        short = 'c',
        long = "config",
        value_name = "FILE",
        env = "GALENA_CONFIG"
    )]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error (overrides config file)
    #[arg(
        short = 'l',
        long = "log-level",
        alias = "loglevel",
        value_name = "LEVEL",
        env = "GALENA_LOG_LEVEL"
    )]
    log_level: Option<String>,
}

impl Cli {
    /// Apply the command line over the configuration. The positional
    /// arguments always win; the file supplies the ambient knobs.
    fn apply_to_config(&self, config: &mut Config) {
        config.jobs.directory = self.jobs_dir.clone();
        config.jobs.workers = self.workers as usize;
        config.backup.max_concurrent = self.max_backups as usize;
        config.server.registry_path = self.registry_path.clone();
        if let Some(ref level) = self.log_level {
            config.logging.level = level.clone();
        }
    }
}

#[derive(Debug, Clone)]
enum ConfigSource {
    Explicit(PathBuf),
    DefaultFile(PathBuf),
    Defaults,
}

impl ConfigSource {
    fn label(&self) -> String {
        match self {
            ConfigSource::Explicit(path) | ConfigSource::DefaultFile(path) => {
                path.display().to_string()
            }
            ConfigSource::Defaults => "built-in defaults".to_string(),
        }
    }
}

fn load_config(cli: &Cli) -> Result<(Config, ConfigSource), String> {
    if let Some(path) = &cli.config {
        if !path.exists() {
            return Err(format!("config file {} not found", path.display()));
        }
        let config = Config::from_file(path).map_err(|e| e.to_string())?;
        return Ok((config, ConfigSource::Explicit(path.clone())));
    }

    let default_path = PathBuf::from("galena.toml");
    if default_path.exists() {
        let config = Config::from_file(&default_path).map_err(|e| e.to_string())?;
        return Ok((config, ConfigSource::DefaultFile(default_path)));
    }

    Ok((Config::default(), ConfigSource::Defaults))
}

fn init_logging(config: &Config) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

fn print_banner(config: &Config, source: &ConfigSource) {
    let version = env!("CARGO_PKG_VERSION");

    info!("Starting Galena v{}", version);
    info!("  Config: {}", source.label());
    info!("  Jobs directory: {}", config.jobs.directory.display());
    info!("  Workers: {}", config.jobs.workers);
    info!("  Backup budget: {}", config.backup.max_concurrent);
    info!(
        "  Registration pipe: {}",
        config.server.registry_path.display()
    );
    info!("  Store buckets: {}", config.store.buckets);
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (mut config, source) = match load_config(&cli) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("galena: {e}");
            return ExitCode::FAILURE;
        }
    };

    cli.apply_to_config(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("galena: {e}");
        return ExitCode::FAILURE;
    }

    init_logging(&config);
    print_banner(&config, &source);

    match Server::new(config) {
        Ok(server) => match server.run().await {
            Ok(()) => {
                info!("Galena shut down gracefully");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Server error: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            error!("Failed to start server: {}", e);
            ExitCode::FAILURE
        }
    }
}
