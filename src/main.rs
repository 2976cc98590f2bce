use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use tracing::{error, info};
use vectornode::config::EngineConfig;
use vectornode::domain::ports::NodeStoreBox;
use vectornode::infrastructure::in_memory::InMemoryNodeStore;
use vectornode::interfaces::csv::balance_writer::BalanceWriter;
use vectornode::interfaces::json::scenario_reader::ScenarioReader;
use vectornode::interfaces::scenario::ScenarioRunner;
use vectornode::logging::{LogFormat, init_logging};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scenario file, one JSON step per line
    scenario: PathBuf,

    /// Engine configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Log output format; overrides the configuration file
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<PathBuf>) -> Result<NodeStoreBox> {
    use vectornode::infrastructure::rocksdb::RocksDBNodeStore;

    match db_path {
        Some(path) => {
            let store = RocksDBNodeStore::open(&path).into_diagnostic()?;
            info!(path = %path.display(), "using persistent node store");
            Ok(Box::new(store))
        }
        None => Ok(Box::new(InMemoryNodeStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<PathBuf>) -> Result<NodeStoreBox> {
    if db_path.is_some() {
        tracing::warn!(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
        );
    }
    Ok(Box::new(InMemoryNodeStore::new()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_toml_file(path).into_diagnostic()?,
        None => EngineConfig::default(),
    };
    init_logging(
        cli.log_format.unwrap_or(config.log_format),
        &config.log_level,
    );

    let store = open_store(cli.db_path)?;
    let mut runner = ScenarioRunner::new(config, store).into_diagnostic()?;

    let file = File::open(&cli.scenario).into_diagnostic()?;
    let reader = ScenarioReader::new(BufReader::new(file));
    for (line, step) in reader.steps() {
        match step {
            Ok(step) => {
                if let Err(e) = runner.apply(step).await {
                    error!(line, "Error applying scenario step: {}", e);
                }
            }
            Err(e) => {
                error!(line, "Error reading scenario step: {}", e);
            }
        }
    }
    info!(
        ticks = runner.ticks(),
        transfers = runner.totals().transfers,
        "scenario finished"
    );

    let stdout = io::stdout();
    let mut writer = BalanceWriter::new(stdout.lock());
    writer
        .write_balances(runner.balances().await)
        .into_diagnostic()?;

    Ok(())
}
