use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use utility_bill_extractor::analysis::{DocumentRef, HttpAnalysisService};
use utility_bill_extractor::config::Config;
use utility_bill_extractor::pipeline::{BatchOutcome, BatchPipeline};
use utility_bill_extractor::storage::SqliteObjectStore;
use utility_bill_extractor::transform::HttpRegionClassifier;
use utility_bill_extractor::trigger;

const DEFAULT_CONFIG: &str = ".config/bill_extractor.toml";

const USAGE: &str = "usage: utility_bill_extractor [--config PATH] <command>

commands:
  batch [PREFIX]    process every bill under PREFIX (default: storage.input_prefix)
  document KEY      process a single bill from the configured bucket
  event FILE        process the bills named in an object-created notification";

enum Command {
    Batch(Option<String>),
    Document(String),
    Event(String),
}

fn parse_args(
    mut args: impl Iterator<Item = String>,
) -> Result<(Option<String>, Command), Box<dyn std::error::Error>> {
    let mut config_path = None;
    let mut positional = Vec::new();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                config_path = Some(args.next().ok_or("--config needs a path")?);
            }
            "--help" | "-h" => return Err(USAGE.into()),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let command = match (positional.next().as_deref(), positional.next()) {
        (Some("batch"), prefix) => Command::Batch(prefix),
        (Some("document"), Some(key)) => Command::Document(key),
        (Some("event"), Some(file)) => Command::Event(file),
        _ => return Err(USAGE.into()),
    };
    Ok((config_path, command))
}

fn load_config(path: Option<&str>) -> Result<Config, Box<dyn std::error::Error>> {
    match path {
        Some(p) => Config::load(p),
        None if Path::new(DEFAULT_CONFIG).exists() => Config::load(DEFAULT_CONFIG),
        None => {
            info!(path = DEFAULT_CONFIG, "No config file, using defaults");
            Ok(Config::default())
        }
    }
}

fn report(outcome: &BatchOutcome) -> Result<(), Box<dyn std::error::Error>> {
    for (document, warning) in &outcome.warnings {
        warn!(document = %document, warning = %warning, "Normalization warning");
    }
    for (document, event_id) in &outcome.duplicates {
        info!(document = %document, event_id = %event_id, "Skipped duplicate bill");
    }
    for failed in &outcome.failed {
        warn!(
            document = %failed.document,
            kind = failed.error.kind(),
            retryable = failed.error.is_retryable(),
            error = %failed.error,
            "Bill not processed"
        );
    }
    if outcome.failed.is_empty() {
        Ok(())
    } else {
        let retryable = outcome.retryable().count();
        Err(format!(
            "{} bill(s) failed ({retryable} retryable)",
            outcome.failed.len()
        )
        .into())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Install crypto provider
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "Failed to install rustls crypto provider")?;

    let (config_path, command) = parse_args(std::env::args().skip(1))?;
    let cfg = load_config(config_path.as_deref())?;
    cfg.validate()?;

    if let Some(parent) = Path::new(&cfg.storage.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(SqliteObjectStore::open(&cfg.storage.db_path, &cfg.storage.bucket)?);
    let pipeline = BatchPipeline::new(
        Arc::new(HttpAnalysisService::new(&cfg.analysis)),
        Arc::new(HttpRegionClassifier::new(&cfg.enrichment)),
        store,
        &cfg,
    );

    let outcome = match command {
        Command::Batch(prefix) => {
            let prefix = prefix.unwrap_or_else(|| cfg.storage.input_prefix.clone());
            pipeline.run_batch(&prefix).await?
        }
        Command::Document(key) => {
            let doc = DocumentRef::new(cfg.storage.bucket.clone(), key);
            pipeline.run_documents(vec![doc]).await
        }
        Command::Event(file) => {
            let json = std::fs::read_to_string(&file)?;
            let documents = trigger::documents_from_event(&json)?;
            pipeline.run_documents(documents).await
        }
    };

    let summary = pipeline.persist(&outcome.succeeded).await;
    info!(
        records = outcome.succeeded.len(),
        written = summary.written,
        write_failures = summary.failed.len(),
        failed_bills = outcome.failed.len(),
        duplicates = outcome.duplicates.len(),
        "Run finished"
    );

    if !summary.failed.is_empty() {
        return Err(format!("{} record(s) could not be written", summary.failed.len()).into());
    }
    report(&outcome)
}
