//! Daana ingestion CLI: convert one spreadsheet, optionally ingest it.

use std::path::PathBuf;

use clap::Parser;

use daana_ingest::config::{self, ConfigError, Settings};
use daana_ingest::core_state::PipelineContext;
use daana_ingest::ingest::{TenantContext, UploadSummary};
use daana_ingest::pipeline::{CancellationFlag, IngestError};
use daana_ingest::schema::Entity;

#[derive(Parser)]
#[command(
    name = "daana-ingest",
    version,
    about = "Map a clinic inventory spreadsheet onto the Daana-Rx schema",
    long_about = "Map a clinic inventory spreadsheet onto the Daana-Rx schema.\n\n\
                  Without --ingest, prints the cleaned CSV. With --ingest, persists the\n\
                  records for the given clinic and user and prints a JSON summary."
)]
struct Cli {
    /// CSV file to convert.
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Target table (clinics, users, locations, lots, drugs, units, transactions).
    /// Inferred from the headers when omitted.
    #[arg(long)]
    entity: Option<Entity>,

    /// Persist the converted records instead of printing CSV.
    #[arg(long, requires_all = ["clinic", "user"])]
    ingest: bool,

    /// Tenant clinic id for ingestion.
    #[arg(long, value_name = "ID")]
    clinic: Option<String>,

    /// Acting user id for ingestion.
    #[arg(long, value_name = "ID")]
    user: Option<String>,

    /// Write the cleaned CSV here instead of stdout.
    #[arg(long, short, value_name = "PATH", conflicts_with = "ingest")]
    output: Option<PathBuf>,

    /// Rows per extraction call (overrides DAANA_BATCH_SIZE).
    #[arg(long, value_name = "N")]
    batch_size: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Pipeline(#[from] IngestError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot write output: {0}")]
    Write(String),
}

fn main() {
    let cli = Cli::parse();
    // `.env` can set RUST_LOG and DAANA_DEBUG; merge it before the subscriber reads them.
    config::load_dotenv();
    daana_ingest::init_tracing();
    let settings = Settings::from_env();
    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let exit_code = match settings.map_err(CliError::from).and_then(|s| run(&cli, s)) {
        Ok(has_errors) => i32::from(has_errors),
        Err(error) => {
            eprintln!("error: {error}");
            1
        }
    };
    std::process::exit(exit_code);
}

/// Returns whether any row failed.
fn run(cli: &Cli, mut settings: Settings) -> Result<bool, CliError> {
    if let Some(batch_size) = cli.batch_size {
        settings.batch_size = batch_size.max(1);
    }
    let bytes = std::fs::read(&cli.file).map_err(|source| CliError::Read {
        path: cli.file.clone(),
        source,
    })?;

    let ctx = PipelineContext::new(settings);
    let cancel = CancellationFlag::new();

    match (cli.ingest, &cli.clinic, &cli.user) {
        (true, Some(clinic), Some(user)) => {
            let tenant = TenantContext::new(clinic.as_str(), user.as_str());
            let summary = ctx.upload(&bytes, cli.entity, &tenant, &cancel)?;
            print_summary(&summary)?;
            Ok(!summary.errors.is_empty())
        }
        _ => {
            let conversion = ctx.convert(&bytes, cli.entity, &cancel)?;
            let csv = conversion
                .to_csv()
                .map_err(|e| CliError::Write(e.to_string()))?;
            match &cli.output {
                Some(path) => {
                    std::fs::write(path, csv).map_err(|e| CliError::Write(e.to_string()))?
                }
                None => print!("{csv}"),
            }
            Ok(false)
        }
    }
}

fn print_summary(summary: &UploadSummary) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(summary).map_err(|e| CliError::Write(e.to_string()))?;
    println!("{json}");
    Ok(())
}
