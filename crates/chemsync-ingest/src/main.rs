//! chemsync-ingest - compound synchronization tool

use anyhow::{Context, Result};
use chemsync_common::logging::{init_logging, LogConfig, LogLevel};
use chemsync_ingest::config::{Config, DatasetProfile, CHEMBL, DRUGBANK, PUBCHEM};
use chemsync_ingest::ingest::{
    BaseSnapshot, DrugBankHttpConfig, FtpDeltaSource, HttpReleaseSource, PgCompoundStore,
    PubChemFtpConfig, SyncOrchestrator, SyncReport,
};
use chemsync_ingest::{db, IngestError};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "chemsync-ingest")]
#[command(author, version, about = "Compound database synchronization tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Dataset name recorded in the version marker
    #[arg(long, global = true, env = "DATASET")]
    dataset: Option<String>,

    /// Print the run report as JSON on stdout
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the PubChem daily/weekly delta feed
    Pubchem,

    /// Load the latest DrugBank release if it is new
    Drugbank,

    /// Reload the store from a local directory
    Load {
        /// Directory holding .sdf, .sdf.gz or .zip files
        #[arg(short, long)]
        dir: PathBuf,

        /// Version recorded in the marker, the stored one is kept otherwise
        #[arg(long)]
        version: Option<String>,

        /// Identifier layout of the records
        #[arg(long, value_enum, default_value_t = Profile::Chembl)]
        profile: Profile,
    },

    /// Show the PubChem deltas the next run would apply
    Plan,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Profile {
    Pubchem,
    Drugbank,
    Chembl,
}

impl Profile {
    fn dataset(self) -> &'static DatasetProfile {
        match self {
            Profile::Pubchem => &PUBCHEM,
            Profile::Drugbank => &DRUGBANK,
            Profile::Chembl => &CHEMBL,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("chemsync-ingest")
        .filter_directives("sqlx=warn,suppaftp=info")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    if let Err(e) = run(cli).await {
        error!(error = %format!("{:#}", e), "chemsync-ingest failed");
        return Err(e);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    if cli.dataset.is_some() {
        config.dataset = cli.dataset.clone();
    }

    let pool = db::create_pool(&config.database).await?;
    db::run_migrations(&pool).await?;
    let store = PgCompoundStore::new(pool);

    match cli.command {
        Command::Pubchem => {
            let ftp = PubChemFtpConfig::from_env()?;
            let base = base_snapshot(&ftp)?;
            let source = FtpDeltaSource::new(ftp)?;
            let orchestrator = orchestrator(&config, &PUBCHEM, store);

            info!(dataset = orchestrator.dataset(), "Starting PubChem synchronization");
            let report = orchestrator.run_delta_sync(&source, base.as_ref()).await?;
            print_report(&report, cli.json)?;
        },
        Command::Drugbank => {
            let source = HttpReleaseSource::new(DrugBankHttpConfig::from_env()?)?;
            let orchestrator = orchestrator(&config, &DRUGBANK, store);

            info!(dataset = orchestrator.dataset(), "Starting DrugBank synchronization");
            let report = orchestrator.run_release_sync(&source).await?;
            print_report(&report, cli.json)?;
        },
        Command::Load {
            dir,
            version,
            profile,
        } => {
            if !dir.is_dir() {
                anyhow::bail!("{} is not a directory", dir.display());
            }
            let orchestrator = orchestrator(&config, profile.dataset(), store);

            info!(dataset = orchestrator.dataset(), dir = %dir.display(), "Starting directory load");
            let report = orchestrator
                .run_directory_load(&dir, version.as_deref())
                .await?;
            print_report(&report, cli.json)?;
        },
        Command::Plan => {
            let ftp = PubChemFtpConfig::from_env()?;
            let base_version = ftp.base_version.clone();
            let source = FtpDeltaSource::new(ftp)?;
            let orchestrator = orchestrator(&config, &PUBCHEM, store);

            let state = orchestrator
                .plan_deltas(&source, base_version.as_deref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        },
    }

    Ok(())
}

fn orchestrator(
    config: &Config,
    profile: &DatasetProfile,
    store: PgCompoundStore,
) -> SyncOrchestrator<PgCompoundStore> {
    SyncOrchestrator::new(
        store,
        config.batch_loader(profile),
        config.dataset_name(profile),
        config.load.strategy,
    )
}

/// Base snapshot from `BASE_DIRECTORY` and `BASE_VERSION`, which come as a pair
fn base_snapshot(ftp: &PubChemFtpConfig) -> Result<Option<BaseSnapshot>, IngestError> {
    match (&ftp.base_directory, &ftp.base_version) {
        (Some(directory), Some(version)) => Ok(Some(BaseSnapshot {
            directory: directory.clone(),
            version: version.clone(),
        })),
        (None, None) => Ok(None),
        _ => Err(IngestError::Config(
            "BASE_DIRECTORY and BASE_VERSION must be set together".to_string(),
        )),
    }
}

fn print_report(report: &SyncReport, json: bool) -> Result<()> {
    info!(
        run_id = %report.run_id,
        outcome = ?report.outcome,
        final_version = report.final_version.as_deref().unwrap_or("none"),
        deltas = report.deltas_applied.len(),
        upserted = report.upserted,
        deleted = report.deleted,
        compounds = report.compounds,
        "Synchronization finished"
    );

    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    }
    Ok(())
}
