// hoopstage entry point.
//
// Startup sequence:
// 1. Parse arguments
// 2. Initialize tracing (stderr, or a log file with --log-file)
// 3. Load config/pipeline.toml, installing the shipped copy on first run
// 4. Dispatch the subcommand

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use hoopstage_cli::commands::{self, MasterArgs};
use hoopstage_cli::config;
use hoopstage_core::{SeasonType, StageTarget};
use hoopstage_ingest::StatsApiClient;

/// Player stats consolidation and per-season staging pipeline.
#[derive(Debug, Parser)]
#[command(name = "hoopstage", version)]
struct Cli {
    /// Project directory holding config/ and defaults/.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Write logs to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Rebuild the canonical player registry and alias table.
    Aliases,
    /// Consolidate per-season exports into the master CSV.
    Master(MasterCli),
    /// Fetch raw provider tables for one season.
    Ingest(TargetArgs),
    /// Merge raw tables into the staging snapshot.
    Stage(TargetArgs),
    /// Check the published staging snapshot.
    Validate(TargetArgs),
    /// Ingest, stage and validate; publish only a passing stage.
    Refresh(TargetArgs),
}

#[derive(Debug, Args)]
struct TargetArgs {
    /// Season label, e.g. 2024-25.
    #[arg(long)]
    season: String,

    /// Regular Season, Playoffs or PlayIn.
    #[arg(long)]
    season_type: SeasonType,
}

impl TargetArgs {
    fn target(&self) -> StageTarget {
        StageTarget::new(self.season.clone(), self.season_type)
    }
}

#[derive(Debug, Args)]
struct MasterCli {
    /// Folder of per-season CSVs.
    #[arg(long)]
    season_dir: Option<PathBuf>,

    /// Master CSV output path.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Column contract JSON enforcing the exact column order.
    #[arg(long)]
    contract: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    if let Some(path) = config::install_default_config(&cli.root).context("failed to initialize configuration")? {
        info!("installed {} from defaults; edit it to tune the pipeline", path.display());
    }
    let config = config::load_config_from(&cli.root).context("failed to load configuration")?;

    match cli.command {
        Command::Aliases => {
            let index = commands::build_aliases(&config)?;
            info!("registry: {} players, {} aliases", index.players().len(), index.aliases().len());
        }
        Command::Master(args) => {
            let args = MasterArgs {
                season_dir: args.season_dir,
                output: args.output,
                contract: args.contract,
            };
            let build = commands::build_master(&config, &args)?;
            info!(
                "master: {} rows x {} cols from {} file(s)",
                build.rows.len(),
                build.headers.len(),
                build.files.len()
            );
        }
        Command::Ingest(args) => {
            let client = stats_client(&config)?;
            let manifest = commands::ingest(&config, &args.target(), &client)?;
            info!("ingested {} source(s)", manifest.raw_files.len());
        }
        Command::Stage(args) => {
            let target = args.target();
            let staged = commands::stage_season(&config, &target)?;
            info!(
                "carried forward {} value group(s), {} not found",
                staged.report.total_carried(),
                staged.report.total_not_found()
            );
            commands::publish_stage(&config, &target, &staged.table)?;
        }
        Command::Validate(args) => {
            commands::validate_published(&config, &args.target())?;
        }
        Command::Refresh(args) => {
            let client = stats_client(&config)?;
            let status = commands::refresh(&config, &args.target(), &client)?;
            info!("refreshed {}: {} rows", status.staging_path, status.rows);
        }
    }

    Ok(())
}

fn stats_client(config: &config::Config) -> anyhow::Result<StatsApiClient> {
    StatsApiClient::new(&config.fetch.base_url, config.fetch.timeout()).context("failed to build stats API client")
}

/// Initialize tracing to stderr, or to `log_file` when given.
fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hoopstage=info,warn"));

    match log_file {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            let file = std::fs::File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(filter)
                .with_writer(file)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;
        }
        None => {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;
        }
    }

    Ok(())
}
