// Pipeline commands. Each one loads its inputs from the configured layout,
// runs one library stage and writes that stage's outputs and reports.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tracing::{error, info, warn};

use hoopstage_core::identity::{load_name_fixer_dir, AliasCollisionReport, ALIASES_FILE};
use hoopstage_core::master::{load_season_dir, UnmappedReport};
use hoopstage_core::report::{
    write_json_report, ALIAS_COLLISIONS_REPORT, CARRY_FORWARD_REPORT, INGEST_MANIFEST,
    REFRESH_STATUS_REPORT, STAGE_VALIDATION_REPORT, UNMAPPED_PLAYERS_REPORT,
};
use hoopstage_core::{
    consolidate, merge, read_snapshot, read_snapshot_if_exists, validate_stage, write_snapshot,
    AliasIndex, ColumnContract, IdentityError, MasterBuild, MergeRequest, RefreshStatus,
    SourceTable, StageTarget, StagedSeason, Table, ValidationReport,
};
use hoopstage_ingest::{run_ingest, Fetcher, IngestManifest};

use crate::config::Config;

const FALLBACK_SEASON_DIR: &str = "assets/data/season";
const FALLBACK_MASTER_OUTPUT: &str = "assets/data/league-table-combined.csv";

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Rebuild `players.csv` / `player_aliases.csv` from the name-fixer sheets.
///
/// Collisions are written to `alias_collisions.json` before failing. When a
/// registry is already published, the rebuild must not repoint or rename any
/// of its players.
pub fn build_aliases(config: &Config) -> anyhow::Result<AliasIndex> {
    let fixer_dir = config.name_fixer_dir();
    let sheets = load_name_fixer_dir(&fixer_dir, &config.master.encodings)
        .with_context(|| format!("failed to read name-fixer sheets from {}", fixer_dir.display()))?;

    let index = match AliasIndex::build(&sheets, &config.identity.layout()) {
        Ok(index) => index,
        Err(IdentityError::AliasCollision { collisions }) => {
            let path = config.reports_dir().join(ALIAS_COLLISIONS_REPORT);
            write_json_report(&path, &AliasCollisionReport::new(&collisions))
                .context("failed to write alias collision report")?;
            error!("{} alias collision(s); see {}", collisions.len(), path.display());
            return Err(IdentityError::AliasCollision { collisions })
                .context("alias registry build aborted");
        }
        Err(e) => return Err(e).context("alias registry build failed"),
    };

    let mappings = config.mappings_dir();
    if let Some(published) = load_published_aliases(&mappings)? {
        index
            .ensure_no_repoint(&published)
            .context("rebuilt registry conflicts with the published one")?;
    }

    index
        .write(&mappings)
        .with_context(|| format!("failed to publish registry to {}", mappings.display()))?;
    info!(
        "published {} players and {} aliases to {}",
        index.players().len(),
        index.aliases().len(),
        mappings.display()
    );
    Ok(index)
}

/// The published alias index in `dir`, or `None` if nothing is published yet.
pub fn load_published_aliases(dir: &Path) -> anyhow::Result<Option<AliasIndex>> {
    if !dir.join(ALIASES_FILE).exists() {
        return Ok(None);
    }
    let index = AliasIndex::load(dir)
        .with_context(|| format!("failed to load published aliases from {}", dir.display()))?;
    Ok(Some(index))
}

// ---------------------------------------------------------------------------
// Master
// ---------------------------------------------------------------------------

/// Command-line overrides for the master build. Each wins over the config
/// file, which wins over the contract document's own path defaults.
#[derive(Debug, Clone, Default)]
pub struct MasterArgs {
    pub season_dir: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub contract: Option<PathBuf>,
}

/// Season directory and output path for a master build.
fn master_paths(
    config: &Config,
    args: &MasterArgs,
    contract: Option<&ColumnContract>,
) -> (PathBuf, PathBuf) {
    let season_dir = args
        .season_dir
        .clone()
        .or_else(|| config.paths.season_dir.as_deref().map(|p| config.resolve(p)))
        .or_else(|| contract.and_then(|c| c.season_folder.as_ref()).map(|p| config.base_dir.join(p)))
        .unwrap_or_else(|| config.resolve(FALLBACK_SEASON_DIR));
    let output = args
        .output
        .clone()
        .or_else(|| config.paths.master_output.as_deref().map(|p| config.resolve(p)))
        .or_else(|| contract.and_then(|c| c.master_path.as_ref()).map(|p| config.base_dir.join(p)))
        .unwrap_or_else(|| config.resolve(FALLBACK_MASTER_OUTPUT));
    (season_dir, output)
}

/// Consolidate the season exports into the master CSV.
pub fn build_master(config: &Config, args: &MasterArgs) -> anyhow::Result<MasterBuild> {
    let contract = match args.contract.clone().or_else(|| config.contract_path()) {
        Some(path) => Some(
            ColumnContract::load(&path)
                .with_context(|| format!("failed to load column contract {}", path.display()))?,
        ),
        None => None,
    };
    let (season_dir, output) = master_paths(config, args, contract.as_ref());

    let aliases = load_published_aliases(&config.mappings_dir())?;
    if aliases.is_none() {
        warn!(
            "no published aliases in {}; player names are normalized but not canonicalized",
            config.mappings_dir().display()
        );
    }

    let options = config.master_options();
    let frames = load_season_dir(&season_dir, &options.encodings)
        .with_context(|| format!("failed to read season files from {}", season_dir.display()))?;
    let build = consolidate(frames, contract.as_ref(), aliases.as_ref(), &options)
        .context("master consolidation failed")?;

    if aliases.is_some() {
        let path = config.reports_dir().join(UNMAPPED_PLAYERS_REPORT);
        write_json_report(&path, &UnmappedReport::new(&build.unmapped))
            .context("failed to write unmapped players report")?;
        if !build.unmapped.is_empty() {
            warn!("{} player name(s) had no alias; see {}", build.unmapped.len(), path.display());
        }
    }

    build
        .write(&output)
        .with_context(|| format!("failed to write master {}", output.display()))?;
    Ok(build)
}

// ---------------------------------------------------------------------------
// Ingest
// ---------------------------------------------------------------------------

/// Fetch every configured source for `target` and publish raw snapshots plus
/// `ingest_manifest.json`.
pub fn ingest<F: Fetcher + ?Sized>(
    config: &Config,
    target: &StageTarget,
    fetcher: &F,
) -> anyhow::Result<IngestManifest> {
    let manifest = run_ingest(
        fetcher,
        &config.staging.requests(target),
        &config.player_policy(),
        &config.retry_policy(),
        &config.raw_dir(),
        std::thread::sleep,
    )
    .with_context(|| format!("ingest for {target} failed"))?;

    write_json_report(&config.reports_dir().join(INGEST_MANIFEST), &manifest)
        .context("failed to write ingest manifest")?;
    Ok(manifest)
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

fn load_raw(config: &Config, target: &StageTarget, id: &str, prefix: &str) -> anyhow::Result<SourceTable> {
    let path = target.raw_snapshot_path(&config.raw_dir(), id);
    if !path.exists() {
        bail!("missing raw file {}; run ingest first", path.display());
    }
    let table = read_snapshot(&path).with_context(|| format!("failed to read raw {}", path.display()))?;
    Ok(SourceTable::new(id, prefix, table))
}

/// Merge the raw snapshots for `target` with carry-forward from the current
/// staging snapshot. Writes `carry_forward.json`; the staged table itself is
/// not written.
pub fn stage_season(config: &Config, target: &StageTarget) -> anyhow::Result<StagedSeason> {
    let Some(primary) = config.staging.primary_source() else {
        bail!("no primary source configured");
    };
    let primary = load_raw(config, target, &primary.id, &primary.prefix)?;
    let secondaries = config
        .staging
        .secondary_sources()
        .map(|s| load_raw(config, target, &s.id, &s.prefix))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let staging_path = target.staging_path(&config.staging_dir());
    let prior = read_snapshot_if_exists(&staging_path)
        .with_context(|| format!("failed to read prior staging {}", staging_path.display()))?;
    if prior.is_none() {
        info!("no prior staging snapshot for {target}; nothing to carry forward");
    }

    let request = MergeRequest::new(target.clone(), primary, secondaries)
        .with_join_key(config.staging.join_key.clone())
        .with_name_column(config.staging.name_column.clone());
    let staged = merge(&request, prior.as_ref()).with_context(|| format!("staging merge for {target} failed"))?;

    write_json_report(&config.reports_dir().join(CARRY_FORWARD_REPORT), &staged.report)
        .context("failed to write carry-forward report")?;
    Ok(staged)
}

/// Atomically replace the staging snapshot and write `refresh_status.json`.
pub fn publish_stage(config: &Config, target: &StageTarget, table: &Table) -> anyhow::Result<RefreshStatus> {
    let path = target.staging_path(&config.staging_dir());
    write_snapshot(&path, table).with_context(|| format!("failed to write staging {}", path.display()))?;
    info!(
        "wrote staging {} ({} rows, {} cols)",
        path.display(),
        table.len(),
        table.width()
    );

    let status = RefreshStatus::new(target, &path, table);
    write_json_report(&config.reports_dir().join(REFRESH_STATUS_REPORT), &status)
        .context("failed to write refresh status")?;
    Ok(status)
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

/// Run the stage gate over `table`, write `stage_validation.json`, and fail
/// if anything was found.
pub fn check_stage(config: &Config, target: &StageTarget, table: &Table) -> anyhow::Result<ValidationReport> {
    let path = target.staging_path(&config.staging_dir());
    let findings = validate_stage(table, &config.validation_config());
    let report = ValidationReport::new(target, &path, table, findings);

    write_json_report(&config.reports_dir().join(STAGE_VALIDATION_REPORT), &report)
        .context("failed to write stage validation report")?;
    report.ensure_ok()?;
    info!("stage {target} passed validation ({} rows)", report.rows);
    Ok(report)
}

/// Validate the published staging snapshot for `target`.
pub fn validate_published(config: &Config, target: &StageTarget) -> anyhow::Result<ValidationReport> {
    let path = target.staging_path(&config.staging_dir());
    let table = read_snapshot(&path).with_context(|| format!("failed to read staging {}", path.display()))?;
    check_stage(config, target, &table)
}

// ---------------------------------------------------------------------------
// Refresh
// ---------------------------------------------------------------------------

/// Ingest, merge and validate `target`, publishing the staging snapshot only
/// when it passes the gate.
pub fn refresh<F: Fetcher + ?Sized>(
    config: &Config,
    target: &StageTarget,
    fetcher: &F,
) -> anyhow::Result<RefreshStatus> {
    ingest(config, target, fetcher)?;
    let staged = stage_season(config, target)?;
    check_stage(config, target, &staged.table)?;
    publish_stage(config, target, &staged.table)
}
