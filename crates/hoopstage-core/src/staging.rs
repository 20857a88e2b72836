// Staging merge: joins the provider tables of one season/season-type on the
// numeric player id, namespaces each source's columns, and fills players a
// secondary source dropped from the previous staging snapshot.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::report::utc_now_iso;
use crate::season::StageTarget;
use crate::table::{Cell, CellValue, Table, TableError};

pub const DEFAULT_JOIN_KEY: &str = "PLAYER_ID";
pub const DEFAULT_NAME_COLUMN: &str = "PLAYER_NAME";
pub const SEASON_COLUMN: &str = "Season";
pub const SEASON_TYPE_COLUMN: &str = "SeasonType";
pub const PLAYER_COLUMN: &str = "Player";

const PRIOR_SOURCE: &str = "prior snapshot";

/// `<prefix>__<column>`
pub fn namespaced(prefix: &str, column: &str) -> String {
    format!("{prefix}__{column}")
}

/// Name of the boolean column marking rows whose `prefix` group was copied
/// from the previous snapshot.
pub fn carry_flag_column(prefix: &str) -> String {
    namespaced("carried_forward", prefix)
}

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// One provider table and the prefix its columns are namespaced under.
#[derive(Debug, Clone)]
pub struct SourceTable {
    pub id: String,
    pub prefix: String,
    pub table: Table,
}

impl SourceTable {
    pub fn new(id: impl Into<String>, prefix: impl Into<String>, table: Table) -> Self {
        Self {
            id: id.into(),
            prefix: prefix.into(),
            table,
        }
    }
}

/// Everything one staging merge needs besides the prior snapshot.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub target: StageTarget,
    pub join_key: String,
    pub name_column: String,
    pub primary: SourceTable,
    pub secondaries: Vec<SourceTable>,
}

impl MergeRequest {
    pub fn new(target: StageTarget, primary: SourceTable, secondaries: Vec<SourceTable>) -> Self {
        Self {
            target,
            join_key: DEFAULT_JOIN_KEY.to_string(),
            name_column: DEFAULT_NAME_COLUMN.to_string(),
            primary,
            secondaries,
        }
    }

    pub fn with_join_key(mut self, join_key: impl Into<String>) -> Self {
        self.join_key = join_key.into();
        self
    }

    pub fn with_name_column(mut self, name_column: impl Into<String>) -> Self {
        self.name_column = name_column.into();
        self
    }

    fn sources(&self) -> impl Iterator<Item = &SourceTable> {
        std::iter::once(&self.primary).chain(&self.secondaries)
    }
}

/// Carry-forward outcome for one secondary source. Ids are in row order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceCarryForward {
    pub source_id: String,
    pub prefix: String,
    pub missing: Vec<i64>,
    pub carried_forward: Vec<i64>,
    pub not_found: Vec<i64>,
}

/// Body of `carry_forward.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CarryForwardReport {
    pub generated_at_utc: String,
    pub season: String,
    pub season_type: String,
    pub prior_snapshot: bool,
    pub sources: Vec<SourceCarryForward>,
}

impl CarryForwardReport {
    pub fn total_carried(&self) -> usize {
        self.sources.iter().map(|s| s.carried_forward.len()).sum()
    }

    pub fn total_not_found(&self) -> usize {
        self.sources.iter().map(|s| s.not_found.len()).sum()
    }
}

/// A merged staging table plus its carry-forward report.
#[derive(Debug, Clone)]
pub struct StagedSeason {
    pub table: Table,
    pub report: CarryForwardReport,
}

/// Body of `refresh_status.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshStatus {
    pub last_refresh_utc: String,
    pub season: String,
    pub season_type: String,
    pub staging_path: String,
    pub rows: usize,
    pub cols: usize,
    pub ok: bool,
}

impl RefreshStatus {
    pub fn new(target: &StageTarget, staging_path: &std::path::Path, table: &Table) -> Self {
        Self {
            last_refresh_utc: utc_now_iso(),
            season: target.season.clone(),
            season_type: target.season_type.label().to_string(),
            staging_path: staging_path.to_string_lossy().replace('\\', "/"),
            rows: table.len(),
            cols: table.width(),
            ok: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("source `{source_id}` has invalid prefix `{prefix}` (must be non-empty and must not contain `__`)")]
    InvalidPrefix { source_id: String, prefix: String },

    #[error("prefix `{prefix}` is used by more than one source")]
    DuplicatePrefix { prefix: String },

    #[error("{source_id} has no join key column `{column}`")]
    MissingJoinKey { source_id: String, column: String },

    #[error("{source_id} row {row}: join key `{value}` is not an integer")]
    InvalidJoinKey {
        source_id: String,
        row: usize,
        value: String,
    },

    #[error("{source_id} repeats join key(s) {}", join_ids(.keys))]
    DuplicateJoinKey { source_id: String, keys: Vec<i64> },

    #[error("prior snapshot belongs to {found}, expected {expected}")]
    PriorMismatch { expected: String, found: String },

    #[error("merged columns clash: {0}")]
    Columns(#[from] TableError),
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

// ---------------------------------------------------------------------------
// Keyed view of one table
// ---------------------------------------------------------------------------

/// Row lookup by join key. Keys are validated: present, integral, unique.
struct KeyedRows {
    ids: Vec<i64>,
    by_id: HashMap<i64, usize>,
}

impl KeyedRows {
    fn build(source_id: &str, table: &Table, join_key: &str) -> Result<Self, MergeError> {
        let key_idx = table
            .column_index(join_key)
            .ok_or_else(|| MergeError::MissingJoinKey {
                source_id: source_id.to_string(),
                column: join_key.to_string(),
            })?;

        let mut ids = Vec::with_capacity(table.len());
        let mut by_id = HashMap::with_capacity(table.len());
        let mut duplicates = Vec::new();
        for (row, cell) in table.column_cells(key_idx).enumerate() {
            let id = cell
                .as_ref()
                .and_then(CellValue::as_i64)
                .ok_or_else(|| MergeError::InvalidJoinKey {
                    source_id: source_id.to_string(),
                    row,
                    value: cell.as_ref().map(ToString::to_string).unwrap_or_default(),
                })?;
            if by_id.insert(id, row).is_some() {
                duplicates.push(id);
            }
            ids.push(id);
        }
        if !duplicates.is_empty() {
            duplicates.sort_unstable();
            duplicates.dedup();
            return Err(MergeError::DuplicateJoinKey {
                source_id: source_id.to_string(),
                keys: duplicates,
            });
        }
        Ok(Self { ids, by_id })
    }

    fn row_of(&self, id: i64) -> Option<usize> {
        self.by_id.get(&id).copied()
    }
}

/// Where one source's columns landed in the merged table.
struct SourceLayout {
    /// (column in the source table, column in the merged table)
    columns: Vec<(usize, usize)>,
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

fn check_prefixes(request: &MergeRequest) -> Result<(), MergeError> {
    let mut seen = HashSet::new();
    for source in request.sources() {
        if source.prefix.is_empty() || source.prefix.contains("__") {
            return Err(MergeError::InvalidPrefix {
                source_id: source.id.clone(),
                prefix: source.prefix.clone(),
            });
        }
        if !seen.insert(source.prefix.as_str()) {
            return Err(MergeError::DuplicatePrefix {
                prefix: source.prefix.clone(),
            });
        }
    }
    Ok(())
}

/// Check that every row of the prior snapshot belongs to `target`.
fn check_prior_target(prior: &Table, target: &StageTarget) -> Result<(), MergeError> {
    let expected = target.to_string();
    let (Some(season_idx), Some(type_idx)) = (
        prior.column_index(SEASON_COLUMN),
        prior.column_index(SEASON_TYPE_COLUMN),
    ) else {
        return Err(MergeError::PriorMismatch {
            expected,
            found: format!("a table without `{SEASON_COLUMN}`/`{SEASON_TYPE_COLUMN}` columns"),
        });
    };
    for row in prior.rows() {
        let season = row[season_idx].as_ref().map(ToString::to_string).unwrap_or_default();
        let season_type = row[type_idx].as_ref().map(ToString::to_string).unwrap_or_default();
        if season != target.season || season_type != target.season_type.label() {
            return Err(MergeError::PriorMismatch {
                expected,
                found: format!("{season} {season_type}"),
            });
        }
    }
    Ok(())
}

/// Merge the request's sources into one staging table, filling dropped
/// secondary data from `prior` when given.
pub fn merge(request: &MergeRequest, prior: Option<&Table>) -> Result<StagedSeason, MergeError> {
    check_prefixes(request)?;
    let join_key = request.join_key.as_str();

    let keyed: Vec<KeyedRows> = request
        .sources()
        .map(|s| KeyedRows::build(&s.id, &s.table, join_key))
        .collect::<Result<_, _>>()?;

    // Players in order of first appearance, primary first.
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    for rows in &keyed {
        for &id in &rows.ids {
            if seen.insert(id) {
                order.push(id);
            }
        }
    }

    // Column layout: leading columns, then one group per source, then flags.
    let mut columns = vec![
        SEASON_COLUMN.to_string(),
        SEASON_TYPE_COLUMN.to_string(),
        PLAYER_COLUMN.to_string(),
        join_key.to_string(),
    ];
    let mut layouts = Vec::new();
    for source in request.sources() {
        let key_idx = source.table.column_index(join_key).unwrap_or_default();
        let mut mapped = Vec::new();
        for (i, name) in source.table.columns().iter().enumerate() {
            if i == key_idx {
                continue;
            }
            mapped.push((i, columns.len()));
            columns.push(namespaced(&source.prefix, name));
        }
        layouts.push(SourceLayout { columns: mapped });
    }
    let flag_start = columns.len();
    for source in &request.secondaries {
        columns.push(carry_flag_column(&source.prefix));
    }

    let name_idx = request.primary.table.column_index(&request.name_column);
    if name_idx.is_none() {
        warn!(
            "primary source {} has no `{}` column; `{}` will be unset",
            request.primary.id, request.name_column, PLAYER_COLUMN
        );
    }

    let season_cell: Cell = Some(CellValue::Text(request.target.season.clone()));
    let type_cell: Cell = Some(CellValue::Text(request.target.season_type.label().to_string()));
    let mut rows = Vec::with_capacity(order.len());
    for &id in &order {
        let mut row: Vec<Cell> = vec![None; columns.len()];
        row[0] = season_cell.clone();
        row[1] = type_cell.clone();
        row[3] = Some(CellValue::Int(id));
        for ((source, layout), rows_of) in request.sources().zip(&layouts).zip(&keyed) {
            let Some(src_row) = rows_of.row_of(id) else {
                continue;
            };
            let cells = &source.table.rows()[src_row];
            for &(from, to) in &layout.columns {
                row[to] = cells[from].clone();
            }
        }
        if let (Some(idx), Some(src_row)) = (name_idx, keyed[0].row_of(id)) {
            row[2] = request.primary.table.rows()[src_row][idx].clone();
        }
        for cell in &mut row[flag_start..] {
            *cell = Some(CellValue::Bool(false));
        }
        rows.push(row);
    }
    let mut table = Table::from_rows(columns, rows)?;

    let sources = carry_forward(request, &layouts, flag_start, &mut table, prior)?;
    let report = CarryForwardReport {
        generated_at_utc: utc_now_iso(),
        season: request.target.season.clone(),
        season_type: request.target.season_type.label().to_string(),
        prior_snapshot: prior.is_some(),
        sources,
    };
    info!(
        "staged {}: {} rows x {} cols, {} group(s) carried forward, {} gap(s)",
        request.target,
        table.len(),
        table.width(),
        report.total_carried(),
        report.total_not_found()
    );
    Ok(StagedSeason { table, report })
}

// ---------------------------------------------------------------------------
// Carry-forward
// ---------------------------------------------------------------------------

fn carry_forward(
    request: &MergeRequest,
    layouts: &[SourceLayout],
    flag_start: usize,
    table: &mut Table,
    prior: Option<&Table>,
) -> Result<Vec<SourceCarryForward>, MergeError> {
    let prior = match prior {
        Some(p) => {
            check_prior_target(p, &request.target)?;
            Some((p, KeyedRows::build(PRIOR_SOURCE, p, &request.join_key)?))
        }
        None => None,
    };
    // Season, SeasonType, Player, then the key.
    let key_idx = 3;

    let mut outcomes = Vec::with_capacity(request.secondaries.len());
    for (n, source) in request.secondaries.iter().enumerate() {
        let layout = &layouts[n + 1];
        let flag_idx = flag_start + n;
        let group: Vec<usize> = layout.columns.iter().map(|&(_, to)| to).collect();
        let mut outcome = SourceCarryForward {
            source_id: source.id.clone(),
            prefix: source.prefix.clone(),
            ..Default::default()
        };
        if group.is_empty() {
            warn!("source {} has no columns besides the join key", source.id);
            outcomes.push(outcome);
            continue;
        }

        // (merged column, prior column) for columns both snapshots carry.
        let shared: Vec<(usize, usize)> = match &prior {
            Some((p, _)) => group
                .iter()
                .filter_map(|&to| p.column_index(&table.columns()[to]).map(|from| (to, from)))
                .collect(),
            None => Vec::new(),
        };
        let prior_flag = prior
            .as_ref()
            .and_then(|(p, _)| p.column_index(&carry_flag_column(&source.prefix)));

        for row in table.rows_mut() {
            if group.iter().any(|&c| row[c].is_some()) {
                continue;
            }
            let Some(id) = row[key_idx].as_ref().and_then(CellValue::as_i64) else {
                continue;
            };
            outcome.missing.push(id);

            let prior_row = prior
                .as_ref()
                .and_then(|(p, keyed)| keyed.row_of(id).map(|r| &p.rows()[r]));
            let Some(prior_row) = prior_row else {
                outcome.not_found.push(id);
                continue;
            };
            let was_carried = prior_flag
                .and_then(|f| prior_row[f].as_ref())
                .and_then(CellValue::as_bool)
                .unwrap_or(false);
            let has_values = shared.iter().any(|&(_, from)| prior_row[from].is_some());
            if was_carried || !has_values {
                if was_carried {
                    debug!("{}: {} was already carried forward last run", source.id, id);
                }
                outcome.not_found.push(id);
                continue;
            }

            for &(to, from) in &shared {
                if row[to].is_none() {
                    row[to] = prior_row[from].clone();
                }
            }
            row[flag_idx] = Some(CellValue::Bool(true));
            outcome.carried_forward.push(id);
        }

        if !outcome.missing.is_empty() {
            info!(
                "{}: {} missing, {} carried forward, {} not found",
                source.id,
                outcome.missing.len(),
                outcome.carried_forward.len(),
                outcome.not_found.len()
            );
        }
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

impl fmt::Display for SourceCarryForward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {} missing, {} carried, {} not found",
            self.source_id,
            self.prefix,
            self.missing.len(),
            self.carried_forward.len(),
            self.not_found.len()
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
