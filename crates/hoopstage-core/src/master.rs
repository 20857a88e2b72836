// Master consolidation: appends per-season export tables into one cumulative
// master table under a fixed column contract.
//
// Every value stays text. Player names are normalized and, when an alias
// index is supplied, replaced with the canonical display name.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::identity::AliasIndex;
use crate::normalize::{make_key, normalize_display};
use crate::persist::PersistError;
use crate::report::utc_now_iso;
use crate::table::TextTable;
use crate::text::{list_csv_files, read_text_table, write_csv, TextEncoding, TextReadError, DEFAULT_ENCODINGS};

/// Most column names listed on each side of a contract mismatch.
const MAX_LISTED_COLUMNS: usize = 20;
/// Most example rows carried by a blank-value or duplicate-key error.
const MAX_EXAMPLE_ROWS: usize = 10;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct MasterOptions {
    pub player_column: String,
    pub season_column: String,
    pub season_type_column: String,
    pub team_column: String,
    /// Composite key checked for uniqueness per file and used to de-duplicate.
    pub keys: Vec<String>,
    pub encodings: Vec<TextEncoding>,
    /// Alias sources tried in order when canonicalizing player names.
    pub alias_sources: Vec<String>,
}

impl Default for MasterOptions {
    fn default() -> Self {
        Self {
            player_column: "Player".to_string(),
            season_column: "Year".to_string(),
            season_type_column: "Season type".to_string(),
            team_column: "Tm".to_string(),
            keys: ["Player", "Year", "Season type", "Tm"]
                .iter()
                .map(|k| k.to_string())
                .collect(),
            encodings: DEFAULT_ENCODINGS.to_vec(),
            alias_sources: ["nba", "bbi", "pbp", "syn"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl MasterOptions {
    /// Columns the master is sorted by, in priority order.
    fn sort_columns(&self) -> [&str; 4] {
        [
            self.season_column.as_str(),
            self.season_type_column.as_str(),
            self.player_column.as_str(),
            self.team_column.as_str(),
        ]
    }

    /// Columns shown in example rows.
    fn example_columns(&self) -> [&str; 4] {
        [
            self.player_column.as_str(),
            self.season_column.as_str(),
            self.season_type_column.as_str(),
            self.team_column.as_str(),
        ]
    }
}

// ---------------------------------------------------------------------------
// Column contract
// ---------------------------------------------------------------------------

/// Expected ordered column list for every season file, plus optional path
/// defaults carried in the same JSON document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnContract {
    pub columns: Vec<String>,
    pub season_folder: Option<PathBuf>,
    pub master_path: Option<PathBuf>,
}

impl ColumnContract {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            ..Default::default()
        }
    }

    /// Read the column list from a contract document. Accepted shapes, tried
    /// in this order:
    ///
    /// - `{"columns": [...]}`
    /// - `{"column_names": [...]}`
    /// - `{"base_columns": [...], "metric_columns": [...], "availability_columns": [...]}`
    ///   where availability entries are strings or `{"name": ...}` objects
    /// - `{"column_details": [{"index": 1, "name": "..."}, ...]}`
    ///
    /// Returns `None` when no shape yields a column.
    pub fn from_json(value: &Value) -> Option<Self> {
        let columns = contract_columns(value)?;
        let path_of = |field: &str| value.get(field).and_then(Value::as_str).map(PathBuf::from);
        Some(Self {
            columns,
            season_folder: path_of("season_folder"),
            master_path: path_of("master_path"),
        })
    }

    /// Load a contract JSON file. A UTF-8 byte-order mark is tolerated.
    pub fn load(path: &Path) -> Result<Self, MasterError> {
        let bytes = std::fs::read(path).map_err(|e| {
            MasterError::Read(TextReadError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        })?;
        let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&bytes);
        let value: Value = serde_json::from_slice(body).map_err(|e| MasterError::ContractParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json(&value).ok_or_else(|| MasterError::ContractShape {
            path: path.to_path_buf(),
        })
    }
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    value?.as_array().map(|items| items.iter().map(value_to_string).collect())
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn contract_columns(value: &Value) -> Option<Vec<String>> {
    if let Some(columns) = string_list(value.get("columns")) {
        return Some(columns);
    }
    if let Some(columns) = string_list(value.get("column_names")) {
        return Some(columns);
    }

    let base = string_list(value.get("base_columns")).unwrap_or_default();
    let metric = string_list(value.get("metric_columns")).unwrap_or_default();
    let availability: Vec<String> = value
        .get("availability_columns")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(map) => map.get("name").map(value_to_string),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    if !(base.is_empty() && metric.is_empty() && availability.is_empty()) {
        return Some(base.into_iter().chain(metric).chain(availability).collect());
    }

    let mut details: Vec<(i64, String)> = value
        .get("column_details")?
        .as_array()?
        .iter()
        .filter_map(|d| {
            let name = d.get("name")?;
            let name = value_to_string(name);
            if name.is_empty() {
                return None;
            }
            let index = d.get("index").and_then(Value::as_i64).unwrap_or(0);
            Some((index, name))
        })
        .collect();
    details.sort_by_key(|(index, _)| *index);
    let names: Vec<String> = details.into_iter().map(|(_, name)| name).collect();
    (!names.is_empty()).then_some(names)
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// What a file's header was compared against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnReference {
    Contract,
    FirstFile(String),
}

impl fmt::Display for ColumnReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnReference::Contract => f.write_str("the column contract"),
            ColumnReference::FirstFile(name) => write!(f, "the first file ({name})"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MasterError {
    #[error("no season CSVs found in {dir}")]
    NoInputs { dir: PathBuf },

    #[error(transparent)]
    Read(#[from] TextReadError),

    #[error("failed to parse contract {path}: {source}")]
    ContractParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("contract {path} lists no columns in any supported shape")]
    ContractShape { path: PathBuf },

    #[error("{file}: {total} row(s) have a blank `{column}`; first examples: {}", format_rows(.examples))]
    BlankRequired {
        file: String,
        column: String,
        total: usize,
        examples: Vec<Vec<String>>,
    },

    #[error(
        "{file}: columns do not match {reference}; missing {missing:?}{}, extra {extra:?}{}, expected {expected_count} column(s), found {actual_count}",
        more(.missing_total, .missing.len()),
        more(.extra_total, .extra.len())
    )]
    ColumnMismatch {
        file: String,
        reference: ColumnReference,
        missing: Vec<String>,
        missing_total: usize,
        extra: Vec<String>,
        extra_total: usize,
        expected_count: usize,
        actual_count: usize,
    },

    #[error("{file}: duplicate rows for key ({}); first duplicates: {}", .keys.join(", "), format_rows(.examples))]
    DuplicateKeys {
        file: String,
        keys: Vec<String>,
        examples: Vec<Vec<String>>,
    },

    #[error(transparent)]
    Persist(#[from] PersistError),
}

fn format_rows(rows: &[Vec<String>]) -> String {
    rows.iter()
        .map(|r| format!("[{}]", r.join(" | ")))
        .collect::<Vec<_>>()
        .join(", ")
}

fn more(total: &usize, shown: usize) -> String {
    if *total > shown {
        format!(" (+{} more)", total - shown)
    } else {
        String::new()
    }
}

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// One per-season export.
#[derive(Debug, Clone)]
pub struct SeasonFrame {
    pub name: String,
    pub table: TextTable,
}

/// Read every `*.csv` in `dir`.
pub fn load_season_dir(dir: &Path, encodings: &[TextEncoding]) -> Result<Vec<SeasonFrame>, MasterError> {
    let files = list_csv_files(dir)?;
    if files.is_empty() {
        return Err(MasterError::NoInputs {
            dir: dir.to_path_buf(),
        });
    }
    files
        .into_iter()
        .map(|path| {
            let table = read_text_table(&path, encodings)?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(SeasonFrame { name, table })
        })
        .collect()
}

/// A player name no alias matched. The normalized name was kept.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UnmappedPlayer {
    pub player: String,
    pub file: String,
    pub key: String,
}

/// Body of `unmapped_players.json`.
#[derive(Debug, Serialize)]
pub struct UnmappedReport<'a> {
    pub generated_at_utc: String,
    pub count: usize,
    pub players: &'a [UnmappedPlayer],
}

impl<'a> UnmappedReport<'a> {
    pub fn new(players: &'a [UnmappedPlayer]) -> Self {
        Self {
            generated_at_utc: utc_now_iso(),
            count: players.len(),
            players,
        }
    }
}

/// The consolidated master, ready to write.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterBuild {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub files: Vec<String>,
    pub unmapped: Vec<UnmappedPlayer>,
}

impl MasterBuild {
    /// Atomically write the master CSV in contract column order.
    pub fn write(&self, path: &Path) -> Result<(), MasterError> {
        write_csv(path, &self.headers, &self.rows)?;
        info!(
            "wrote master {} ({} rows x {} cols)",
            path.display(),
            self.rows.len(),
            self.headers.len()
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Consolidation
// ---------------------------------------------------------------------------

/// Consolidate season frames into one master table.
///
/// Frames are processed in name order whatever order they arrive in, so the
/// same set of files always produces the same master.
pub fn consolidate(
    mut frames: Vec<SeasonFrame>,
    contract: Option<&ColumnContract>,
    aliases: Option<&AliasIndex>,
    options: &MasterOptions,
) -> Result<MasterBuild, MasterError> {
    frames.sort_by(|a, b| a.name.cmp(&b.name));
    let Some(first) = frames.first() else {
        return Err(MasterError::NoInputs { dir: PathBuf::new() });
    };

    let (expected, reference) = match contract {
        Some(c) => (c.columns.clone(), ColumnReference::Contract),
        None => (
            first.table.headers.clone(),
            ColumnReference::FirstFile(first.name.clone()),
        ),
    };

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut unmapped = BTreeSet::new();
    let mut files = Vec::with_capacity(frames.len());
    for frame in frames {
        let prepared = prepare_frame(frame, aliases, options, &mut unmapped)?;
        check_columns(&prepared, &expected, &reference)?;
        check_unique_keys(&prepared, options)?;
        debug!("{}: {} rows", prepared.name, prepared.table.len());
        files.push(prepared.name);
        rows.extend(prepared.table.rows);
    }

    let mut rows = dedup_keep_last(&expected, rows, &options.keys);
    sort_rows(&expected, &mut rows, options);

    let unmapped: Vec<UnmappedPlayer> = unmapped.into_iter().collect();
    if !unmapped.is_empty() {
        warn!("{} player name(s) had no alias match", unmapped.len());
    }
    info!(
        "consolidated {} file(s) into {} rows x {} cols",
        files.len(),
        rows.len(),
        expected.len()
    );
    Ok(MasterBuild {
        headers: expected,
        rows,
        files,
        unmapped,
    })
}

/// Normalize player names, drop blank rows, canonicalize, and reject
/// blank required values.
fn prepare_frame(
    frame: SeasonFrame,
    aliases: Option<&AliasIndex>,
    options: &MasterOptions,
    unmapped: &mut BTreeSet<UnmappedPlayer>,
) -> Result<SeasonFrame, MasterError> {
    let SeasonFrame { name, mut table } = frame;

    // Normalize first so a Player cell holding only punctuation counts as
    // blank when the row is otherwise empty.
    let player_idx = table.column_index(&options.player_column);
    if let Some(idx) = player_idx {
        for row in &mut table.rows {
            row[idx] = normalize_display(&row[idx]);
        }
    }
    table
        .rows
        .retain(|row| row.iter().any(|v| !v.trim().is_empty()));

    for column in [
        &options.season_column,
        &options.season_type_column,
        &options.player_column,
    ] {
        let Some(idx) = table.column_index(column) else {
            continue;
        };
        let blank: Vec<&Vec<String>> = table
            .rows
            .iter()
            .filter(|row| row[idx].trim().is_empty())
            .collect();
        if !blank.is_empty() {
            return Err(MasterError::BlankRequired {
                file: name,
                column: column.clone(),
                total: blank.len(),
                examples: blank
                    .iter()
                    .take(MAX_EXAMPLE_ROWS)
                    .map(|row| example_row(&table, row, options))
                    .collect(),
            });
        }
    }

    if let (Some(idx), Some(index)) = (player_idx, aliases) {
        for row in &mut table.rows {
            let key = make_key(&row[idx]);
            match index.resolve_in_priority(&options.alias_sources, &key) {
                Some(entry) => row[idx] = entry.display_name.clone(),
                None => {
                    unmapped.insert(UnmappedPlayer {
                        player: row[idx].clone(),
                        file: name.clone(),
                        key,
                    });
                }
            }
        }
    }

    Ok(SeasonFrame { name, table })
}

fn example_row(table: &TextTable, row: &[String], options: &MasterOptions) -> Vec<String> {
    options
        .example_columns()
        .iter()
        .filter_map(|c| table.column_index(c))
        .map(|i| row[i].clone())
        .collect()
}

fn check_columns(
    frame: &SeasonFrame,
    expected: &[String],
    reference: &ColumnReference,
) -> Result<(), MasterError> {
    let actual = &frame.table.headers;
    if actual.as_slice() == expected {
        return Ok(());
    }
    let missing: Vec<String> = expected
        .iter()
        .filter(|c| !actual.contains(c))
        .cloned()
        .collect();
    let extra: Vec<String> = actual
        .iter()
        .filter(|c| !expected.contains(c))
        .cloned()
        .collect();
    Err(MasterError::ColumnMismatch {
        file: frame.name.clone(),
        reference: reference.clone(),
        missing_total: missing.len(),
        missing: missing.into_iter().take(MAX_LISTED_COLUMNS).collect(),
        extra_total: extra.len(),
        extra: extra.into_iter().take(MAX_LISTED_COLUMNS).collect(),
        expected_count: expected.len(),
        actual_count: actual.len(),
    })
}

/// Indexes of the key columns, or `None` unless every key column is present.
fn key_indexes(headers: &[String], keys: &[String]) -> Option<Vec<usize>> {
    if keys.is_empty() {
        return None;
    }
    keys.iter()
        .map(|k| headers.iter().position(|h| h == k))
        .collect()
}

fn key_of(row: &[String], idx: &[usize]) -> Vec<String> {
    idx.iter().map(|&i| row[i].clone()).collect()
}

fn check_unique_keys(frame: &SeasonFrame, options: &MasterOptions) -> Result<(), MasterError> {
    let Some(idx) = key_indexes(&frame.table.headers, &options.keys) else {
        return Ok(());
    };
    let mut seen = HashSet::new();
    let mut dupes = BTreeSet::new();
    for row in &frame.table.rows {
        let key = key_of(row, &idx);
        if !seen.insert(key.clone()) {
            dupes.insert(key);
        }
    }
    if dupes.is_empty() {
        return Ok(());
    }
    Err(MasterError::DuplicateKeys {
        file: frame.name.clone(),
        keys: options.keys.clone(),
        examples: dupes.into_iter().take(MAX_EXAMPLE_ROWS).collect(),
    })
}

/// Keep the last row seen for each key, in its original position.
fn dedup_keep_last(headers: &[String], rows: Vec<Vec<String>>, keys: &[String]) -> Vec<Vec<String>> {
    let Some(idx) = key_indexes(headers, keys) else {
        return rows;
    };
    let mut last: HashMap<Vec<String>, usize> = HashMap::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        last.insert(key_of(row, &idx), i);
    }
    let before = rows.len();
    let kept: Vec<Vec<String>> = rows
        .into_iter()
        .enumerate()
        .filter(|(i, row)| last.get(&key_of(row, &idx)) == Some(i))
        .map(|(_, row)| row)
        .collect();
    if kept.len() < before {
        info!("dropped {} row(s) repeated across files", before - kept.len());
    }
    kept
}

fn sort_rows(headers: &[String], rows: &mut [Vec<String>], options: &MasterOptions) {
    let idx: Vec<usize> = options
        .sort_columns()
        .iter()
        .filter_map(|c| headers.iter().position(|h| h == c))
        .collect();
    if idx.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        idx.iter()
            .map(|&i| a[i].cmp(&b[i]))
            .find(|o| o.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
