// Stage validator: a read-only gate over a merged staging table. Every check
// runs; findings are collected and reported together.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::report::utc_now_iso;
use crate::season::StageTarget;
use crate::staging::{DEFAULT_JOIN_KEY, PLAYER_COLUMN, SEASON_COLUMN, SEASON_TYPE_COLUMN};
use crate::table::{cell_is_blank, Table};

/// Most duplicate keys listed in one finding.
const MAX_LISTED_KEYS: usize = 20;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationConfig {
    pub join_key: String,
    pub min_rows: usize,
    pub max_rows: usize,
    /// Prefixes of secondary sources whose columns must be present.
    pub secondary_prefixes: Vec<String>,
    /// Largest tolerated fraction of rows missing a whole secondary group.
    pub max_missing_secondary: f64,
    /// Largest tolerated fraction of rows with a blank `Player`.
    pub max_blank_players: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            join_key: DEFAULT_JOIN_KEY.to_string(),
            min_rows: 200,
            max_rows: 900,
            secondary_prefixes: vec!["nba_pass".to_string()],
            max_missing_secondary: 0.9,
            max_blank_players: 0.05,
        }
    }
}

impl ValidationConfig {
    fn required_columns(&self) -> [&str; 4] {
        [
            SEASON_COLUMN,
            SEASON_TYPE_COLUMN,
            PLAYER_COLUMN,
            self.join_key.as_str(),
        ]
    }
}

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

/// One failed check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    MissingColumn {
        column: String,
    },
    BlankValues {
        column: String,
        rows: usize,
    },
    NullKeys {
        column: String,
        rows: usize,
    },
    DuplicateKeys {
        column: String,
        keys: Vec<String>,
    },
    RowCount {
        rows: usize,
        min: usize,
        max: usize,
    },
    MissingSecondary {
        prefix: String,
    },
    SecondaryMostlyMissing {
        prefix: String,
        missing: usize,
        rows: usize,
        tolerance: f64,
    },
    BlankPlayers {
        blank: usize,
        rows: usize,
        tolerance: f64,
    },
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::MissingColumn { column } => write!(f, "missing required column `{column}`"),
            Finding::BlankValues { column, rows } => {
                write!(f, "{rows} row(s) have a blank `{column}`")
            }
            Finding::NullKeys { column, rows } => {
                write!(f, "{rows} row(s) have no `{column}`")
            }
            Finding::DuplicateKeys { column, keys } => {
                write!(f, "duplicate `{column}` values: {}", keys.join(", "))
            }
            Finding::RowCount { rows, min, max } => {
                write!(f, "row count {rows} outside expected range {min}-{max}")
            }
            Finding::MissingSecondary { prefix } => {
                write!(f, "no `{prefix}__*` columns; that source did not merge")
            }
            Finding::SecondaryMostlyMissing {
                prefix,
                missing,
                rows,
                tolerance,
            } => write!(
                f,
                "`{prefix}__*` missing for {missing}/{rows} rows (tolerance {:.0}%)",
                tolerance * 100.0
            ),
            Finding::BlankPlayers {
                blank,
                rows,
                tolerance,
            } => write!(
                f,
                "{blank}/{rows} blank `{PLAYER_COLUMN}` values (tolerance {:.0}%)",
                tolerance * 100.0
            ),
        }
    }
}

/// Returned when a staging table has at least one finding.
#[derive(Debug, thiserror::Error)]
#[error("stage {target} rejected:\n- {}", list_findings(.findings))]
pub struct StageRejected {
    pub target: String,
    pub findings: Vec<Finding>,
}

fn list_findings(findings: &[Finding]) -> String {
    findings
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n- ")
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// Run every check against `table`.
pub fn validate_stage(table: &Table, config: &ValidationConfig) -> Vec<Finding> {
    let mut findings = Vec::new();
    let rows = table.len();

    for column in config.required_columns() {
        if !table.has_column(column) {
            findings.push(Finding::MissingColumn {
                column: column.to_string(),
            });
        }
    }

    for column in [SEASON_COLUMN, SEASON_TYPE_COLUMN] {
        if let Some(idx) = table.column_index(column) {
            let blank = table.column_cells(idx).filter(|c| cell_is_blank(c)).count();
            if blank > 0 {
                findings.push(Finding::BlankValues {
                    column: column.to_string(),
                    rows: blank,
                });
            }
        }
    }

    if let Some(idx) = table.column_index(&config.join_key) {
        findings.extend(check_keys(table, idx, &config.join_key));
    }

    if rows < config.min_rows || rows > config.max_rows {
        findings.push(Finding::RowCount {
            rows,
            min: config.min_rows,
            max: config.max_rows,
        });
    }

    for prefix in &config.secondary_prefixes {
        let marker = format!("{prefix}__");
        let group: Vec<usize> = table
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, name)| name.starts_with(&marker))
            .map(|(i, _)| i)
            .collect();
        if group.is_empty() {
            findings.push(Finding::MissingSecondary {
                prefix: prefix.clone(),
            });
            continue;
        }
        let missing = table
            .rows()
            .iter()
            .filter(|row| group.iter().all(|&c| row[c].is_none()))
            .count();
        if missing as f64 > config.max_missing_secondary * rows as f64 {
            findings.push(Finding::SecondaryMostlyMissing {
                prefix: prefix.clone(),
                missing,
                rows,
                tolerance: config.max_missing_secondary,
            });
        }
    }

    if let Some(idx) = table.column_index(PLAYER_COLUMN) {
        let blank = table.column_cells(idx).filter(|c| cell_is_blank(c)).count();
        if blank as f64 > config.max_blank_players * rows as f64 {
            findings.push(Finding::BlankPlayers {
                blank,
                rows,
                tolerance: config.max_blank_players,
            });
        }
    }

    findings
}

fn check_keys(table: &Table, idx: usize, column: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    let nulls = table.column_cells(idx).filter(|c| cell_is_blank(c)).count();
    if nulls > 0 {
        findings.push(Finding::NullKeys {
            column: column.to_string(),
            rows: nulls,
        });
    }

    let mut seen = HashSet::new();
    let mut dupes = BTreeSet::new();
    for value in table.column_cells(idx).flatten() {
        let key = value.to_string();
        if !seen.insert(key.clone()) {
            dupes.insert(key);
        }
    }
    if !dupes.is_empty() {
        findings.push(Finding::DuplicateKeys {
            column: column.to_string(),
            keys: dupes.into_iter().take(MAX_LISTED_KEYS).collect(),
        });
    }
    findings
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Body of `stage_validation.json`, written whether or not the stage passes.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub checked_at_utc: String,
    pub season: String,
    pub season_type: String,
    pub staging_path: String,
    pub rows: usize,
    pub cols: usize,
    pub ok: bool,
    pub problems: Vec<String>,
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    pub fn new(target: &StageTarget, staging_path: &Path, table: &Table, findings: Vec<Finding>) -> Self {
        Self {
            checked_at_utc: utc_now_iso(),
            season: target.season.clone(),
            season_type: target.season_type.label().to_string(),
            staging_path: staging_path.to_string_lossy().replace('\\', "/"),
            rows: table.len(),
            cols: table.width(),
            ok: findings.is_empty(),
            problems: findings.iter().map(ToString::to_string).collect(),
            findings,
        }
    }

    /// `Err` carrying every finding unless the stage passed.
    pub fn ensure_ok(&self) -> Result<(), StageRejected> {
        if self.ok {
            Ok(())
        } else {
            Err(StageRejected {
                target: format!("{} {}", self.season, self.season_type),
                findings: self.findings.clone(),
            })
        }
    }
}
