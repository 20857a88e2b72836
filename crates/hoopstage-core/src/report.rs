// Diagnostic report output. Reports are pretty JSON documents written once per
// run for operators and CI; nothing in the pipeline reads them back.

use std::path::Path;

use serde::Serialize;

use crate::persist::{write_atomic, PersistError};

pub const ALIAS_COLLISIONS_REPORT: &str = "alias_collisions.json";
pub const UNMAPPED_PLAYERS_REPORT: &str = "unmapped_players.json";
pub const CARRY_FORWARD_REPORT: &str = "carry_forward.json";
pub const STAGE_VALIDATION_REPORT: &str = "stage_validation.json";
pub const INGEST_MANIFEST: &str = "ingest_manifest.json";
pub const REFRESH_STATUS_REPORT: &str = "refresh_status.json";

/// Current UTC time as an RFC 3339 string, used to stamp reports.
pub fn utc_now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Serialize `report` as pretty JSON and write it atomically to `path`.
pub fn write_json_report<T: Serialize>(path: &Path, report: &T) -> Result<(), PersistError> {
    write_atomic(path, |out| serde_json::to_writer_pretty(out, report))
}
