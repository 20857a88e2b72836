// One ingest run: fetch every configured source for a season/season-type,
// check the player-level policy, then publish raw snapshots and a manifest.
//
// Nothing is written until every source has been fetched and accepted, so a
// failed run leaves the previous raw snapshots as they were.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hoopstage_core::report::utc_now_iso;
use hoopstage_core::season::StageTarget;
use hoopstage_core::snapshot::{write_snapshot, SnapshotError};
use hoopstage_core::table::Table;
use serde::Serialize;
use tracing::info;

use crate::fetch::{fetch_with_retry, FetchError, Fetcher, RetryPolicy, SourceRequest};
use crate::policy::{PlayerPolicy, PolicyError};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("no sources to ingest")]
    NoSources,

    #[error("{source_id} targets {found}, but this run ingests {expected}")]
    MixedTargets {
        source_id: String,
        expected: String,
        found: String,
    },

    #[error("fetching {source_id} failed: {source}")]
    Fetch {
        source_id: String,
        source: FetchError,
    },

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// One published raw snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawFile {
    pub id: String,
    pub path: String,
    pub rows: usize,
    pub cols: usize,
}

/// Body of `ingest_manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestManifest {
    pub generated_at_utc: String,
    pub season: String,
    pub season_type: String,
    pub raw_files: Vec<RawFile>,
}

/// Fetch, check and publish every request. All requests must share one
/// target.
pub fn run_ingest<F, S>(
    fetcher: &F,
    requests: &[SourceRequest],
    policy: &PlayerPolicy,
    retry: &RetryPolicy,
    raw_root: &Path,
    mut sleep: S,
) -> Result<IngestManifest, IngestError>
where
    F: Fetcher + ?Sized,
    S: FnMut(Duration),
{
    let Some(first) = requests.first() else {
        return Err(IngestError::NoSources);
    };
    let target: &StageTarget = &first.target;
    if let Some(other) = requests.iter().find(|r| r.target != *target) {
        return Err(IngestError::MixedTargets {
            source_id: other.source_id.clone(),
            expected: target.to_string(),
            found: other.target.to_string(),
        });
    }

    let mut fetched: Vec<(&SourceRequest, Table)> = Vec::with_capacity(requests.len());
    for request in requests {
        let table = fetch_with_retry(fetcher, request, retry, &mut sleep).map_err(|e| IngestError::Fetch {
            source_id: request.source_id.clone(),
            source: e,
        })?;
        policy.check(&request.source_id, &table)?;
        fetched.push((request, table));
    }

    let mut raw_files = Vec::with_capacity(fetched.len());
    for (request, table) in &fetched {
        let path: PathBuf = request.target.raw_snapshot_path(raw_root, &request.source_id);
        write_snapshot(&path, table)?;
        info!(
            "wrote raw {}: {} ({} rows, {} cols)",
            request.source_id,
            path.display(),
            table.len(),
            table.width()
        );
        raw_files.push(RawFile {
            id: request.source_id.clone(),
            path: path.to_string_lossy().replace('\\', "/"),
            rows: table.len(),
            cols: table.width(),
        });
    }

    Ok(IngestManifest {
        generated_at_utc: utc_now_iso(),
        season: target.season.clone(),
        season_type: target.season_type.label().to_string(),
        raw_files,
    })
}
