// Provider ingest: fetches raw per-season tables from the stats API, checks
// that they are player-level, and publishes them as raw snapshots.

pub mod fetch;
pub mod policy;
pub mod run;
pub mod stats_api;

pub use fetch::{fetch_with_retry, FetchError, Fetcher, RetryPolicy, SourceRequest};
pub use policy::{PlayerPolicy, PolicyError};
pub use run::{run_ingest, IngestError, IngestManifest, RawFile};
pub use stats_api::StatsApiClient;
