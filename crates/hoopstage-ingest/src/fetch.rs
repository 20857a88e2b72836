// Provider fetch seam and the retry loop around it.
//
// A `Fetcher` turns one `SourceRequest` into a table. `fetch_with_retry`
// repeats transient failures with exponential backoff; the sleep is injected
// so the schedule can be observed without waiting.

use std::collections::BTreeMap;
use std::time::Duration;

use hoopstage_core::season::StageTarget;
use hoopstage_core::table::Table;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// One provider table to fetch for one season/season-type.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRequest {
    pub source_id: String,
    pub endpoint: String,
    /// Extra query parameters sent with every request for this source.
    pub params: BTreeMap<String, String>,
    pub target: StageTarget,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("unexpected payload from {url}: {message}")]
    Payload { url: String, message: String },

    #[error("{source_id}: giving up after {attempts} attempt(s): {last}")]
    Exhausted {
        source_id: String,
        attempts: u32,
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Whether another attempt could succeed: transport failures, rate
    /// limiting and server errors.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Http { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Something that can fetch a provider table.
pub trait Fetcher {
    fn fetch(&self, request: &SourceRequest) -> Result<Table, FetchError>;
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Pause after failed attempt `attempt` (1-based): base × 2^(attempt-1),
    /// capped at `max_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Fetch `request`, retrying transient failures per `policy`. `sleep` is
/// called between attempts.
pub fn fetch_with_retry<F, S>(
    fetcher: &F,
    request: &SourceRequest,
    policy: &RetryPolicy,
    mut sleep: S,
) -> Result<Table, FetchError>
where
    F: Fetcher + ?Sized,
    S: FnMut(Duration),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match fetcher.fetch(request) {
            Ok(table) => {
                info!(
                    "{}: fetched {} rows x {} cols (attempt {})",
                    request.source_id,
                    table.len(),
                    table.width(),
                    attempt
                );
                return Ok(table);
            }
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "{}: attempt {}/{} failed: {}; retrying in {:?}",
                    request.source_id, attempt, max_attempts, err, delay
                );
                sleep(delay);
                attempt += 1;
            }
            Err(err) if err.is_transient() => {
                return Err(FetchError::Exhausted {
                    source_id: request.source_id.clone(),
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
            Err(err) => return Err(err),
        }
    }
}
