// Blocking client for the league stats API.
//
// Every endpoint answers with a `resultSets` list of `{name, headers, rowSet}`
// objects (a few answer with a single `resultSet` object instead). The first
// result set is decoded into a `Table` with one typed cell per JSON value.

use std::time::Duration;

use hoopstage_core::table::{Cell, CellValue, Table};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, REFERER, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::fetch::{FetchError, Fetcher, SourceRequest};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://stats.nba.com/stats";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const SITE_REFERER: &str = "https://www.nba.com/";

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ResultSet {
    #[serde(default)]
    name: String,
    headers: Vec<String>,
    #[serde(rename = "rowSet")]
    row_set: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(rename = "resultSets", default)]
    result_sets: Vec<ResultSet>,
    #[serde(rename = "resultSet")]
    result_set: Option<ResultSet>,
}

fn json_to_cell(value: &Value) -> Cell {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(CellValue::Bool(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(CellValue::Int(i)),
            None => n.as_f64().map(CellValue::Float),
        },
        Value::String(s) => Some(CellValue::Text(s.clone())),
        other => Some(CellValue::Text(other.to_string())),
    }
}

/// Decode the first result set of a stats API response body.
pub fn decode_result_set(url: &str, body: &str) -> Result<Table, FetchError> {
    let payload_err = |message: String| FetchError::Payload {
        url: url.to_string(),
        message,
    };
    let payload: Payload = serde_json::from_str(body).map_err(|e| payload_err(e.to_string()))?;
    let set = payload
        .result_sets
        .into_iter()
        .next()
        .or(payload.result_set)
        .ok_or_else(|| payload_err("response has no result sets".to_string()))?;
    debug!(
        "{}: result set `{}` with {} rows",
        url,
        set.name,
        set.row_set.len()
    );

    let rows = set
        .row_set
        .iter()
        .map(|row| row.iter().map(json_to_cell).collect())
        .collect();
    Table::from_rows(set.headers, rows).map_err(|e| payload_err(e.to_string()))
}

// ---------------------------------------------------------------------------
// StatsApiClient
// ---------------------------------------------------------------------------

/// HTTP client for one stats API base URL.
pub struct StatsApiClient {
    http: Client,
    base_url: String,
}

impl StatsApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(REFERER, HeaderValue::from_static(SITE_REFERER));
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        let http = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Client for the public stats API with the default timeout.
    pub fn with_defaults() -> Result<Self, FetchError> {
        Self::new(DEFAULT_BASE_URL, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

/// Query parameters for `request`: season and season type first, then the
/// source's own parameters.
pub fn query_params(request: &SourceRequest) -> Vec<(String, String)> {
    let mut params = vec![
        ("Season".to_string(), request.target.season.clone()),
        (
            "SeasonType".to_string(),
            request.target.season_type.label().to_string(),
        ),
    ];
    params.extend(
        request
            .params
            .iter()
            .filter(|(k, _)| k.as_str() != "Season" && k.as_str() != "SeasonType")
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    params
}

impl Fetcher for StatsApiClient {
    fn fetch(&self, request: &SourceRequest) -> Result<Table, FetchError> {
        let url = self.endpoint_url(&request.endpoint);
        let response = self
            .http
            .get(&url)
            .query(&query_params(request))
            .send()
            .map_err(|e| FetchError::Http {
                url: url.clone(),
                source: e,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }
        let body = response.text().map_err(|e| FetchError::Http {
            url: url.clone(),
            source: e,
        })?;
        decode_result_set(&url, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoopstage_core::season::{SeasonType, StageTarget};
    use std::collections::BTreeMap;

    const BODY: &str = r#"{
        "resource": "leaguedashplayerstats",
        "resultSets": [{
            "name": "LeagueDashPlayerStats",
            "headers": ["PLAYER_ID", "PLAYER_NAME", "GP", "PTS", "W_PCT"],
            "rowSet": [
                [2544, "LeBron James", 70, 1708, 0.6],
                [1629029, "Luka Dončić", 50, null, 0.54]
            ]
        }]
    }"#;

    #[test]
    fn decodes_first_result_set() {
        let table = decode_result_set("u", BODY).unwrap();
        assert_eq!(table.columns(), &["PLAYER_ID", "PLAYER_NAME", "GP", "PTS", "W_PCT"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.cell_by_name(0, "PLAYER_ID"), Some(&CellValue::Int(2544)));
        assert_eq!(table.cell_by_name(1, "PTS"), None);
        assert_eq!(table.cell_by_name(0, "W_PCT"), Some(&CellValue::Float(0.6)));
    }

    #[test]
    fn accepts_single_result_set() {
        let body = r#"{"resultSet": {"name": "x", "headers": ["PLAYER_ID"], "rowSet": [[1]]}}"#;
        assert_eq!(decode_result_set("u", body).unwrap().len(), 1);
    }

    #[test]
    fn rejects_missing_or_ragged_sets() {
        assert!(matches!(
            decode_result_set("u", r#"{"resultSets": []}"#),
            Err(FetchError::Payload { .. })
        ));
        let ragged = r#"{"resultSets": [{"headers": ["A", "B"], "rowSet": [[1]]}]}"#;
        assert!(matches!(
            decode_result_set("u", ragged),
            Err(FetchError::Payload { .. })
        ));
        assert!(matches!(
            decode_result_set("u", "<html>blocked</html>"),
            Err(FetchError::Payload { .. })
        ));
    }

    #[test]
    fn season_params_come_first_and_win() {
        let mut params = BTreeMap::new();
        params.insert("PerMode".to_string(), "Totals".to_string());
        params.insert("Season".to_string(), "1999-00".to_string());
        let request = SourceRequest {
            source_id: "nba_traditional_totals".into(),
            endpoint: "leaguedashplayerstats".into(),
            params,
            target: StageTarget::new("2024-25", SeasonType::Playoffs),
        };
        assert_eq!(
            query_params(&request),
            vec![
                ("Season".to_string(), "2024-25".to_string()),
                ("SeasonType".to_string(), "Playoffs".to_string()),
                ("PerMode".to_string(), "Totals".to_string()),
            ]
        );
    }

    #[test]
    fn endpoint_urls_join_cleanly() {
        let client = StatsApiClient::new("https://stats.example/stats/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.endpoint_url("/leaguedashptstats"),
            "https://stats.example/stats/leaguedashptstats"
        );
    }
}
