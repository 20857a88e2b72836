// Integration tests for the pipeline commands.
//
// Each test lays out a project directory in a temp dir (defaults/, name-fixer
// sheets, season exports) and drives the same command functions the binary
// dispatches to, with an in-memory provider in place of the stats API.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use hoopstage_cli::commands::{self, MasterArgs};
use hoopstage_cli::config::{self, Config};
use hoopstage_core::identity::{ALIASES_FILE, PLAYERS_FILE};
use hoopstage_core::report::{
    ALIAS_COLLISIONS_REPORT, CARRY_FORWARD_REPORT, INGEST_MANIFEST, REFRESH_STATUS_REPORT,
    STAGE_VALIDATION_REPORT, UNMAPPED_PLAYERS_REPORT,
};
use hoopstage_core::staging::carry_flag_column;
use hoopstage_core::{read_snapshot, CellValue, SeasonType, StageTarget, Table};
use hoopstage_ingest::{FetchError, Fetcher, SourceRequest};
use serde_json::Value;

const DEFAULT_CONFIG: &str = include_str!("../../../defaults/pipeline.toml");

// ===========================================================================
// Helpers
// ===========================================================================

/// A project dir with defaults/ in place; config is copied on load.
fn project() -> (tempfile::TempDir, Config) {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir_all(tmp.path().join("defaults")).unwrap();
    fs::write(tmp.path().join("defaults/pipeline.toml"), DEFAULT_CONFIG).unwrap();
    let config = config::load_config(tmp.path()).unwrap();
    (tmp, config)
}

fn write_file(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn report(config: &Config, name: &str) -> Value {
    let text = fs::read_to_string(config.reports_dir().join(name)).unwrap();
    serde_json::from_str(&text).unwrap()
}

/// Serves `primary_rows` players for the primary source and the first
/// `passing_rows` of them for the passing source.
struct Provider {
    primary_rows: i64,
    passing_rows: i64,
}

impl Fetcher for Provider {
    fn fetch(&self, request: &SourceRequest) -> Result<Table, FetchError> {
        let (columns, rows): (Vec<String>, Vec<_>) = if request.source_id == "nba_passing" {
            (
                vec!["PLAYER_ID".into(), "PLAYER_NAME".into(), "AST".into()],
                (1..=self.passing_rows)
                    .map(|id| {
                        vec![
                            Some(CellValue::Int(id)),
                            Some(CellValue::Text(format!("Player {id}"))),
                            Some(CellValue::Int(id % 9)),
                        ]
                    })
                    .collect(),
            )
        } else {
            (
                vec!["PLAYER_ID".into(), "PLAYER_NAME".into(), "PTS".into()],
                (1..=self.primary_rows)
                    .map(|id| {
                        vec![
                            Some(CellValue::Int(id)),
                            Some(CellValue::Text(format!("Player {id}"))),
                            Some(CellValue::Float(id as f64 * 1.5)),
                        ]
                    })
                    .collect(),
            )
        };
        Table::from_rows(columns, rows).map_err(|e| FetchError::Payload {
            url: request.endpoint.clone(),
            message: e.to_string(),
        })
    }
}

fn flagged_ids(table: &Table, prefix: &str) -> HashSet<i64> {
    let flag = carry_flag_column(prefix);
    (0..table.len())
        .filter(|&r| table.cell_by_name(r, &flag) == Some(&CellValue::Bool(true)))
        .filter_map(|r| table.cell_by_name(r, "PLAYER_ID").and_then(CellValue::as_i64))
        .collect()
}

// ===========================================================================
// Identity and master
// ===========================================================================

#[test]
fn aliases_then_master_canonicalizes_names() {
    let (tmp, config) = project();
    write_file(
        tmp.path(),
        "assets/data/mappings/name_fixer_inputs/2023-24.csv",
        "NBA Names,BBI Names,PBP stats names,Synergy names\n\
         LeBron James,Lebron James,LEBRON JAMES,L. James\n\
         Nikola Jokić,Nikola Jokic,NIKOLA JOKIC,N. Jokic\n",
    );

    let index = commands::build_aliases(&config).unwrap();
    assert_eq!(index.players().len(), 2);
    let mappings = config.mappings_dir();
    assert!(mappings.join(PLAYERS_FILE).exists());
    assert!(mappings.join(ALIASES_FILE).exists());

    write_file(
        tmp.path(),
        "assets/data/season/2023-24.csv",
        "Player,Year,Season type,Tm,PTS\n\
         L. James,2024,Regular,LAL,1822\n\
         N. Jokic,2024,Regular,DEN,2085\n\
         Walk On,2024,Regular,DEN,3\n",
    );
    let build = commands::build_master(&config, &MasterArgs::default()).unwrap();
    assert_eq!(build.rows.len(), 3);

    let master = fs::read_to_string(tmp.path().join("assets/data/league-table-combined.csv")).unwrap();
    assert!(master.starts_with("Player,Year,Season type,Tm,PTS"));
    assert!(master.contains("LeBron James,2024,Regular,LAL,1822"));
    assert!(master.contains("Nikola Jokic,2024,Regular,DEN,2085"));

    let unmapped = report(&config, UNMAPPED_PLAYERS_REPORT);
    assert_eq!(unmapped["count"], 1);
    assert_eq!(unmapped["players"][0]["player"], "Walk On");
}

#[test]
fn alias_collision_writes_report_and_publishes_nothing() {
    let (tmp, config) = project();
    write_file(
        tmp.path(),
        "assets/data/mappings/name_fixer_inputs/2022-23.csv",
        "NBA Names,PBP stats names\n\
         AJ Green,AJ Smith\n\
         Jalen Smith,A.J. Smith\n",
    );

    let err = commands::build_aliases(&config).unwrap_err();
    assert!(format!("{err:#}").contains("ajsmith"));

    let collisions = report(&config, ALIAS_COLLISIONS_REPORT);
    assert_eq!(collisions["collision_count"], 1);
    assert_eq!(collisions["collisions"][0]["source"], "pbp");
    assert!(!config.mappings_dir().join(ALIASES_FILE).exists());
}

#[test]
fn rebuild_may_not_rename_a_published_player() {
    let (tmp, config) = project();
    let sheet = "assets/data/mappings/name_fixer_inputs/2023-24.csv";
    write_file(tmp.path(), sheet, "NBA Names\nRJ Barrett\n");
    commands::build_aliases(&config).unwrap();

    write_file(tmp.path(), sheet, "NBA Names\nRj Barrett\n");
    let err = commands::build_aliases(&config).unwrap_err();
    assert!(format!("{err:#}").contains("renamed"));
}

#[test]
fn master_contract_mismatch_aborts() {
    let (tmp, config) = project();
    write_file(tmp.path(), "assets/data/contract.json", r#"{"columns": ["Player", "Year", "Tm"]}"#);
    write_file(
        tmp.path(),
        "assets/data/season/2023-24.csv",
        "Player,Year\nLeBron James,2024\n",
    );
    let args = MasterArgs {
        contract: Some(tmp.path().join("assets/data/contract.json")),
        ..Default::default()
    };

    let err = commands::build_master(&config, &args).unwrap_err();
    assert!(format!("{err:#}").contains("Tm"));
    assert!(!tmp.path().join("assets/data/league-table-combined.csv").exists());
}

// ===========================================================================
// Refresh
// ===========================================================================

#[test]
fn refresh_publishes_and_carries_forward() {
    let (tmp, config) = project();
    let target = StageTarget::new("2024-25", SeasonType::Regular);

    let status = commands::refresh(
        &config,
        &target,
        &Provider {
            primary_rows: 250,
            passing_rows: 240,
        },
    )
    .unwrap();
    assert_eq!(status.rows, 250);
    assert!(status.ok);

    let path = tmp.path().join("assets/data/staging/2024-25__regular.parquet");
    let first = read_snapshot(&path).unwrap();
    assert_eq!(&first.columns()[..4], &["Season", "SeasonType", "Player", "PLAYER_ID"]);
    assert!(first.has_column("nba_pass__AST"));
    assert!(flagged_ids(&first, "nba_pass").is_empty());

    let manifest = report(&config, INGEST_MANIFEST);
    assert_eq!(manifest["raw_files"].as_array().unwrap().len(), 2);
    assert_eq!(report(&config, STAGE_VALIDATION_REPORT)["ok"], true);
    assert_eq!(report(&config, REFRESH_STATUS_REPORT)["season_type"], "Regular Season");

    // The passing feed drops ten more players; their last values carry over.
    commands::refresh(
        &config,
        &target,
        &Provider {
            primary_rows: 250,
            passing_rows: 230,
        },
    )
    .unwrap();

    let second = read_snapshot(&path).unwrap();
    let expected: HashSet<i64> = (231..=240).collect();
    assert_eq!(flagged_ids(&second, "nba_pass"), expected);
    let row = (0..second.len())
        .find(|&r| second.cell_by_name(r, "PLAYER_ID") == Some(&CellValue::Int(235)))
        .unwrap();
    assert_eq!(second.cell_by_name(row, "nba_pass__AST"), Some(&CellValue::Int(235 % 9)));

    let carry = report(&config, CARRY_FORWARD_REPORT);
    assert_eq!(carry["prior_snapshot"], true);
    assert_eq!(carry["sources"][0]["carried_forward"].as_array().unwrap().len(), 10);
    assert_eq!(carry["sources"][0]["not_found"].as_array().unwrap().len(), 10);
}

#[test]
fn refresh_rejected_by_gate_leaves_staging_untouched() {
    let (tmp, config) = project();
    let target = StageTarget::new("2024-25", SeasonType::Playoffs);

    let err = commands::refresh(
        &config,
        &target,
        &Provider {
            primary_rows: 180,
            passing_rows: 180,
        },
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("rejected"));

    let validation = report(&config, STAGE_VALIDATION_REPORT);
    assert_eq!(validation["ok"], false);
    assert_eq!(validation["rows"], 180);
    assert!(tmp.path().join("assets/data/raw/2024-25/playoffs/nba_passing.parquet").exists());
    assert!(!tmp.path().join("assets/data/staging/2024-25__playoffs.parquet").exists());
    assert!(!config.reports_dir().join(REFRESH_STATUS_REPORT).exists());
}

#[test]
fn stage_without_raw_files_asks_for_ingest() {
    let (_tmp, config) = project();
    let target = StageTarget::new("2024-25", SeasonType::Regular);
    let err = commands::stage_season(&config, &target).unwrap_err();
    assert!(err.to_string().contains("run ingest first"));
}

#[test]
fn validate_checks_the_published_snapshot() {
    let (_tmp, config) = project();
    let target = StageTarget::new("2024-25", SeasonType::Regular);
    commands::ingest(
        &config,
        &target,
        &Provider {
            primary_rows: 300,
            passing_rows: 290,
        },
    )
    .unwrap();
    let staged = commands::stage_season(&config, &target).unwrap();
    commands::publish_stage(&config, &target, &staged.table).unwrap();

    let checked = commands::validate_published(&config, &target).unwrap();
    assert!(checked.ok);
    assert_eq!(checked.rows, 300);
}
