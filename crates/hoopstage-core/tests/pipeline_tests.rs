// Integration tests for the consolidation core.
//
// These drive the public API through temp directories: name-fixer sheets to a
// published registry, season exports to a master CSV, and provider tables to
// a staged snapshot that the next run carries forward from.

use std::fs;
use std::path::Path;

use hoopstage_core::identity::{load_name_fixer_dir, ALIASES_FILE, PLAYERS_FILE};
use hoopstage_core::master::load_season_dir;
use hoopstage_core::report::{write_json_report, CARRY_FORWARD_REPORT};
use hoopstage_core::text::DEFAULT_ENCODINGS;
use hoopstage_core::*;

// ===========================================================================
// Helpers
// ===========================================================================

fn write(dir: &Path, name: &str, bytes: &[u8]) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(name), bytes).unwrap();
}

fn table(columns: &[&str], rows: Vec<Vec<Cell>>) -> Table {
    Table::from_rows(columns.iter().map(|c| c.to_string()).collect(), rows).unwrap()
}

fn int(v: i64) -> Cell {
    Some(CellValue::Int(v))
}

fn text(v: &str) -> Cell {
    Some(CellValue::Text(v.to_string()))
}

fn target() -> StageTarget {
    StageTarget::new("2024-25", SeasonType::Regular)
}

/// Primary table with `n` players, ids starting at 1000.
fn traditional(n: i64) -> SourceTable {
    let rows = (0..n)
        .map(|i| vec![int(1000 + i), text(&format!("Player {i}")), int(i * 3)])
        .collect();
    SourceTable::new(
        "nba_traditional_totals",
        "trad",
        table(&["PLAYER_ID", "PLAYER_NAME", "PTS"], rows),
    )
}

/// Passing table covering players whose index satisfies `keep`.
fn passing(n: i64, keep: impl Fn(i64) -> bool) -> SourceTable {
    let rows = (0..n)
        .filter(|i| keep(*i))
        .map(|i| vec![int(1000 + i), int(i % 11)])
        .collect();
    SourceTable::new("nba_passing", "nba_pass", table(&["PLAYER_ID", "AST"], rows))
}

// ===========================================================================
// Identity
// ===========================================================================

#[test]
fn registry_build_from_mixed_encodings() {
    let tmp = tempfile::tempdir().unwrap();
    let fixers = tmp.path().join("name_fixer");
    write(
        &fixers,
        "2023-24.csv",
        "NBA Names,BBI Names\nNikola Jokić,Nikola Jokic\n".as_bytes(),
    );
    // cp1252 export from a spreadsheet: "José Alvarado"
    write(&fixers, "2024-25.csv", b"NBA Names,Synergy names\nJos\xE9 Alvarado,J. Alvarado\n");

    let sheets = load_name_fixer_dir(&fixers, DEFAULT_ENCODINGS).unwrap();
    let index = AliasIndex::build(&sheets, &NameFixerLayout::default()).unwrap();

    let names: Vec<&str> = index.players().iter().map(|p| p.display_name.as_str()).collect();
    assert_eq!(names, vec!["Jose Alvarado", "Nikola Jokic"]);
    assert_eq!(
        index.resolve("syn", "jalvarado").unwrap().player_key,
        "josealvarado"
    );

    let out = tmp.path().join("mappings");
    index.write(&out).unwrap();
    assert!(out.join(PLAYERS_FILE).exists());
    assert!(out.join(ALIASES_FILE).exists());
}

#[test]
fn collision_on_shared_secondary_key_names_both_players() {
    let tmp = tempfile::tempdir().unwrap();
    let fixers = tmp.path().join("name_fixer");
    write(
        &fixers,
        "2024-25.csv",
        b"NBA Names,PBP stats names\nLeBron James,LeBron James\nBronny James,Lebron James\n",
    );
    let sheets = load_name_fixer_dir(&fixers, DEFAULT_ENCODINGS).unwrap();

    match AliasIndex::build(&sheets, &NameFixerLayout::default()) {
        Err(IdentityError::AliasCollision { collisions }) => {
            assert_eq!(collisions.len(), 1);
            let c = &collisions[0];
            assert_eq!((c.source.as_str(), c.source_key.as_str()), ("pbp", "lebronjames"));
            assert!(c.player_keys.contains(&"lebronjames".to_string()));
            assert!(c.player_keys.contains(&"bronnyjames".to_string()));
        }
        Err(other) => panic!("expected AliasCollision, got: {other}"),
        Ok(_) => panic!("expected AliasCollision, got a registry"),
    }
}

#[test]
fn empty_name_fixer_dir_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    assert!(matches!(
        load_name_fixer_dir(tmp.path(), DEFAULT_ENCODINGS),
        Err(IdentityError::NoSheets { .. })
    ));
}

// ===========================================================================
// Master
// ===========================================================================

const SEASON_HEADER: &str = "Player,Year,Season type,Tm,PTS\n";

fn season_dir(root: &Path) -> std::path::PathBuf {
    let dir = root.join("season");
    write(
        &dir,
        "2023-24.csv",
        format!("{SEASON_HEADER}Luka Dončić,2023-24,Regular Season,DAL,2370\n").as_bytes(),
    );
    // "Dončić" read back through cp1252 at some point, then saved as UTF-8
    let garbled = "Luka Don\u{C4}\u{8D}i\u{C4}\u{2021}";
    write(
        &dir,
        "2024-25.csv",
        format!(
            "\u{FEFF}{SEASON_HEADER}{garbled},2024-25,Regular Season,LAL,1300\nR.J. Barrett,2024-25,Regular Season,TOR,1500\n,,,,\n"
        )
        .as_bytes(),
    );
    dir
}

#[test]
fn master_from_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = season_dir(tmp.path());
    let frames = load_season_dir(&dir, DEFAULT_ENCODINGS).unwrap();
    let build = consolidate(frames, None, None, &MasterOptions::default()).unwrap();

    assert_eq!(build.headers, vec!["Player", "Year", "Season type", "Tm", "PTS"]);
    let players: Vec<&str> = build.rows.iter().map(|r| r[0].as_str()).collect();
    assert_eq!(players, vec!["Luka Doncic", "Luka Doncic", "RJ Barrett"]);

    let out = tmp.path().join("master.csv");
    build.write(&out).unwrap();
    let written = fs::read_to_string(&out).unwrap();
    assert!(written.starts_with("Player,Year,Season type,Tm,PTS\n"));
    assert_eq!(written.lines().count(), 4);
}

#[test]
fn master_is_independent_of_input_order() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = season_dir(tmp.path());
    let frames = load_season_dir(&dir, DEFAULT_ENCODINGS).unwrap();
    let mut reversed = frames.clone();
    reversed.reverse();

    let a = consolidate(frames, None, None, &MasterOptions::default()).unwrap();
    let b = consolidate(reversed, None, None, &MasterOptions::default()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn contract_missing_column_aborts_without_output() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("season");
    write(&dir, "2024-25.csv", b"Player,Year\nA,2024-25\n");
    let contract_path = tmp.path().join("contract.json");
    fs::write(&contract_path, r#"{"columns": ["Player", "Year", "Tm"]}"#).unwrap();

    let contract = ColumnContract::load(&contract_path).unwrap();
    let frames = load_season_dir(&dir, DEFAULT_ENCODINGS).unwrap();
    match consolidate(frames, Some(&contract), None, &MasterOptions::default()) {
        Err(MasterError::ColumnMismatch { missing, extra, .. }) => {
            assert_eq!(missing, vec!["Tm"]);
            assert!(extra.is_empty());
        }
        Err(other) => panic!("expected ColumnMismatch, got: {other}"),
        Ok(_) => panic!("expected ColumnMismatch, got a master"),
    }
    assert!(!tmp.path().join("master.csv").exists());
}

// ===========================================================================
// Staging
// ===========================================================================

#[test]
fn carry_forward_scenario() {
    let primary = SourceTable::new(
        "nba_traditional_totals",
        "trad",
        table(&["PLAYER_ID", "PLAYER_NAME"], vec![vec![int(101), text("A")]]),
    );
    let empty_secondary = SourceTable::new(
        "nba_passing",
        "nba_pass",
        table(&["PLAYER_ID", "metric"], vec![]),
    );
    let prior = table(
        &["Season", "SeasonType", "Player", "PLAYER_ID", "nba_pass__metric"],
        vec![vec![text("2024-25"), text("Regular Season"), text("A"), int(101), int(5)]],
    );

    let request = MergeRequest::new(target(), primary, vec![empty_secondary]);
    let staged = merge(&request, Some(&prior)).unwrap();
    assert_eq!(staged.table.cell_by_name(0, "nba_pass__metric"), Some(&CellValue::Int(5)));
    assert_eq!(
        staged.table.cell_by_name(0, "carried_forward__nba_pass"),
        Some(&CellValue::Bool(true))
    );
}

#[test]
fn staged_snapshot_feeds_next_run() {
    let tmp = tempfile::tempdir().unwrap();
    let staging_root = tmp.path().join("staging");
    let path = target().staging_path(&staging_root);

    // First run: everyone has passing data.
    let first = MergeRequest::new(target(), traditional(300), vec![passing(300, |_| true)]);
    let prior = read_snapshot_if_exists(&path).unwrap();
    assert!(prior.is_none());
    let staged = merge(&first, prior.as_ref()).unwrap();
    assert!(validate_stage(&staged.table, &ValidationConfig::default()).is_empty());
    write_snapshot(&path, &staged.table).unwrap();

    // Second run: passing dropped the odd players.
    let second = MergeRequest::new(target(), traditional(300), vec![passing(300, |i| i % 2 == 0)]);
    let prior = read_snapshot_if_exists(&path).unwrap();
    let staged = merge(&second, prior.as_ref()).unwrap();
    let outcome = &staged.report.sources[0];
    assert_eq!(outcome.missing.len(), 150);
    assert_eq!(outcome.carried_forward.len(), 150);
    assert!(outcome.not_found.is_empty());
    assert_eq!(staged.table.cell_by_name(1, "nba_pass__AST"), Some(&CellValue::Int(1)));
    write_snapshot(&path, &staged.table).unwrap();

    // Third run: still missing, but last values were imputed, so no chaining.
    let third = MergeRequest::new(target(), traditional(300), vec![passing(300, |i| i % 2 == 0)]);
    let prior = read_snapshot_if_exists(&path).unwrap();
    let staged = merge(&third, prior.as_ref()).unwrap();
    let outcome = &staged.report.sources[0];
    assert!(outcome.carried_forward.is_empty());
    assert_eq!(outcome.not_found.len(), 150);

    let report_path = tmp.path().join("reports").join(CARRY_FORWARD_REPORT);
    write_json_report(&report_path, &staged.report).unwrap();
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(json["sources"][0]["not_found"].as_array().unwrap().len(), 150);
}

#[test]
fn prior_from_playoffs_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let playoffs = StageTarget::new("2024-25", SeasonType::Playoffs);
    let path = tmp.path().join("prior.parquet");
    let staged = merge(
        &MergeRequest::new(playoffs, traditional(3), vec![passing(3, |_| true)]),
        None,
    )
    .unwrap();
    write_snapshot(&path, &staged.table).unwrap();

    let prior = read_snapshot(&path).unwrap();
    let request = MergeRequest::new(target(), traditional(3), vec![passing(3, |_| true)]);
    assert!(matches!(
        merge(&request, Some(&prior)),
        Err(MergeError::PriorMismatch { .. })
    ));
}

// ===========================================================================
// Validation
// ===========================================================================

#[test]
fn fifty_rows_fail_the_row_band() {
    let staged = merge(
        &MergeRequest::new(target(), traditional(50), vec![passing(50, |_| true)]),
        None,
    )
    .unwrap();
    let findings = validate_stage(&staged.table, &ValidationConfig::default());
    assert_eq!(
        findings,
        vec![Finding::RowCount {
            rows: 50,
            min: 200,
            max: 900
        }]
    );

    let report = ValidationReport::new(&target(), Path::new("staging.parquet"), &staged.table, findings);
    let err = report.ensure_ok().unwrap_err();
    assert!(err.to_string().contains("row count 50"));
}
