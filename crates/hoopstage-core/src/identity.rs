// Cross-source player identity: builds the canonical player registry and the
// (source, source_key) -> player alias index from curated name-fixer sheets.
//
// The index is built once and then handed by reference to every consumer. It
// is never mutated after construction.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::normalize::{make_key, normalize_display};
use crate::persist::{write_atomic, PersistError};
use crate::report::utc_now_iso;
use crate::table::TextTable;
use crate::text::{list_csv_files, read_text_table, TextEncoding, TextReadError};

pub const PLAYERS_FILE: &str = "players.csv";
pub const ALIASES_FILE: &str = "player_aliases.csv";

const PLAYERS_HEADER: [&str; 2] = ["player_key", "display_name"];
const ALIASES_HEADER: [&str; 5] = ["player_key", "display_name", "source", "source_name", "source_key"];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// One name column of a name-fixer sheet and the source code it stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameSourceColumn {
    pub source: String,
    pub column: String,
}

impl NameSourceColumn {
    pub fn new(source: &str, column: &str) -> Self {
        Self {
            source: source.to_string(),
            column: column.to_string(),
        }
    }
}

/// Which columns of a name-fixer sheet hold which source's spelling. The
/// primary column is required in every sheet; secondary columns are used
/// only by sheets that have them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameFixerLayout {
    pub primary: NameSourceColumn,
    #[serde(default)]
    pub secondaries: Vec<NameSourceColumn>,
}

impl Default for NameFixerLayout {
    fn default() -> Self {
        Self {
            primary: NameSourceColumn::new("nba", "NBA Names"),
            secondaries: vec![
                NameSourceColumn::new("bbi", "BBI Names"),
                NameSourceColumn::new("pbp", "PBP stats names"),
                NameSourceColumn::new("syn", "Synergy names"),
            ],
        }
    }
}

impl NameFixerLayout {
    /// Source codes, primary first.
    pub fn sources(&self) -> Vec<String> {
        std::iter::once(&self.primary)
            .chain(&self.secondaries)
            .map(|c| c.source.clone())
            .collect()
    }
}

/// A canonical player. `player_key` is `make_key(display_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalPlayer {
    pub player_key: String,
    pub display_name: String,
}

/// One spelling of a player's name in one source. Field order is the column
/// order of `player_aliases.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AliasEntry {
    pub player_key: String,
    pub display_name: String,
    pub source: String,
    pub source_name: String,
    pub source_key: String,
}

/// A `(source, source_key)` pair claimed by more than one canonical player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AliasCollision {
    pub source: String,
    pub source_key: String,
    pub player_keys: Vec<String>,
    pub source_names: Vec<String>,
}

impl fmt::Display for AliasCollision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> [{}]",
            self.source,
            self.source_key,
            self.player_keys.join(", ")
        )
    }
}

/// A published alias whose player changed in a rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repoint {
    pub source: String,
    pub source_key: String,
    pub published_player_key: String,
    pub rebuilt_player_key: String,
}

/// A published player whose display name changed in a rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rename {
    pub player_key: String,
    pub published_display_name: String,
    pub rebuilt_display_name: String,
}

/// A player key that an alias file maps to several display names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayConflict {
    pub player_key: String,
    pub display_names: Vec<String>,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("{sheet} is missing required master column `{column}`")]
    MissingPrimaryColumn { sheet: String, column: String },

    #[error("no name-fixer sheets found in {dir}")]
    NoSheets { dir: PathBuf },

    #[error("{} alias collision(s): {}", .collisions.len(), summarize(.collisions))]
    AliasCollision { collisions: Vec<AliasCollision> },

    #[error("{} player key(s) map to several display names: {}", .conflicts.len(), summarize_conflicts(.conflicts))]
    DisplayConflict { conflicts: Vec<DisplayConflict> },

    #[error(
        "rebuild changes the published registry: {} alias(es) repointed, {} player(s) renamed",
        .repoints.len(),
        .renames.len()
    )]
    Repointed {
        repoints: Vec<Repoint>,
        renames: Vec<Rename>,
    },

    #[error(transparent)]
    Read(#[from] TextReadError),

    #[error("alias file {path} is malformed: {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error(transparent)]
    Persist(#[from] PersistError),
}

fn summarize(collisions: &[AliasCollision]) -> String {
    collisions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn summarize_conflicts(conflicts: &[DisplayConflict]) -> String {
    conflicts
        .iter()
        .map(|c| format!("{} -> [{}]", c.player_key, c.display_names.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// One curated name-fixer sheet, usually one per season.
#[derive(Debug, Clone)]
pub struct NameFixerSheet {
    pub name: String,
    pub table: TextTable,
}

/// Read every `*.csv` sheet in `dir`, in file-name order.
pub fn load_name_fixer_dir(
    dir: &Path,
    encodings: &[TextEncoding],
) -> Result<Vec<NameFixerSheet>, IdentityError> {
    let files = list_csv_files(dir)?;
    if files.is_empty() {
        return Err(IdentityError::NoSheets {
            dir: dir.to_path_buf(),
        });
    }
    let mut sheets = Vec::with_capacity(files.len());
    for path in files {
        let table = read_text_table(&path, encodings)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        sheets.push(NameFixerSheet { name, table });
    }
    Ok(sheets)
}

// ---------------------------------------------------------------------------
// Alias index
// ---------------------------------------------------------------------------

/// Canonical registry plus alias lookup. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct AliasIndex {
    players: Vec<CanonicalPlayer>,
    aliases: Vec<AliasEntry>,
    lookup: HashMap<String, HashMap<String, usize>>,
}

impl AliasIndex {
    /// Build the index from name-fixer sheets.
    ///
    /// Every row with a non-blank primary name yields an alias for the
    /// primary source and one for each populated secondary column. A player
    /// key keeps the first display name seen for it.
    pub fn build(sheets: &[NameFixerSheet], layout: &NameFixerLayout) -> Result<Self, IdentityError> {
        let mut entries = Vec::new();
        let mut display_for_key: HashMap<String, String> = HashMap::new();

        for sheet in sheets {
            let Some(primary_idx) = sheet.table.column_index(&layout.primary.column) else {
                return Err(IdentityError::MissingPrimaryColumn {
                    sheet: sheet.name.clone(),
                    column: layout.primary.column.clone(),
                });
            };
            let active: Vec<(&NameSourceColumn, usize)> = layout
                .secondaries
                .iter()
                .filter_map(|col| sheet.table.column_index(&col.column).map(|idx| (col, idx)))
                .collect();

            for row in &sheet.table.rows {
                let raw_primary = row.get(primary_idx).map(String::as_str).unwrap_or("");
                let primary_display = normalize_display(raw_primary);
                if primary_display.is_empty() {
                    continue;
                }
                let player_key = make_key(&primary_display);
                if player_key.is_empty() {
                    warn!(
                        "{}: skipping '{}', name has no ASCII letters or digits",
                        sheet.name, raw_primary
                    );
                    continue;
                }
                let display_name = display_for_key
                    .entry(player_key.clone())
                    .or_insert_with(|| primary_display.clone())
                    .clone();
                if display_name != primary_display {
                    warn!(
                        "{}: '{}' shares key '{}' with '{}', keeping the first spelling",
                        sheet.name, primary_display, player_key, display_name
                    );
                }

                entries.push(AliasEntry {
                    player_key: player_key.clone(),
                    display_name: display_name.clone(),
                    source: layout.primary.source.clone(),
                    source_key: player_key.clone(),
                    source_name: primary_display,
                });

                for (col, idx) in &active {
                    let raw = row.get(*idx).map(|s| s.trim()).unwrap_or("");
                    if raw.is_empty() {
                        continue;
                    }
                    let source_name = normalize_display(raw);
                    let source_key = make_key(&source_name);
                    if source_key.is_empty() {
                        continue;
                    }
                    entries.push(AliasEntry {
                        player_key: player_key.clone(),
                        display_name: display_name.clone(),
                        source: col.source.clone(),
                        source_name,
                        source_key,
                    });
                }
            }
        }

        let index = Self::from_aliases(entries)?;
        info!(
            "built {} players and {} aliases from {} sheet(s)",
            index.players.len(),
            index.aliases.len(),
            sheets.len()
        );
        Ok(index)
    }

    /// Assemble an index from alias entries, collapsing exact repeats and
    /// rejecting collisions.
    pub fn from_aliases(entries: Vec<AliasEntry>) -> Result<Self, IdentityError> {
        let mut seen = HashSet::new();
        let mut aliases: Vec<AliasEntry> = entries
            .into_iter()
            .filter(|e| seen.insert((e.source.clone(), e.source_key.clone(), e.player_key.clone())))
            .collect();

        let collisions = find_collisions(&aliases);
        if !collisions.is_empty() {
            return Err(IdentityError::AliasCollision { collisions });
        }

        let mut displays: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for entry in &aliases {
            displays
                .entry(&entry.player_key)
                .or_default()
                .insert(&entry.display_name);
        }
        let conflicts: Vec<DisplayConflict> = displays
            .iter()
            .filter(|(_, names)| names.len() > 1)
            .map(|(key, names)| DisplayConflict {
                player_key: key.to_string(),
                display_names: names.iter().map(|n| n.to_string()).collect(),
            })
            .collect();
        if !conflicts.is_empty() {
            return Err(IdentityError::DisplayConflict { conflicts });
        }

        let mut players: Vec<CanonicalPlayer> = displays
            .into_iter()
            .filter_map(|(key, names)| {
                names.into_iter().next().map(|name| CanonicalPlayer {
                    player_key: key.to_string(),
                    display_name: name.to_string(),
                })
            })
            .collect();
        players.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.player_key.cmp(&b.player_key))
        });

        aliases.sort_by(|a, b| {
            (a.source.as_str(), a.source_key.as_str()).cmp(&(b.source.as_str(), b.source_key.as_str()))
        });
        let mut lookup: HashMap<String, HashMap<String, usize>> = HashMap::new();
        for (i, entry) in aliases.iter().enumerate() {
            lookup
                .entry(entry.source.clone())
                .or_default()
                .insert(entry.source_key.clone(), i);
        }

        Ok(Self {
            players,
            aliases,
            lookup,
        })
    }

    pub fn players(&self) -> &[CanonicalPlayer] {
        &self.players
    }

    pub fn aliases(&self) -> &[AliasEntry] {
        &self.aliases
    }

    /// The alias registered for `source_key` in `source`, if any.
    pub fn resolve(&self, source: &str, source_key: &str) -> Option<&AliasEntry> {
        let idx = self.lookup.get(source)?.get(source_key)?;
        self.aliases.get(*idx)
    }

    /// First alias found for `source_key`, trying `sources` in order.
    pub fn resolve_in_priority<S: AsRef<str>>(&self, sources: &[S], source_key: &str) -> Option<&AliasEntry> {
        sources
            .iter()
            .find_map(|source| self.resolve(source.as_ref(), source_key))
    }

    /// Fail if any alias present in `published` now points elsewhere, or a
    /// published player key now carries another display name. New aliases
    /// and new players are fine.
    pub fn ensure_no_repoint(&self, published: &AliasIndex) -> Result<(), IdentityError> {
        let repoints: Vec<Repoint> = published
            .aliases
            .iter()
            .filter_map(|old| {
                let new = self.resolve(&old.source, &old.source_key)?;
                (new.player_key != old.player_key).then(|| Repoint {
                    source: old.source.clone(),
                    source_key: old.source_key.clone(),
                    published_player_key: old.player_key.clone(),
                    rebuilt_player_key: new.player_key.clone(),
                })
            })
            .collect();

        let rebuilt: HashMap<&str, &str> = self
            .players
            .iter()
            .map(|p| (p.player_key.as_str(), p.display_name.as_str()))
            .collect();
        let renames: Vec<Rename> = published
            .players
            .iter()
            .filter_map(|old| {
                let name = rebuilt.get(old.player_key.as_str())?;
                (*name != old.display_name).then(|| Rename {
                    player_key: old.player_key.clone(),
                    published_display_name: old.display_name.clone(),
                    rebuilt_display_name: name.to_string(),
                })
            })
            .collect();

        if repoints.is_empty() && renames.is_empty() {
            Ok(())
        } else {
            Err(IdentityError::Repointed { repoints, renames })
        }
    }

    // -- Persistence --

    /// Write `players.csv` and `player_aliases.csv` into `dir`.
    pub fn write(&self, dir: &Path) -> Result<(), IdentityError> {
        write_serialized(&dir.join(PLAYERS_FILE), &PLAYERS_HEADER, &self.players)?;
        write_serialized(&dir.join(ALIASES_FILE), &ALIASES_HEADER, &self.aliases)?;
        Ok(())
    }

    /// Load a published index from `dir/player_aliases.csv`.
    pub fn load(dir: &Path) -> Result<Self, IdentityError> {
        let path = dir.join(ALIASES_FILE);
        let file = std::fs::File::open(&path).map_err(|e| {
            IdentityError::Read(TextReadError::Io {
                path: path.clone(),
                source: e,
            })
        })?;
        let entries = load_aliases_from_reader(file).map_err(|e| IdentityError::Csv {
            path: path.clone(),
            source: e,
        })?;
        Self::from_aliases(entries)
    }
}

fn find_collisions(aliases: &[AliasEntry]) -> Vec<AliasCollision> {
    let mut groups: BTreeMap<(&str, &str), (BTreeSet<&str>, BTreeSet<&str>)> = BTreeMap::new();
    for entry in aliases {
        let (keys, names) = groups
            .entry((&entry.source, &entry.source_key))
            .or_default();
        keys.insert(&entry.player_key);
        names.insert(&entry.source_name);
    }
    groups
        .into_iter()
        .filter(|(_, (keys, _))| keys.len() > 1)
        .map(|((source, source_key), (keys, names))| AliasCollision {
            source: source.to_string(),
            source_key: source_key.to_string(),
            player_keys: keys.into_iter().map(str::to_string).collect(),
            source_names: names.into_iter().map(str::to_string).collect(),
        })
        .collect()
}

fn load_aliases_from_reader<R: std::io::Read>(rdr: R) -> Result<Vec<AliasEntry>, csv::Error> {
    let mut reader = csv::Reader::from_reader(rdr);
    reader.deserialize::<AliasEntry>().collect()
}

/// Header first, then rows. The header is written even when `rows` is empty.
fn write_serialized<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> Result<(), PersistError> {
    write_atomic(path, |out| {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(out);
        writer.write_record(header)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok::<(), csv::Error>(())
    })
}

// ---------------------------------------------------------------------------
// Collision report
// ---------------------------------------------------------------------------

/// Body of `alias_collisions.json`.
#[derive(Debug, Serialize)]
pub struct AliasCollisionReport<'a> {
    pub generated_at_utc: String,
    pub collision_count: usize,
    pub collisions: &'a [AliasCollision],
}

impl<'a> AliasCollisionReport<'a> {
    pub fn new(collisions: &'a [AliasCollision]) -> Self {
        Self {
            generated_at_utc: utc_now_iso(),
            collision_count: collisions.len(),
            collisions,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::parse_csv;

    fn sheet(name: &str, csv_data: &str) -> NameFixerSheet {
        NameFixerSheet {
            name: name.to_string(),
            table: parse_csv(csv_data.as_bytes()).unwrap(),
        }
    }

    #[test]
    fn builds_primary_and_secondary_aliases() {
        let sheets = vec![sheet(
            "2024-25.csv",
            "\
NBA Names,BBI Names,Synergy names
Luka Dončić,Luka Doncic,L. Doncic
Nikola Jokić,,",
        )];
        let index = AliasIndex::build(&sheets, &NameFixerLayout::default()).unwrap();

        assert_eq!(
            index.players(),
            &[
                CanonicalPlayer {
                    player_key: "lukadoncic".into(),
                    display_name: "Luka Doncic".into()
                },
                CanonicalPlayer {
                    player_key: "nikolajokic".into(),
                    display_name: "Nikola Jokic".into()
                },
            ]
        );
        // nba x2, bbi x1, syn x1
        assert_eq!(index.aliases().len(), 4);

        let syn = index.resolve("syn", "ldoncic").unwrap();
        assert_eq!(syn.player_key, "lukadoncic");
        assert_eq!(syn.source_name, "L Doncic");
        assert!(index.resolve("pbp", "lukadoncic").is_none());
    }

    #[test]
    fn absent_secondary_columns_are_skipped() {
        let sheets = vec![
            sheet("a.csv", "NBA Names,PBP stats names\nJalen Brunson,J Brunson"),
            sheet("b.csv", "NBA Names\nJalen Brunson"),
        ];
        let index = AliasIndex::build(&sheets, &NameFixerLayout::default()).unwrap();
        assert_eq!(index.players().len(), 1);
        assert_eq!(index.aliases().len(), 2);
    }

    #[test]
    fn missing_primary_column_names_sheet() {
        let sheets = vec![sheet("2019-20.csv", "BBI Names\nSomeone")];
        let err = AliasIndex::build(&sheets, &NameFixerLayout::default()).unwrap_err();
        match err {
            IdentityError::MissingPrimaryColumn { sheet, column } => {
                assert_eq!(sheet, "2019-20.csv");
                assert_eq!(column, "NBA Names");
            }
            other => panic!("expected MissingPrimaryColumn, got: {other}"),
        }
    }

    #[test]
    fn repeated_rows_collapse() {
        let sheets = vec![
            sheet("a.csv", "NBA Names,BBI Names\nLeBron James,Lebron James"),
            sheet("b.csv", "NBA Names,BBI Names\nLeBron  James,LeBron James"),
        ];
        let index = AliasIndex::build(&sheets, &NameFixerLayout::default()).unwrap();
        assert_eq!(index.aliases().len(), 2);
    }

    #[test]
    fn secondary_key_shared_by_two_players_is_fatal() {
        let sheets = vec![sheet(
            "2024-25.csv",
            "\
NBA Names,BBI Names
LeBron James,LeBron James
Bronny James,Lebron James",
        )];
        let err = AliasIndex::build(&sheets, &NameFixerLayout::default()).unwrap_err();
        match err {
            IdentityError::AliasCollision { collisions } => {
                assert_eq!(collisions.len(), 1);
                assert_eq!(collisions[0].source, "bbi");
                assert_eq!(collisions[0].source_key, "lebronjames");
                assert_eq!(collisions[0].player_keys, vec!["bronnyjames", "lebronjames"]);
            }
            other => panic!("expected AliasCollision, got: {other}"),
        }
    }

    #[test]
    fn display_variants_keep_first_spelling() {
        let sheets = vec![sheet(
            "a.csv",
            "NBA Names\nJaren Jackson Jr\nJaren Jackson jr",
        )];
        let index = AliasIndex::build(&sheets, &NameFixerLayout::default()).unwrap();
        assert_eq!(index.players().len(), 1);
        assert_eq!(index.players()[0].display_name, "Jaren Jackson Jr");
    }

    #[test]
    fn conflicting_alias_file_is_rejected() {
        let entries = vec![
            AliasEntry {
                player_key: "rjbarrett".into(),
                display_name: "RJ Barrett".into(),
                source: "nba".into(),
                source_name: "RJ Barrett".into(),
                source_key: "rjbarrett".into(),
            },
            AliasEntry {
                player_key: "rjbarrett".into(),
                display_name: "R J Barrett".into(),
                source: "bbi".into(),
                source_name: "R J Barrett".into(),
                source_key: "rjbarrett".into(),
            },
        ];
        assert!(matches!(
            AliasIndex::from_aliases(entries),
            Err(IdentityError::DisplayConflict { .. })
        ));
    }

    #[test]
    fn priority_resolution() {
        let sheets = vec![sheet(
            "a.csv",
            "NBA Names,BBI Names\nOG Anunoby,Ogugua Anunoby",
        )];
        let index = AliasIndex::build(&sheets, &NameFixerLayout::default()).unwrap();
        let hit = index
            .resolve_in_priority(&["nba", "bbi"], "oguguaanunoby")
            .unwrap();
        assert_eq!(hit.display_name, "OG Anunoby");
        assert!(index.resolve_in_priority(&["nba"], "oguguaanunoby").is_none());
    }

    #[test]
    fn repoint_against_published_is_fatal() {
        let layout = NameFixerLayout::default();
        let published = AliasIndex::build(
            &[sheet("a.csv", "NBA Names,BBI Names\nLeBron James,King James")],
            &layout,
        )
        .unwrap();
        let rebuilt = AliasIndex::build(
            &[sheet("a.csv", "NBA Names,BBI Names\nBronny James,King James")],
            &layout,
        )
        .unwrap();

        let err = rebuilt.ensure_no_repoint(&published).unwrap_err();
        match err {
            IdentityError::Repointed { repoints, renames } => {
                assert!(renames.is_empty());
                assert_eq!(repoints.len(), 1);
                assert_eq!(repoints[0].source, "bbi");
                assert_eq!(repoints[0].published_player_key, "lebronjames");
                assert_eq!(repoints[0].rebuilt_player_key, "bronnyjames");
            }
            other => panic!("expected Repointed, got: {other}"),
        }

        let extended = AliasIndex::build(
            &[sheet(
                "a.csv",
                "NBA Names,BBI Names\nLeBron James,King James\nBronny James,Bronny",
            )],
            &layout,
        )
        .unwrap();
        assert!(extended.ensure_no_repoint(&published).is_ok());
    }

    #[test]
    fn renamed_player_against_published_is_fatal() {
        let layout = NameFixerLayout::default();
        let published =
            AliasIndex::build(&[sheet("a.csv", "NBA Names\nJaren Jackson Jr")], &layout).unwrap();
        let rebuilt =
            AliasIndex::build(&[sheet("a.csv", "NBA Names\nJaren Jackson jr")], &layout).unwrap();

        match rebuilt.ensure_no_repoint(&published).unwrap_err() {
            IdentityError::Repointed { repoints, renames } => {
                assert!(repoints.is_empty());
                assert_eq!(renames.len(), 1);
                assert_eq!(renames[0].player_key, "jarenjacksonjr");
                assert_eq!(renames[0].rebuilt_display_name, "Jaren Jackson jr");
            }
            other => panic!("expected Repointed, got: {other}"),
        }
    }

    #[test]
    fn write_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let index = AliasIndex::build(
            &[sheet("a.csv", "NBA Names,BBI Names\nAlperen Şengün,Alperen Sengun")],
            &NameFixerLayout::default(),
        )
        .unwrap();
        index.write(dir.path()).unwrap();

        let players_csv = std::fs::read_to_string(dir.path().join(PLAYERS_FILE)).unwrap();
        assert!(players_csv.starts_with("player_key,display_name\n"));
        let aliases_csv = std::fs::read_to_string(dir.path().join(ALIASES_FILE)).unwrap();
        assert!(aliases_csv.starts_with("player_key,display_name,source,source_name,source_key\n"));

        let loaded = AliasIndex::load(dir.path()).unwrap();
        assert_eq!(loaded.players(), index.players());
        assert_eq!(
            loaded.resolve("bbi", "alperensengun").unwrap().display_name,
            "Alperen Sengun"
        );
    }

    #[test]
    fn empty_index_writes_headers_and_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let index = AliasIndex::build(&[sheet("a.csv", "NBA Names\n  \n")], &NameFixerLayout::default()).unwrap();
        assert!(index.players().is_empty());
        index.write(dir.path()).unwrap();

        let players_csv = std::fs::read_to_string(dir.path().join(PLAYERS_FILE)).unwrap();
        assert_eq!(players_csv, "player_key,display_name\n");
        let aliases_csv = std::fs::read_to_string(dir.path().join(ALIASES_FILE)).unwrap();
        assert_eq!(aliases_csv, "player_key,display_name,source,source_name,source_key\n");

        let loaded = AliasIndex::load(dir.path()).unwrap();
        assert!(loaded.players().is_empty());
        assert!(loaded.aliases().is_empty());
    }

    #[test]
    fn headers_match_record_fields() {
        let player = CanonicalPlayer {
            player_key: "k".into(),
            display_name: "K".into(),
        };
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.serialize(&player).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert!(text.starts_with(&PLAYERS_HEADER.join(",")));

        let alias = AliasEntry {
            player_key: "k".into(),
            display_name: "K".into(),
            source: "nba".into(),
            source_name: "K".into(),
            source_key: "k".into(),
        };
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.serialize(&alias).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert!(text.starts_with(&ALIASES_HEADER.join(",")));
    }
}
