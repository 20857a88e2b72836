// Season and season-type labels and the on-disk layout derived from them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Part of the season a table covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeasonType {
    #[serde(rename = "Regular Season")]
    Regular,
    #[serde(rename = "Playoffs")]
    Playoffs,
    #[serde(rename = "PlayIn")]
    PlayIn,
}

impl SeasonType {
    /// Label used by the provider API and stored in the `SeasonType` column.
    pub fn label(self) -> &'static str {
        match self {
            SeasonType::Regular => "Regular Season",
            SeasonType::Playoffs => "Playoffs",
            SeasonType::PlayIn => "PlayIn",
        }
    }

    /// Short form used in file and directory names.
    pub fn slug(self) -> &'static str {
        match self {
            SeasonType::Regular => "regular",
            SeasonType::Playoffs => "playoffs",
            SeasonType::PlayIn => "playin",
        }
    }
}

impl fmt::Display for SeasonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown season type `{0}` (expected Regular Season, Playoffs or PlayIn)")]
pub struct UnknownSeasonType(pub String);

impl FromStr for SeasonType {
    type Err = UnknownSeasonType;

    /// Accepts labels and slugs, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "regular season" | "regular" => Ok(SeasonType::Regular),
            "playoffs" => Ok(SeasonType::Playoffs),
            "playin" | "play-in" => Ok(SeasonType::PlayIn),
            _ => Err(UnknownSeasonType(s.to_string())),
        }
    }
}

/// One season/season-type pair: the unit a staging run covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageTarget {
    pub season: String,
    pub season_type: SeasonType,
}

impl StageTarget {
    pub fn new(season: impl Into<String>, season_type: SeasonType) -> Self {
        Self {
            season: season.into(),
            season_type,
        }
    }

    /// `<raw_dir>/<season>/<slug>/` holding one snapshot per provider source.
    pub fn raw_dir(&self, raw_root: &Path) -> PathBuf {
        raw_root.join(&self.season).join(self.season_type.slug())
    }

    /// `<raw_dir>/<season>/<slug>/<source_id>.parquet`
    pub fn raw_snapshot_path(&self, raw_root: &Path, source_id: &str) -> PathBuf {
        self.raw_dir(raw_root).join(format!("{source_id}.parquet"))
    }

    /// `<staging_dir>/<season>__<slug>.parquet`
    pub fn staging_path(&self, staging_root: &Path) -> PathBuf {
        staging_root.join(format!("{}__{}.parquet", self.season, self.season_type.slug()))
    }
}

impl fmt::Display for StageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.season, self.season_type)
    }
}
