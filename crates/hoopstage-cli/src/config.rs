// Configuration loading and parsing (pipeline.toml).

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use hoopstage_core::identity::{NameFixerLayout, NameSourceColumn};
use hoopstage_core::master::MasterOptions;
use hoopstage_core::season::StageTarget;
use hoopstage_core::staging::{DEFAULT_JOIN_KEY, DEFAULT_NAME_COLUMN};
use hoopstage_core::text::TextEncoding;
use hoopstage_core::validate::ValidationConfig;
use hoopstage_ingest::{PlayerPolicy, RetryPolicy, SourceRequest};

pub const CONFIG_FILE: &str = "pipeline.toml";
pub const CONFIG_DIR: &str = "config";
pub const DEFAULTS_DIR: &str = "defaults";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("no pipeline.toml in {config_dir} and no shipped copy at {defaults}")]
    NoPipelineConfig { config_dir: PathBuf, defaults: PathBuf },

    #[error("failed to install {path} from defaults: {source}")]
    InstallDefaults {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory relative paths in the file are resolved against.
    pub base_dir: PathBuf,
    pub paths: PathsConfig,
    pub identity: IdentityConfig,
    pub master: MasterConfig,
    pub staging: StagingConfig,
    pub validation: ValidationSection,
    pub fetch: FetchConfig,
}

/// Raw deserialization target for the entire pipeline.toml file.
#[derive(Debug, Clone, Deserialize)]
struct PipelineFile {
    paths: PathsConfig,
    identity: IdentityConfig,
    #[serde(default)]
    master: MasterConfig,
    staging: StagingConfig,
    #[serde(default)]
    validation: ValidationSection,
    #[serde(default)]
    fetch: FetchConfig,
}

// ---------------------------------------------------------------------------
// [paths]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Curated per-season name-fixer CSVs.
    pub name_fixer_dir: String,
    /// Where `players.csv` and `player_aliases.csv` are published.
    pub mappings_dir: String,
    /// Per-season exported tables. Falls back to the contract's
    /// `season_folder` when unset.
    #[serde(default)]
    pub season_dir: Option<String>,
    /// Master CSV output. Falls back to the contract's `master_path` when
    /// unset.
    #[serde(default)]
    pub master_output: Option<String>,
    /// Column contract JSON. Without one the first season file sets the
    /// column list.
    #[serde(default)]
    pub contract: Option<String>,
    pub raw_dir: String,
    pub staging_dir: String,
    pub reports_dir: String,
}

// ---------------------------------------------------------------------------
// [identity]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    pub primary: NameSourceColumn,
    #[serde(default)]
    pub secondaries: Vec<NameSourceColumn>,
    /// Source codes tried in order when canonicalizing a master player name.
    pub alias_priority: Vec<String>,
}

impl IdentityConfig {
    pub fn layout(&self) -> NameFixerLayout {
        NameFixerLayout {
            primary: self.primary.clone(),
            secondaries: self.secondaries.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// [master]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub player_column: String,
    pub season_column: String,
    pub season_type_column: String,
    pub team_column: String,
    pub keys: Vec<String>,
    pub encodings: Vec<TextEncoding>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        let defaults = MasterOptions::default();
        Self {
            player_column: defaults.player_column,
            season_column: defaults.season_column,
            season_type_column: defaults.season_type_column,
            team_column: defaults.team_column,
            keys: defaults.keys,
            encodings: defaults.encodings,
        }
    }
}

// ---------------------------------------------------------------------------
// [staging]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct StagingConfig {
    #[serde(default = "default_join_key")]
    pub join_key: String,
    #[serde(default = "default_name_column")]
    pub name_column: String,
    pub sources: Vec<SourceConfig>,
}

/// One provider table merged into the staging snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub prefix: String,
    pub endpoint: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub primary: bool,
}

impl StagingConfig {
    /// The single primary source. Validation guarantees there is one.
    pub fn primary_source(&self) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.primary)
    }

    pub fn secondary_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| !s.primary)
    }

    /// Fetch requests for `target`, primary first.
    pub fn requests(&self, target: &StageTarget) -> Vec<SourceRequest> {
        self.primary_source()
            .into_iter()
            .chain(self.secondary_sources())
            .map(|s| SourceRequest {
                source_id: s.id.clone(),
                endpoint: s.endpoint.clone(),
                params: s.params.clone(),
                target: target.clone(),
            })
            .collect()
    }
}

fn default_join_key() -> String {
    DEFAULT_JOIN_KEY.to_string()
}

fn default_name_column() -> String {
    DEFAULT_NAME_COLUMN.to_string()
}

// ---------------------------------------------------------------------------
// [validation]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationSection {
    pub min_rows: usize,
    pub max_rows: usize,
    pub secondary_prefixes: Vec<String>,
    pub max_missing_secondary: f64,
    pub max_blank_players: f64,
}

impl Default for ValidationSection {
    fn default() -> Self {
        let defaults = ValidationConfig::default();
        Self {
            min_rows: defaults.min_rows,
            max_rows: defaults.max_rows,
            secondary_prefixes: defaults.secondary_prefixes,
            max_missing_secondary: defaults.max_missing_secondary,
            max_blank_players: defaults.max_blank_players,
        }
    }
}

// ---------------------------------------------------------------------------
// [fetch]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fewer rows than this means the endpoint did not return player-level
    /// data.
    pub min_player_rows: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            base_url: hoopstage_ingest::stats_api::DEFAULT_BASE_URL.to_string(),
            timeout_secs: 60,
            max_attempts: retry.max_attempts,
            base_delay_ms: retry.base_delay.as_millis() as u64,
            max_delay_ms: retry.max_delay.as_millis() as u64,
            min_player_rows: PlayerPolicy::default().min_rows,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Conversions into library settings
// ---------------------------------------------------------------------------

impl Config {
    /// Resolve a configured path against `base_dir`. Absolute paths are kept.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.base_dir.join(path)
    }

    pub fn name_fixer_dir(&self) -> PathBuf {
        self.resolve(&self.paths.name_fixer_dir)
    }

    pub fn mappings_dir(&self) -> PathBuf {
        self.resolve(&self.paths.mappings_dir)
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.resolve(&self.paths.raw_dir)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.resolve(&self.paths.staging_dir)
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.resolve(&self.paths.reports_dir)
    }

    pub fn contract_path(&self) -> Option<PathBuf> {
        self.paths.contract.as_deref().map(|p| self.resolve(p))
    }

    pub fn master_options(&self) -> MasterOptions {
        MasterOptions {
            player_column: self.master.player_column.clone(),
            season_column: self.master.season_column.clone(),
            season_type_column: self.master.season_type_column.clone(),
            team_column: self.master.team_column.clone(),
            keys: self.master.keys.clone(),
            encodings: self.master.encodings.clone(),
            alias_sources: self.identity.alias_priority.clone(),
        }
    }

    pub fn validation_config(&self) -> ValidationConfig {
        ValidationConfig {
            join_key: self.staging.join_key.clone(),
            min_rows: self.validation.min_rows,
            max_rows: self.validation.max_rows,
            secondary_prefixes: self.validation.secondary_prefixes.clone(),
            max_missing_secondary: self.validation.max_missing_secondary,
            max_blank_players: self.validation.max_blank_players,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.fetch.max_attempts,
            base_delay: Duration::from_millis(self.fetch.base_delay_ms),
            max_delay: Duration::from_millis(self.fetch.max_delay_ms),
        }
    }

    pub fn player_policy(&self) -> PlayerPolicy {
        PlayerPolicy {
            join_key: self.staging.join_key.clone(),
            min_rows: self.fetch.min_player_rows,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/pipeline.toml` relative to
/// `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()` which handles default initialization automatically.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = pipeline_config_path(base_dir);
    let text = read_file(&path)?;
    let file: PipelineFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    let config = Config {
        base_dir: base_dir.to_path_buf(),
        paths: file.paths,
        identity: file.identity,
        master: file.master,
        staging: file.staging,
        validation: file.validation,
        fetch: file.fetch,
    };

    validate(&config)?;

    Ok(config)
}

/// `config/pipeline.toml` under `base_dir`.
pub fn pipeline_config_path(base_dir: &Path) -> PathBuf {
    base_dir.join(CONFIG_DIR).join(CONFIG_FILE)
}

/// Install `defaults/pipeline.toml` as `config/pipeline.toml` on first run.
///
/// Returns the installed path, or `None` when an operator copy already
/// exists. An existing copy is never overwritten, even if the shipped
/// defaults have changed since.
pub fn install_default_config(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = pipeline_config_path(base_dir);
    if target.is_file() {
        return Ok(None);
    }
    let shipped = base_dir.join(DEFAULTS_DIR).join(CONFIG_FILE);
    if !shipped.is_file() {
        return Err(ConfigError::NoPipelineConfig {
            config_dir: base_dir.join(CONFIG_DIR),
            defaults: shipped,
        });
    }

    let install_err = |source| ConfigError::InstallDefaults {
        path: target.clone(),
        source,
    };
    std::fs::create_dir_all(base_dir.join(CONFIG_DIR)).map_err(install_err)?;
    let text = std::fs::read(&shipped).map_err(install_err)?;
    // create_new: a copy written by a concurrent run wins.
    match std::fs::OpenOptions::new().write(true).create_new(true).open(&target) {
        Ok(mut dest) => {
            std::io::Write::write_all(&mut dest, &text).map_err(install_err)?;
            Ok(Some(target))
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(install_err(e)),
    }
}

/// Load config relative to `base_dir`, copying defaults first.
pub fn load_config(base_dir: &Path) -> Result<Config, ConfigError> {
    install_default_config(base_dir)?;
    load_config_from(base_dir)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    // Identity
    let sources = config.identity.layout().sources();
    let mut seen = HashSet::new();
    for source in &sources {
        if !seen.insert(source.as_str()) {
            return Err(invalid(
                "identity.secondaries",
                format!("source code `{source}` is used twice"),
            ));
        }
    }
    if config.identity.alias_priority.is_empty() {
        return Err(invalid("identity.alias_priority", "must not be empty"));
    }
    if let Some(unknown) = config
        .identity
        .alias_priority
        .iter()
        .find(|s| !sources.contains(*s))
    {
        return Err(invalid(
            "identity.alias_priority",
            format!("`{unknown}` is not a name-fixer source"),
        ));
    }

    // Master
    if config.master.keys.is_empty() {
        return Err(invalid("master.keys", "must list at least one key column"));
    }
    if config.master.keys.iter().any(|k| k.trim().is_empty()) {
        return Err(invalid("master.keys", "key column names must not be blank"));
    }
    if config.master.encodings.is_empty() {
        return Err(invalid("master.encodings", "must list at least one encoding"));
    }

    // Staging
    if config.staging.join_key.trim().is_empty() {
        return Err(invalid("staging.join_key", "must not be empty"));
    }
    let primaries = config.staging.sources.iter().filter(|s| s.primary).count();
    if primaries != 1 {
        return Err(invalid(
            "staging.sources",
            format!("exactly one source must be primary, found {primaries}"),
        ));
    }
    let mut prefixes = HashSet::new();
    let mut ids = HashSet::new();
    for source in &config.staging.sources {
        if source.prefix.is_empty() || source.prefix.contains("__") {
            return Err(invalid(
                "staging.sources.prefix",
                format!("`{}` must be non-empty and must not contain `__`", source.prefix),
            ));
        }
        if !prefixes.insert(source.prefix.as_str()) {
            return Err(invalid(
                "staging.sources.prefix",
                format!("duplicate prefix `{}`", source.prefix),
            ));
        }
        if !ids.insert(source.id.as_str()) {
            return Err(invalid(
                "staging.sources.id",
                format!("duplicate source id `{}`", source.id),
            ));
        }
        if source.endpoint.trim().is_empty() {
            return Err(invalid(
                "staging.sources.endpoint",
                format!("source `{}` has no endpoint", source.id),
            ));
        }
    }

    // Validation
    let v = &config.validation;
    if v.min_rows > v.max_rows {
        return Err(invalid(
            "validation.min_rows",
            format!("row band is inverted: {} > {}", v.min_rows, v.max_rows),
        ));
    }
    let tolerances: &[(&str, f64)] = &[
        ("validation.max_missing_secondary", v.max_missing_secondary),
        ("validation.max_blank_players", v.max_blank_players),
    ];
    for (name, val) in tolerances {
        if !(0.0..=1.0).contains(val) {
            return Err(invalid(
                name,
                format!("must be between 0.0 and 1.0 inclusive, got {val}"),
            ));
        }
    }
    if let Some(unknown) = v
        .secondary_prefixes
        .iter()
        .find(|p| !config.staging.secondary_sources().any(|s| &s.prefix == *p))
    {
        return Err(invalid(
            "validation.secondary_prefixes",
            format!("`{unknown}` is not the prefix of a secondary source"),
        ));
    }

    // Fetch
    if config.fetch.max_attempts == 0 {
        return Err(invalid("fetch.max_attempts", "must be > 0"));
    }
    if config.fetch.timeout_secs == 0 {
        return Err(invalid("fetch.timeout_secs", "must be > 0"));
    }
    if config.fetch.base_delay_ms > config.fetch.max_delay_ms {
        return Err(invalid(
            "fetch.base_delay_ms",
            format!(
                "must not exceed fetch.max_delay_ms ({} > {})",
                config.fetch.base_delay_ms, config.fetch.max_delay_ms
            ),
        ));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
