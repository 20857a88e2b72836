// Library root: identity resolution, master consolidation, staging merge and
// stage validation for per-season player statistics.

pub mod identity;
pub mod master;
pub mod normalize;
pub mod persist;
pub mod report;
pub mod season;
pub mod snapshot;
pub mod staging;
pub mod table;
pub mod text;
pub mod validate;

pub use identity::{
    AliasEntry, AliasIndex, CanonicalPlayer, IdentityError, NameFixerLayout, NameFixerSheet,
};
pub use master::{consolidate, ColumnContract, MasterBuild, MasterError, MasterOptions, SeasonFrame};
pub use normalize::{make_key, normalize_display};
pub use season::{SeasonType, StageTarget};
pub use snapshot::{read_snapshot, read_snapshot_if_exists, write_snapshot, SnapshotError};
pub use staging::{
    merge, CarryForwardReport, MergeError, MergeRequest, RefreshStatus, SourceTable, StagedSeason,
};
pub use table::{Cell, CellValue, Table, TextTable};
pub use text::TextEncoding;
pub use validate::{validate_stage, Finding, StageRejected, ValidationConfig, ValidationReport};
