// Player-level source policy. Provider endpoints silently fall back to team
// totals or an error payload when a parameter is off; both show up as a
// table without the player id or with too few rows.

use hoopstage_core::staging::DEFAULT_JOIN_KEY;
use hoopstage_core::table::Table;

pub const DEFAULT_MIN_ROWS: usize = 150;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("{source_id}: no `{column}` column, this is not player-level output; check the endpoint parameters")]
    MissingJoinKey { source_id: String, column: String },

    #[error("{source_id}: only {rows} rows (need at least {min_rows}); likely team-level data, a filtered query or an error payload")]
    TooFewRows {
        source_id: String,
        rows: usize,
        min_rows: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerPolicy {
    pub join_key: String,
    pub min_rows: usize,
}

impl Default for PlayerPolicy {
    fn default() -> Self {
        Self {
            join_key: DEFAULT_JOIN_KEY.to_string(),
            min_rows: DEFAULT_MIN_ROWS,
        }
    }
}

impl PlayerPolicy {
    pub fn check(&self, source_id: &str, table: &Table) -> Result<(), PolicyError> {
        if !table.has_column(&self.join_key) {
            return Err(PolicyError::MissingJoinKey {
                source_id: source_id.to_string(),
                column: self.join_key.clone(),
            });
        }
        if table.len() < self.min_rows {
            return Err(PolicyError::TooFewRows {
                source_id: source_id.to_string(),
                rows: table.len(),
                min_rows: self.min_rows,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoopstage_core::table::CellValue;

    fn players(n: i64) -> Table {
        Table::from_rows(
            vec!["PLAYER_ID".into()],
            (0..n).map(|i| vec![Some(CellValue::Int(i))]).collect(),
        )
        .unwrap()
    }

    #[test]
    fn team_level_table_is_rejected() {
        let teams = Table::new(vec!["TEAM_ID".into(), "PTS".into()]).unwrap();
        assert_eq!(
            PlayerPolicy::default().check("nba_passing", &teams),
            Err(PolicyError::MissingJoinKey {
                source_id: "nba_passing".into(),
                column: "PLAYER_ID".into()
            })
        );
    }

    #[test]
    fn row_floor() {
        let policy = PlayerPolicy::default();
        assert!(matches!(
            policy.check("x", &players(30)),
            Err(PolicyError::TooFewRows { rows: 30, min_rows: 150, .. })
        ));
        assert!(policy.check("x", &players(150)).is_ok());
    }
}
