//! Row definitions for the scoreboard SurrealDB tables
//!
//! Tables:
//! - teams, challenges, targets: competition entities and their aggregates
//! - attack_events, availability_failures: per-round inputs
//! - score_entries: the append-only score ledger
//! - settled_rounds: one marker per committed round

use chrono::{DateTime, Utc};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage_traits::{
    AttackEvent, AvailabilityFailure, Challenge, ChallengeId, LedgerEntry, Round, SettledRound,
    Target, TargetId, Team, TeamId,
};

/// Team row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub team_id: u64,
    pub name: String,
    pub score: f64,
}

impl From<&Team> for TeamRow {
    fn from(team: &Team) -> Self {
        TeamRow {
            id: None,
            team_id: team.id.0,
            name: team.name.clone(),
            score: team.score,
        }
    }
}

impl From<TeamRow> for Team {
    fn from(row: TeamRow) -> Self {
        Team {
            id: TeamId(row.team_id),
            name: row.name,
            score: row.score,
        }
    }
}

/// Challenge row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub challenge_id: u64,
    pub title: String,
    pub base_score: f64,
}

impl From<&Challenge> for ChallengeRow {
    fn from(challenge: &Challenge) -> Self {
        ChallengeRow {
            id: None,
            challenge_id: challenge.id.0,
            title: challenge.title.clone(),
            base_score: challenge.base_score,
        }
    }
}

impl From<ChallengeRow> for Challenge {
    fn from(row: ChallengeRow) -> Self {
        Challenge {
            id: ChallengeId(row.challenge_id),
            title: row.title,
            base_score: row.base_score,
        }
    }
}

/// Target row. `visible` decides whether the score counts for the team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub target_id: u64,
    pub team_id: u64,
    pub challenge_id: u64,
    pub visible: bool,
    pub score: f64,
}

impl From<&Target> for TargetRow {
    fn from(target: &Target) -> Self {
        TargetRow {
            id: None,
            target_id: target.id.0,
            team_id: target.team_id.0,
            challenge_id: target.challenge_id.0,
            visible: target.visible,
            score: target.score,
        }
    }
}

impl From<TargetRow> for Target {
    fn from(row: TargetRow) -> Self {
        Target {
            id: TargetId(row.target_id),
            team_id: TeamId(row.team_id),
            challenge_id: ChallengeId(row.challenge_id),
            visible: row.visible,
            score: row.score,
        }
    }
}

/// Attack event row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackEventRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub attacker_team_id: u64,
    pub victim_target_id: u64,
    pub round: u32,
    #[serde(with = "surreal_datetime")]
    pub recorded_at: DateTime<Utc>,
}

impl From<&AttackEvent> for AttackEventRow {
    fn from(event: &AttackEvent) -> Self {
        AttackEventRow {
            id: None,
            attacker_team_id: event.attacker_team_id.0,
            victim_target_id: event.victim_target_id.0,
            round: event.round.0,
            recorded_at: Utc::now(),
        }
    }
}

impl From<AttackEventRow> for AttackEvent {
    fn from(row: AttackEventRow) -> Self {
        AttackEvent {
            attacker_team_id: TeamId(row.attacker_team_id),
            victim_target_id: TargetId(row.victim_target_id),
            round: Round(row.round),
        }
    }
}

/// Availability failure row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityFailureRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub team_id: u64,
    pub target_id: u64,
    pub challenge_id: u64,
    pub round: u32,
    #[serde(with = "surreal_datetime")]
    pub recorded_at: DateTime<Utc>,
}

impl From<&AvailabilityFailure> for AvailabilityFailureRow {
    fn from(event: &AvailabilityFailure) -> Self {
        AvailabilityFailureRow {
            id: None,
            team_id: event.team_id.0,
            target_id: event.target_id.0,
            challenge_id: event.challenge_id.0,
            round: event.round.0,
            recorded_at: Utc::now(),
        }
    }
}

impl From<AvailabilityFailureRow> for AvailabilityFailure {
    fn from(row: AvailabilityFailureRow) -> Self {
        AvailabilityFailure {
            team_id: TeamId(row.team_id),
            target_id: TargetId(row.target_id),
            challenge_id: ChallengeId(row.challenge_id),
            round: Round(row.round),
        }
    }
}

/// Score ledger row. `reason` holds the persisted reason name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreEntryRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub team_id: u64,
    pub target_id: u64,
    pub round: u32,
    pub reason: String,
    pub delta: f64,
    #[serde(with = "surreal_datetime")]
    pub recorded_at: DateTime<Utc>,
}

impl From<&LedgerEntry> for ScoreEntryRow {
    fn from(entry: &LedgerEntry) -> Self {
        ScoreEntryRow {
            id: None,
            team_id: entry.team_id.0,
            target_id: entry.target_id.0,
            round: entry.round.0,
            reason: entry.reason.as_str().to_string(),
            delta: entry.delta,
            recorded_at: entry.recorded_at,
        }
    }
}

impl TryFrom<ScoreEntryRow> for LedgerEntry {
    type Error = StorageError;

    fn try_from(row: ScoreEntryRow) -> std::result::Result<Self, Self::Error> {
        Ok(LedgerEntry {
            team_id: TeamId(row.team_id),
            target_id: TargetId(row.target_id),
            round: Round(row.round),
            reason: row.reason.parse()?,
            delta: row.delta,
            recorded_at: row.recorded_at,
        })
    }
}

/// Settled round marker row (unique per round)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettledRoundRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub round: u32,
    pub entry_count: u64,
    #[serde(with = "surreal_datetime")]
    pub settled_at: DateTime<Utc>,
}

impl From<&SettledRound> for SettledRoundRow {
    fn from(marker: &SettledRound) -> Self {
        SettledRoundRow {
            id: None,
            round: marker.round.0,
            entry_count: marker.entry_count,
            settled_at: marker.settled_at,
        }
    }
}

impl From<SettledRoundRow> for SettledRound {
    fn from(row: SettledRoundRow) -> Self {
        SettledRound {
            round: Round(row.round),
            entry_count: row.entry_count,
            settled_at: row.settled_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage_traits::ScoreReason;

    #[test]
    fn test_score_entry_row_stores_reason_name() {
        let entry = LedgerEntry::new(
            TeamId(1),
            TargetId(10),
            Round(3),
            ScoreReason::AvailabilityGain,
            6.5,
        );
        let row = ScoreEntryRow::from(&entry);

        assert_eq!(row.reason, "service_online");
        assert_eq!(row.round, 3);
        assert!(row.id.is_none());
    }

    #[test]
    fn test_score_entry_row_round_trip() {
        let entry = LedgerEntry::new(
            TeamId(2),
            TargetId(20),
            Round(9),
            ScoreReason::AttackLoss,
            -100.0,
        );
        let back = LedgerEntry::try_from(ScoreEntryRow::from(&entry)).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_score_entry_row_rejects_unknown_reason() {
        let mut row = ScoreEntryRow::from(&LedgerEntry::new(
            TeamId(2),
            TargetId(20),
            Round(9),
            ScoreReason::AttackGain,
            50.0,
        ));
        row.reason = "bonus".to_string();

        assert!(LedgerEntry::try_from(row).is_err());
    }

    #[test]
    fn test_target_row_keeps_visibility() {
        let target = Target {
            id: TargetId(5),
            team_id: TeamId(1),
            challenge_id: ChallengeId(2),
            visible: false,
            score: 0.0,
        };
        let row = TargetRow::from(&target);
        assert!(!row.visible);
        assert_eq!(Target::from(row), target);
    }
}
