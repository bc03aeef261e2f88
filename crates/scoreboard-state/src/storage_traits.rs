//! Storage trait definitions for the settlement engine
//!
//! These traits define the core storage abstractions:
//! - `ScoreStore`: bulk reads of a round's inputs, the score ledger, and the
//!   single atomic write path (`commit_round` / `write_aggregates`)
//! - `CompetitionRegistry`: registration of teams, challenges, targets and
//!   the per-round events produced by the attack/check subsystems
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

numeric_id!(
    /// Unique identifier of a competing team
    TeamId
);
numeric_id!(
    /// Unique identifier of a challenge (a service every team runs)
    ChallengeId
);
numeric_id!(
    /// Unique identifier of a target (one team's instance of a challenge)
    TargetId
);

/// Competition round number. The first round is 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Round(pub u32);

impl Round {
    /// The round before this one, or `None` for round 1 and below.
    pub fn previous(self) -> Option<Round> {
        if self.0 <= 1 {
            None
        } else {
            Some(Round(self.0 - 1))
        }
    }
}

impl std::fmt::Display for Round {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

// ---------------------------------------------------------------------------
// Competition entities
// ---------------------------------------------------------------------------

/// A competing team. `score` is derived by aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub score: f64,
}

/// A challenge service. `base_score` is the starting score of each of its targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: ChallengeId,
    pub title: String,
    pub base_score: f64,
}

/// One team's deployed instance of a challenge.
///
/// Only visible targets count toward the owning team's score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub team_id: TeamId,
    pub challenge_id: ChallengeId,
    pub visible: bool,
    pub score: f64,
}

// ---------------------------------------------------------------------------
// Round inputs
// ---------------------------------------------------------------------------

/// One successful compromise of `victim_target_id` by `attacker_team_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackEvent {
    pub attacker_team_id: TeamId,
    pub victim_target_id: TargetId,
    pub round: Round,
}

/// One detected outage of a team's instance of a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityFailure {
    pub team_id: TeamId,
    pub target_id: TargetId,
    pub challenge_id: ChallengeId,
    pub round: Round,
}

// ---------------------------------------------------------------------------
// Score ledger
// ---------------------------------------------------------------------------

/// Why a ledger entry exists. Serialized with the names stored in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScoreReason {
    /// Share of an attack reward, credited to the attacker's own target
    #[serde(rename = "attack")]
    AttackGain,
    /// Penalty for one attack event against the victim target
    #[serde(rename = "been_attacked")]
    AttackLoss,
    /// Penalty for one availability failure
    #[serde(rename = "checkdown")]
    AvailabilityLoss,
    /// Share of a challenge's availability pool, credited to a safe target
    #[serde(rename = "service_online")]
    AvailabilityGain,
}

impl ScoreReason {
    /// All reasons, in settlement order.
    pub const ALL: [ScoreReason; 4] = [
        ScoreReason::AttackGain,
        ScoreReason::AttackLoss,
        ScoreReason::AvailabilityLoss,
        ScoreReason::AvailabilityGain,
    ];

    /// Persisted name of the reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreReason::AttackGain => "attack",
            ScoreReason::AttackLoss => "been_attacked",
            ScoreReason::AvailabilityLoss => "checkdown",
            ScoreReason::AvailabilityGain => "service_online",
        }
    }
}

impl std::fmt::Display for ScoreReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScoreReason {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ScoreReason::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| StorageError::InvalidData(format!("unknown score reason: {s}")))
    }
}

/// An immutable score ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub team_id: TeamId,
    pub target_id: TargetId,
    pub round: Round,
    pub reason: ScoreReason,
    /// Signed score change
    pub delta: f64,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Create an entry stamped with the current time.
    pub fn new(
        team_id: TeamId,
        target_id: TargetId,
        round: Round,
        reason: ScoreReason,
        delta: f64,
    ) -> Self {
        Self {
            team_id,
            target_id,
            round,
            reason,
            delta,
            recorded_at: Utc::now(),
        }
    }
}

/// Recomputed score of a single target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetScore {
    pub target_id: TargetId,
    pub score: f64,
}

/// Recomputed score of a single team
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TeamScore {
    pub team_id: TeamId,
    pub score: f64,
}

/// Full set of recomputed aggregates, written with keyed updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregates {
    pub targets: Vec<TargetScore>,
    pub teams: Vec<TeamScore>,
}

/// Ledger position, counted in entries.
///
/// The ledger is append-only, so two reads at the same revision see the same
/// entries and the same totals.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LedgerRevision(pub u64);

impl std::fmt::Display for LedgerRevision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Per-target ledger sums and the revision they were read at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerTotals {
    pub revision: LedgerRevision,
    /// Targets with no entries are absent.
    pub by_target: HashMap<TargetId, f64>,
}

/// Everything a round's settlement persists, written atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundCommit {
    pub round: Round,
    /// Revision of the totals `aggregates` was computed from.
    pub base_revision: LedgerRevision,
    pub entries: Vec<LedgerEntry>,
    pub aggregates: Aggregates,
}

/// Marker stored alongside a round's ledger entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettledRound {
    pub round: Round,
    pub entry_count: u64,
    pub settled_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ScoreStore
// ---------------------------------------------------------------------------

/// Score ledger and aggregate store.
///
/// Guarantees:
/// - Ledger entries are append-only; nothing here mutates or deletes them.
/// - `commit_round` is atomic: the round marker, every entry and every
///   aggregate become visible together, or none of them do.
/// - A round can be committed at most once (`RoundAlreadySettled`).
/// - Aggregate writes are keyed and overwrite the stored value.
/// - Aggregate writes carry the ledger revision they were computed from and
///   are rejected with `StaleLedger` if the ledger has moved since, checked
///   inside the same atomic write.
#[async_trait]
pub trait ScoreStore: Send + Sync {
    /// All registered teams.
    async fn teams(&self) -> StorageResult<Vec<Team>>;

    /// All registered challenges.
    async fn challenges(&self) -> StorageResult<Vec<Challenge>>;

    /// All registered targets.
    async fn targets(&self) -> StorageResult<Vec<Target>>;

    /// Attack events recorded for `round`.
    async fn attack_events(&self, round: Round) -> StorageResult<Vec<AttackEvent>>;

    /// Availability failures recorded for `round`.
    async fn availability_failures(&self, round: Round) -> StorageResult<Vec<AvailabilityFailure>>;

    /// Availability failures recorded for one challenge in `round`.
    async fn challenge_failures(
        &self,
        challenge_id: ChallengeId,
        round: Round,
    ) -> StorageResult<Vec<AvailabilityFailure>> {
        let failures = self.availability_failures(round).await?;
        Ok(failures
            .into_iter()
            .filter(|f| f.challenge_id == challenge_id)
            .collect())
    }

    /// Ledger entries, optionally restricted to a single round.
    async fn ledger_entries(&self, round: Option<Round>) -> StorageResult<Vec<LedgerEntry>>;

    /// Sum of ledger deltas per target across all rounds, read in one pass
    /// together with the ledger revision.
    async fn ledger_totals(&self) -> StorageResult<LedgerTotals> {
        let entries = self.ledger_entries(None).await?;
        let mut totals = LedgerTotals {
            revision: LedgerRevision(entries.len() as u64),
            by_target: HashMap::new(),
        };
        for entry in entries {
            *totals.by_target.entry(entry.target_id).or_default() += entry.delta;
        }
        Ok(totals)
    }

    /// The settlement marker for `round`, if that round was committed.
    async fn settled_round(&self, round: Round) -> StorageResult<Option<SettledRound>>;

    /// Atomically persist a round's entries and aggregates.
    async fn commit_round(&self, commit: RoundCommit) -> StorageResult<SettledRound>;

    /// Atomically overwrite target and team scores computed at `base`.
    async fn write_aggregates(
        &self,
        aggregates: &Aggregates,
        base: LedgerRevision,
    ) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// CompetitionRegistry
// ---------------------------------------------------------------------------

/// Registration of competition entities and round events.
///
/// Semantics:
/// - Entity ids are unique per kind (`Duplicate` otherwise).
/// - New teams and targets start with a score of zero until aggregated.
/// - Events are appended as-is; referential checks happen at settlement.
#[async_trait]
pub trait CompetitionRegistry: Send + Sync {
    async fn register_team(&self, id: TeamId, name: &str) -> StorageResult<Team>;

    async fn register_challenge(
        &self,
        id: ChallengeId,
        title: &str,
        base_score: f64,
    ) -> StorageResult<Challenge>;

    async fn register_target(
        &self,
        id: TargetId,
        team_id: TeamId,
        challenge_id: ChallengeId,
        visible: bool,
    ) -> StorageResult<Target>;

    async fn record_attack(&self, event: AttackEvent) -> StorageResult<()>;

    async fn record_availability_failure(&self, event: AvailabilityFailure)
        -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_previous() {
        assert_eq!(Round(5).previous(), Some(Round(4)));
        assert_eq!(Round(2).previous(), Some(Round(1)));
        assert_eq!(Round(1).previous(), None);
        assert_eq!(Round(0).previous(), None);
    }

    #[test]
    fn test_score_reason_persisted_names() {
        for reason in ScoreReason::ALL {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
            let parsed: ScoreReason = reason.as_str().parse().unwrap();
            assert_eq!(parsed, reason);
        }
    }

    #[test]
    fn test_score_reason_rejects_unknown() {
        let err = "flag_captured".parse::<ScoreReason>().unwrap_err();
        assert!(matches!(err, StorageError::InvalidData(_)));
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let event = AttackEvent {
            attacker_team_id: TeamId(3),
            victim_target_id: TargetId(11),
            round: Round(4),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"attacker_team_id": 3, "victim_target_id": 11, "round": 4})
        );
    }
}
