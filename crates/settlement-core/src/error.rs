//! Settlement error taxonomy.
//!
//! Referential-integrity variants are fatal for the round being settled:
//! the orchestrator never commits a round that produced one of them.

use scoreboard_state::{ChallengeId, Round, StorageError, TargetId, TeamId};
use thiserror::Error;

/// Errors produced while settling a round.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// An event or target references a target that does not exist.
    #[error("round {round}: target {target_id} does not exist")]
    MissingTarget { round: Round, target_id: TargetId },

    /// An event or target references a team that does not exist.
    #[error("round {round}: team {team_id} does not exist")]
    MissingTeam { round: Round, team_id: TeamId },

    /// A target references a challenge that does not exist.
    #[error("target {target_id}: challenge {challenge_id} does not exist")]
    MissingChallenge {
        target_id: TargetId,
        challenge_id: ChallengeId,
    },

    /// A target's owning team does not exist.
    #[error("target {target_id}: owning team {team_id} does not exist")]
    OrphanTarget { target_id: TargetId, team_id: TeamId },

    /// A successful attacker owns no instance of the victim's challenge.
    #[error(
        "round {round}: attacking team {team_id} has no target for challenge {challenge_id}"
    )]
    AttackerHasNoTarget {
        round: Round,
        team_id: TeamId,
        challenge_id: ChallengeId,
    },

    /// A team owns more than one instance of the same challenge.
    #[error("team {team_id} owns more than one target for challenge {challenge_id}")]
    AmbiguousTarget {
        team_id: TeamId,
        challenge_id: ChallengeId,
    },

    /// An availability failure disagrees with the target it names.
    #[error(
        "round {round}: failure for target {target_id} names team {team_id} / challenge {challenge_id}, which do not own it"
    )]
    TargetOwnershipMismatch {
        round: Round,
        target_id: TargetId,
        team_id: TeamId,
        challenge_id: ChallengeId,
    },

    /// The clock has not yet completed a round.
    #[error("no completed round to settle (current round is {current})")]
    NoCompletedRound { current: Round },

    /// Loading and computing the round did not finish within the configured bound.
    #[error("settlement of round {round} timed out after {limit_ms} ms")]
    Timeout { round: Round, limit_ms: u64 },

    /// Scoring configuration is unusable.
    #[error("invalid scoring config: {0}")]
    InvalidConfig(String),

    /// A storage / persistence layer error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SettlementError {
    /// True for errors caused by inconsistent competition data rather than
    /// infrastructure.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            SettlementError::MissingTarget { .. }
                | SettlementError::MissingTeam { .. }
                | SettlementError::MissingChallenge { .. }
                | SettlementError::OrphanTarget { .. }
                | SettlementError::AttackerHasNoTarget { .. }
                | SettlementError::AmbiguousTarget { .. }
                | SettlementError::TargetOwnershipMismatch { .. }
        )
    }
}

/// Convenience result alias.
pub type SettlementResult<T> = std::result::Result<T, SettlementError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attacker_has_no_target_displays_ids() {
        let err = SettlementError::AttackerHasNoTarget {
            round: Round(5),
            team_id: TeamId(3),
            challenge_id: ChallengeId(8),
        };
        let msg = err.to_string();
        assert!(msg.contains("round 5"));
        assert!(msg.contains("team 3"));
        assert!(msg.contains("challenge 8"));
        assert!(err.is_integrity_violation());
    }

    #[test]
    fn test_storage_error_is_not_integrity_violation() {
        let err: SettlementError = StorageError::Backend("down".to_string()).into();
        assert!(!err.is_integrity_violation());
        assert!(err.to_string().contains("down"));
    }

    #[test]
    fn test_timeout_displays_limit() {
        let err = SettlementError::Timeout {
            round: Round(2),
            limit_ms: 1500,
        };
        assert!(err.to_string().contains("1500 ms"));
    }
}
