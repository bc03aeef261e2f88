//! Availability settlement.
//!
//! Each failure costs its target `check_down_score`. Per challenge, the
//! collected penalties form a pool that is split evenly among the targets of
//! that challenge that did not fail. When every target failed there is
//! nobody to pay: the pool is forfeited and reported.

use std::collections::{BTreeMap, BTreeSet};

use scoreboard_state::{ChallengeId, LedgerEntry, Round, ScoreReason, TargetId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ScoringConfig;
use crate::error::{SettlementError, SettlementResult};
use crate::snapshot::RoundSnapshot;

/// A bonus pool that had no safe target to go to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForfeitedPool {
    pub challenge_id: ChallengeId,
    pub round: Round,
    pub failures: usize,
    pub amount: f64,
}

/// Ledger entries produced by availability settlement.
#[derive(Debug, Clone, Default)]
pub struct AvailabilitySettlement {
    pub entries: Vec<LedgerEntry>,
    pub forfeited: Vec<ForfeitedPool>,
}

/// Settle all availability failures in `snapshot`.
pub fn settle_availability(
    snapshot: &RoundSnapshot,
    config: &ScoringConfig,
) -> SettlementResult<AvailabilitySettlement> {
    let round = snapshot.round();
    let mut entries = Vec::new();

    // challenge -> (failure count, failing target ids)
    let mut by_challenge: BTreeMap<ChallengeId, (usize, BTreeSet<TargetId>)> = BTreeMap::new();

    for failure in snapshot.failures() {
        let target = snapshot.target(failure.target_id)?;
        snapshot.require_team(failure.team_id)?;
        if target.team_id != failure.team_id || target.challenge_id != failure.challenge_id {
            return Err(SettlementError::TargetOwnershipMismatch {
                round,
                target_id: failure.target_id,
                team_id: failure.team_id,
                challenge_id: failure.challenge_id,
            });
        }

        entries.push(LedgerEntry::new(
            failure.team_id,
            failure.target_id,
            round,
            ScoreReason::AvailabilityLoss,
            -config.check_down_score,
        ));

        let slot = by_challenge.entry(failure.challenge_id).or_default();
        slot.0 += 1;
        slot.1.insert(failure.target_id);
    }

    let mut forfeited = Vec::new();
    for (challenge_id, (failures, down)) in by_challenge {
        let pool = failures as f64 * config.check_down_score;
        let safe: Vec<_> = snapshot
            .targets_of(challenge_id)
            .filter(|t| !down.contains(&t.id))
            .collect();

        if safe.is_empty() {
            warn!(
                event = "settlement.pool_forfeited",
                round = %round,
                challenge_id = %challenge_id,
                failures = failures,
                amount = pool,
                "every target of the challenge failed; bonus pool forfeited"
            );
            forfeited.push(ForfeitedPool {
                challenge_id,
                round,
                failures,
                amount: pool,
            });
            continue;
        }

        let share = pool / safe.len() as f64;
        for target in &safe {
            snapshot.require_team(target.team_id)?;
            entries.push(LedgerEntry::new(
                target.team_id,
                target.id,
                round,
                ScoreReason::AvailabilityGain,
                share,
            ));
        }

        debug!(
            round = %round,
            challenge_id = %challenge_id,
            failures = failures,
            safe_targets = safe.len(),
            share = share,
            "availability pool distributed"
        );
    }

    Ok(AvailabilitySettlement { entries, forfeited })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scoreboard_state::{AvailabilityFailure, Challenge, Target, Team, TeamId};

    /// Teams 1..=4, one challenge, target id = team * 10 + 1.
    fn snapshot(failing_teams: &[u64]) -> RoundSnapshot {
        let teams = (1..=4)
            .map(|t| Team {
                id: TeamId(t),
                name: format!("team-{t}"),
                score: 0.0,
            })
            .collect();
        let targets = (1..=4)
            .map(|t| Target {
                id: TargetId(t * 10 + 1),
                team_id: TeamId(t),
                challenge_id: ChallengeId(1),
                visible: true,
                score: 0.0,
            })
            .collect();
        let failures = failing_teams
            .iter()
            .map(|&t| AvailabilityFailure {
                team_id: TeamId(t),
                target_id: TargetId(t * 10 + 1),
                challenge_id: ChallengeId(1),
                round: Round(6),
            })
            .collect();
        RoundSnapshot::from_parts(
            Round(6),
            teams,
            vec![Challenge {
                id: ChallengeId(1),
                title: "pwn".to_string(),
                base_score: 1000.0,
            }],
            targets,
            Vec::new(),
            failures,
        )
    }

    fn total(entries: &[LedgerEntry], reason: ScoreReason) -> f64 {
        entries
            .iter()
            .filter(|e| e.reason == reason)
            .map(|e| e.delta)
            .sum()
    }

    #[test]
    fn test_one_failure_split_among_three() {
        let out = settle_availability(&snapshot(&[2]), &ScoringConfig::new(100.0, 20.0)).unwrap();

        let losses: Vec<_> = out
            .entries
            .iter()
            .filter(|e| e.reason == ScoreReason::AvailabilityLoss)
            .collect();
        assert_eq!(losses.len(), 1);
        assert_eq!(losses[0].team_id, TeamId(2));
        assert_eq!(losses[0].delta, -20.0);

        let gains: Vec<_> = out
            .entries
            .iter()
            .filter(|e| e.reason == ScoreReason::AvailabilityGain)
            .collect();
        assert_eq!(gains.len(), 3);
        assert!(gains.iter().all(|e| (e.delta - 20.0 / 3.0).abs() < 1e-9));
        assert!(gains.iter().all(|e| e.team_id != TeamId(2)));
        assert!(out.forfeited.is_empty());
    }

    #[test]
    fn test_pool_conserved() {
        let out =
            settle_availability(&snapshot(&[1, 3]), &ScoringConfig::new(100.0, 35.0)).unwrap();
        let gains = total(&out.entries, ScoreReason::AvailabilityGain);
        let losses = total(&out.entries, ScoreReason::AvailabilityLoss);
        assert!((gains + losses).abs() < 1e-9);
        assert!((gains - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_down_forfeits_pool() {
        let out = settle_availability(&snapshot(&[1, 2, 3, 4]), &ScoringConfig::new(100.0, 20.0))
            .unwrap();

        assert_eq!(out.entries.len(), 4);
        assert!(out
            .entries
            .iter()
            .all(|e| e.reason == ScoreReason::AvailabilityLoss && e.delta == -20.0));
        assert_eq!(
            out.forfeited,
            vec![ForfeitedPool {
                challenge_id: ChallengeId(1),
                round: Round(6),
                failures: 4,
                amount: 80.0,
            }]
        );
    }

    #[test]
    fn test_no_failures_no_entries() {
        let out = settle_availability(&snapshot(&[]), &ScoringConfig::default()).unwrap();
        assert!(out.entries.is_empty());
        assert!(out.forfeited.is_empty());
    }

    #[test]
    fn test_repeated_failure_compounds() {
        let out =
            settle_availability(&snapshot(&[4, 4]), &ScoringConfig::new(100.0, 10.0)).unwrap();
        assert_eq!(total(&out.entries, ScoreReason::AvailabilityLoss), -20.0);
        // Pool of 20 split among the three safe targets.
        assert!((total(&out.entries, ScoreReason::AvailabilityGain) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_ownership_mismatch_aborts() {
        // Target 21 belongs to team 2, not team 1.
        let base = snapshot(&[]);
        let snap = RoundSnapshot::from_parts(
            Round(6),
            base.teams().cloned().collect(),
            base.challenges().cloned().collect(),
            base.targets().cloned().collect(),
            Vec::new(),
            vec![AvailabilityFailure {
                team_id: TeamId(1),
                target_id: TargetId(21),
                challenge_id: ChallengeId(1),
                round: Round(6),
            }],
        );
        let err = settle_availability(&snap, &ScoringConfig::default()).unwrap_err();
        assert!(matches!(err, SettlementError::TargetOwnershipMismatch { .. }));
    }
}
