//! Bulk-loaded view of everything one round's settlement reads.
//!
//! One read per table (and per round for events), then in-memory indexes by
//! target, by challenge and by (team, challenge). The settlement stages are
//! pure functions over this snapshot.

use std::collections::BTreeMap;

use scoreboard_state::{
    AttackEvent, AvailabilityFailure, Challenge, ChallengeId, Round, ScoreStore, Target, TargetId,
    Team, TeamId,
};

use crate::error::{SettlementError, SettlementResult};

#[derive(Debug, Clone)]
pub struct RoundSnapshot {
    round: Round,
    teams: BTreeMap<TeamId, Team>,
    challenges: BTreeMap<ChallengeId, Challenge>,
    targets: BTreeMap<TargetId, Target>,
    by_challenge: BTreeMap<ChallengeId, Vec<TargetId>>,
    by_owner: BTreeMap<(TeamId, ChallengeId), Vec<TargetId>>,
    attacks: Vec<AttackEvent>,
    failures: Vec<AvailabilityFailure>,
}

impl RoundSnapshot {
    /// Read the entities and `round`'s events from `store`.
    pub async fn load(store: &dyn ScoreStore, round: Round) -> SettlementResult<Self> {
        let (teams, challenges, targets, attacks, failures) = tokio::try_join!(
            store.teams(),
            store.challenges(),
            store.targets(),
            store.attack_events(round),
            store.availability_failures(round),
        )?;
        Ok(Self::from_parts(
            round, teams, challenges, targets, attacks, failures,
        ))
    }

    /// Build a snapshot from already-loaded records.
    ///
    /// Events belonging to other rounds are dropped.
    pub fn from_parts(
        round: Round,
        teams: Vec<Team>,
        challenges: Vec<Challenge>,
        targets: Vec<Target>,
        attacks: Vec<AttackEvent>,
        failures: Vec<AvailabilityFailure>,
    ) -> Self {
        let mut by_challenge: BTreeMap<ChallengeId, Vec<TargetId>> = BTreeMap::new();
        let mut by_owner: BTreeMap<(TeamId, ChallengeId), Vec<TargetId>> = BTreeMap::new();
        for target in &targets {
            by_challenge
                .entry(target.challenge_id)
                .or_default()
                .push(target.id);
            by_owner
                .entry((target.team_id, target.challenge_id))
                .or_default()
                .push(target.id);
        }

        Self {
            round,
            teams: teams.into_iter().map(|t| (t.id, t)).collect(),
            challenges: challenges.into_iter().map(|c| (c.id, c)).collect(),
            targets: targets.into_iter().map(|t| (t.id, t)).collect(),
            by_challenge,
            by_owner,
            attacks: attacks.into_iter().filter(|e| e.round == round).collect(),
            failures: failures.into_iter().filter(|e| e.round == round).collect(),
        }
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn attacks(&self) -> &[AttackEvent] {
        &self.attacks
    }

    pub fn failures(&self) -> &[AvailabilityFailure] {
        &self.failures
    }

    pub fn teams(&self) -> impl Iterator<Item = &Team> {
        self.teams.values()
    }

    pub fn challenges(&self) -> impl Iterator<Item = &Challenge> {
        self.challenges.values()
    }

    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.values()
    }

    pub fn target(&self, id: TargetId) -> SettlementResult<&Target> {
        self.targets
            .get(&id)
            .ok_or(SettlementError::MissingTarget {
                round: self.round,
                target_id: id,
            })
    }

    pub fn require_team(&self, id: TeamId) -> SettlementResult<&Team> {
        self.teams.get(&id).ok_or(SettlementError::MissingTeam {
            round: self.round,
            team_id: id,
        })
    }

    /// The single target `team` runs for `challenge`.
    pub fn target_for(&self, team: TeamId, challenge: ChallengeId) -> SettlementResult<&Target> {
        match self.by_owner.get(&(team, challenge)).map(Vec::as_slice) {
            Some([only]) => self.target(*only),
            Some([_, _, ..]) => Err(SettlementError::AmbiguousTarget {
                team_id: team,
                challenge_id: challenge,
            }),
            _ => Err(SettlementError::AttackerHasNoTarget {
                round: self.round,
                team_id: team,
                challenge_id: challenge,
            }),
        }
    }

    /// All targets of `challenge`, in id order.
    pub fn targets_of(&self, challenge: ChallengeId) -> impl Iterator<Item = &Target> {
        self.by_challenge
            .get(&challenge)
            .into_iter()
            .flatten()
            .filter_map(|id| self.targets.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: u64, team: u64, challenge: u64) -> Target {
        Target {
            id: TargetId(id),
            team_id: TeamId(team),
            challenge_id: ChallengeId(challenge),
            visible: true,
            score: 0.0,
        }
    }

    fn snapshot(targets: Vec<Target>) -> RoundSnapshot {
        RoundSnapshot::from_parts(
            Round(3),
            Vec::new(),
            Vec::new(),
            targets,
            vec![
                AttackEvent {
                    attacker_team_id: TeamId(1),
                    victim_target_id: TargetId(21),
                    round: Round(3),
                },
                AttackEvent {
                    attacker_team_id: TeamId(1),
                    victim_target_id: TargetId(21),
                    round: Round(2),
                },
            ],
            Vec::new(),
        )
    }

    #[test]
    fn test_events_from_other_rounds_dropped() {
        let snap = snapshot(vec![target(11, 1, 1)]);
        assert_eq!(snap.attacks().len(), 1);
    }

    #[test]
    fn test_target_for_filters_by_challenge() {
        let snap = snapshot(vec![target(11, 1, 1), target(12, 1, 2), target(21, 2, 1)]);
        assert_eq!(snap.target_for(TeamId(1), ChallengeId(2)).unwrap().id, TargetId(12));
        assert_eq!(snap.target_for(TeamId(1), ChallengeId(1)).unwrap().id, TargetId(11));
    }

    #[test]
    fn test_target_for_missing_is_error() {
        let snap = snapshot(vec![target(11, 1, 1)]);
        let err = snap.target_for(TeamId(1), ChallengeId(9)).unwrap_err();
        assert!(matches!(err, SettlementError::AttackerHasNoTarget { .. }));
    }

    #[test]
    fn test_target_for_duplicate_is_ambiguous() {
        let snap = snapshot(vec![target(11, 1, 1), target(13, 1, 1)]);
        let err = snap.target_for(TeamId(1), ChallengeId(1)).unwrap_err();
        assert!(matches!(err, SettlementError::AmbiguousTarget { .. }));
    }

    #[test]
    fn test_targets_of_challenge() {
        let snap = snapshot(vec![target(11, 1, 1), target(12, 1, 2), target(21, 2, 1)]);
        let ids: Vec<_> = snap.targets_of(ChallengeId(1)).map(|t| t.id).collect();
        assert_eq!(ids, vec![TargetId(11), TargetId(21)]);
        assert_eq!(snap.targets_of(ChallengeId(7)).count(), 0);
    }
}
