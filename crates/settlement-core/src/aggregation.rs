//! Aggregate recomputation.
//!
//! Scores are always rebuilt from the full ledger and written as keyed
//! overwrites, never incremented, so running this any number of times over
//! the same ledger yields the same totals.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use scoreboard_state::{
    Aggregates, Challenge, ChallengeId, LedgerEntry, ScoreStore, Target, TargetId, TargetScore,
    Team, TeamId, TeamScore,
};
use tracing::info;

use crate::error::{SettlementError, SettlementResult};

/// Compute target and team scores.
///
/// - target = challenge base score + sum of the target's ledger deltas
/// - team = sum of the team's visible target scores (0 when it has none)
pub fn compute_aggregates<'a>(
    teams: impl IntoIterator<Item = &'a Team>,
    challenges: impl IntoIterator<Item = &'a Challenge>,
    targets: impl IntoIterator<Item = &'a Target>,
    ledger_totals: &HashMap<TargetId, f64>,
) -> SettlementResult<Aggregates> {
    let base: HashMap<ChallengeId, f64> = challenges
        .into_iter()
        .map(|c| (c.id, c.base_score))
        .collect();

    let mut team_totals: BTreeMap<TeamId, f64> =
        teams.into_iter().map(|t| (t.id, 0.0)).collect();
    let mut target_scores = Vec::new();

    for target in targets {
        let base_score =
            base.get(&target.challenge_id)
                .copied()
                .ok_or(SettlementError::MissingChallenge {
                    target_id: target.id,
                    challenge_id: target.challenge_id,
                })?;
        let score = base_score + ledger_totals.get(&target.id).copied().unwrap_or(0.0);
        target_scores.push(TargetScore {
            target_id: target.id,
            score,
        });

        if target.visible {
            let team_total =
                team_totals
                    .get_mut(&target.team_id)
                    .ok_or(SettlementError::OrphanTarget {
                        target_id: target.id,
                        team_id: target.team_id,
                    })?;
            *team_total += score;
        }
    }

    Ok(Aggregates {
        targets: target_scores,
        teams: team_totals
            .into_iter()
            .map(|(team_id, score)| TeamScore { team_id, score })
            .collect(),
    })
}

/// Fold pending (not yet committed) entries into stored ledger totals.
pub fn with_pending(
    mut totals: HashMap<TargetId, f64>,
    pending: &[LedgerEntry],
) -> HashMap<TargetId, f64> {
    for entry in pending {
        *totals.entry(entry.target_id).or_default() += entry.delta;
    }
    totals
}

/// Store-facing aggregation: read the ledger, recompute, overwrite.
pub struct Aggregator {
    store: Arc<dyn ScoreStore>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn ScoreStore>) -> Self {
        Self { store }
    }

    /// Recompute every target and team score from the stored ledger.
    ///
    /// Fails with `StaleLedger` if a round commit lands between reading the
    /// totals and writing the scores; nothing is written in that case.
    pub async fn recompute(&self) -> SettlementResult<Aggregates> {
        let (teams, challenges, targets, totals) = tokio::try_join!(
            self.store.teams(),
            self.store.challenges(),
            self.store.targets(),
            self.store.ledger_totals(),
        )?;

        let aggregates = compute_aggregates(&teams, &challenges, &targets, &totals.by_target)?;
        self.store
            .write_aggregates(&aggregates, totals.revision)
            .await?;

        info!(
            event = "aggregation.recomputed",
            revision = %totals.revision,
            targets = aggregates.targets.len(),
            teams = aggregates.teams.len(),
        );
        Ok(aggregates)
    }
}
