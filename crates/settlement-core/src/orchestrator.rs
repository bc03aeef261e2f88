//! Round settlement orchestrator.
//!
//! Settles the most recently completed round as one logical unit:
//!
//! 1. bulk-load the round snapshot
//! 2. attack settlement, availability settlement (pure, in memory)
//! 3. aggregation over historic ledger totals plus the pending entries
//! 4. one atomic `commit_round` carrying the round marker, every entry,
//!    every aggregate and the ledger revision the aggregates were built on
//!
//! Steps 1 to 3 run under the settlement timeout and write nothing. Step 4 is
//! never cancelled once started, so a report always matches what the store
//! holds. Any error before step 4 completes leaves the store exactly as it was.

use std::sync::Arc;
use std::time::Instant;

use scoreboard_state::{Round, RoundCommit, ScoreStore, StorageError};
use tokio::sync::Mutex;
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::aggregation::{compute_aggregates, with_pending, Aggregator};
use crate::attack::settle_attacks;
use crate::availability::{settle_availability, ForfeitedPool};
use crate::clock::RoundClock;
use crate::config::ScoringConfig;
use crate::error::{SettlementError, SettlementResult};
use crate::obs;
use crate::report::{SettlementOutcome, SettlementReport};
use crate::snapshot::RoundSnapshot;

#[derive(Debug, Default)]
struct Settled {
    entries_written: usize,
    attack_events: usize,
    targets_attacked: usize,
    availability_failures: usize,
    forfeited: Vec<ForfeitedPool>,
    already_settled: bool,
}

enum Prepared {
    AlreadySettled,
    Ready { commit: RoundCommit, settled: Settled },
}

/// Sequences one round's settlement against a store.
pub struct RoundSettlement {
    store: Arc<dyn ScoreStore>,
    clock: Arc<dyn RoundClock>,
    config: ScoringConfig,
    running: Mutex<()>,
}

impl RoundSettlement {
    /// Fails with `InvalidConfig` if `config` does not validate.
    pub fn new(
        store: Arc<dyn ScoreStore>,
        clock: Arc<dyn RoundClock>,
        config: ScoringConfig,
    ) -> SettlementResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            clock,
            config,
            running: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// The round the next call to `settle_round` will settle.
    pub fn round_to_settle(&self) -> SettlementResult<Round> {
        let current = self.clock.current_round();
        current
            .previous()
            .ok_or(SettlementError::NoCompletedRound { current })
    }

    /// Settle `current_round - 1` and report how it went.
    ///
    /// Never panics and never returns an error: failures are reported with
    /// `SettlementOutcome::Failure` and the error text. Calls on one
    /// orchestrator are serialized. A settlement whose ledger read is
    /// overtaken by a commit from elsewhere fails with `StaleLedger` and
    /// writes nothing.
    pub async fn settle_round(&self) -> SettlementReport {
        let _running = self.running.lock().await;

        let attempt_id = Uuid::new_v4();
        let started = Instant::now();
        let round = self.round_to_settle();
        let mut report = SettlementReport::begin(attempt_id, round.as_ref().ok().copied());
        let span = obs::settlement_span(attempt_id, report.round);

        let result = async move {
            let round = round?;
            obs::emit_settlement_started(round);
            self.settle(round).await
        }
        .instrument(span.clone())
        .await;

        report.duration_secs = started.elapsed().as_secs_f64();
        let _entered = span.enter();
        match result {
            Ok(settled) => {
                report.outcome = SettlementOutcome::Success;
                report.entries_written = settled.entries_written;
                report.attack_events = settled.attack_events;
                report.targets_attacked = settled.targets_attacked;
                report.availability_failures = settled.availability_failures;
                report.forfeited = settled.forfeited;
                report.already_settled = settled.already_settled;
                obs::emit_settlement_finished(&report);
            }
            Err(err) => {
                report.error = Some(err.to_string());
                obs::emit_settlement_failed(&report);
            }
        }
        report
    }

    async fn settle(&self, round: Round) -> SettlementResult<Settled> {
        let prepared = tokio::time::timeout(self.config.settle_timeout(), self.prepare(round))
            .await
            .map_err(|_| SettlementError::Timeout {
                round,
                limit_ms: self.config.settle_timeout_ms,
            })??;

        match prepared {
            Prepared::AlreadySettled => self.refresh_only().await,
            Prepared::Ready { commit, settled } => self.commit(commit, settled).await,
        }
    }

    /// Read and compute everything the commit needs. Writes nothing.
    async fn prepare(&self, round: Round) -> SettlementResult<Prepared> {
        if let Some(marker) = self.store.settled_round(round).await? {
            info!(
                round = %round,
                settled_at = %marker.settled_at,
                entries = marker.entry_count,
                "round already settled; refreshing aggregates only"
            );
            return Ok(Prepared::AlreadySettled);
        }

        let snapshot = RoundSnapshot::load(self.store.as_ref(), round).await?;
        let attacks = settle_attacks(&snapshot, &self.config)?;
        let availability = settle_availability(&snapshot, &self.config)?;

        let mut entries = attacks.entries;
        entries.extend(availability.entries);

        let totals = self.store.ledger_totals().await?;
        let aggregates = compute_aggregates(
            snapshot.teams(),
            snapshot.challenges(),
            snapshot.targets(),
            &with_pending(totals.by_target, &entries),
        )?;

        let settled = Settled {
            entries_written: entries.len(),
            attack_events: attacks.attack_events,
            targets_attacked: attacks.targets_attacked,
            availability_failures: snapshot.failures().len(),
            forfeited: availability.forfeited,
            already_settled: false,
        };
        let commit = RoundCommit {
            round,
            base_revision: totals.revision,
            entries,
            aggregates,
        };
        Ok(Prepared::Ready { commit, settled })
    }

    async fn commit(&self, commit: RoundCommit, settled: Settled) -> SettlementResult<Settled> {
        let round = commit.round;
        match self.store.commit_round(commit).await {
            Ok(marker) => Ok(Settled {
                entries_written: marker.entry_count as usize,
                ..settled
            }),
            // Another process committed this round between our check and our commit.
            Err(StorageError::RoundAlreadySettled { .. }) => {
                info!(round = %round, "round settled concurrently; discarding local result");
                self.refresh_only().await
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn refresh_only(&self) -> SettlementResult<Settled> {
        Aggregator::new(self.store.clone()).recompute().await?;
        Ok(Settled {
            already_settled: true,
            ..Settled::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{FixedRoundClock, ManualRoundClock};
    use scoreboard_state::fakes::MemoryScoreStore;
    use scoreboard_state::{AttackEvent, ChallengeId, CompetitionRegistry, TargetId, TeamId};

    async fn seeded() -> Arc<MemoryScoreStore> {
        let store = Arc::new(MemoryScoreStore::new());
        for t in 1..=2 {
            store.register_team(TeamId(t), &format!("team-{t}")).await.unwrap();
        }
        store
            .register_challenge(ChallengeId(1), "web", 1000.0)
            .await
            .unwrap();
        store
            .register_target(TargetId(11), TeamId(1), ChallengeId(1), true)
            .await
            .unwrap();
        store
            .register_target(TargetId(21), TeamId(2), ChallengeId(1), true)
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_invalid_config_rejected() {
        let store = Arc::new(MemoryScoreStore::new());
        let result = RoundSettlement::new(
            store,
            Arc::new(FixedRoundClock(Round(2))),
            ScoringConfig::new(-5.0, 20.0),
        );
        assert!(matches!(result, Err(SettlementError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_round_one_has_nothing_to_settle() {
        let store = seeded().await;
        let settlement = RoundSettlement::new(
            store,
            Arc::new(FixedRoundClock(Round(1))),
            ScoringConfig::default(),
        )
        .unwrap();

        let report = settlement.settle_round().await;
        assert_eq!(report.outcome, SettlementOutcome::Failure);
        assert_eq!(report.round, None);
        assert!(report.error.unwrap().contains("no completed round"));
    }

    #[tokio::test]
    async fn test_settles_previous_round() {
        let store = seeded().await;
        store
            .record_attack(AttackEvent {
                attacker_team_id: TeamId(1),
                victim_target_id: TargetId(21),
                round: Round(3),
            })
            .await
            .unwrap();

        let clock = Arc::new(ManualRoundClock::new(Round(3)));
        let settlement =
            RoundSettlement::new(store.clone(), clock.clone(), ScoringConfig::new(100.0, 20.0))
                .unwrap();

        // Round 2 had no events.
        let report = settlement.settle_round().await;
        assert!(report.is_success());
        assert_eq!(report.round, Some(Round(2)));
        assert_eq!(report.entries_written, 0);

        clock.advance();
        let report = settlement.settle_round().await;
        assert!(report.is_success());
        assert_eq!(report.round, Some(Round(3)));
        assert_eq!(report.entries_written, 2);
        assert_eq!(report.attack_events, 1);
        assert!(store.settled_round(Round(3)).await.unwrap().is_some());
    }
}
