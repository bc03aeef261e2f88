//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryScoreStore`, which satisfies the `ScoreStore` and
//! `CompetitionRegistry` contracts without any external dependencies, plus
//! switches for injecting backend failures, slow reads and slow commits
//! (before or after the commit is applied).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug, Default)]
struct State {
    teams: BTreeMap<TeamId, Team>,
    challenges: BTreeMap<ChallengeId, Challenge>,
    targets: BTreeMap<TargetId, Target>,
    attacks: Vec<AttackEvent>,
    failures: Vec<AvailabilityFailure>,
    entries: Vec<LedgerEntry>,
    settled: BTreeMap<Round, SettledRound>,
}

impl State {
    fn revision(&self) -> LedgerRevision {
        LedgerRevision(self.entries.len() as u64)
    }

    fn ensure_revision(&self, base: LedgerRevision) -> StorageResult<()> {
        let current = self.revision();
        if current == base {
            Ok(())
        } else {
            Err(StorageError::StaleLedger {
                expected: base.0,
                actual: current.0,
            })
        }
    }
}

/// In-memory score store. Every write happens under a single lock, so a
/// commit is observed entirely or not at all.
#[derive(Debug, Default)]
pub struct MemoryScoreStore {
    state: Mutex<State>,
    fail_reads: AtomicBool,
    fail_commits: AtomicBool,
    read_delay: Mutex<Option<Duration>>,
    commit_delay: Mutex<Option<Duration>>,
    post_commit_delay: Mutex<Option<Duration>>,
}

impl MemoryScoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent read return `StorageError::Backend`.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent commit/aggregate write return `StorageError::Backend`.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Sleep for `delay` before every read.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.read_delay.lock() {
            *slot = delay;
        }
    }

    /// Sleep for `delay` before applying each commit.
    pub fn set_commit_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.commit_delay.lock() {
            *slot = delay;
        }
    }

    /// Sleep for `delay` after a commit has been applied, before it returns.
    pub fn set_post_commit_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.post_commit_delay.lock() {
            *slot = delay;
        }
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| StorageError::Backend(format!("memory store poisoned: {e}")))
    }

    async fn read(&self) -> StorageResult<MutexGuard<'_, State>> {
        sleep_for(&self.read_delay).await;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected read failure".to_string()));
        }
        self.lock()
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected commit failure".to_string()));
        }
        Ok(())
    }

    async fn apply_delay(&self) {
        sleep_for(&self.commit_delay).await;
    }

    async fn apply_post_commit_delay(&self) {
        sleep_for(&self.post_commit_delay).await;
    }
}

async fn sleep_for(slot: &Mutex<Option<Duration>>) {
    let delay = slot.lock().ok().and_then(|slot| *slot);
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

/// Validate every key first, then overwrite; a bad key leaves state untouched.
fn apply_aggregates(state: &mut State, aggregates: &Aggregates) -> StorageResult<()> {
    if let Some(t) = aggregates
        .targets
        .iter()
        .find(|t| !state.targets.contains_key(&t.target_id))
    {
        return Err(StorageError::TargetNotFound {
            target_id: t.target_id.0,
        });
    }
    if let Some(t) = aggregates
        .teams
        .iter()
        .find(|t| !state.teams.contains_key(&t.team_id))
    {
        return Err(StorageError::TeamNotFound { team_id: t.team_id.0 });
    }

    for update in &aggregates.targets {
        if let Some(target) = state.targets.get_mut(&update.target_id) {
            target.score = update.score;
        }
    }
    for update in &aggregates.teams {
        if let Some(team) = state.teams.get_mut(&update.team_id) {
            team.score = update.score;
        }
    }
    Ok(())
}

#[async_trait]
impl ScoreStore for MemoryScoreStore {
    async fn teams(&self) -> StorageResult<Vec<Team>> {
        Ok(self.read().await?.teams.values().cloned().collect())
    }

    async fn challenges(&self) -> StorageResult<Vec<Challenge>> {
        Ok(self.read().await?.challenges.values().cloned().collect())
    }

    async fn targets(&self) -> StorageResult<Vec<Target>> {
        Ok(self.read().await?.targets.values().cloned().collect())
    }

    async fn attack_events(&self, round: Round) -> StorageResult<Vec<AttackEvent>> {
        let state = self.read().await?;
        Ok(state
            .attacks
            .iter()
            .filter(|e| e.round == round)
            .cloned()
            .collect())
    }

    async fn availability_failures(
        &self,
        round: Round,
    ) -> StorageResult<Vec<AvailabilityFailure>> {
        let state = self.read().await?;
        Ok(state
            .failures
            .iter()
            .filter(|e| e.round == round)
            .cloned()
            .collect())
    }

    async fn ledger_entries(&self, round: Option<Round>) -> StorageResult<Vec<LedgerEntry>> {
        let state = self.read().await?;
        Ok(state
            .entries
            .iter()
            .filter(|e| round.map(|r| e.round == r).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn ledger_totals(&self) -> StorageResult<LedgerTotals> {
        let state = self.read().await?;
        let mut by_target: HashMap<TargetId, f64> = HashMap::new();
        for entry in &state.entries {
            *by_target.entry(entry.target_id).or_default() += entry.delta;
        }
        Ok(LedgerTotals {
            revision: state.revision(),
            by_target,
        })
    }

    async fn settled_round(&self, round: Round) -> StorageResult<Option<SettledRound>> {
        Ok(self.read().await?.settled.get(&round).cloned())
    }

    async fn commit_round(&self, commit: RoundCommit) -> StorageResult<SettledRound> {
        self.apply_delay().await;
        self.check_writable()?;

        let marker = {
            let mut state = self.lock()?;
            if state.settled.contains_key(&commit.round) {
                return Err(StorageError::RoundAlreadySettled {
                    round: commit.round.0,
                });
            }
            state.ensure_revision(commit.base_revision)?;
            apply_aggregates(&mut state, &commit.aggregates)?;

            let marker = SettledRound {
                round: commit.round,
                entry_count: commit.entries.len() as u64,
                settled_at: Utc::now(),
            };
            state.entries.extend(commit.entries);
            state.settled.insert(commit.round, marker.clone());
            marker
        };

        self.apply_post_commit_delay().await;
        Ok(marker)
    }

    async fn write_aggregates(
        &self,
        aggregates: &Aggregates,
        base: LedgerRevision,
    ) -> StorageResult<()> {
        self.check_writable()?;
        let mut state = self.lock()?;
        state.ensure_revision(base)?;
        apply_aggregates(&mut state, aggregates)
    }
}

#[async_trait]
impl CompetitionRegistry for MemoryScoreStore {
    async fn register_team(&self, id: TeamId, name: &str) -> StorageResult<Team> {
        let mut state = self.lock()?;
        if state.teams.contains_key(&id) {
            return Err(StorageError::Duplicate { kind: "team", id: id.0 });
        }
        let team = Team {
            id,
            name: name.to_string(),
            score: 0.0,
        };
        state.teams.insert(id, team.clone());
        Ok(team)
    }

    async fn register_challenge(
        &self,
        id: ChallengeId,
        title: &str,
        base_score: f64,
    ) -> StorageResult<Challenge> {
        let mut state = self.lock()?;
        if state.challenges.contains_key(&id) {
            return Err(StorageError::Duplicate {
                kind: "challenge",
                id: id.0,
            });
        }
        let challenge = Challenge {
            id,
            title: title.to_string(),
            base_score,
        };
        state.challenges.insert(id, challenge.clone());
        Ok(challenge)
    }

    async fn register_target(
        &self,
        id: TargetId,
        team_id: TeamId,
        challenge_id: ChallengeId,
        visible: bool,
    ) -> StorageResult<Target> {
        let mut state = self.lock()?;
        if state.targets.contains_key(&id) {
            return Err(StorageError::Duplicate {
                kind: "target",
                id: id.0,
            });
        }
        let target = Target {
            id,
            team_id,
            challenge_id,
            visible,
            score: 0.0,
        };
        state.targets.insert(id, target.clone());
        Ok(target)
    }

    async fn record_attack(&self, event: AttackEvent) -> StorageResult<()> {
        self.lock()?.attacks.push(event);
        Ok(())
    }

    async fn record_availability_failure(
        &self,
        event: AvailabilityFailure,
    ) -> StorageResult<()> {
        self.lock()?.failures.push(event);
        Ok(())
    }
}
