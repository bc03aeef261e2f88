//! SurrealDB-backed ScoreStore and CompetitionRegistry
//!
//! Uses the row types in `schema` for persistence, converting to/from
//! `storage_traits` types at the boundary. Reads are bulk (one query per
//! table and round); the round commit is a single SurrealQL transaction.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::handle::{self, CloudConfig};
use crate::schema::{
    AttackEventRow, AvailabilityFailureRow, ChallengeRow, ScoreEntryRow, SettledRoundRow,
    TargetRow, TeamRow,
};
use crate::storage_traits::{
    Aggregates, AttackEvent, AvailabilityFailure, Challenge, ChallengeId, CompetitionRegistry,
    LedgerEntry, LedgerRevision, Round, RoundCommit, ScoreStore, SettledRound, StorageResult, Target, TargetId,
    Team, TeamId,
};

/// Abort the enclosing transaction unless the ledger still holds `$base`
/// entries.
const GUARD_REVISION: &str = r#"
    LET $revision = array::len((SELECT VALUE id FROM score_entries));
    IF $revision != $base { THROW "stale ledger revision"; };
"#;

/// Keyed aggregate overwrite; shared by `commit_round` and `write_aggregates`.
const UPDATE_AGGREGATES: &str = r#"
    FOR $t IN $targets { UPDATE targets SET score = $t.score WHERE target_id = $t.target_id; };
    FOR $t IN $teams { UPDATE teams SET score = $t.score WHERE team_id = $t.team_id; };
"#;

/// SurrealDB-backed implementation of [`ScoreStore`] and [`CompetitionRegistry`].
#[derive(Clone)]
pub struct SurrealScoreStore {
    db: Surreal<Any>,
}

impl SurrealScoreStore {
    /// Create an in-memory instance for testing.
    ///
    /// Connects to `mem://`, selects `scoreboard/main`, and runs `init_schema`.
    pub async fn in_memory() -> crate::Result<Self> {
        let db = handle::connect_url("mem://").await?;
        info!("SurrealScoreStore connected (in-memory)");
        Ok(Self { db })
    }

    /// Connect to an explicit URL (`ws://`, `surrealkv://`, `mem://`, ...).
    pub async fn connect(url: &str) -> crate::Result<Self> {
        let db = handle::connect_url(url).await?;
        info!("SurrealScoreStore connected ({})", url);
        Ok(Self { db })
    }

    /// Connect to an authenticated endpoint.
    pub async fn connect_cloud(config: &CloudConfig) -> crate::Result<Self> {
        let db = handle::connect_cloud(config).await?;
        info!("SurrealScoreStore connected (cloud)");
        Ok(Self { db })
    }

    /// Create from environment variables.
    ///
    /// See [`CloudConfig::from_env`] for the variables consulted.
    pub async fn from_env() -> crate::Result<Self> {
        let db = handle::connect_from_env().await?;
        Ok(Self { db })
    }

    // -- private helpers -----------------------------------------------------

    async fn select_all<T>(&self, sql: &'static str) -> StorageResult<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut res = self.db.query(sql).await?;
        Ok(res.take(0)?)
    }

    async fn select_by_round<T>(&self, sql: &'static str, round: Round) -> StorageResult<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut res = self.db.query(sql).bind(("round", round.0)).await?;
        Ok(res.take(0)?)
    }

    /// Ok if no row in `table` has `key_field = id`.
    async fn ensure_absent(
        &self,
        table: &'static str,
        key_field: &'static str,
        kind: &'static str,
        id: u64,
    ) -> StorageResult<()> {
        let sql = format!("SELECT VALUE {key_field} FROM {table} WHERE {key_field} = $id");
        let mut res = self.db.query(sql).bind(("id", id)).await?;
        let existing: Vec<u64> = res.take(0)?;
        if existing.is_empty() {
            Ok(())
        } else {
            Err(StorageError::Duplicate { kind, id })
        }
    }

    async fn current_revision(&self) -> StorageResult<LedgerRevision> {
        let mut res = self
            .db
            .query("RETURN array::len((SELECT VALUE id FROM score_entries));")
            .await?;
        let count: Option<u64> = res.take(0)?;
        Ok(LedgerRevision(count.unwrap_or(0)))
    }

    /// Explain a rolled-back aggregate write: `StaleLedger` if the ledger
    /// moved past `base`, otherwise the backend error itself.
    async fn rollback_error(&self, base: LedgerRevision, err: surrealdb::Error) -> StorageError {
        match self.current_revision().await {
            Ok(current) if current != base => StorageError::StaleLedger {
                expected: base.0,
                actual: current.0,
            },
            _ => StorageError::Backend(err.to_string()),
        }
    }

    /// Reject keyed updates for targets or teams that were never registered.
    ///
    /// A SurrealQL `UPDATE ... WHERE` on a missing key is a silent no-op, so
    /// the check happens up front.
    async fn ensure_known(&self, aggregates: &Aggregates) -> StorageResult<()> {
        let mut res = self
            .db
            .query("SELECT VALUE target_id FROM targets; SELECT VALUE team_id FROM teams;")
            .await?;
        let target_ids: HashSet<u64> = res.take::<Vec<u64>>(0)?.into_iter().collect();
        let team_ids: HashSet<u64> = res.take::<Vec<u64>>(1)?.into_iter().collect();

        if let Some(t) = aggregates
            .targets
            .iter()
            .find(|t| !target_ids.contains(&t.target_id.0))
        {
            return Err(StorageError::TargetNotFound {
                target_id: t.target_id.0,
            });
        }
        if let Some(t) = aggregates
            .teams
            .iter()
            .find(|t| !team_ids.contains(&t.team_id.0))
        {
            return Err(StorageError::TeamNotFound { team_id: t.team_id.0 });
        }
        Ok(())
    }
}

#[async_trait]
impl ScoreStore for SurrealScoreStore {
    async fn teams(&self) -> StorageResult<Vec<Team>> {
        let rows: Vec<TeamRow> = self
            .select_all("SELECT * FROM teams ORDER BY team_id ASC")
            .await?;
        Ok(rows.into_iter().map(Team::from).collect())
    }

    async fn challenges(&self) -> StorageResult<Vec<Challenge>> {
        let rows: Vec<ChallengeRow> = self
            .select_all("SELECT * FROM challenges ORDER BY challenge_id ASC")
            .await?;
        Ok(rows.into_iter().map(Challenge::from).collect())
    }

    async fn targets(&self) -> StorageResult<Vec<Target>> {
        let rows: Vec<TargetRow> = self
            .select_all("SELECT * FROM targets ORDER BY target_id ASC")
            .await?;
        Ok(rows.into_iter().map(Target::from).collect())
    }

    async fn attack_events(&self, round: Round) -> StorageResult<Vec<AttackEvent>> {
        let rows: Vec<AttackEventRow> = self
            .select_by_round(
                "SELECT * FROM attack_events WHERE round = $round ORDER BY recorded_at ASC",
                round,
            )
            .await?;
        Ok(rows.into_iter().map(AttackEvent::from).collect())
    }

    async fn availability_failures(
        &self,
        round: Round,
    ) -> StorageResult<Vec<AvailabilityFailure>> {
        let rows: Vec<AvailabilityFailureRow> = self
            .select_by_round(
                "SELECT * FROM availability_failures WHERE round = $round ORDER BY recorded_at ASC",
                round,
            )
            .await?;
        Ok(rows.into_iter().map(AvailabilityFailure::from).collect())
    }

    async fn challenge_failures(
        &self,
        challenge_id: ChallengeId,
        round: Round,
    ) -> StorageResult<Vec<AvailabilityFailure>> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM availability_failures \
                 WHERE challenge_id = $challenge AND round = $round ORDER BY recorded_at ASC",
            )
            .bind(("challenge", challenge_id.0))
            .bind(("round", round.0))
            .await?;
        let rows: Vec<AvailabilityFailureRow> = res.take(0)?;
        Ok(rows.into_iter().map(AvailabilityFailure::from).collect())
    }

    async fn ledger_entries(&self, round: Option<Round>) -> StorageResult<Vec<LedgerEntry>> {
        let rows: Vec<ScoreEntryRow> = match round {
            Some(round) => {
                self.select_by_round(
                    "SELECT * FROM score_entries WHERE round = $round ORDER BY recorded_at ASC",
                    round,
                )
                .await?
            }
            None => {
                self.select_all("SELECT * FROM score_entries ORDER BY round ASC, recorded_at ASC")
                    .await?
            }
        };
        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    async fn settled_round(&self, round: Round) -> StorageResult<Option<SettledRound>> {
        let rows: Vec<SettledRoundRow> = self
            .select_by_round("SELECT * FROM settled_rounds WHERE round = $round", round)
            .await?;
        Ok(rows.into_iter().next().map(SettledRound::from))
    }

    async fn commit_round(&self, commit: RoundCommit) -> StorageResult<SettledRound> {
        let round = commit.round;
        if self.settled_round(round).await?.is_some() {
            return Err(StorageError::RoundAlreadySettled { round: round.0 });
        }
        self.ensure_known(&commit.aggregates).await?;

        let marker = SettledRound {
            round,
            entry_count: commit.entries.len() as u64,
            settled_at: Utc::now(),
        };
        let entries: Vec<ScoreEntryRow> = commit.entries.iter().map(ScoreEntryRow::from).collect();

        let mut sql = String::from("BEGIN TRANSACTION;\n");
        sql.push_str(GUARD_REVISION);
        sql.push_str("CREATE settled_rounds CONTENT $marker;\n");
        if !entries.is_empty() {
            sql.push_str("INSERT INTO score_entries $entries;\n");
        }
        sql.push_str(UPDATE_AGGREGATES);
        sql.push_str("COMMIT TRANSACTION;");

        debug!(round = %round, entries = entries.len(), "committing round");

        let result = self
            .db
            .query(sql)
            .bind(("base", commit.base_revision.0))
            .bind(("marker", SettledRoundRow::from(&marker)))
            .bind(("entries", entries))
            .bind(("targets", commit.aggregates.targets))
            .bind(("teams", commit.aggregates.teams))
            .await
            .and_then(|res| res.check());

        if let Err(err) = result {
            // A concurrent commit for the same round trips the unique index.
            if self.settled_round(round).await?.is_some() {
                return Err(StorageError::RoundAlreadySettled { round: round.0 });
            }
            warn!(round = %round, error = %err, "round commit rolled back");
            return Err(self.rollback_error(commit.base_revision, err).await);
        }

        Ok(marker)
    }

    async fn write_aggregates(
        &self,
        aggregates: &Aggregates,
        base: LedgerRevision,
    ) -> StorageResult<()> {
        self.ensure_known(aggregates).await?;

        let sql =
            format!("BEGIN TRANSACTION;\n{GUARD_REVISION}{UPDATE_AGGREGATES}COMMIT TRANSACTION;");
        let result = self
            .db
            .query(sql)
            .bind(("base", base.0))
            .bind(("targets", aggregates.targets.clone()))
            .bind(("teams", aggregates.teams.clone()))
            .await
            .and_then(|res| res.check());

        if let Err(err) = result {
            warn!(base = %base, error = %err, "aggregate write rolled back");
            return Err(self.rollback_error(base, err).await);
        }
        Ok(())
    }
}

#[async_trait]
impl CompetitionRegistry for SurrealScoreStore {
    async fn register_team(&self, id: TeamId, name: &str) -> StorageResult<Team> {
        self.ensure_absent("teams", "team_id", "team", id.0).await?;
        let team = Team {
            id,
            name: name.to_string(),
            score: 0.0,
        };
        let _created: Option<TeamRow> = self.db.create("teams").content(TeamRow::from(&team)).await?;
        Ok(team)
    }

    async fn register_challenge(
        &self,
        id: ChallengeId,
        title: &str,
        base_score: f64,
    ) -> StorageResult<Challenge> {
        self.ensure_absent("challenges", "challenge_id", "challenge", id.0)
            .await?;
        let challenge = Challenge {
            id,
            title: title.to_string(),
            base_score,
        };
        let _created: Option<ChallengeRow> = self
            .db
            .create("challenges")
            .content(ChallengeRow::from(&challenge))
            .await?;
        Ok(challenge)
    }

    async fn register_target(
        &self,
        id: TargetId,
        team_id: TeamId,
        challenge_id: ChallengeId,
        visible: bool,
    ) -> StorageResult<Target> {
        self.ensure_absent("targets", "target_id", "target", id.0)
            .await?;
        let target = Target {
            id,
            team_id,
            challenge_id,
            visible,
            score: 0.0,
        };
        let _created: Option<TargetRow> = self
            .db
            .create("targets")
            .content(TargetRow::from(&target))
            .await?;
        Ok(target)
    }

    async fn record_attack(&self, event: AttackEvent) -> StorageResult<()> {
        let _created: Option<AttackEventRow> = self
            .db
            .create("attack_events")
            .content(AttackEventRow::from(&event))
            .await?;
        Ok(())
    }

    async fn record_availability_failure(
        &self,
        event: AvailabilityFailure,
    ) -> StorageResult<()> {
        let _created: Option<AvailabilityFailureRow> = self
            .db
            .create("availability_failures")
            .content(AvailabilityFailureRow::from(&event))
            .await?;
        Ok(())
    }
}
