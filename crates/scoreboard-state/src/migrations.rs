//! SurrealDB schema migrations and initialization
//!
//! Sets up every scoreboard table with its indexes and write permissions.
//! All statements are `DEFINE`s, so running them again is harmless.

use crate::error::StateError;
use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all scoreboard tables in SurrealDB
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing scoreboard SurrealDB schema");

    init_entity_tables(db).await?;
    init_event_tables(db).await?;
    init_score_entries_table(db).await?;
    init_settled_rounds_table(db).await?;

    info!("Scoreboard schema initialization complete");
    Ok(())
}

async fn run(db: &Surreal<Any>, sql: &str) -> Result<()> {
    db.query(sql)
        .await
        .and_then(|res| res.check())
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    Ok(())
}

/// Initialize `teams`, `challenges` and `targets`
///
/// The `score` fields on teams and targets are aggregates; only the
/// settlement commit path updates them.
async fn init_entity_tables(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing entity tables");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS teams SCHEMALESS
            PERMISSIONS FOR select, create, update FULL FOR delete NONE;
        DEFINE INDEX IF NOT EXISTS idx_team_id ON TABLE teams COLUMNS team_id UNIQUE;

        DEFINE TABLE IF NOT EXISTS challenges SCHEMALESS
            PERMISSIONS FOR select, create, update FULL FOR delete NONE;
        DEFINE INDEX IF NOT EXISTS idx_challenge_id ON TABLE challenges COLUMNS challenge_id UNIQUE;

        DEFINE TABLE IF NOT EXISTS targets SCHEMALESS
            PERMISSIONS FOR select, create, update FULL FOR delete NONE;
        DEFINE INDEX IF NOT EXISTS idx_target_id ON TABLE targets COLUMNS target_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_target_team_challenge ON TABLE targets COLUMNS team_id, challenge_id;
        DEFINE INDEX IF NOT EXISTS idx_target_challenge ON TABLE targets COLUMNS challenge_id;
    "#;

    run(db, sql).await?;
    info!("✓ entity tables initialized");
    Ok(())
}

/// Initialize `attack_events` and `availability_failures`
///
/// Both are append-only and read by round.
async fn init_event_tables(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing event tables");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS attack_events SCHEMALESS
            PERMISSIONS FOR select, create FULL FOR update, delete NONE;
        DEFINE INDEX IF NOT EXISTS idx_attack_round ON TABLE attack_events COLUMNS round;
        DEFINE INDEX IF NOT EXISTS idx_attack_round_victim ON TABLE attack_events COLUMNS round, victim_target_id;

        DEFINE TABLE IF NOT EXISTS availability_failures SCHEMALESS
            PERMISSIONS FOR select, create FULL FOR update, delete NONE;
        DEFINE INDEX IF NOT EXISTS idx_failure_round ON TABLE availability_failures COLUMNS round;
        DEFINE INDEX IF NOT EXISTS idx_failure_challenge_round ON TABLE availability_failures COLUMNS challenge_id, round;
    "#;

    run(db, sql).await?;
    info!("✓ event tables initialized");
    Ok(())
}

/// Initialize `score_entries`
///
/// Schema:
/// ```text
/// TABLE score_entries {
///   team_id:      INT
///   target_id:    INT (indexed, summed by aggregation)
///   round:        INT (indexed)
///   reason:       STRING (attack | been_attacked | checkdown | service_online)
///   delta:        FLOAT
///   recorded_at:  DATETIME
/// }
/// ```
///
/// Entries are immutable: update and delete are denied.
async fn init_score_entries_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing score_entries table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS score_entries SCHEMALESS
            PERMISSIONS FOR select, create FULL FOR update, delete NONE;
        DEFINE INDEX IF NOT EXISTS idx_entry_round ON TABLE score_entries COLUMNS round;
        DEFINE INDEX IF NOT EXISTS idx_entry_target ON TABLE score_entries COLUMNS target_id;
        DEFINE INDEX IF NOT EXISTS idx_entry_team_round ON TABLE score_entries COLUMNS team_id, round;
    "#;

    run(db, sql).await?;
    info!("✓ score_entries table initialized");
    Ok(())
}

/// Initialize `settled_rounds`
///
/// The unique index on `round` is what rejects a second commit for a round
/// that already has ledger entries.
async fn init_settled_rounds_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing settled_rounds table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS settled_rounds SCHEMALESS
            PERMISSIONS FOR select, create FULL FOR update, delete NONE;
        DEFINE INDEX IF NOT EXISTS idx_settled_round ON TABLE settled_rounds COLUMNS round UNIQUE;
    "#;

    run(db, sql).await?;
    info!("✓ settled_rounds table initialized");
    Ok(())
}
