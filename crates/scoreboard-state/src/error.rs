//! Error types for scoreboard-state

use thiserror::Error;

/// Errors raised while connecting to the database or preparing its schema
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

/// Errors surfaced through the `ScoreStore` / `CompetitionRegistry` traits
#[derive(Error, Debug)]
pub enum StorageError {
    /// The backend rejected or failed an operation
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A ledger commit was attempted for a round that already has one
    #[error("round {round} is already settled")]
    RoundAlreadySettled { round: u32 },

    /// Aggregates were computed from ledger totals that are no longer current
    #[error("ledger moved from revision {expected} to {actual} while aggregates were computed")]
    StaleLedger { expected: u64, actual: u64 },

    /// A keyed aggregate update referenced an unknown target
    #[error("target not found: {target_id}")]
    TargetNotFound { target_id: u64 },

    /// A keyed aggregate update referenced an unknown team
    #[error("team not found: {team_id}")]
    TeamNotFound { team_id: u64 },

    /// An entity with the same identity is already registered
    #[error("{kind} {id} is already registered")]
    Duplicate { kind: &'static str, id: u64 },

    /// A persisted row could not be mapped back to a domain record
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}
