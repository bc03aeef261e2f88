//! Scoreboard-State: persistence for the round settlement engine
//!
//! This crate owns every byte the settlement engine reads or writes:
//! competition entities (teams, challenges, targets), the round's input
//! events (attacks, availability failures) and the append-only score ledger
//! together with the derived score aggregates.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: append-only ledger, atomic round commits, bulk reads.
//!
//! ## Key Components
//!
//! - `ScoreStore`: bulk readers plus the atomic `commit_round` writer
//! - `CompetitionRegistry`: registration of entities and round events
//! - `MemoryScoreStore`: in-memory fake honouring the same contracts
//! - `SurrealScoreStore`: SurrealDB implementation (transactions + unique round marker)

mod error;
pub mod fakes;
mod handle;
pub mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use handle::CloudConfig;
pub use schema::{
    AttackEventRow, AvailabilityFailureRow, ChallengeRow, ScoreEntryRow, SettledRoundRow,
    TargetRow, TeamRow,
};
pub use storage_traits::{
    Aggregates, AttackEvent, AvailabilityFailure, Challenge, ChallengeId, CompetitionRegistry,
    LedgerEntry, LedgerRevision, LedgerTotals, Round, RoundCommit, ScoreReason, ScoreStore,
    SettledRound, StorageResult, Target, TargetId, TargetScore, Team, TeamId, TeamScore,
};
pub use surreal_store::SurrealScoreStore;

/// Result type for connection and schema operations
pub type Result<T> = std::result::Result<T, StateError>;
