//! Settlement-Core: round settlement for attack-defense scoreboards
//!
//! Turns a completed round's attack events and availability failures into
//! immutable ledger entries, then recomputes every target and team score
//! from the ledger.
//!
//! ## Layer 1 - Domain Logic
//!
//! - `attack` / `availability`: pure scoring rules over a `RoundSnapshot`
//! - `aggregation`: score recomputation from the full ledger
//! - `orchestrator`: `RoundSettlement`, the single public entry point
//!
//! Persistence lives in `scoreboard-state`.

pub mod aggregation;
pub mod attack;
pub mod availability;
pub mod clock;
pub mod config;
pub mod error;
pub mod obs;
pub mod orchestrator;
pub mod report;
pub mod snapshot;
pub mod telemetry;

pub use aggregation::{compute_aggregates, Aggregator};
pub use attack::{settle_attacks, AttackSettlement};
pub use availability::{settle_availability, AvailabilitySettlement, ForfeitedPool};
pub use clock::{FixedRoundClock, ManualRoundClock, RoundClock};
pub use config::ScoringConfig;
pub use error::{SettlementError, SettlementResult};
pub use orchestrator::RoundSettlement;
pub use report::{SettlementOutcome, SettlementReport};
pub use snapshot::RoundSnapshot;
