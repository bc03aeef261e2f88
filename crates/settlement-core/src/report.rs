//! Completion record of one settlement attempt.

use chrono::{DateTime, Utc};
use scoreboard_state::Round;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::availability::ForfeitedPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    Success,
    Failure,
}

/// What a call to `RoundSettlement::settle_round` did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReport {
    /// Unique id of this attempt, shared with its tracing span.
    pub attempt_id: Uuid,
    /// Round being settled. `None` when no round had completed yet.
    pub round: Option<Round>,
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration of the attempt.
    pub duration_secs: f64,
    pub outcome: SettlementOutcome,
    /// Ledger entries committed by this attempt.
    pub entries_written: usize,
    pub attack_events: usize,
    pub targets_attacked: usize,
    pub availability_failures: usize,
    pub forfeited: Vec<ForfeitedPool>,
    /// The round had already been settled; only aggregates were refreshed.
    pub already_settled: bool,
    pub error: Option<String>,
}

impl SettlementReport {
    pub(crate) fn begin(attempt_id: Uuid, round: Option<Round>) -> Self {
        Self {
            attempt_id,
            round,
            started_at: Utc::now(),
            duration_secs: 0.0,
            outcome: SettlementOutcome::Failure,
            entries_written: 0,
            attack_events: 0,
            targets_attacked: 0,
            availability_failures: 0,
            forfeited: Vec::new(),
            already_settled: false,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == SettlementOutcome::Success
    }
}

impl std::fmt::Display for SettlementReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let round = self
            .round
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string());
        match self.outcome {
            SettlementOutcome::Success if self.already_settled => write!(
                f,
                "round {round} already settled; aggregates refreshed in {:.3}s",
                self.duration_secs
            ),
            SettlementOutcome::Success => write!(
                f,
                "round {round} settled in {:.3}s: {} entries, {} attacks on {} targets, {} availability failures, {} forfeited pools",
                self.duration_secs,
                self.entries_written,
                self.attack_events,
                self.targets_attacked,
                self.availability_failures,
                self.forfeited.len()
            ),
            SettlementOutcome::Failure => write!(
                f,
                "round {round} settlement failed after {:.3}s: {}",
                self.duration_secs,
                self.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}
