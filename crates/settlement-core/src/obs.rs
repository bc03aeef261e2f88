//! Structured observability hooks for round settlement.
//!
//! This module provides:
//! - Attempt-scoped tracing spans via `settlement_span`
//! - Emission functions for the settlement lifecycle: start, finish, failure
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`).

use scoreboard_state::Round;
use tracing::{info, warn};
use uuid::Uuid;

use crate::report::SettlementReport;

/// Attempt-scoped span for one settlement.
///
/// Attach it with `tracing::Instrument` so it follows the future across
/// await points.
///
/// # Example
///
/// ```ignore
/// settle().instrument(settlement_span(attempt_id, Some(Round(5)))).await;
/// // every event inside carries attempt_id and round
/// ```
pub fn settlement_span(attempt_id: Uuid, round: Option<Round>) -> tracing::Span {
    tracing::info_span!(
        "scoreboard.settlement",
        attempt_id = %attempt_id,
        round = round.map(|r| r.0),
    )
}

/// Emit event: settlement of `round` started.
pub fn emit_settlement_started(round: Round) {
    info!(event = "settlement.started", round = round.0);
}

/// Emit event: settlement finished. Carries the completion line.
pub fn emit_settlement_finished(report: &SettlementReport) {
    info!(
        event = "settlement.finished",
        round = report.round.map(|r| r.0),
        duration_secs = report.duration_secs,
        entries = report.entries_written,
        forfeited_pools = report.forfeited.len(),
        already_settled = report.already_settled,
        "{report}"
    );
}

/// Emit event: settlement failed (warning level). Nothing was committed.
pub fn emit_settlement_failed(report: &SettlementReport) {
    warn!(
        event = "settlement.failed",
        round = report.round.map(|r| r.0),
        duration_secs = report.duration_secs,
        error = report.error.as_deref().unwrap_or_default(),
        "{report}"
    );
}
