//! Attack settlement.
//!
//! For each victim target attacked in the round:
//! - every distinct attacking team gets `attack_score / N` on its own
//!   target for the victim's challenge (N = distinct attackers of the victim)
//! - the victim's owner pays `-attack_score` once per attack event
//!
//! Targets nobody attacked produce no entries at all.

use std::collections::{BTreeMap, BTreeSet};

use scoreboard_state::{LedgerEntry, ScoreReason, TargetId, TeamId};
use tracing::debug;

use crate::config::ScoringConfig;
use crate::error::SettlementResult;
use crate::snapshot::RoundSnapshot;

/// Ledger entries produced by attack settlement.
#[derive(Debug, Clone, Default)]
pub struct AttackSettlement {
    pub entries: Vec<LedgerEntry>,
    /// Number of distinct targets attacked in the round.
    pub targets_attacked: usize,
    /// Number of attack events settled.
    pub attack_events: usize,
}

/// Settle all attack events in `snapshot`.
///
/// Fails without producing anything if any event references a missing
/// target or team, or if an attacker has no target for the victim's challenge.
pub fn settle_attacks(
    snapshot: &RoundSnapshot,
    config: &ScoringConfig,
) -> SettlementResult<AttackSettlement> {
    let round = snapshot.round();

    // victim -> (distinct attackers, event count)
    let mut by_victim: BTreeMap<TargetId, (BTreeSet<TeamId>, usize)> = BTreeMap::new();
    for event in snapshot.attacks() {
        let slot = by_victim.entry(event.victim_target_id).or_default();
        slot.0.insert(event.attacker_team_id);
        slot.1 += 1;
    }

    let mut entries = Vec::new();
    for (victim_id, (attackers, events)) in &by_victim {
        let victim = snapshot.target(*victim_id)?;
        snapshot.require_team(victim.team_id)?;

        let share = config.attack_score / attackers.len() as f64;
        for attacker in attackers {
            snapshot.require_team(*attacker)?;
            let own = snapshot.target_for(*attacker, victim.challenge_id)?;
            entries.push(LedgerEntry::new(
                *attacker,
                own.id,
                round,
                ScoreReason::AttackGain,
                share,
            ));
        }

        for _ in 0..*events {
            entries.push(LedgerEntry::new(
                victim.team_id,
                victim.id,
                round,
                ScoreReason::AttackLoss,
                -config.attack_score,
            ));
        }

        debug!(
            round = %round,
            victim = %victim_id,
            attackers = attackers.len(),
            events = events,
            share = share,
            "attack settled"
        );
    }

    Ok(AttackSettlement {
        entries,
        targets_attacked: by_victim.len(),
        attack_events: snapshot.attacks().len(),
    })
}
