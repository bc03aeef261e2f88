//! Round clock seam.
//!
//! The competition timer lives outside this crate; settlement only needs the
//! current round number to know which round just completed.

use std::sync::atomic::{AtomicU32, Ordering};

use scoreboard_state::Round;

/// Source of the competition's current (in-progress) round.
pub trait RoundClock: Send + Sync {
    fn current_round(&self) -> Round;
}

/// A clock pinned to one round.
#[derive(Debug, Clone, Copy)]
pub struct FixedRoundClock(pub Round);

impl RoundClock for FixedRoundClock {
    fn current_round(&self) -> Round {
        self.0
    }
}

/// A clock advanced by hand, for drivers that own the round boundary.
#[derive(Debug)]
pub struct ManualRoundClock {
    current: AtomicU32,
}

impl ManualRoundClock {
    pub fn new(start: Round) -> Self {
        Self {
            current: AtomicU32::new(start.0),
        }
    }

    /// Move to the next round and return it.
    pub fn advance(&self) -> Round {
        Round(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

impl RoundClock for ManualRoundClock {
    fn current_round(&self) -> Round {
        Round(self.current.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualRoundClock::new(Round(1));
        assert_eq!(clock.current_round(), Round(1));
        assert_eq!(clock.advance(), Round(2));
        assert_eq!(clock.current_round(), Round(2));
    }
}
