use std::time::{Duration, Instant};

use crate::game::state::CashOutState;

/// Local cash-out ring shown while the intent is held.
///
/// Toggling updates the ring immediately. Authoritative player data wins as
/// soon as it agrees with the local intent or a full round trip has passed
/// since the toggle. The local copy is display state only.
#[derive(Debug, Clone)]
pub struct CashOutRing {
    state: CashOutState,
    /// Progress per second while filling locally
    fill_rate: f32,
    pending_since: Option<Instant>,
}

impl CashOutRing {
    pub fn new(duration_secs: f32) -> Self {
        Self {
            state: CashOutState::default(),
            fill_rate: 100.0 / duration_secs.max(f32::EPSILON),
            pending_since: None,
        }
    }

    /// Optimistic toggle of the local intent
    pub fn set_intent(&mut self, active: bool, now: Instant) {
        if self.state.is_cashing_out == active {
            return;
        }
        if active {
            self.state.is_cashing_out = true;
        } else {
            self.state.reset();
        }
        self.pending_since = Some(now);
    }

    /// Visual fill between snapshots
    pub fn advance(&mut self, dt: f32) {
        if self.state.is_cashing_out {
            self.state.progress = (self.state.progress + self.fill_rate * dt).min(100.0);
        }
    }

    /// Reconcile with the local player's authoritative cash-out state
    pub fn reconcile(&mut self, authoritative: CashOutState, rtt: Duration, now: Instant) {
        let settled = match self.pending_since {
            None => true,
            Some(since) => {
                authoritative.is_cashing_out == self.state.is_cashing_out
                    || now.saturating_duration_since(since) >= rtt
            }
        };
        if settled {
            self.state = authoritative;
            self.pending_since = None;
        }
    }

    /// Elimination or a dead local player clears the ring at once
    pub fn clear(&mut self) {
        self.state.reset();
        self.pending_since = None;
    }

    pub fn state(&self) -> CashOutState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.pending_since.is_some()
    }
}
