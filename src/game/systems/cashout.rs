//! Timed cash-out commit

use crate::game::state::{ArenaState, SessionId};

/// Progress at or above this counts as complete (absorbs float drift)
const COMPLETE_AT: f32 = 100.0 - 1e-3;

/// A player whose cash-out just reached 100%
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CashOutCompletion {
    pub session_id: SessionId,
    pub final_score: u64,
    pub final_mass: f32,
}

/// Toggle cash-out intent. Ignored for dead or unknown players; stopping
/// always resets progress to 0.
pub fn set_intent(state: &mut ArenaState, session_id: SessionId, active: bool) -> bool {
    let Some(player) = state.get_player_mut(session_id) else {
        return false;
    };
    if !player.alive {
        return false;
    }

    if active {
        player.cash_out.is_cashing_out = true;
    } else {
        player.cash_out.reset();
    }
    true
}

/// Advance progress for every alive player holding the intent
pub fn advance(state: &mut ArenaState, progress_per_tick: f32) -> Vec<CashOutCompletion> {
    let mut completed = Vec::new();

    for player in state.players.iter_mut() {
        if !player.alive {
            player.cash_out.reset();
            continue;
        }
        if !player.cash_out.is_cashing_out || player.cash_out.progress >= COMPLETE_AT {
            continue;
        }

        player.cash_out.progress = (player.cash_out.progress + progress_per_tick).min(100.0);
        if player.cash_out.progress >= COMPLETE_AT {
            player.cash_out.progress = 100.0;
            completed.push(CashOutCompletion {
                session_id: player.session_id,
                final_score: player.score,
                final_mass: player.total_mass(),
            });
        }
    }

    completed
}
