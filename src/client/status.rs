use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::game::constants::client::RECONNECT_BACKOFF_MS;

/// Connection status as observed by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    /// Terminal: entered only through the authoritative `GameOver`
    Eliminated,
    /// Terminal: the score was banked by a completed cash-out
    CashedOut,
    Disconnected,
    Failed,
}

impl ConnectionStatus {
    /// States that never reconnect and ignore further snapshots
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionStatus::Eliminated | ConnectionStatus::CashedOut)
    }
}

/// Client connection state machine with fixed-backoff reconnect
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    status: ConnectionStatus,
    backoff: Duration,
    reconnect_at: Option<Instant>,
    attempts: u32,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::with_backoff(Duration::from_millis(RECONNECT_BACKOFF_MS))
    }

    pub fn with_backoff(backoff: Duration) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            backoff,
            reconnect_at: None,
            attempts: 0,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Reconnect attempts since the last successful connection
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Any authoritative snapshot means the link works. A pending reconnect
    /// is cancelled.
    pub fn on_snapshot(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        if self.status != ConnectionStatus::Connected {
            info!("Connected");
        }
        self.status = ConnectionStatus::Connected;
        self.reconnect_at = None;
        self.attempts = 0;
    }

    pub fn on_game_over(&mut self) {
        self.status = ConnectionStatus::Eliminated;
        self.reconnect_at = None;
    }

    pub fn on_cash_out_complete(&mut self) {
        if self.status != ConnectionStatus::Eliminated {
            self.status = ConnectionStatus::CashedOut;
        }
        self.reconnect_at = None;
    }

    /// Transport dropped after it was up
    pub fn on_connection_lost(&mut self, now: Instant) {
        self.fail_with(ConnectionStatus::Disconnected, now);
    }

    /// Connect or join attempt failed, or the server closed the session
    pub fn on_connect_failed(&mut self, now: Instant) {
        self.fail_with(ConnectionStatus::Failed, now);
    }

    fn fail_with(&mut self, status: ConnectionStatus, now: Instant) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.reconnect_at = Some(now + self.backoff);
        debug!("Connection {:?}, reconnecting in {:?}", status, self.backoff);
    }

    pub fn reconnect_at(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub fn reconnect_due(&self, now: Instant) -> bool {
        self.reconnect_at.is_some_and(|at| now >= at)
    }

    /// Start a scheduled reconnect. Returns false if none is due.
    pub fn begin_reconnect(&mut self, now: Instant) -> bool {
        if !self.reconnect_due(now) {
            return false;
        }
        self.reconnect_at = None;
        self.attempts += 1;
        self.status = ConnectionStatus::Connecting;
        info!("Reconnect attempt {}", self.attempts);
        true
    }

    /// Fresh join after a terminal state (player pressed play again)
    pub fn restart(&mut self) {
        self.status = ConnectionStatus::Connecting;
        self.reconnect_at = None;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ConnectionTracker {
        ConnectionTracker::with_backoff(Duration::from_millis(100))
    }

    #[test]
    fn test_connecting_to_connected_on_snapshot() {
        let mut t = tracker();
        assert_eq!(t.status(), ConnectionStatus::Connecting);
        t.on_snapshot();
        assert_eq!(t.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_eliminated_is_sticky() {
        let mut t = tracker();
        t.on_snapshot();
        t.on_game_over();
        t.on_snapshot();
        assert_eq!(t.status(), ConnectionStatus::Eliminated);

        t.on_connection_lost(Instant::now());
        assert_eq!(t.status(), ConnectionStatus::Eliminated);
        assert!(t.reconnect_at().is_none(), "eliminated sessions do not reconnect");
    }

    #[test]
    fn test_reconnect_after_backoff() {
        let start = Instant::now();
        let mut t = tracker();
        t.on_snapshot();
        t.on_connection_lost(start);
        assert_eq!(t.status(), ConnectionStatus::Disconnected);

        assert!(!t.begin_reconnect(start + Duration::from_millis(50)));
        assert!(t.begin_reconnect(start + Duration::from_millis(100)));
        assert_eq!(t.status(), ConnectionStatus::Connecting);
        assert_eq!(t.attempts(), 1);
    }

    #[test]
    fn test_rejoin_goes_straight_to_connected() {
        let start = Instant::now();
        let mut t = tracker();
        t.on_snapshot();
        t.on_connection_lost(start);

        // Rejoined before the backoff expired
        t.on_snapshot();
        assert_eq!(t.status(), ConnectionStatus::Connected);
        assert!(!t.reconnect_due(start + Duration::from_secs(10)));
        assert_eq!(t.attempts(), 0);
    }

    #[test]
    fn test_failed_schedules_reconnect() {
        let start = Instant::now();
        let mut t = tracker();
        t.on_connect_failed(start);
        assert_eq!(t.status(), ConnectionStatus::Failed);
        assert!(t.reconnect_due(start + Duration::from_millis(100)));
    }

    #[test]
    fn test_cash_out_complete_is_terminal() {
        let mut t = tracker();
        t.on_snapshot();
        t.on_cash_out_complete();
        t.on_snapshot();
        assert_eq!(t.status(), ConnectionStatus::CashedOut);

        t.restart();
        assert_eq!(t.status(), ConnectionStatus::Connecting);
    }
}
