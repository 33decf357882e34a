use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::client::camera::Camera;
use crate::client::cashout_ring::CashOutRing;
use crate::client::latency::RttEstimator;
use crate::client::leaderboard::{leaderboard_from_snapshot, LeaderboardEntry};
use crate::client::minimap::Minimap;
use crate::client::status::{ConnectionStatus, ConnectionTracker};
use crate::client::virus_anim::{VirusAnimations, VirusPhase};
use crate::game::constants::client::CASH_OUT_SETTLE_FALLBACK_MS;
use crate::game::state::{CashOutState, EntityId, SessionId};
use crate::net::protocol::{ArenaSnapshot, ClientMessage, PlayerSnapshot, ServerMessage, ZoneSnapshot};
use crate::util::vec2::Vec2;

/// How the local session ended
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Eliminated {
        final_score: u64,
        final_mass: f32,
        eliminated_by: String,
    },
    CashedOut { final_score: u64, final_mass: f32 },
}

/// Turns authoritative server messages into a renderable view.
///
/// Positions are never predicted: every cell renders at its last
/// authoritative position. Only the camera, the cash-out ring and virus
/// animation carry local state.
pub struct ReconciliationEngine {
    session_id: Option<SessionId>,
    snapshot: Option<ArenaSnapshot>,
    camera: Camera,
    camera_placed: bool,
    status: ConnectionTracker,
    cash_out: CashOutRing,
    viruses: VirusAnimations,
    rtt: RttEstimator,
    leaderboard: Vec<LeaderboardEntry>,
    minimap: Minimap,
    outcome: Option<SessionOutcome>,
    last_input_seq: u64,
}

impl ReconciliationEngine {
    pub fn new(minimap: Minimap, cash_out_duration_secs: f32) -> Self {
        Self {
            session_id: None,
            snapshot: None,
            camera: Camera::default(),
            camera_placed: false,
            status: ConnectionTracker::new(),
            cash_out: CashOutRing::new(cash_out_duration_secs),
            viruses: VirusAnimations::new(),
            rtt: RttEstimator::new(),
            leaderboard: Vec::new(),
            minimap,
            outcome: None,
            last_input_seq: 0,
        }
    }

    /// Replace the reconnect policy (fixed backoff by default)
    pub fn with_tracker(mut self, tracker: ConnectionTracker) -> Self {
        self.status = tracker;
        self
    }

    /// Apply one server message
    pub fn handle(&mut self, message: ServerMessage, now: Instant, now_ms: u64) {
        match message {
            ServerMessage::JoinAccepted {
                session_id,
                room_id,
                zone,
                ..
            } => {
                info!("Joined room {} as {}", room_id, session_id);
                self.session_id = Some(session_id);
                // A rejoin may land in a fresh arena with a lower tick count
                self.snapshot = None;
                self.camera.snap_to(zone.center, &zone);
                self.camera_placed = false;
            }
            ServerMessage::JoinRejected { reason } => {
                warn!("Join rejected: {}", reason);
                self.status.on_connect_failed(now);
            }
            ServerMessage::StateSnapshot(snapshot) => self.apply_snapshot(snapshot, now),
            ServerMessage::GameOver {
                final_score,
                final_mass,
                eliminated_by,
            } => {
                if self.outcome.is_none() {
                    self.outcome = Some(SessionOutcome::Eliminated {
                        final_score,
                        final_mass,
                        eliminated_by,
                    });
                }
                self.cash_out.clear();
                self.status.on_game_over();
            }
            ServerMessage::CashOutComplete {
                final_score,
                final_mass,
            } => {
                if self.outcome.is_none() {
                    self.outcome = Some(SessionOutcome::CashedOut {
                        final_score,
                        final_mass,
                    });
                }
                self.cash_out.clear();
                self.status.on_cash_out_complete();
            }
            ServerMessage::Pong {
                client_timestamp, ..
            } => {
                if let Some(rtt) = self.rtt.on_pong(client_timestamp, now_ms) {
                    debug!("RTT {:?}", rtt);
                }
            }
            ServerMessage::Kicked { reason } => {
                warn!("Kicked: {}", reason);
                self.status.on_connect_failed(now);
            }
        }
    }

    fn apply_snapshot(&mut self, snapshot: ArenaSnapshot, now: Instant) {
        if self
            .snapshot
            .as_ref()
            .is_some_and(|prev| snapshot.tick < prev.tick)
        {
            debug!("Dropping out-of-order snapshot for tick {}", snapshot.tick);
            return;
        }
        self.status.on_snapshot();

        if let Some(local) = self.session_id.and_then(|id| snapshot.player(id)) {
            if local.alive {
                let rtt = self
                    .rtt
                    .average()
                    .unwrap_or(Duration::from_millis(CASH_OUT_SETTLE_FALLBACK_MS));
                self.cash_out.reconcile(local.cash_out, rtt, now);
            } else {
                self.cash_out.clear();
            }
            if !self.camera_placed {
                self.camera.snap_to(local.position, &snapshot.zone);
                self.camera_placed = true;
            }
        }

        self.viruses.sync(&snapshot.viruses);
        self.leaderboard = leaderboard_from_snapshot(&snapshot);
        self.snapshot = Some(snapshot);
    }

    /// Per-frame update: camera easing and cosmetic animation
    pub fn frame(&mut self, dt: f32) -> Vec2 {
        self.viruses.advance(dt);
        self.cash_out.advance(dt);
        let target = self.local_player().map(|p| p.position);
        if let (Some(target), Some(zone)) = (target, self.zone()) {
            self.camera.follow(target, &zone);
        }
        self.camera.position
    }

    /// Build the input command for a movement direction. The local cell
    /// does not move until the server says so.
    pub fn input(&mut self, dx: f32, dy: f32) -> ClientMessage {
        self.apply_local_movement(dx, dy);
        self.last_input_seq += 1;
        ClientMessage::Input {
            seq: self.last_input_seq,
            dx,
            dy,
        }
    }

    /// Local movement hook. Positions are authoritative only.
    pub fn apply_local_movement(&mut self, _dx: f32, _dy: f32) {}

    /// Toggle the cash-out intent: the ring reacts at once and the
    /// returned message carries the intent to the server
    pub fn set_cash_out_intent(&mut self, active: bool, now: Instant) -> ClientMessage {
        self.cash_out.set_intent(active, now);
        if active {
            ClientMessage::CashOutStart
        } else {
            ClientMessage::CashOutStop
        }
    }

    pub fn ping(&self, now_ms: u64) -> ClientMessage {
        ClientMessage::Ping { timestamp: now_ms }
    }

    pub fn on_connection_lost(&mut self, now: Instant) {
        self.status.on_connection_lost(now);
    }

    /// Begin a due reconnect. The caller re-sends `Join` when this is true.
    pub fn poll_reconnect(&mut self, now: Instant) -> bool {
        if self.status.begin_reconnect(now) {
            self.last_input_seq = 0;
            return true;
        }
        false
    }

    /// Tear down: purge every cache
    pub fn stop(&mut self) {
        self.viruses.clear();
        self.snapshot = None;
        self.leaderboard.clear();
        self.cash_out.clear();
        self.rtt.clear();
        self.session_id = None;
        self.camera_placed = false;
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.status()
    }

    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.outcome.as_ref()
    }

    pub fn snapshot(&self) -> Option<&ArenaSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn zone(&self) -> Option<ZoneSnapshot> {
        self.snapshot.as_ref().map(|s| s.zone)
    }

    pub fn local_player(&self) -> Option<&PlayerSnapshot> {
        let id = self.session_id?;
        self.snapshot.as_ref()?.player(id)
    }

    /// Where a player's main cell is drawn: its last authoritative position
    pub fn rendered_position(&self, session_id: SessionId) -> Option<Vec2> {
        self.snapshot.as_ref()?.player(session_id).map(|p| p.position)
    }

    pub fn camera(&self) -> Vec2 {
        self.camera.position
    }

    pub fn cash_out_ring(&self) -> CashOutState {
        self.cash_out.state()
    }

    pub fn leaderboard(&self) -> &[LeaderboardEntry] {
        &self.leaderboard
    }

    pub fn virus_phase(&self, id: EntityId) -> Option<VirusPhase> {
        self.viruses.phase(id)
    }

    pub fn cached_viruses(&self) -> usize {
        self.viruses.len()
    }

    pub fn rtt(&self) -> Option<Duration> {
        self.rtt.average()
    }

    /// Minimap dots for alive players inside the zone
    pub fn minimap_points(&self) -> Vec<(SessionId, Vec2)> {
        let Some(snapshot) = self.snapshot.as_ref() else {
            return Vec::new();
        };
        snapshot
            .players
            .iter()
            .filter(|p| p.alive)
            .filter_map(|p| {
                self.minimap
                    .project(p.position, &snapshot.zone)
                    .map(|point| (p.session_id, point))
            })
            .collect()
    }
}
