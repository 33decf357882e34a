//! Arena runner - owns one game loop, applies queued commands each tick and
//! delivers snapshots and control messages to attached sessions

use hashbrown::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ArenaConfig;
use crate::game::command_buffer::{ArenaCommand, CommandBuffer, CommandSender, JoinCommand};
use crate::game::constants::mass;
use crate::game::constants::net::CONTROL_QUEUE_SIZE;
use crate::game::game_loop::{GameLoop, GameLoopEvent};
use crate::game::state::{ArenaState, SessionId};
use crate::metrics::{ArenaGauges, Metrics};
use crate::net::gateway::JoinError;
use crate::net::protocol::{ArenaSnapshot, ServerMessage, ZoneSnapshot};
use crate::progression::{AchievementSink, SessionProgress};
use crate::util::vec2::Vec2;

pub type SnapshotSlot = Option<Arc<ArenaSnapshot>>;

/// Arena side of a session's outbound channels.
/// Snapshots are latest-wins; control messages are queued.
#[derive(Debug)]
pub struct SessionOutbox {
    snapshots: watch::Sender<SnapshotSlot>,
    control: mpsc::Sender<ServerMessage>,
}

/// Connection side of a session's outbound channels
#[derive(Debug)]
pub struct OutboxReceivers {
    pub snapshots: watch::Receiver<SnapshotSlot>,
    pub control: mpsc::Receiver<ServerMessage>,
}

impl SessionOutbox {
    pub fn new() -> (Self, OutboxReceivers) {
        let (snap_tx, snap_rx) = watch::channel(None);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_SIZE);
        (
            Self {
                snapshots: snap_tx,
                control: control_tx,
            },
            OutboxReceivers {
                snapshots: snap_rx,
                control: control_rx,
            },
        )
    }

    /// Replace the pending snapshot. False once the connection is gone.
    pub fn push_snapshot(&self, snapshot: Arc<ArenaSnapshot>) -> bool {
        self.snapshots.send(Some(snapshot)).is_ok()
    }

    /// Queue a control message without waiting
    pub fn push_control(&self, message: ServerMessage) -> bool {
        match self.control.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Control queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }
}

/// Successful join result handed back to the connection
#[derive(Debug, Clone, PartialEq)]
pub struct JoinTicket {
    pub session_id: SessionId,
    pub position: Vec2,
    pub zone: ZoneSnapshot,
}

/// A session attached to this arena
struct AttachedSession {
    outbox: SessionOutbox,
    progress: Option<SessionProgress>,
    /// GameOver waiting for room in the control queue
    pending_game_over: Option<ServerMessage>,
    game_over_sent: bool,
}

impl AttachedSession {
    fn queue_game_over(&mut self, message: ServerMessage) {
        if !self.game_over_sent && self.pending_game_over.is_none() {
            self.pending_game_over = Some(message);
        }
        self.flush_game_over();
    }

    /// Retry a pending GameOver. It counts as sent only once queued.
    fn flush_game_over(&mut self) {
        let Some(message) = self.pending_game_over.take() else {
            return;
        };
        if self.outbox.push_control(message.clone()) {
            self.game_over_sent = true;
        } else if !self.outbox.is_closed() {
            self.pending_game_over = Some(message);
        }
    }
}

/// One arena instance. Only its own task mutates it.
pub struct ArenaSession {
    room_id: String,
    game_loop: GameLoop,
    commands: CommandBuffer,
    sessions: HashMap<SessionId, AttachedSession>,
    session_count: Arc<AtomicUsize>,
    metrics: Arc<Metrics>,
    sink: Arc<dyn AchievementSink>,
    gauges: ArenaGauges,
}

impl ArenaSession {
    pub fn new(
        room_id: String,
        config: ArenaConfig,
        metrics: Arc<Metrics>,
        sink: Arc<dyn AchievementSink>,
    ) -> Self {
        Self::with_game_loop(room_id, GameLoop::new(config), metrics, sink)
    }

    pub fn with_game_loop(
        room_id: String,
        game_loop: GameLoop,
        metrics: Arc<Metrics>,
        sink: Arc<dyn AchievementSink>,
    ) -> Self {
        let commands = CommandBuffer::new(game_loop.config().command_buffer_capacity);
        Self {
            room_id,
            game_loop,
            commands,
            sessions: HashMap::new(),
            session_count: Arc::new(AtomicUsize::new(0)),
            metrics,
            sink,
            gauges: ArenaGauges::default(),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn command_sender(&self) -> CommandSender {
        self.commands.sender()
    }

    /// Shared view of the attached session count
    pub fn session_counter(&self) -> Arc<AtomicUsize> {
        self.session_count.clone()
    }

    pub fn game_loop(&self) -> &GameLoop {
        &self.game_loop
    }

    pub fn game_loop_mut(&mut self) -> &mut GameLoop {
        &mut self.game_loop
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Apply every queued command. Returns false once shutdown was requested.
    pub fn apply_commands(&mut self) -> bool {
        let mut running = true;
        for command in self.commands.drain() {
            match command {
                ArenaCommand::Join(join) => self.handle_join(join),
                ArenaCommand::Input {
                    session_id,
                    seq,
                    direction,
                } => {
                    if !self.game_loop.apply_input(session_id, seq, direction) {
                        debug!("Dropped stale input {} from {}", seq, session_id);
                    }
                }
                ArenaCommand::Split { session_id, target } => {
                    if self.game_loop.apply_split(session_id, target).is_none() {
                        debug!("Split ignored for {}", session_id);
                    }
                }
                ArenaCommand::CashOut { session_id, active } => {
                    if !self.game_loop.set_cash_out_intent(session_id, active) {
                        debug!("Cash-out intent ignored for {}", session_id);
                    }
                }
                ArenaCommand::Leave { session_id } => self.handle_leave(session_id),
                ArenaCommand::Shutdown => running = false,
            }
        }
        self.session_count.store(self.sessions.len(), Ordering::Relaxed);
        running
    }

    fn handle_join(&mut self, join: JoinCommand) {
        let JoinCommand {
            session_id,
            name,
            cosmetic,
            user_id,
            outbox,
            reply,
        } = join;

        let rejoin = self.sessions.contains_key(&session_id);
        if !rejoin && self.sessions.len() >= self.game_loop.config().max_sessions {
            self.metrics.joins_rejected_total.fetch_add(1, Ordering::Relaxed);
            let _ = reply.send(Err(JoinError::ArenaFull));
            return;
        }

        let position = self.game_loop.spawn_player(session_id, name.clone(), cosmetic);
        let ticket = JoinTicket {
            session_id,
            position,
            zone: ZoneSnapshot::from(&self.game_loop.state().zone),
        };
        if reply.send(Ok(ticket)).is_err() {
            // Connection went away while the join was queued
            self.game_loop.remove_player(session_id);
            return;
        }

        let progress = user_id.map(|user| SessionProgress::new(user, self.sink.clone()));
        self.sessions.insert(
            session_id,
            AttachedSession {
                outbox,
                progress,
                pending_game_over: None,
                game_over_sent: false,
            },
        );
        self.metrics.joins_total.fetch_add(1, Ordering::Relaxed);
        info!("{} ({}) joined room {}", name, session_id, self.room_id);
    }

    fn handle_leave(&mut self, session_id: SessionId) {
        let attached = self.sessions.remove(&session_id).is_some();
        let removed = self.game_loop.remove_player(session_id).is_some();
        if attached || removed {
            info!("Session {} left room {}", session_id, self.room_id);
        }
    }

    /// Run one simulation step and deliver its events
    pub fn tick(&mut self) -> Vec<GameLoopEvent> {
        sanitize_arena_state(self.game_loop.state_mut());
        let dt = self.game_loop.config().tick_dt();
        let events = self.game_loop.tick(dt);
        sanitize_arena_state(self.game_loop.state_mut());

        for session in self.sessions.values_mut() {
            session.flush_game_over();
        }
        for event in &events {
            self.handle_event(event);
        }
        self.session_count.store(self.sessions.len(), Ordering::Relaxed);
        self.update_gauges();
        events
    }

    fn handle_event(&mut self, event: &GameLoopEvent) {
        match event {
            GameLoopEvent::PlayerSpawned {
                session_id,
                position,
            } => {
                debug!("Spawned {} at ({:.0}, {:.0})", session_id, position.x, position.y);
            }
            GameLoopEvent::CoinCollected { .. } => {
                self.metrics.coins_collected_total.fetch_add(1, Ordering::Relaxed);
            }
            GameLoopEvent::PieceMerged {
                session_id,
                piece_id,
            } => {
                debug!("Piece {} merged back into {}", piece_id, session_id);
            }
            GameLoopEvent::VirusBurst {
                session_id,
                virus_id,
                pieces,
            } => {
                self.metrics.virus_bursts_total.fetch_add(1, Ordering::Relaxed);
                debug!("{} hit virus {} and burst into {} pieces", session_id, virus_id, pieces);
            }
            GameLoopEvent::PlayerEliminated {
                session_id,
                eliminated_by,
                final_score,
                final_mass,
                ..
            } => {
                self.metrics.eliminations_total.fetch_add(1, Ordering::Relaxed);
                info!(
                    "{} eliminated by {} (score {}, mass {:.1})",
                    session_id, eliminated_by, final_score, final_mass
                );
                if let Some(session) = self.sessions.get_mut(session_id) {
                    session.queue_game_over(ServerMessage::GameOver {
                        final_score: *final_score,
                        final_mass: *final_mass,
                        eliminated_by: eliminated_by.clone(),
                    });
                }
            }
            GameLoopEvent::CashOutCompleted {
                session_id,
                final_score,
                final_mass,
            } => {
                self.metrics.cash_outs_total.fetch_add(1, Ordering::Relaxed);
                info!("{} cashed out with score {}", session_id, final_score);
                // The session ends here; the connection closes after delivery
                if let Some(session) = self.sessions.remove(session_id) {
                    session.outbox.push_control(ServerMessage::CashOutComplete {
                        final_score: *final_score,
                        final_mass: *final_mass,
                    });
                }
            }
        }
    }

    /// Whether this tick is a snapshot tick
    pub fn should_send_snapshot(&self) -> bool {
        let interval = self.game_loop.config().snapshot_interval_ticks.max(1) as u64;
        self.game_loop.state().tick % interval == 0
    }

    /// Push each session its own view and feed progression. Returns the
    /// number of sessions reached.
    pub fn broadcast_snapshots(&mut self) -> usize {
        let state = self.game_loop.state();
        let view_radius = self.game_loop.config().view_radius;
        let mut delivered = 0;

        for (session_id, session) in self.sessions.iter_mut() {
            let snapshot = ArenaSnapshot::for_viewer(state, *session_id, view_radius);
            if session.outbox.push_snapshot(Arc::new(snapshot)) {
                delivered += 1;
            }

            if let (Some(progress), Some(player)) = (session.progress.as_mut(), state.get_player(*session_id)) {
                if player.alive {
                    for mission in progress.observe(player.score, player.total_mass(), state.time) {
                        debug!("{} completed mission {}", session_id, mission);
                    }
                }
            }
        }
        delivered
    }

    /// Kick every session and clear the arena
    pub fn shutdown(&mut self, reason: &str) {
        for (session_id, session) in self.sessions.drain() {
            session.outbox.push_control(ServerMessage::Kicked {
                reason: reason.to_string(),
            });
            self.game_loop.remove_player(session_id);
        }
        self.session_count.store(0, Ordering::Relaxed);
        self.metrics.apply_arena_gauges(&self.gauges, &ArenaGauges::default());
        self.gauges = ArenaGauges::default();
        self.metrics.clear_zone_radius(&self.room_id);
    }

    fn update_gauges(&mut self) {
        let state = self.game_loop.state();
        let current = ArenaGauges {
            sessions: self.sessions.len() as u64,
            alive: state.alive_count() as u64,
            pieces: state.piece_count() as u64,
            coins: state.coins.len() as u64,
            viruses: state.viruses.len() as u64,
        };
        self.metrics.apply_arena_gauges(&self.gauges, &current);
        self.metrics.set_zone_radius(&self.room_id, state.zone.current_radius);
        self.gauges = current;
    }
}

/// Repair NaN/Infinity and non-positive mass so one bad value cannot spread
pub fn sanitize_arena_state(state: &mut ArenaState) -> usize {
    let center = state.zone.center;
    let mut fixed = 0;

    for player in &mut state.players {
        if !player.position.is_finite() {
            warn!("Fixed NaN position for player {}", player.session_id);
            player.position = center;
            fixed += 1;
        }
        if !player.heading.is_finite() {
            warn!("Fixed NaN heading for player {}", player.session_id);
            player.heading = Vec2::ZERO;
            fixed += 1;
        }
        if !player.mass.is_finite() || player.mass <= 0.0 {
            warn!("Fixed invalid mass for player {}", player.session_id);
            player.mass = mass::STARTING;
            fixed += 1;
        }

        let owner_position = player.position;
        for piece in player.pieces.iter_mut() {
            if !piece.position.is_finite() {
                piece.position = owner_position;
                fixed += 1;
            }
            if !piece.velocity.is_finite() {
                piece.velocity = Vec2::ZERO;
                fixed += 1;
            }
            if !piece.mass.is_finite() || piece.mass <= 0.0 {
                piece.mass = mass::MINIMUM;
                fixed += 1;
            }
        }
    }
    fixed
}

/// Start the arena's tick task. The task owns the arena and ends on
/// `ArenaCommand::Shutdown`.
pub fn start_arena_loop(mut session: ArenaSession) -> JoinHandle<()> {
    tokio::spawn(async move {
        let tick_rate = session.game_loop.config().tick_rate;
        let tick_duration = Duration::from_micros(1_000_000 / tick_rate as u64);
        let mut ticker = interval(tick_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let metrics = session.metrics.clone();
        metrics.arenas_active.fetch_add(1, Ordering::Relaxed);
        info!("Arena {} started at {} Hz", session.room_id, tick_rate);
        let start = Instant::now();
        let mut tick_count: u64 = 0;

        loop {
            ticker.tick().await;
            tick_count += 1;
            let tick_start = Instant::now();

            if !session.apply_commands() {
                break;
            }
            session.tick();
            if session.should_send_snapshot() {
                session.broadcast_snapshots();
            }

            metrics.record_tick_time(tick_start.elapsed());

            // Log stats periodically (every 30 seconds)
            if tick_count % (tick_rate as u64 * 30) == 0 {
                let state = session.game_loop.state();
                info!(
                    "Arena {}: {}s, tick {}, {} sessions, {} alive, {} pieces, zone {:.0}/{:.0}",
                    session.room_id,
                    start.elapsed().as_secs(),
                    state.tick,
                    session.sessions.len(),
                    state.alive_count(),
                    state.piece_count(),
                    state.zone.current_radius,
                    state.zone.target_radius
                );
            }
        }

        session.shutdown("server shutting down");
        metrics.arenas_active.fetch_sub(1, Ordering::Relaxed);
        info!("Arena {} stopped after {} ticks", session.room_id, tick_count);
    })
}
