//! Per-connection session gateway
//!
//! Turns decoded client messages into arena commands. Holds no arena
//! state: the transport owns I/O and the arena task owns the world, so
//! everything here is synchronous and testable without a network.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::anticheat::validator::{CheatViolation, InputValidator};
use crate::game::command_buffer::ArenaCommand;
use crate::game::constants::net::{DEFAULT_ROOM, MAX_COSMETIC_LEN, MAX_NAME_LEN, MAX_ROOM_ID_LEN};
use crate::game::state::SessionId;
use crate::net::protocol::{ClientMessage, ServerMessage};

/// Reasons a join is refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("Invalid display name")]
    InvalidName,
    #[error("Invalid room id")]
    InvalidRoomId,
    #[error("Cosmetic selection too large ({0} bytes)")]
    CosmeticTooLarge(usize),
    #[error("Arena is full")]
    ArenaFull,
    #[error("No arena available")]
    RoomLimit,
}

/// A validated join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub display_name: String,
    pub room_id: String,
    pub cosmetic: String,
    pub user_id: Option<String>,
}

/// What the connection task should do with a message
#[derive(Debug)]
pub enum GatewayAction {
    /// Ask the room manager for an arena and spawn
    Join(JoinRequest),
    /// Hand to the arena's command buffer
    Forward(ArenaCommand),
    /// Answer directly, without involving the arena
    Reply(ServerMessage),
    /// Remove the player and close
    Leave,
    Ignore,
    /// Too many protocol violations
    Close(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayState {
    AwaitingJoin,
    /// Join handed to the arena, not yet answered
    Joining,
    Joined { session_id: SessionId, room_id: String },
    Closed,
}

/// Sanitize a display name: trim, drop control and markup characters,
/// cap the length and collapse whitespace
pub fn sanitize_name(raw: &str) -> Option<String> {
    let name: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .filter(|c| !matches!(c, '<' | '>' | '&'))
        .take(MAX_NAME_LEN)
        .collect();
    let name = name.split_whitespace().collect::<Vec<_>>().join(" ");
    (!name.is_empty()).then_some(name)
}

/// Validate join parameters
pub fn validate_join(
    display_name: &str,
    room_id: &str,
    cosmetic: &str,
    user_id: Option<&str>,
) -> Result<JoinRequest, JoinError> {
    let display_name = sanitize_name(display_name).ok_or(JoinError::InvalidName)?;

    let room_id = room_id.trim();
    let room_id = if room_id.is_empty() {
        DEFAULT_ROOM.to_string()
    } else if room_id.chars().count() <= MAX_ROOM_ID_LEN
        && room_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        room_id.to_ascii_lowercase()
    } else {
        return Err(JoinError::InvalidRoomId);
    };

    if cosmetic.len() > MAX_COSMETIC_LEN {
        return Err(JoinError::CosmeticTooLarge(cosmetic.len()));
    }

    Ok(JoinRequest {
        display_name,
        room_id,
        cosmetic: cosmetic.to_string(),
        user_id: user_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string),
    })
}

/// Milliseconds since the Unix epoch
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Gateway for one connection
pub struct SessionGateway {
    state: GatewayState,
    validator: InputValidator,
    /// Highest input sequence forwarded
    last_seq: Option<u64>,
    violations: u32,
    max_violations: u32,
}

impl SessionGateway {
    pub fn new(max_violations: u32) -> Self {
        Self {
            state: GatewayState::AwaitingJoin,
            validator: InputValidator::default(),
            last_seq: None,
            violations: 0,
            max_violations,
        }
    }

    pub fn state(&self) -> &GatewayState {
        &self.state
    }

    pub fn session_id(&self) -> Option<SessionId> {
        match &self.state {
            GatewayState::Joined { session_id, .. } => Some(*session_id),
            _ => None,
        }
    }

    pub fn violations(&self) -> u32 {
        self.violations
    }

    pub fn on_join_accepted(&mut self, session_id: SessionId, room_id: String) {
        self.state = GatewayState::Joined { session_id, room_id };
        self.last_seq = None;
    }

    pub fn on_join_rejected(&mut self) {
        if self.state == GatewayState::Joining {
            self.state = GatewayState::AwaitingJoin;
        }
    }

    pub fn close(&mut self) {
        self.state = GatewayState::Closed;
    }

    fn violation(&mut self, reason: impl Into<String>) -> GatewayAction {
        let reason = reason.into();
        self.violations += 1;
        tracing::debug!("Protocol violation ({}): {}", self.violations, reason);
        if self.violations >= self.max_violations {
            self.state = GatewayState::Closed;
            GatewayAction::Close(reason)
        } else {
            GatewayAction::Ignore
        }
    }

    fn cheat(&mut self, violation: CheatViolation) -> GatewayAction {
        if violation.is_severe() {
            self.violation(violation.to_string())
        } else {
            GatewayAction::Ignore
        }
    }

    /// Route one decoded client message
    pub fn handle(&mut self, message: ClientMessage) -> GatewayAction {
        if self.state == GatewayState::Closed {
            return GatewayAction::Ignore;
        }

        // Ping is allowed in every state
        if let ClientMessage::Ping { timestamp } = message {
            return GatewayAction::Reply(ServerMessage::Pong {
                client_timestamp: timestamp,
                server_timestamp: unix_millis(),
            });
        }

        let session_id = match (&self.state, &message) {
            (GatewayState::AwaitingJoin, ClientMessage::Join { .. }) => None,
            (GatewayState::AwaitingJoin, ClientMessage::Leave) => {
                self.state = GatewayState::Closed;
                return GatewayAction::Leave;
            }
            (GatewayState::AwaitingJoin, _) => return self.violation("message before join"),
            (GatewayState::Joining, _) => return GatewayAction::Ignore,
            (GatewayState::Joined { .. }, ClientMessage::Join { .. }) => {
                return self.violation("duplicate join")
            }
            (GatewayState::Joined { session_id, .. }, _) => Some(*session_id),
            (GatewayState::Closed, _) => return GatewayAction::Ignore,
        };

        match (message, session_id) {
            (
                ClientMessage::Join {
                    display_name,
                    room_id,
                    cosmetic,
                    user_id,
                },
                _,
            ) => match validate_join(&display_name, &room_id, &cosmetic, user_id.as_deref()) {
                Ok(request) => {
                    self.state = GatewayState::Joining;
                    GatewayAction::Join(request)
                }
                Err(e) => {
                    tracing::debug!("Join rejected: {}", e);
                    GatewayAction::Reply(ServerMessage::JoinRejected { reason: e.to_string() })
                }
            },
            (ClientMessage::Input { seq, dx, dy }, Some(session_id)) => {
                let direction = match self.validator.validate_direction(dx, dy) {
                    Ok(d) => d,
                    Err(v) => return self.cheat(v),
                };
                if let Err(v) = self.validator.validate_sequence(self.last_seq, seq) {
                    if v.is_severe() {
                        // Resynchronize so one jump is not punished forever
                        self.last_seq = Some(seq);
                    }
                    return self.cheat(v);
                }
                self.last_seq = Some(seq);
                GatewayAction::Forward(ArenaCommand::Input {
                    session_id,
                    seq,
                    direction,
                })
            }
            (ClientMessage::Split { target_x, target_y }, Some(session_id)) => {
                match self.validator.validate_split_target(target_x, target_y) {
                    Ok(target) => GatewayAction::Forward(ArenaCommand::Split { session_id, target }),
                    Err(v) => self.cheat(v),
                }
            }
            (ClientMessage::CashOutStart, Some(session_id)) => GatewayAction::Forward(ArenaCommand::CashOut {
                session_id,
                active: true,
            }),
            (ClientMessage::CashOutStop, Some(session_id)) => GatewayAction::Forward(ArenaCommand::CashOut {
                session_id,
                active: false,
            }),
            (ClientMessage::Leave, _) => {
                self.state = GatewayState::Closed;
                GatewayAction::Leave
            }
            _ => GatewayAction::Ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn join_message(name: &str) -> ClientMessage {
        ClientMessage::Join {
            display_name: name.to_string(),
            room_id: String::new(),
            cosmetic: String::new(),
            user_id: None,
        }
    }

    fn joined_gateway() -> (SessionGateway, SessionId) {
        let mut gateway = SessionGateway::new(5);
        assert!(matches!(gateway.handle(join_message("Player")), GatewayAction::Join(_)));
        let id = Uuid::new_v4();
        gateway.on_join_accepted(id, DEFAULT_ROOM.to_string());
        (gateway, id)
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("  Bob  ").as_deref(), Some("Bob"));
        assert_eq!(sanitize_name("<script>").as_deref(), Some("script"));
        assert_eq!(sanitize_name("a   b\tc").as_deref(), Some("a b c"));
        assert_eq!(sanitize_name("\u{7}\u{1}"), None);
        assert_eq!(sanitize_name("abcdefghijklmnopqrstuvwxyz").unwrap().chars().count(), MAX_NAME_LEN);
    }

    #[test]
    fn test_validate_join_room_ids() {
        let ok = validate_join("Bob", "", "", None).unwrap();
        assert_eq!(ok.room_id, DEFAULT_ROOM);

        let named = validate_join("Bob", "EU-West_2", "", None).unwrap();
        assert_eq!(named.room_id, "eu-west_2");

        assert_eq!(validate_join("Bob", "../etc", "", None), Err(JoinError::InvalidRoomId));
        assert_eq!(
            validate_join("Bob", &"r".repeat(MAX_ROOM_ID_LEN + 1), "", None),
            Err(JoinError::InvalidRoomId)
        );
    }

    #[test]
    fn test_validate_join_cosmetic_passthrough() {
        let blob = "{\"skin\":\"<neon>\"}";
        assert_eq!(validate_join("Bob", "", blob, None).unwrap().cosmetic, blob);
        let huge = "x".repeat(MAX_COSMETIC_LEN + 1);
        assert!(matches!(
            validate_join("Bob", "", &huge, None),
            Err(JoinError::CosmeticTooLarge(_))
        ));
    }

    #[test]
    fn test_invalid_name_replies_rejected() {
        let mut gateway = SessionGateway::new(5);
        match gateway.handle(join_message("   ")) {
            GatewayAction::Reply(ServerMessage::JoinRejected { .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(gateway.state(), &GatewayState::AwaitingJoin);
    }

    #[test]
    fn test_messages_before_join_are_violations() {
        let mut gateway = SessionGateway::new(3);
        for _ in 0..2 {
            assert!(matches!(gateway.handle(ClientMessage::CashOutStart), GatewayAction::Ignore));
        }
        assert!(matches!(gateway.handle(ClientMessage::CashOutStart), GatewayAction::Close(_)));
        assert_eq!(gateway.state(), &GatewayState::Closed);
    }

    #[test]
    fn test_ping_answered_in_any_state() {
        let mut gateway = SessionGateway::new(3);
        match gateway.handle(ClientMessage::Ping { timestamp: 1234 }) {
            GatewayAction::Reply(ServerMessage::Pong { client_timestamp, .. }) => {
                assert_eq!(client_timestamp, 1234)
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(gateway.violations(), 0);
    }

    #[test]
    fn test_input_forwarded_and_normalized() {
        let (mut gateway, id) = joined_gateway();
        match gateway.handle(ClientMessage::Input { seq: 1, dx: 3.0, dy: 4.0 }) {
            GatewayAction::Forward(ArenaCommand::Input {
                session_id,
                seq,
                direction,
            }) => {
                assert_eq!(session_id, id);
                assert_eq!(seq, 1);
                assert!((direction.length() - 1.0).abs() < 1e-5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_stale_input_dropped_without_violation() {
        let (mut gateway, _) = joined_gateway();
        gateway.handle(ClientMessage::Input { seq: 5, dx: 1.0, dy: 0.0 });
        assert!(matches!(
            gateway.handle(ClientMessage::Input { seq: 4, dx: 0.0, dy: 1.0 }),
            GatewayAction::Ignore
        ));
        assert!(matches!(
            gateway.handle(ClientMessage::Input { seq: 5, dx: 0.0, dy: 1.0 }),
            GatewayAction::Ignore
        ));
        assert_eq!(gateway.violations(), 0);
    }

    #[test]
    fn test_nan_input_counts_as_violation() {
        let (mut gateway, _) = joined_gateway();
        assert!(matches!(
            gateway.handle(ClientMessage::Input {
                seq: 1,
                dx: f32::NAN,
                dy: 0.0
            }),
            GatewayAction::Ignore
        ));
        assert_eq!(gateway.violations(), 1);
    }

    #[test]
    fn test_cash_out_and_split_forwarded() {
        let (mut gateway, id) = joined_gateway();
        assert!(matches!(
            gateway.handle(ClientMessage::CashOutStart),
            GatewayAction::Forward(ArenaCommand::CashOut { active: true, session_id }) if session_id == id
        ));
        assert!(matches!(
            gateway.handle(ClientMessage::CashOutStop),
            GatewayAction::Forward(ArenaCommand::CashOut { active: false, .. })
        ));
        assert!(matches!(
            gateway.handle(ClientMessage::Split {
                target_x: 10.0,
                target_y: 20.0
            }),
            GatewayAction::Forward(ArenaCommand::Split { .. })
        ));
    }

    #[test]
    fn test_duplicate_join_is_violation() {
        let (mut gateway, _) = joined_gateway();
        assert!(matches!(gateway.handle(join_message("Again")), GatewayAction::Ignore));
        assert_eq!(gateway.violations(), 1);
    }

    #[test]
    fn test_rejected_join_can_retry() {
        let mut gateway = SessionGateway::new(5);
        gateway.handle(join_message("Player"));
        assert_eq!(gateway.state(), &GatewayState::Joining);
        assert!(matches!(gateway.handle(ClientMessage::CashOutStart), GatewayAction::Ignore));
        gateway.on_join_rejected();
        assert!(matches!(gateway.handle(join_message("Player")), GatewayAction::Join(_)));
    }

    #[test]
    fn test_leave_closes() {
        let (mut gateway, _) = joined_gateway();
        assert!(matches!(gateway.handle(ClientMessage::Leave), GatewayAction::Leave));
        assert!(matches!(gateway.handle(ClientMessage::CashOutStart), GatewayAction::Ignore));
    }
}
