//! Lock-free command queue between connection tasks and an arena's tick loop
//!
//! Connection handlers push commands through cloned `CommandSender`s without
//! touching arena state; the tick loop drains everything at the start of
//! each tick.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tokio::sync::oneshot;

use crate::game::state::SessionId;
use crate::net::game_session::{JoinTicket, SessionOutbox};
use crate::net::gateway::JoinError;
use crate::util::vec2::Vec2;

/// Spawn request carrying everything the arena needs to reach the session
#[derive(Debug)]
pub struct JoinCommand {
    pub session_id: SessionId,
    pub name: String,
    pub cosmetic: String,
    /// External identity, when the player is signed in
    pub user_id: Option<String>,
    pub outbox: SessionOutbox,
    pub reply: oneshot::Sender<Result<JoinTicket, JoinError>>,
}

/// Everything a session can ask of the simulation
#[derive(Debug)]
pub enum ArenaCommand {
    Join(JoinCommand),
    Input {
        session_id: SessionId,
        seq: u64,
        direction: Vec2,
    },
    Split {
        session_id: SessionId,
        target: Vec2,
    },
    CashOut {
        session_id: SessionId,
        active: bool,
    },
    Leave {
        session_id: SessionId,
    },
    Shutdown,
}

impl ArenaCommand {
    /// Session the command belongs to (`None` for arena-wide commands)
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            ArenaCommand::Join(join) => Some(join.session_id),
            ArenaCommand::Input { session_id, .. }
            | ArenaCommand::Split { session_id, .. }
            | ArenaCommand::CashOut { session_id, .. }
            | ArenaCommand::Leave { session_id } => Some(*session_id),
            ArenaCommand::Shutdown => None,
        }
    }
}

/// Bounded MPSC queue drained once per tick
pub struct CommandBuffer {
    sender: Sender<ArenaCommand>,
    receiver: Receiver<ArenaCommand>,
    capacity: usize,
}

impl CommandBuffer {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// New sender handle for a connection
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            sender: self.sender.clone(),
        }
    }

    /// Drain all pending commands for this tick
    pub fn drain(&self) -> Vec<ArenaCommand> {
        self.receiver.try_iter().collect()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new(2048)
    }
}

/// Clonable sender handle held by connection handlers
#[derive(Clone)]
pub struct CommandSender {
    sender: Sender<ArenaCommand>,
}

impl CommandSender {
    /// Submit a command without blocking
    #[inline]
    pub fn try_send(&self, command: ArenaCommand) -> Result<(), CommandBufferError> {
        self.sender.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => CommandBufferError::Full,
            TrySendError::Disconnected(_) => CommandBufferError::Disconnected,
        })
    }
}

/// Command submission failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CommandBufferError {
    /// Buffer is full (backpressure)
    #[error("command buffer full")]
    Full,
    /// Arena task stopped
    #[error("arena stopped")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn input(session_id: SessionId, seq: u64) -> ArenaCommand {
        ArenaCommand::Input {
            session_id,
            seq,
            direction: Vec2::new(1.0, 0.0),
        }
    }

    #[test]
    fn test_drain_preserves_submission_order() {
        let buffer = CommandBuffer::new(10);
        let sender = buffer.sender();
        let id = Uuid::new_v4();

        for seq in 1..=3 {
            sender.try_send(input(id, seq)).unwrap();
        }
        assert_eq!(buffer.pending_count(), 3);

        let seqs: Vec<u64> = buffer
            .drain()
            .into_iter()
            .filter_map(|c| match c {
                ArenaCommand::Input { seq, .. } => Some(seq),
                _ => None,
            })
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_backpressure_when_full() {
        let buffer = CommandBuffer::new(2);
        let sender = buffer.sender();
        let id = Uuid::new_v4();

        assert!(sender.try_send(input(id, 1)).is_ok());
        assert!(sender.try_send(input(id, 2)).is_ok());
        assert_eq!(sender.try_send(input(id, 3)), Err(CommandBufferError::Full));

        buffer.drain();
        assert!(sender.try_send(input(id, 3)).is_ok());
    }

    #[test]
    fn test_disconnected_after_buffer_dropped() {
        let buffer = CommandBuffer::new(4);
        let sender = buffer.sender();
        drop(buffer);
        assert_eq!(
            sender.try_send(ArenaCommand::Shutdown),
            Err(CommandBufferError::Disconnected)
        );
    }

    #[test]
    fn test_session_id_of_commands() {
        let id = Uuid::new_v4();
        assert_eq!(input(id, 1).session_id(), Some(id));
        assert_eq!(ArenaCommand::Leave { session_id: id }.session_id(), Some(id));
        assert_eq!(ArenaCommand::Shutdown.session_id(), None);
    }

    #[test]
    fn test_default_capacity() {
        assert_eq!(CommandBuffer::default().capacity(), 2048);
    }
}
