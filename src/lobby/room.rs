use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::ArenaConfig;
use crate::game::command_buffer::{ArenaCommand, CommandBufferError, CommandSender};
use crate::metrics::Metrics;
use crate::net::game_session::{start_arena_loop, ArenaSession};
use crate::progression::AchievementSink;

/// Time allowed for an arena task to finish after `Shutdown`
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// A running arena task and the handles needed to reach it
pub struct ArenaRoom {
    id: String,
    pub created_at: Instant,
    commands: CommandSender,
    sessions: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl ArenaRoom {
    /// Spawn a new arena task for `id`
    pub fn start(
        id: String,
        config: ArenaConfig,
        metrics: Arc<Metrics>,
        sink: Arc<dyn AchievementSink>,
    ) -> Self {
        let session = ArenaSession::new(id.clone(), config, metrics, sink);
        let commands = session.command_sender();
        let sessions = session.session_counter();
        let handle = start_arena_loop(session);

        Self {
            id,
            created_at: Instant::now(),
            commands,
            sessions,
            handle,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sender for connection tasks
    pub fn commands(&self) -> CommandSender {
        self.commands.clone()
    }

    pub fn submit(&self, command: ArenaCommand) -> Result<(), CommandBufferError> {
        self.commands.try_send(command)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.session_count() == 0
    }

    /// False once the arena task has ended (shutdown or panic)
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Ask the arena to stop without waiting for it
    pub fn request_stop(&self) {
        if let Err(e) = self.commands.try_send(ArenaCommand::Shutdown) {
            warn!("Could not signal shutdown to room {}: {}", self.id, e);
        }
    }

    /// Stop the arena and wait for its task
    pub async fn stop(self) {
        self.request_stop();
        let mut handle = self.handle;
        match tokio::time::timeout(STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Room {} task failed: {}", self.id, e),
            Err(_) => {
                warn!("Room {} did not stop in time, aborting", self.id);
                handle.abort();
            }
        }
    }
}

/// Room errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Room not found")]
    RoomNotFound,
    #[error("Too many rooms")]
    TooManyRooms,
    #[error("Arena stopped")]
    ArenaStopped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progression::LoggingSink;

    fn quiet_config() -> ArenaConfig {
        ArenaConfig {
            coin_count: 0,
            virus_count: 0,
            ..ArenaConfig::default()
        }
    }

    #[tokio::test]
    async fn test_room_runs_until_stopped() {
        let room = ArenaRoom::start(
            "eu-1".into(),
            quiet_config(),
            Arc::new(Metrics::new()),
            Arc::new(LoggingSink),
        );
        assert_eq!(room.id(), "eu-1");
        assert!(room.is_running());
        assert!(room.is_empty());

        let commands = room.commands();
        room.stop().await;
        assert_eq!(
            commands.try_send(ArenaCommand::Shutdown),
            Err(CommandBufferError::Disconnected)
        );
    }
}
