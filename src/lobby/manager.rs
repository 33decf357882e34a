use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::ArenaConfig;
use crate::game::command_buffer::CommandSender;
use crate::game::constants::net::DEFAULT_ROOM;
use crate::lobby::room::{ArenaRoom, RoomError};
use crate::metrics::Metrics;
use crate::progression::AchievementSink;

/// Empty rooms younger than this are kept so a join in flight can land
const EMPTY_ROOM_GRACE: Duration = Duration::from_secs(60);

/// Room manager hosting one arena task per room id
pub struct RoomManager {
    rooms: HashMap<String, ArenaRoom>,
    max_rooms: usize,
    config: ArenaConfig,
    metrics: Arc<Metrics>,
    sink: Arc<dyn AchievementSink>,
}

impl RoomManager {
    pub fn new(
        max_rooms: usize,
        config: ArenaConfig,
        metrics: Arc<Metrics>,
        sink: Arc<dyn AchievementSink>,
    ) -> Self {
        Self {
            rooms: HashMap::new(),
            max_rooms,
            config,
            metrics,
            sink,
        }
    }

    /// Room for `room_id`, starting its arena if needed. A room whose task
    /// has ended is replaced.
    pub fn get_or_create(&mut self, room_id: &str) -> Result<&ArenaRoom, RoomError> {
        let stale = self.rooms.get(room_id).is_some_and(|room| !room.is_running());
        if stale {
            warn!("Room {} arena stopped unexpectedly, restarting", room_id);
            self.rooms.remove(room_id);
        }

        if !self.rooms.contains_key(room_id) {
            if self.rooms.len() >= self.max_rooms {
                return Err(RoomError::TooManyRooms);
            }
            let room = ArenaRoom::start(
                room_id.to_string(),
                self.config.clone(),
                self.metrics.clone(),
                self.sink.clone(),
            );
            info!("Created room {} ({} rooms)", room_id, self.rooms.len() + 1);
            self.rooms.insert(room_id.to_string(), room);
        }

        self.rooms.get(room_id).ok_or(RoomError::RoomNotFound)
    }

    pub fn get(&self, room_id: &str) -> Option<&ArenaRoom> {
        self.rooms.get(room_id)
    }

    /// Command sender of an existing, running room
    pub fn sender_for(&self, room_id: &str) -> Result<CommandSender, RoomError> {
        let room = self.rooms.get(room_id).ok_or(RoomError::RoomNotFound)?;
        if !room.is_running() {
            return Err(RoomError::ArenaStopped);
        }
        Ok(room.commands())
    }

    /// Stop empty rooms other than the default one. Returns their ids.
    pub fn prune_empty(&mut self) -> Vec<String> {
        self.prune_empty_older_than(EMPTY_ROOM_GRACE)
    }

    fn prune_empty_older_than(&mut self, grace: Duration) -> Vec<String> {
        let idle: Vec<String> = self
            .rooms
            .values()
            .filter(|room| {
                room.id() != DEFAULT_ROOM
                    && (!room.is_running() || (room.is_empty() && room.created_at.elapsed() >= grace))
            })
            .map(|room| room.id().to_string())
            .collect();

        for id in &idle {
            if let Some(room) = self.rooms.remove(id) {
                room.request_stop();
                info!("Closed idle room {}", id);
            }
        }
        idle
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn room_ids(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    /// Sessions across all rooms
    pub fn total_sessions(&self) -> usize {
        self.rooms.values().map(ArenaRoom::session_count).sum()
    }

    /// Stop every room and wait for the arena tasks
    pub async fn shutdown_all_rooms(&mut self) {
        let rooms: Vec<ArenaRoom> = self.rooms.drain().map(|(_, room)| room).collect();
        info!("Stopping {} rooms", rooms.len());
        for room in rooms {
            room.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progression::LoggingSink;

    fn manager(max_rooms: usize) -> RoomManager {
        let config = ArenaConfig {
            coin_count: 0,
            virus_count: 0,
            ..ArenaConfig::default()
        };
        RoomManager::new(max_rooms, config, Arc::new(Metrics::new()), Arc::new(LoggingSink))
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_room() {
        let mut manager = manager(4);
        manager.get_or_create("default").unwrap();
        manager.get_or_create("default").unwrap();
        assert_eq!(manager.room_count(), 1);
        assert!(manager.sender_for("default").is_ok());
        manager.shutdown_all_rooms().await;
    }

    #[tokio::test]
    async fn test_max_rooms() {
        let mut manager = manager(2);
        manager.get_or_create("a").unwrap();
        manager.get_or_create("b").unwrap();
        assert!(matches!(manager.get_or_create("c"), Err(RoomError::TooManyRooms)));
        // Existing rooms stay reachable at the limit
        assert!(manager.get_or_create("a").is_ok());
        manager.shutdown_all_rooms().await;
    }

    #[tokio::test]
    async fn test_unknown_room_sender() {
        let manager = manager(2);
        assert_eq!(manager.sender_for("nowhere").err(), Some(RoomError::RoomNotFound));
    }

    #[tokio::test]
    async fn test_prune_keeps_default_room() {
        let mut manager = manager(4);
        manager.get_or_create("default").unwrap();
        manager.get_or_create("side-room").unwrap();

        let pruned = manager.prune_empty_older_than(Duration::ZERO);
        assert_eq!(pruned, vec!["side-room".to_string()]);
        assert!(manager.get("default").is_some());
        assert_eq!(manager.total_sessions(), 0);
        manager.shutdown_all_rooms().await;
    }

    #[tokio::test]
    async fn test_stopped_room_is_replaced() {
        let mut manager = manager(2);
        manager.get_or_create("eu").unwrap().request_stop();

        // Give the arena task a chance to observe the shutdown
        for _ in 0..50 {
            if !manager.get("eu").unwrap().is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(manager.sender_for("eu").err(), Some(RoomError::ArenaStopped));

        assert!(manager.get_or_create("eu").unwrap().is_running());
        manager.shutdown_all_rooms().await;
    }

    #[tokio::test]
    async fn test_shutdown_all_rooms() {
        let mut manager = manager(4);
        manager.get_or_create("a").unwrap();
        manager.get_or_create("b").unwrap();
        manager.shutdown_all_rooms().await;
        assert_eq!(manager.room_count(), 0);
    }
}
