use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use crate::game::constants::physics;

/// Configuration errors reported by `validate`
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Read and parse an environment variable, warning (and keeping the default)
/// when it is present but unusable
fn env_parse<T: FromStr>(key: &str, accept: impl Fn(&T) -> bool) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse::<T>() {
        Ok(value) if accept(&value) => Some(value),
        Ok(_) => {
            tracing::warn!("{} '{}' out of range, using default", key, raw);
            None
        }
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Maximum number of concurrent arenas
    pub max_rooms: usize,
    /// Path to TLS certificate file
    pub tls_cert_path: Option<String>,
    /// Path to TLS key file
    pub tls_key_path: Option<String>,
    /// Port of the plain-HTTP metrics endpoint
    pub metrics_port: u16,
    /// Per-arena simulation settings
    pub arena: ArenaConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 4433,
            max_rooms: 100,
            tls_cert_path: None,
            tls_key_path: None,
            metrics_port: 9090,
            arena: ArenaConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(addr) = env_parse::<IpAddr>("BIND_ADDRESS", |_| true) {
            config.bind_address = addr;
        }
        if let Some(port) = env_parse::<u16>("PORT", |p| *p > 0) {
            config.port = port;
        }
        if let Some(max_rooms) = env_parse::<usize>("MAX_ROOMS", |n| (1..=10_000).contains(n)) {
            config.max_rooms = max_rooms;
        }
        if let Some(port) = env_parse::<u16>("METRICS_PORT", |p| *p > 0) {
            config.metrics_port = port;
        }
        if let Ok(cert_path) = std::env::var("TLS_CERT_PATH") {
            config.tls_cert_path = Some(cert_path);
        }
        if let Ok(key_path) = std::env::var("TLS_KEY_PATH") {
            config.tls_key_path = Some(key_path);
        }

        config.arena = ArenaConfig::load_or_default();
        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(invalid("port", "cannot be 0"));
        }
        if self.max_rooms == 0 {
            return Err(invalid("max_rooms", "must be at least 1"));
        }
        if self.metrics_port == self.port {
            return Err(invalid("metrics_port", "must differ from the game port"));
        }
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            return Err(invalid(
                "tls_cert_path",
                "TLS_CERT_PATH and TLS_KEY_PATH must be set together",
            ));
        }
        self.arena.validate()
    }
}

/// Simulation settings shared by every arena instance
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Ticks per second
    pub tick_rate: u32,
    /// Broadcast a snapshot every N ticks (1 = every tick)
    pub snapshot_interval_ticks: u32,
    /// Other players and coins farther than this from a viewer are not sent
    pub view_radius: f32,
    /// Coins kept on the field
    pub coin_count: usize,
    /// Viruses kept on the field
    pub virus_count: usize,
    /// Zone radius with no players
    pub zone_min_radius: f32,
    /// Upper bound for the zone radius
    pub zone_max_radius: f32,
    /// Target radius added per alive player
    pub zone_radius_per_player: f32,
    /// Maximum change of the current radius per second
    pub zone_transition_speed: f32,
    /// Seconds of uninterrupted intent needed to cash out
    pub cash_out_duration_secs: f32,
    /// Sessions allowed in one arena
    pub max_sessions: usize,
    /// Pending commands buffered between ticks
    pub command_buffer_capacity: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            tick_rate: physics::TICK_RATE,
            snapshot_interval_ticks: 1,
            view_radius: 1600.0,
            coin_count: 400,
            virus_count: 12,
            zone_min_radius: 1200.0,
            zone_max_radius: 4000.0,
            zone_radius_per_player: 150.0,
            zone_transition_speed: 25.0,
            cash_out_duration_secs: 5.0,
            max_sessions: 50,
            command_buffer_capacity: 2048,
        }
    }
}

impl ArenaConfig {
    /// Load arena settings from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse::<u32>("TICK_RATE", |v| (1..=120).contains(v)) {
            config.tick_rate = v;
        }
        if let Some(v) = env_parse::<u32>("SNAPSHOT_INTERVAL_TICKS", |v| (1..=30).contains(v)) {
            config.snapshot_interval_ticks = v;
        }
        if let Some(v) = env_parse::<f32>("VIEW_RADIUS", |v| *v > 0.0) {
            config.view_radius = v;
        }
        if let Some(v) = env_parse::<usize>("COIN_COUNT", |v| *v <= 10_000) {
            config.coin_count = v;
        }
        if let Some(v) = env_parse::<usize>("VIRUS_COUNT", |v| *v <= 500) {
            config.virus_count = v;
        }
        if let Some(v) = env_parse::<f32>("ZONE_MIN_RADIUS", |v| *v > 0.0) {
            config.zone_min_radius = v;
        }
        if let Some(v) = env_parse::<f32>("ZONE_MAX_RADIUS", |v| *v > 0.0) {
            config.zone_max_radius = v;
        }
        if let Some(v) = env_parse::<f32>("ZONE_RADIUS_PER_PLAYER", |v| *v >= 0.0) {
            config.zone_radius_per_player = v;
        }
        if let Some(v) = env_parse::<f32>("ZONE_TRANSITION_SPEED", |v| *v > 0.0) {
            config.zone_transition_speed = v;
        }
        if let Some(v) = env_parse::<f32>("CASH_OUT_SECONDS", |v| *v > 0.0) {
            config.cash_out_duration_secs = v;
        }
        if let Some(v) = env_parse::<usize>("MAX_SESSIONS_PER_ROOM", |v| *v > 0) {
            config.max_sessions = v;
        }

        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(invalid("tick_rate", "must be at least 1"));
        }
        if self.snapshot_interval_ticks == 0 {
            return Err(invalid("snapshot_interval_ticks", "must be at least 1"));
        }
        if self.zone_min_radius > self.zone_max_radius {
            return Err(invalid(
                "zone_min_radius",
                format!(
                    "{} exceeds zone_max_radius {}",
                    self.zone_min_radius, self.zone_max_radius
                ),
            ));
        }
        if self.cash_out_duration_secs <= 0.0 {
            return Err(invalid("cash_out_duration_secs", "must be positive"));
        }
        if self.max_sessions == 0 {
            return Err(invalid("max_sessions", "must be at least 1"));
        }
        if self.command_buffer_capacity == 0 {
            return Err(invalid("command_buffer_capacity", "must be at least 1"));
        }
        Ok(())
    }

    /// Seconds per tick
    pub fn tick_dt(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    /// Cash-out progress (0..100) gained per tick of held intent
    pub fn cash_out_progress_per_tick(&self) -> f32 {
        100.0 / (self.cash_out_duration_secs * self.tick_rate as f32)
    }
}
