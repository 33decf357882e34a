//! Connection admission, per-connection rate limiting and IP bans

use rustc_hash::FxHashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::game::constants::net::MAX_MESSAGE_SIZE;

/// Configuration for DoS protection
#[derive(Debug, Clone)]
pub struct DoSConfig {
    /// Maximum total concurrent connections
    pub max_connections_total: usize,
    /// Maximum connections per IP address
    pub max_connections_per_ip: usize,
    /// Sustained messages per second per connection
    pub max_messages_per_second: u32,
    /// Bucket capacity: messages a connection may send back to back
    pub burst: u32,
    /// Maximum message size in bytes
    pub max_message_size: usize,
    /// Ban duration for connections that hit the violation limit
    pub ban_duration: Duration,
    /// Violations (rate limit or protocol) before the connection is closed
    pub violations_before_ban: u32,
}

impl Default for DoSConfig {
    fn default() -> Self {
        Self {
            max_connections_total: 1000,
            max_connections_per_ip: 5,
            // Inputs at 60 Hz plus pings and commands
            max_messages_per_second: 90,
            burst: 30,
            max_message_size: MAX_MESSAGE_SIZE,
            ban_duration: Duration::from_secs(300),
            violations_before_ban: 10,
        }
    }
}

impl DoSConfig {
    /// Load limits from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();
        let read = |key: &str| std::env::var(key).ok().and_then(|v| v.parse::<usize>().ok());

        if let Some(v) = read("MAX_CONNECTIONS").filter(|v| *v > 0) {
            config.max_connections_total = v;
        }
        if let Some(v) = read("MAX_CONNECTIONS_PER_IP").filter(|v| *v > 0) {
            config.max_connections_per_ip = v;
        }
        if let Some(v) = read("MAX_MESSAGES_PER_SECOND").filter(|v| *v > 0) {
            config.max_messages_per_second = v as u32;
        }
        config
    }
}

/// Token bucket plus violation count for one connection
#[derive(Debug)]
struct ConnectionState {
    ip: IpAddr,
    tokens: f32,
    last_refill: Instant,
    violations: u32,
}

impl ConnectionState {
    fn new(ip: IpAddr, burst: u32, now: Instant) -> Self {
        Self {
            ip,
            tokens: burst as f32,
            last_refill: now,
            violations: 0,
        }
    }

    /// Refills at `rate` per second, never above `burst`
    fn take(&mut self, rate: u32, burst: u32, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f32();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * rate as f32).min(burst.max(1) as f32);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// DoS protection manager
pub struct DoSProtection {
    config: DoSConfig,
    ip_connections: FxHashMap<IpAddr, usize>,
    connections: FxHashMap<u64, ConnectionState>,
    banned_ips: FxHashMap<IpAddr, (Instant, String)>,
}

impl DoSProtection {
    pub fn new(config: DoSConfig) -> Self {
        Self {
            config,
            ip_connections: FxHashMap::default(),
            connections: FxHashMap::default(),
            banned_ips: FxHashMap::default(),
        }
    }

    /// Check if a new connection from this IP is allowed
    pub fn check_connection(&self, ip: IpAddr) -> Result<(), DoSError> {
        if let Some((banned_at, reason)) = self.banned_ips.get(&ip) {
            if banned_at.elapsed() < self.config.ban_duration {
                return Err(DoSError::IpBanned(reason.clone()));
            }
        }
        if self.connections.len() >= self.config.max_connections_total {
            return Err(DoSError::TooManyConnections);
        }
        if self.connections_from_ip(ip) >= self.config.max_connections_per_ip {
            return Err(DoSError::TooManyConnectionsFromIp);
        }
        Ok(())
    }

    /// Register a new connection and return its id
    pub fn register_connection(&mut self, ip: IpAddr) -> Result<u64, DoSError> {
        self.check_connection(ip)?;

        let connection_id = loop {
            let id = rand::random::<u64>();
            if !self.connections.contains_key(&id) {
                break id;
            }
        };

        *self.ip_connections.entry(ip).or_insert(0) += 1;
        self.connections
            .insert(connection_id, ConnectionState::new(ip, self.config.burst, Instant::now()));
        Ok(connection_id)
    }

    pub fn unregister_connection(&mut self, connection_id: u64) {
        let Some(conn) = self.connections.remove(&connection_id) else {
            return;
        };
        if let Some(count) = self.ip_connections.get_mut(&conn.ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.ip_connections.remove(&conn.ip);
            }
        }
    }

    /// Check if a message from this connection is allowed
    pub fn check_message(&mut self, connection_id: u64, size: usize) -> Result<(), DoSError> {
        self.check_message_at(connection_id, size, Instant::now())
    }

    fn check_message_at(&mut self, connection_id: u64, size: usize, now: Instant) -> Result<(), DoSError> {
        if size > self.config.max_message_size {
            self.record_violation(connection_id)?;
            return Err(DoSError::MessageTooLarge(size));
        }

        let (rate, burst) = (self.config.max_messages_per_second, self.config.burst);
        let allowed = match self.connections.get_mut(&connection_id) {
            Some(conn) => conn.take(rate, burst, now),
            None => return Ok(()),
        };
        if !allowed {
            self.record_violation(connection_id)?;
            return Err(DoSError::RateLimitExceeded);
        }
        Ok(())
    }

    /// Count a violation against a connection. Reaching the limit bans the
    /// connection's IP and returns `ViolationLimitExceeded`.
    pub fn record_violation(&mut self, connection_id: u64) -> Result<(), DoSError> {
        let Some(conn) = self.connections.get_mut(&connection_id) else {
            return Ok(());
        };
        conn.violations += 1;
        if conn.violations < self.config.violations_before_ban {
            return Ok(());
        }

        let ip = conn.ip;
        tracing::warn!("Banning {} after {} violations", ip, conn.violations);
        self.ban_ip(ip, "repeated violations".to_string());
        Err(DoSError::ViolationLimitExceeded)
    }

    pub fn ban_ip(&mut self, ip: IpAddr, reason: String) {
        self.banned_ips.insert(ip, (Instant::now(), reason));
    }

    pub fn is_banned(&self, ip: IpAddr) -> bool {
        self.banned_ips
            .get(&ip)
            .is_some_and(|(at, _)| at.elapsed() < self.config.ban_duration)
    }

    /// Drop bans that have run out
    pub fn cleanup_expired_bans(&mut self) -> usize {
        let ban_duration = self.config.ban_duration;
        let before = self.banned_ips.len();
        self.banned_ips.retain(|_, (at, _)| at.elapsed() < ban_duration);
        before - self.banned_ips.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connections_from_ip(&self, ip: IpAddr) -> usize {
        self.ip_connections.get(&ip).copied().unwrap_or(0)
    }

    pub fn violation_count(&self, connection_id: u64) -> u32 {
        self.connections
            .get(&connection_id)
            .map(|c| c.violations)
            .unwrap_or(0)
    }
}

impl Default for DoSProtection {
    fn default() -> Self {
        Self::new(DoSConfig::default())
    }
}

/// Errors from DoS protection checks
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DoSError {
    #[error("IP is banned: {0}")]
    IpBanned(String),
    #[error("Too many total connections")]
    TooManyConnections,
    #[error("Too many connections from this IP")]
    TooManyConnectionsFromIp,
    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),
    #[error("Rate limit exceeded")]
    RateLimitExceeded,
    #[error("Too many violations, connection terminated")]
    ViolationLimitExceeded,
}

impl DoSError {
    /// Whether the connection must be closed
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DoSError::RateLimitExceeded | DoSError::MessageTooLarge(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    #[test]
    fn test_register_and_unregister() {
        let mut dos = DoSProtection::default();
        let id = dos.register_connection(ip(1)).unwrap();
        assert_eq!(dos.connection_count(), 1);
        assert_eq!(dos.connections_from_ip(ip(1)), 1);

        dos.unregister_connection(id);
        assert_eq!(dos.connection_count(), 0);
        assert_eq!(dos.connections_from_ip(ip(1)), 0);
    }

    #[test]
    fn test_connection_limits() {
        let mut dos = DoSProtection::new(DoSConfig {
            max_connections_total: 3,
            max_connections_per_ip: 2,
            ..Default::default()
        });
        dos.register_connection(ip(1)).unwrap();
        dos.register_connection(ip(1)).unwrap();
        assert_eq!(
            dos.register_connection(ip(1)),
            Err(DoSError::TooManyConnectionsFromIp)
        );
        dos.register_connection(ip(2)).unwrap();
        assert_eq!(dos.register_connection(ip(3)), Err(DoSError::TooManyConnections));
    }

    #[test]
    fn test_burst_then_refill() {
        let mut dos = DoSProtection::new(DoSConfig {
            max_messages_per_second: 10,
            burst: 5,
            ..Default::default()
        });
        let id = dos.register_connection(ip(1)).unwrap();
        let start = Instant::now();

        for _ in 0..5 {
            assert!(dos.check_message_at(id, 10, start).is_ok());
        }
        assert_eq!(
            dos.check_message_at(id, 10, start),
            Err(DoSError::RateLimitExceeded)
        );

        // 100ms refills one token at 10/s
        let later = start + Duration::from_millis(100);
        assert!(dos.check_message_at(id, 10, later).is_ok());
    }

    #[test]
    fn test_idle_connection_bursts_only_to_capacity() {
        let mut dos = DoSProtection::default();
        let id = dos.register_connection(ip(1)).unwrap();
        let later = Instant::now() + Duration::from_secs(10);

        let burst = DoSConfig::default().burst;
        for _ in 0..burst {
            assert!(dos.check_message_at(id, 10, later).is_ok());
        }
        assert_eq!(
            dos.check_message_at(id, 10, later),
            Err(DoSError::RateLimitExceeded)
        );
    }

    #[test]
    fn test_oversized_message_counts_as_violation() {
        let mut dos = DoSProtection::new(DoSConfig {
            max_message_size: 100,
            ..Default::default()
        });
        let id = dos.register_connection(ip(1)).unwrap();
        assert!(dos.check_message(id, 50).is_ok());
        assert_eq!(dos.check_message(id, 200), Err(DoSError::MessageTooLarge(200)));
        assert_eq!(dos.violation_count(id), 1);
    }

    #[test]
    fn test_violation_limit_bans_ip() {
        let mut dos = DoSProtection::new(DoSConfig {
            violations_before_ban: 3,
            ..Default::default()
        });
        let id = dos.register_connection(ip(9)).unwrap();

        assert!(dos.record_violation(id).is_ok());
        assert!(dos.record_violation(id).is_ok());
        let err = dos.record_violation(id).unwrap_err();
        assert_eq!(err, DoSError::ViolationLimitExceeded);
        assert!(err.is_fatal());

        assert!(dos.is_banned(ip(9)));
        assert!(matches!(dos.check_connection(ip(9)), Err(DoSError::IpBanned(_))));
        assert!(!dos.is_banned(ip(10)));
    }

    #[test]
    fn test_rate_limit_is_not_fatal() {
        assert!(!DoSError::RateLimitExceeded.is_fatal());
        assert!(DoSError::TooManyConnections.is_fatal());
    }

    #[test]
    fn test_unknown_connection_ignored() {
        let mut dos = DoSProtection::default();
        assert!(dos.check_message(42, 10).is_ok());
        assert!(dos.record_violation(42).is_ok());
        dos.unregister_connection(42);
    }
}
