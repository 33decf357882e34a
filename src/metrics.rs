//! Prometheus-compatible metrics endpoint
//!
//! Counters and gauges shared by every arena and connection task.
//! Default endpoint: http://localhost:9090/metrics

use parking_lot::RwLock;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

const TICK_HISTORY: usize = 1000;

/// Population of one arena, reported as deltas so several arenas can share
/// the same process-wide gauges
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArenaGauges {
    pub sessions: u64,
    pub alive: u64,
    pub pieces: u64,
    pub coins: u64,
    pub viruses: u64,
}

/// Metrics registry for the arena server
#[derive(Debug)]
pub struct Metrics {
    // Population (summed over arenas)
    pub arenas_active: AtomicU64,
    pub sessions_active: AtomicU64,
    pub players_alive: AtomicU64,
    pub split_pieces: AtomicU64,
    pub coins: AtomicU64,
    pub viruses: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,

    // Gameplay events
    pub joins_total: AtomicU64,
    pub joins_rejected_total: AtomicU64,
    pub eliminations_total: AtomicU64,
    pub cash_outs_total: AtomicU64,
    pub coins_collected_total: AtomicU64,
    pub virus_bursts_total: AtomicU64,

    // Network stats
    pub connections_active: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub commands_dropped: AtomicU64,
    pub protocol_violations: AtomicU64,

    start_time: Instant,

    /// Zone radius per room id
    zone_radius: RwLock<BTreeMap<String, u64>>,
    // Rolling tick times for percentile calculation
    tick_history: RwLock<VecDeque<u64>>,
}

fn shift(gauge: &AtomicU64, old: u64, new: u64) {
    if new >= old {
        gauge.fetch_add(new - old, Ordering::Relaxed);
    } else {
        gauge.fetch_sub(old - new, Ordering::Relaxed);
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            arenas_active: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            players_alive: AtomicU64::new(0),
            split_pieces: AtomicU64::new(0),
            coins: AtomicU64::new(0),
            viruses: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            joins_total: AtomicU64::new(0),
            joins_rejected_total: AtomicU64::new(0),
            eliminations_total: AtomicU64::new(0),
            cash_outs_total: AtomicU64::new(0),
            coins_collected_total: AtomicU64::new(0),
            virus_bursts_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            commands_dropped: AtomicU64::new(0),
            protocol_violations: AtomicU64::new(0),
            start_time: Instant::now(),
            zone_radius: RwLock::new(BTreeMap::new()),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY)),
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us.store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us.store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us.store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    /// Move the shared gauges from one arena's previous population to its current one
    pub fn apply_arena_gauges(&self, previous: &ArenaGauges, current: &ArenaGauges) {
        shift(&self.sessions_active, previous.sessions, current.sessions);
        shift(&self.players_alive, previous.alive, current.alive);
        shift(&self.split_pieces, previous.pieces, current.pieces);
        shift(&self.coins, previous.coins, current.coins);
        shift(&self.viruses, previous.viruses, current.viruses);
    }

    pub fn set_zone_radius(&self, room_id: &str, radius: f32) {
        self.zone_radius
            .write()
            .insert(room_id.to_string(), radius.max(0.0).round() as u64);
    }

    pub fn clear_zone_radius(&self, room_id: &str) {
        self.zone_radius.write().remove(room_id);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("cashout_arena_arenas_active", "Running arena instances", "gauge",
            self.arenas_active.load(Ordering::Relaxed));
        metric!("cashout_arena_sessions_active", "Sessions joined to an arena", "gauge",
            self.sessions_active.load(Ordering::Relaxed));
        metric!("cashout_arena_players_alive", "Alive Player-Cells", "gauge",
            self.players_alive.load(Ordering::Relaxed));
        metric!("cashout_arena_split_pieces", "Split pieces in play", "gauge",
            self.split_pieces.load(Ordering::Relaxed));
        metric!("cashout_arena_coins", "Coins on the field", "gauge",
            self.coins.load(Ordering::Relaxed));
        metric!("cashout_arena_viruses", "Viruses on the field", "gauge",
            self.viruses.load(Ordering::Relaxed));

        metric!("cashout_arena_tick_time_microseconds", "Current tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("cashout_arena_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("cashout_arena_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("cashout_arena_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("cashout_arena_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));

        metric!("cashout_arena_joins_total", "Accepted joins", "counter",
            self.joins_total.load(Ordering::Relaxed));
        metric!("cashout_arena_joins_rejected_total", "Rejected joins", "counter",
            self.joins_rejected_total.load(Ordering::Relaxed));
        metric!("cashout_arena_eliminations_total", "Players eliminated", "counter",
            self.eliminations_total.load(Ordering::Relaxed));
        metric!("cashout_arena_cash_outs_total", "Completed cash-outs", "counter",
            self.cash_outs_total.load(Ordering::Relaxed));
        metric!("cashout_arena_coins_collected_total", "Coins collected", "counter",
            self.coins_collected_total.load(Ordering::Relaxed));
        metric!("cashout_arena_virus_bursts_total", "Virus bursts", "counter",
            self.virus_bursts_total.load(Ordering::Relaxed));

        metric!("cashout_arena_connections_active", "Active WebTransport connections", "gauge",
            self.connections_active.load(Ordering::Relaxed));
        metric!("cashout_arena_messages_sent_total", "Total messages sent", "counter",
            self.messages_sent.load(Ordering::Relaxed));
        metric!("cashout_arena_messages_received_total", "Total messages received", "counter",
            self.messages_received.load(Ordering::Relaxed));
        metric!("cashout_arena_bytes_sent_total", "Total bytes sent", "counter",
            self.bytes_sent.load(Ordering::Relaxed));
        metric!("cashout_arena_bytes_received_total", "Total bytes received", "counter",
            self.bytes_received.load(Ordering::Relaxed));
        metric!("cashout_arena_commands_dropped_total", "Commands dropped on a full buffer", "counter",
            self.commands_dropped.load(Ordering::Relaxed));
        metric!("cashout_arena_protocol_violations_total", "Protocol violations", "counter",
            self.protocol_violations.load(Ordering::Relaxed));
        metric!("cashout_arena_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output.push_str("# HELP cashout_arena_zone_radius Current zone radius per room\n");
        output.push_str("# TYPE cashout_arena_zone_radius gauge\n");
        for (room, radius) in self.zone_radius.read().iter() {
            output.push_str(&format!("cashout_arena_zone_radius{{room=\"{}\"}} {}\n", room, radius));
        }

        output
    }

    /// JSON view of the same values
    pub fn to_json(&self) -> String {
        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);
        let zones: BTreeMap<String, u64> = self.zone_radius.read().clone();

        serde_json::json!({
            "arenas": {
                "active": load(&self.arenas_active),
                "sessions": load(&self.sessions_active),
                "alive": load(&self.players_alive),
                "split_pieces": load(&self.split_pieces),
                "coins": load(&self.coins),
                "viruses": load(&self.viruses),
                "zone_radius": zones,
            },
            "performance": {
                "tick_time_us": load(&self.tick_time_us),
                "tick_time_p95_us": load(&self.tick_time_p95_us),
                "tick_time_p99_us": load(&self.tick_time_p99_us),
                "tick_time_max_us": load(&self.tick_time_max_us),
                "tick_count": load(&self.tick_count),
            },
            "events": {
                "joins": load(&self.joins_total),
                "joins_rejected": load(&self.joins_rejected_total),
                "eliminations": load(&self.eliminations_total),
                "cash_outs": load(&self.cash_outs_total),
                "coins_collected": load(&self.coins_collected_total),
                "virus_bursts": load(&self.virus_bursts_total),
            },
            "network": {
                "connections": load(&self.connections_active),
                "messages_sent": load(&self.messages_sent),
                "messages_received": load(&self.messages_received),
                "bytes_sent": load(&self.bytes_sent),
                "bytes_received": load(&self.bytes_received),
                "commands_dropped": load(&self.commands_dropped),
                "protocol_violations": load(&self.protocol_violations),
            },
            "uptime_seconds": self.uptime_seconds(),
        })
        .to_string()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn http_response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    )
}

/// Build the response for one request line
fn route(metrics: &Metrics, request: &str) -> String {
    let path = request
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("GET "))
        .and_then(|rest| rest.split_whitespace().next());

    match path {
        Some("/metrics") => http_response("200 OK", "text/plain; version=0.0.4", &metrics.to_prometheus()),
        Some("/metrics/json") => http_response("200 OK", "application/json", &metrics.to_json()),
        Some("/health") | Some("/") => http_response("200 OK", "text/plain", "OK"),
        _ => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];
            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = route(&metrics, &request);
                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_tick_time() {
        let metrics = Metrics::new();
        for i in 0..100 {
            metrics.record_tick_time(Duration::from_micros(100 + i * 10));
        }

        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 100);
        assert!(metrics.tick_time_p95_us.load(Ordering::Relaxed) >= 1000);
        assert_eq!(metrics.tick_time_max_us.load(Ordering::Relaxed), 1090);
    }

    #[test]
    fn test_arena_gauges_sum_across_arenas() {
        let metrics = Metrics::new();
        let a = ArenaGauges {
            sessions: 3,
            alive: 2,
            pieces: 4,
            coins: 400,
            viruses: 12,
        };
        let b = ArenaGauges {
            sessions: 1,
            alive: 1,
            ..ArenaGauges::default()
        };
        metrics.apply_arena_gauges(&ArenaGauges::default(), &a);
        metrics.apply_arena_gauges(&ArenaGauges::default(), &b);
        assert_eq!(metrics.sessions_active.load(Ordering::Relaxed), 4);

        // Arena A shrinks, then shuts down
        let a2 = ArenaGauges { sessions: 1, ..a };
        metrics.apply_arena_gauges(&a, &a2);
        assert_eq!(metrics.sessions_active.load(Ordering::Relaxed), 2);
        metrics.apply_arena_gauges(&a2, &ArenaGauges::default());
        assert_eq!(metrics.sessions_active.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.coins.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.eliminations_total.store(7, Ordering::Relaxed);
        metrics.set_zone_radius("default", 1234.4);

        let output = metrics.to_prometheus();
        assert!(output.contains("cashout_arena_eliminations_total 7"));
        assert!(output.contains("cashout_arena_zone_radius{room=\"default\"} 1234"));
        assert!(output.contains("# TYPE cashout_arena_tick_count counter"));
    }

    #[test]
    fn test_json_format_parses() {
        let metrics = Metrics::new();
        metrics.cash_outs_total.store(3, Ordering::Relaxed);
        let value: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(value["events"]["cash_outs"], 3);
    }

    #[test]
    fn test_routes() {
        let metrics = Metrics::new();
        assert!(route(&metrics, "GET /metrics HTTP/1.1\r\n").contains("cashout_arena_uptime_seconds"));
        assert!(route(&metrics, "GET /metrics/json HTTP/1.1\r\n").contains("application/json"));
        assert!(route(&metrics, "GET /health HTTP/1.1\r\n").ends_with("OK"));
        assert!(route(&metrics, "GET /nope HTTP/1.1\r\n").starts_with("HTTP/1.1 404"));
    }
}
