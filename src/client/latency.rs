use std::collections::VecDeque;
use std::time::Duration;

use crate::game::constants::client::RTT_SAMPLES;

/// Rolling round-trip estimate from `Pong` replies
#[derive(Debug, Clone)]
pub struct RttEstimator {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttEstimator {
    pub fn new() -> Self {
        Self::with_capacity(RTT_SAMPLES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, rtt: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt);
    }

    /// Record the reply to a ping sent at `client_timestamp_ms`. Replies
    /// from the future (clock reset) are ignored.
    pub fn on_pong(&mut self, client_timestamp_ms: u64, now_ms: u64) -> Option<Duration> {
        let elapsed = now_ms.checked_sub(client_timestamp_ms)?;
        let rtt = Duration::from_millis(elapsed);
        self.record(rtt);
        Some(rtt)
    }

    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }

    pub fn last(&self) -> Option<Duration> {
        self.samples.back().copied()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
