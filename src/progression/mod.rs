//! Mission and achievement progress derived from observed score, mass and
//! survival time

pub mod missions;
pub mod observer;
#[cfg(feature = "profile_reporter")]
pub mod reporter;

pub use missions::{
    default_missions, AchievementSink, CompletionReport, LoggingSink, Mission, MissionGoal,
    MissionTracker, ProgressionError,
};
pub use observer::{ProgressEvent, ProgressionObserver};

use std::sync::Arc;

/// Observer plus tracker for one signed-in session
pub struct SessionProgress {
    observer: ProgressionObserver,
    tracker: MissionTracker,
}

impl SessionProgress {
    pub fn new(user_id: String, sink: Arc<dyn AchievementSink>) -> Self {
        Self {
            observer: ProgressionObserver::new(),
            tracker: MissionTracker::new(user_id, default_missions(), sink),
        }
    }

    /// Feed one observation; returns mission ids completed by it
    pub fn observe(&mut self, score: u64, mass: f32, now: f64) -> Vec<String> {
        self.observer
            .observe(score, mass, now)
            .iter()
            .flat_map(|event| self.tracker.record(event))
            .collect()
    }

    pub fn tracker(&self) -> &MissionTracker {
        &self.tracker
    }
}

/// Sink selected by the environment
pub fn sink_from_env() -> Arc<dyn AchievementSink> {
    #[cfg(feature = "profile_reporter")]
    if let Some(sink) = reporter::HttpSink::from_env() {
        return Arc::new(sink);
    }
    Arc::new(LoggingSink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_progress_completes_once() {
        let mut progress = SessionProgress::new("user-1".to_string(), Arc::new(LoggingSink));
        assert!(progress.observe(0, 20.0, 0.0).is_empty());

        let completed = progress.observe(0, 20.0, 180.0);
        assert_eq!(completed, vec!["survive_3_minutes".to_string()]);
        assert!(progress.observe(0, 20.0, 200.0).is_empty());
        assert!(progress.tracker().is_completed("survive_3_minutes"));
    }

    #[test]
    fn test_session_progress_counts_coins() {
        let mut progress = SessionProgress::new("user-2".to_string(), Arc::new(LoggingSink));
        progress.observe(0, 20.0, 0.0);
        progress.observe(1, 21.0, 1.0);
        progress.observe(2, 22.0, 2.0);
        assert_eq!(progress.tracker().coins(), 2);
    }
}
