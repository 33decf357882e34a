//! Mission counters and completion reporting

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::progression::observer::ProgressEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MissionGoal {
    CollectCoins(u32),
    ReachMass(f32),
    SurviveSeconds(u64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub id: String,
    pub goal: MissionGoal,
    pub reward: u64,
}

impl Mission {
    pub fn new(id: impl Into<String>, goal: MissionGoal, reward: u64) -> Self {
        Self {
            id: id.into(),
            goal,
            reward,
        }
    }
}

/// Missions every signed-in session tracks
pub fn default_missions() -> Vec<Mission> {
    vec![
        Mission::new("collect_25_coins", MissionGoal::CollectCoins(25), 10),
        Mission::new("collect_100_coins", MissionGoal::CollectCoins(100), 40),
        Mission::new("reach_mass_100", MissionGoal::ReachMass(100.0), 20),
        Mission::new("reach_mass_500", MissionGoal::ReachMass(500.0), 75),
        Mission::new("survive_3_minutes", MissionGoal::SurviveSeconds(180), 25),
        Mission::new("survive_10_minutes", MissionGoal::SurviveSeconds(600), 100),
    ]
}

/// Payload accepted by the profile service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub user_id: String,
    pub mission_id: String,
    pub reward: u64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProgressionError {
    #[error("Report rejected: {0}")]
    ReportRejected(String),
    #[error("Reporter unavailable")]
    ReporterUnavailable,
}

/// Destination for mission completions
pub trait AchievementSink: Send + Sync {
    fn report(&self, report: CompletionReport) -> Result<(), ProgressionError>;
}

/// Sink that only logs completions
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

impl AchievementSink for LoggingSink {
    fn report(&self, report: CompletionReport) -> Result<(), ProgressionError> {
        info!(
            "Mission {} completed by {} (reward {})",
            report.mission_id, report.user_id, report.reward
        );
        Ok(())
    }
}

/// Mission progress for one user within one session
pub struct MissionTracker {
    user_id: String,
    missions: Vec<Mission>,
    coins: u32,
    max_mass: f32,
    survived_secs: u64,
    completed: HashSet<String>,
    sink: Arc<dyn AchievementSink>,
}

impl MissionTracker {
    pub fn new(user_id: String, missions: Vec<Mission>, sink: Arc<dyn AchievementSink>) -> Self {
        Self {
            user_id,
            missions,
            coins: 0,
            max_mass: 0.0,
            survived_secs: 0,
            completed: HashSet::new(),
            sink,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn coins(&self) -> u32 {
        self.coins
    }

    pub fn is_completed(&self, mission_id: &str) -> bool {
        self.completed.contains(mission_id)
    }

    /// Update counters and report missions that just reached their target.
    /// Returns the ids reported by this call.
    pub fn record(&mut self, event: &ProgressEvent) -> Vec<String> {
        match event {
            ProgressEvent::CoinCollected { .. } => self.coins = self.coins.saturating_add(1),
            ProgressEvent::MassMilestone { mass } => self.max_mass = self.max_mass.max(*mass),
            ProgressEvent::SurvivalMilestone { seconds } => {
                self.survived_secs = self.survived_secs.max(*seconds)
            }
        }

        let reached: Vec<Mission> = self
            .missions
            .iter()
            .filter(|m| !self.completed.contains(&m.id) && self.goal_reached(&m.goal))
            .cloned()
            .collect();

        let mut reported = Vec::with_capacity(reached.len());
        for mission in reached {
            let report = CompletionReport {
                user_id: self.user_id.clone(),
                mission_id: mission.id.clone(),
                reward: mission.reward,
            };
            // A mission is marked complete even if the report fails, so it
            // is never reported twice in one session
            self.completed.insert(mission.id.clone());
            match self.sink.report(report) {
                Ok(()) => debug!("Reported mission {} for {}", mission.id, self.user_id),
                Err(e) => warn!("Failed to report mission {} for {}: {}", mission.id, self.user_id, e),
            }
            reported.push(mission.id);
        }
        reported
    }

    fn goal_reached(&self, goal: &MissionGoal) -> bool {
        match goal {
            MissionGoal::CollectCoins(n) => self.coins >= *n,
            MissionGoal::ReachMass(m) => self.max_mass >= *m,
            MissionGoal::SurviveSeconds(s) => self.survived_secs >= *s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        reports: Mutex<Vec<CompletionReport>>,
        fail: bool,
    }

    impl AchievementSink for RecordingSink {
        fn report(&self, report: CompletionReport) -> Result<(), ProgressionError> {
            self.reports.lock().push(report);
            if self.fail {
                Err(ProgressionError::ReporterUnavailable)
            } else {
                Ok(())
            }
        }
    }

    fn tracker(sink: Arc<RecordingSink>) -> MissionTracker {
        let missions = vec![
            Mission::new("coins_2", MissionGoal::CollectCoins(2), 5),
            Mission::new("mass_100", MissionGoal::ReachMass(100.0), 20),
            Mission::new("survive_60", MissionGoal::SurviveSeconds(60), 15),
        ];
        MissionTracker::new("user-1".into(), missions, sink)
    }

    #[test]
    fn test_coin_mission_completes_at_target() {
        let sink = Arc::new(RecordingSink::default());
        let mut tracker = tracker(sink.clone());
        let coin = ProgressEvent::CoinCollected { score_delta: 1 };

        assert!(tracker.record(&coin).is_empty());
        assert_eq!(tracker.record(&coin), vec!["coins_2".to_string()]);
        assert_eq!(
            sink.reports.lock()[0],
            CompletionReport {
                user_id: "user-1".into(),
                mission_id: "coins_2".into(),
                reward: 5,
            }
        );
    }

    #[test]
    fn test_mission_reported_once() {
        let sink = Arc::new(RecordingSink::default());
        let mut tracker = tracker(sink.clone());

        tracker.record(&ProgressEvent::MassMilestone { mass: 120.0 });
        tracker.record(&ProgressEvent::MassMilestone { mass: 150.0 });
        tracker.record(&ProgressEvent::SurvivalMilestone { seconds: 60 });
        tracker.record(&ProgressEvent::SurvivalMilestone { seconds: 180 });

        let ids: Vec<String> = sink.reports.lock().iter().map(|r| r.mission_id.clone()).collect();
        assert_eq!(ids, vec!["mass_100".to_string(), "survive_60".to_string()]);
    }

    #[test]
    fn test_failed_report_not_retried() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let mut tracker = tracker(sink.clone());

        tracker.record(&ProgressEvent::MassMilestone { mass: 100.0 });
        tracker.record(&ProgressEvent::MassMilestone { mass: 101.0 });
        assert!(tracker.is_completed("mass_100"));
        assert_eq!(sink.reports.lock().len(), 1);
    }

    #[test]
    fn test_default_missions_have_unique_ids() {
        let missions = default_missions();
        let ids: HashSet<&str> = missions.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids.len(), missions.len());
    }
}
