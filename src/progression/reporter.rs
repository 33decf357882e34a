//! HTTP reporter for the external profile service
//!
//! Completions are queued and posted as JSON from a background task so the
//! arena tick never waits on the network.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::progression::missions::{AchievementSink, CompletionReport, ProgressionError};

#[derive(Debug, Serialize)]
struct ReportBody<'a> {
    user_id: &'a str,
    mission_id: &'a str,
    reward: u64,
    reported_at: DateTime<Utc>,
}

/// Sink posting completions to `endpoint`
pub struct HttpSink {
    tx: mpsc::UnboundedSender<CompletionReport>,
}

impl HttpSink {
    /// Start the background poster. Must be called inside a tokio runtime.
    pub fn spawn(endpoint: String) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<CompletionReport>();
        let client = Client::new();

        info!("Profile reporter posting to {}", endpoint);
        tokio::spawn(async move {
            while let Some(report) = rx.recv().await {
                let body = ReportBody {
                    user_id: &report.user_id,
                    mission_id: &report.mission_id,
                    reward: report.reward,
                    reported_at: Utc::now(),
                };
                match client.post(&endpoint).json(&body).send().await {
                    Ok(response) if response.status().is_success() => {
                        debug!("Profile service accepted {}/{}", report.user_id, report.mission_id);
                    }
                    Ok(response) => {
                        warn!(
                            "Profile service rejected {}/{}: {}",
                            report.user_id,
                            report.mission_id,
                            response.status()
                        );
                    }
                    Err(e) => {
                        warn!("Profile service request failed: {}", e);
                    }
                }
            }
        });

        Self { tx }
    }

    /// Read `PROFILE_SERVICE_URL`; `None` when unset
    pub fn from_env() -> Option<Self> {
        std::env::var("PROFILE_SERVICE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .map(Self::spawn)
    }
}

impl AchievementSink for HttpSink {
    fn report(&self, report: CompletionReport) -> Result<(), ProgressionError> {
        self.tx
            .send(report)
            .map_err(|_| ProgressionError::ReporterUnavailable)
    }
}
