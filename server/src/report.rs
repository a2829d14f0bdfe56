//! Result reports sent to the tournament system.
//!
//! Reports are form-encoded POSTs to the per-match `url`. The tracker core only
//! queues them through a [`ReportSink`]; delivery happens on an async task in
//! the network layer, which hands failures back to the core for retrying.

use log::error;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scoreline {
    pub team1id: u64,
    pub team1score: u32,
    pub team2id: u64,
    pub team2score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportKind {
    Start,
    Map { map: String },
    Livescore(Scoreline),
    End(Scoreline),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub url: String,
    pub match_id: u64,
    pub kind: ReportKind,
    /// Number of earlier failed deliveries
    pub attempt: u32,
}

impl Report {
    pub fn new(url: &str, match_id: u64, kind: ReportKind) -> Self {
        Self {
            url: url.to_string(),
            match_id,
            kind,
            attempt: 0,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            ReportKind::Start => "start",
            ReportKind::Map { .. } => "map",
            ReportKind::Livescore(_) => "livescore",
            ReportKind::End(_) => "end",
        }
    }

    /// Live scores go stale within a round, so only the other kinds are retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind, ReportKind::Livescore(_))
    }

    pub fn form(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("match_id", self.match_id.to_string()),
            ("type", self.type_name().to_string()),
        ];
        match &self.kind {
            ReportKind::Start => {}
            ReportKind::Map { map } => fields.push(("map", map.clone())),
            ReportKind::Livescore(score) | ReportKind::End(score) => {
                fields.push(("team1id", score.team1id.to_string()));
                fields.push(("team1score", score.team1score.to_string()));
                fields.push(("team2id", score.team2id.to_string()));
                fields.push(("team2score", score.team2score.to_string()));
            }
        }
        fields
    }
}

pub trait ReportSink: Send {
    fn submit(&self, report: Report);
}

/// Queues reports for the async sender task.
#[derive(Debug, Clone)]
pub struct ReportQueue {
    sender: mpsc::UnboundedSender<Report>,
}

impl ReportQueue {
    pub fn new(sender: mpsc::UnboundedSender<Report>) -> Self {
        Self { sender }
    }
}

impl ReportSink for ReportQueue {
    fn submit(&self, report: Report) {
        if let Err(e) = self.sender.send(report) {
            error!("Failed to queue report for match {}: receiver closed", e.0.match_id);
        }
    }
}

/// Posts one report and returns the response body.
pub async fn post_report(client: &reqwest::Client, report: &Report) -> Result<String, reqwest::Error> {
    let response = client
        .post(&report.url)
        .form(&report.form())
        .send()
        .await?
        .error_for_status()?;
    response.text().await
}
