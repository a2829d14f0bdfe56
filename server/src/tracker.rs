//! Registry of running matches and the single place where work gets done.
//!
//! The tracker owns every [`MatchSession`], the deferred action queue and the
//! report sink. The network layer feeds it control requests and log datagrams;
//! all session logic then runs synchronously inside [`Tracker::tick`] and
//! [`Tracker::handle_control`], one call at a time.

use crate::config::{ConfigError, TrackerConfig};
use crate::match_session::{Context, MatchPlan, MatchSession, SessionAction};
use crate::rcon::{RconConnector, RconError};
use crate::report::{Report, ReportSink};
use crate::scheduler::DeferredScheduler;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::control::{ControlRequest, MatchConfig, StatusReply, AUTH_ERROR};
use std::collections::HashMap;
use thiserror::Error;

/// Handle of one session, never reused
///
/// Match ids and server addresses can be taken over by a new request, so
/// deferred actions refer to sessions by this key instead. An action whose
/// session is gone is simply dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey(pub u64);

/// Everything that can sit in the tracker's deferred queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Deferred {
    Session { key: SessionKey, action: SessionAction },
    /// Forget an ended session once its cleanup has run
    Release { key: SessionKey },
    SubmitReport(Report),
}

impl Deferred {
    pub fn session(&self) -> Option<SessionKey> {
        match self {
            Deferred::Session { key, .. } | Deferred::Release { key } => Some(*key),
            Deferred::SubmitReport(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CreateError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Rcon(#[from] RconError),
}

/// Owns all match sessions and routes work to them
///
/// Sessions are found by match id (control requests) and by `ip:port`
/// (log datagrams). Both are unique: a create request that reuses either one
/// aborts the old session first.
pub struct Tracker {
    config: TrackerConfig,
    /// Running sessions indexed by their key
    sessions: HashMap<SessionKey, MatchSession>,
    /// Next key handed to a new session
    next_key: u64,
    scheduler: DeferredScheduler<Deferred>,
    connector: Box<dyn RconConnector>,
    reports: Box<dyn ReportSink>,
}

impl Tracker {
    /// Creates an empty tracker
    ///
    /// The connector opens console connections for new sessions, the sink
    /// receives every report any session produces.
    pub fn new(
        config: TrackerConfig,
        connector: Box<dyn RconConnector>,
        reports: Box<dyn ReportSink>,
    ) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
            next_key: 1,
            scheduler: DeferredScheduler::new(),
            connector,
            reports,
        }
    }

    /// Handles one control request and returns the reply, if any
    ///
    /// - wrong token: `auth error`
    /// - status request: the JSON status of all sessions
    /// - create request that fails validation or cannot connect: the error text
    /// - successful create, abort, and requests with missing fields: no reply
    pub fn handle_control(&mut self, payload: Value, now: u64) -> Option<String> {
        let (token, request) = match ControlRequest::from_value(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Ignoring control request: {}", e);
                return None;
            }
        };

        if token != self.config.token {
            warn!("Control request with wrong token");
            return Some(AUTH_ERROR.to_string());
        }

        match request {
            ControlRequest::Create(config) => match self.create_match(*config, now) {
                Ok(_) => None,
                Err(e) => {
                    warn!("Cannot create match: {}", e);
                    Some(e.to_string())
                }
            },
            ControlRequest::Abort { match_id } => {
                self.abort_match(match_id);
                None
            }
            ControlRequest::Status => match serde_json::to_string(&self.status(now)) {
                Ok(json) => Some(json),
                Err(e) => {
                    error!("Cannot encode status reply: {}", e);
                    None
                }
            },
        }
    }

    /// Validates a match request, connects to its server and starts the session
    ///
    /// Existing sessions with the same match id or server address are aborted
    /// before the new connection is attempted.
    pub fn create_match(&mut self, config: MatchConfig, now: u64) -> Result<SessionKey, CreateError> {
        info!(
            "Create match {} on {} ({} vs {}, pick mode {})",
            config.match_id,
            config.address(),
            config.team1.name,
            config.team2.name,
            config.pickmode
        );
        let plan = MatchPlan::new(config)?;
        let match_id = plan.config().match_id;
        let address = plan.config().address();

        if let Some(key) = self.find_by_match_id(match_id) {
            info!("Match {} already exists, aborting it first", match_id);
            self.abort(key);
        }
        if let Some(key) = self.find_by_address(&address) {
            info!("A match on {} already exists, aborting it first", address);
            self.abort(key);
        }

        let label = format!("MATCH {}", match_id);
        let rcon = self
            .connector
            .connect(&address, &plan.config().rcon, &label)?;

        let key = SessionKey(self.next_key);
        self.next_key += 1;

        let mut ctx = Context {
            now,
            scheduler: &mut self.scheduler,
            reports: self.reports.as_ref(),
        };
        let session = MatchSession::start(key, plan, rcon, &self.config, &mut ctx);
        self.sessions.insert(key, session);
        info!("Now watching {} matches", self.sessions.len());

        Ok(key)
    }

    /// Aborts the session running the given match, if there is one
    pub fn abort_match(&mut self, match_id: u64) -> bool {
        match self.find_by_match_id(match_id) {
            Some(key) => {
                self.abort(key);
                true
            }
            None => {
                warn!("Cannot abort match {}: no such match", match_id);
                false
            }
        }
    }

    fn abort(&mut self, key: SessionKey) {
        if let Some(mut session) = self.sessions.remove(&key) {
            session.abort();
            session.close();
            self.scheduler
                .retain(|deferred| deferred.session() != Some(key));
            info!("Now watching {} matches", self.sessions.len());
        }
    }

    /// Runs one iteration of the tracker loop
    ///
    /// Hands each session the datagrams its server sent, repeats due status
    /// announcements, then executes deferred actions that became due.
    /// Datagrams from addresses without a session are dropped.
    pub fn tick(&mut self, now: u64, mut datagrams: HashMap<String, Vec<Vec<u8>>>) {
        {
            let mut ctx = Context {
                now,
                scheduler: &mut self.scheduler,
                reports: self.reports.as_ref(),
            };
            for session in self.sessions.values_mut() {
                let lines = datagrams.remove(&session.address()).unwrap_or_default();
                session.consume(&lines, &mut ctx);
                session.announce_if_due(&mut ctx);
            }
        }

        for (peer, lines) in datagrams {
            debug!("Dropping {} log lines from unknown server {}", lines.len(), peer);
        }

        self.run_deferred(now);
    }

    fn run_deferred(&mut self, now: u64) {
        for deferred in self.scheduler.tick(now) {
            match deferred {
                Deferred::Session { key, action } => {
                    let Some(session) = self.sessions.get_mut(&key) else {
                        debug!("Dropping deferred action of finished session {:?}", key);
                        continue;
                    };
                    let mut ctx = Context {
                        now,
                        scheduler: &mut self.scheduler,
                        reports: self.reports.as_ref(),
                    };
                    session.run(action, &mut ctx);
                }
                Deferred::Release { key } => {
                    if let Some(mut session) = self.sessions.remove(&key) {
                        session.close();
                        info!(
                            "Match {} released, now watching {} matches",
                            session.match_id(),
                            self.sessions.len()
                        );
                    }
                }
                Deferred::SubmitReport(report) => self.reports.submit(report),
            }
        }
    }

    /// Decides what happens to a report the sender could not deliver
    ///
    /// Live scores are dropped; other reports are queued again after the
    /// retry delay until their retries are used up.
    pub fn report_failed(&mut self, mut report: Report, now: u64) {
        let timings = &self.config.timings;
        if !report.is_retryable() || report.attempt >= timings.report_retries {
            warn!(
                "MATCH {} | giving up on {} report",
                report.match_id,
                report.type_name()
            );
            return;
        }

        report.attempt += 1;
        info!(
            "MATCH {} | retrying {} report in {} seconds",
            report.match_id,
            report.type_name(),
            timings.report_retry_delay
        );
        let delay = timings.report_retry_delay;
        self.scheduler
            .schedule(now, delay, Deferred::SubmitReport(report));
    }

    /// Status of every session, ordered by match id
    pub fn status(&self, now: u64) -> StatusReply {
        let mut matches: Vec<_> = self
            .sessions
            .values()
            .map(|session| session.status_entry(now))
            .collect();
        matches.sort_by_key(|entry| entry.id);

        StatusReply {
            match_count: matches.len(),
            matches,
        }
    }

    pub fn find_by_match_id(&self, match_id: u64) -> Option<SessionKey> {
        self.sessions
            .values()
            .find(|session| session.match_id() == match_id)
            .map(MatchSession::key)
    }

    pub fn find_by_address(&self, address: &str) -> Option<SessionKey> {
        self.sessions
            .values()
            .find(|session| session.address() == address)
            .map(MatchSession::key)
    }

    pub fn session(&self, key: SessionKey) -> Option<&MatchSession> {
        self.sessions.get(&key)
    }

    pub fn scheduler(&self) -> &DeferredScheduler<Deferred> {
        &self.scheduler
    }

    /// Returns the number of sessions, including ended ones awaiting cleanup
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
