//! JSON documents exchanged on the tracker's control channel.
//!
//! A request is one JSON object per TCP connection. Its shape decides what it is:
//! `"action": "status_request"` asks for the status of all matches,
//! `"abort_match": true` stops a match, anything else must be a full
//! [`MatchConfig`]. Every request carries the shared `token`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub const STATUS_ACTION: &str = "status_request";
pub const AUTH_ERROR: &str = "auth error";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamInfo {
    pub id: u64,
    pub name: String,
}

/// Everything the tracker needs to run one match on one game server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchConfig {
    pub token: String,
    pub map_pool: Vec<String>,
    pub default_map: String,
    pub match_id: u64,
    pub team1: TeamInfo,
    pub team2: TeamInfo,
    pub ip: String,
    pub port: u16,
    pub rcon: String,
    pub pickmode: String,
    pub url: String,
    pub match_end: String,
    pub rcon_init: Vec<String>,
    pub rcon_config: Vec<String>,
    pub rcon_end: Vec<String>,
    /// Ban/pick/random tokens for best-of-x elections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ot_max_rounds: Option<u32>,
}

impl MatchConfig {
    /// `ip:port` of the game server, the same form log datagrams are keyed by.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortRequest {
    pub token: String,
    pub match_id: u64,
    pub abort_match: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRequest {
    pub token: String,
    pub action: String,
}

impl StatusRequest {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            action: STATUS_ACTION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    Create(Box<MatchConfig>),
    Abort { match_id: u64 },
    Status,
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is not a JSON object")]
    NotAnObject,
    #[error("missing or invalid field: {0}")]
    Invalid(#[from] serde_json::Error),
}

impl ControlRequest {
    /// Classifies a parsed request. Returns the token it carried alongside.
    pub fn from_value(value: Value) -> Result<(String, ControlRequest), RequestError> {
        let object = value.as_object().ok_or(RequestError::NotAnObject)?;
        let is_status = object.get("action").and_then(Value::as_str) == Some(STATUS_ACTION);
        let is_abort = object.get("abort_match").and_then(Value::as_bool) == Some(true);

        if is_status {
            let request: StatusRequest = serde_json::from_value(value)?;
            return Ok((request.token, ControlRequest::Status));
        }

        if is_abort {
            let request: AbortRequest = serde_json::from_value(value)?;
            return Ok((
                request.token,
                ControlRequest::Abort {
                    match_id: request.match_id,
                },
            ));
        }

        let config: MatchConfig = serde_json::from_value(value)?;
        Ok((config.token.clone(), ControlRequest::Create(Box::new(config))))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    MapElection,
    MapChange,
    Warmup,
    Knife,
    AfterKnife,
    Match,
    Pause,
    End,
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchStatus::MapElection => "MAP_ELECTION",
            MatchStatus::MapChange => "MAP_CHANGE",
            MatchStatus::Warmup => "WARMUP",
            MatchStatus::Knife => "KNIFE",
            MatchStatus::AfterKnife => "AFTER_KNIFE",
            MatchStatus::Match => "MATCH",
            MatchStatus::Pause => "PAUSE",
            MatchStatus::End => "END",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamStatus {
    pub id: u64,
    pub name: String,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStatusEntry {
    pub id: u64,
    pub status: MatchStatus,
    pub map: String,
    pub lastcontact_timestamp: u64,
    pub lastcontact_seconds: u64,
    pub team1: TeamStatus,
    pub team2: TeamStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    pub match_count: usize,
    pub matches: Vec<MatchStatusEntry>,
}
