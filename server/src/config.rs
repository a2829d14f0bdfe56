//! Tracker configuration and validation errors for match requests.

use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CHAT_PREFIX: &str = "[TMT]";

/// Delays that shape the flow of a match, in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// Interval of the status announcements repeated in chat
    pub periodic_message_interval: u64,
    /// Countdown between a finished map election and the level change
    pub map_change_delay: u64,
    /// Delay of the "MATCH IS LIVE!" announcement after the match restart
    pub live_announcement_delay: u64,
    /// Delay between the end of a match and the server cleanup
    pub cleanup_delay: u64,
    /// Delay before a failed report is submitted again
    pub report_retry_delay: u64,
    /// How often a failed report is submitted again
    pub report_retries: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            periodic_message_interval: 30,
            map_change_delay: 10,
            live_announcement_delay: 11,
            cleanup_delay: 180,
            report_retry_delay: 180,
            report_retries: 1,
        }
    }
}

/// Connection parameters for the remote console client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconSettings {
    pub connect_timeout: Duration,
    /// Timeout of a single read while waiting for a packet
    pub read_timeout: Duration,
    /// Reads attempted per packet before the answer is given up
    pub read_attempts: u32,
    /// Packets accepted for one answer before the stream is considered out of sync
    pub max_response_packets: usize,
}

impl Default for RconSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_millis(100),
            read_attempts: 10,
            max_response_packets: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Address the control channel listens on
    pub control_address: String,
    /// Address the log receiver binds to
    pub log_listen_address: String,
    /// Address game servers are told to send their logs to
    pub log_target: String,
    /// Shared secret every control request must carry
    pub token: String,
    pub tick: Duration,
    pub chat_prefix: String,
    pub timings: Timings,
    pub rcon: RconSettings,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            control_address: "0.0.0.0:9999".to_string(),
            log_listen_address: "0.0.0.0:9999".to_string(),
            log_target: "127.0.0.1:9999".to_string(),
            token: String::new(),
            tick: Duration::from_millis(100),
            chat_prefix: DEFAULT_CHAT_PREFIX.to_string(),
            timings: Timings::default(),
            rcon: RconSettings::default(),
        }
    }
}

/// Reasons a match request is refused before any connection is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("pick mode {0} is not supported, use default, agree, bo1, bo1random or bestof")]
    InvalidPickMode(String),
    #[error("pick mode {0} needs a sequence of ban, pick and random steps")]
    MissingSequence(String),
    #[error("malformed map sequence: {0}")]
    MalformedSequence(String),
    #[error("map sequence has {steps} steps but the map pool only {maps} maps")]
    SequenceTooLong { steps: usize, maps: usize },
    #[error("map pool is empty")]
    EmptyMapPool,
    #[error("round limits must be positive (max_rounds {max_rounds}, ot_max_rounds {ot_max_rounds})")]
    InvalidRounds { max_rounds: u32, ot_max_rounds: u32 },
}
