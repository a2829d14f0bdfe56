//! # Match Tracker Library
//!
//! Drives tournament matches on dedicated game servers. Each match is bound to
//! one server, reached over the remote console (RCON) protocol for commands and
//! observed through the UDP log stream the server pushes back to the tracker.
//!
//! ## Flow of a Match
//!
//! A match is created through the TCP control channel. The tracker connects to
//! the game server, prepares it and walks the match through its phases:
//!
//! ```text
//! MAP_ELECTION -> MAP_CHANGE -> WARMUP -> KNIFE -> AFTER_KNIFE -> MATCH <-> PAUSE -> END
//! ```
//!
//! Players steer the match with chat commands (`!ready`, `!veto`, `!pause`, ...).
//! Round results from the log stream update the score, trigger halftime side
//! switches and overtime, and are reported to the configured report URL.
//!
//! ## Module Organization
//!
//! - `network`: control listener, log receiver, report sender and the tracker loop
//! - `tracker`: registry of all running sessions and the deferred action queue
//! - `match_session`: per-match state machine and round rules
//! - `map_election`: ban/pick/random election of the played map
//! - `events`: decoding of log datagrams into round ends and chat lines
//! - `rcon`: blocking remote console client with reconnect
//! - `report`: report payloads and their delivery over HTTP
//! - `scheduler`: time-ordered queue of deferred actions
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::TrackerConfig;
//! use server::network::{BoxError, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), BoxError> {
//!     let config = TrackerConfig {
//!         token: "secret".to_string(),
//!         log_target: "10.0.0.5:9999".to_string(),
//!         ..TrackerConfig::default()
//!     };
//!
//!     // Runs until the tracker loop receives a shutdown message
//!     Server::new(config).await?.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod events;
pub mod map_election;
pub mod match_session;
pub mod network;
pub mod rcon;
pub mod report;
pub mod scheduler;
pub mod sides;
pub mod tracker;
pub mod utils;

#[cfg(any(test, feature = "test-harness"))]
pub mod test_harness;
