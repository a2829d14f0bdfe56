//! # Tracker Control Client
//!
//! Talks to the match tracker over its TCP control channel. Every request is a
//! single JSON document on a fresh connection; the tracker answers with an
//! optional reply and closes the connection.
//!
//! ```rust,no_run
//! use client::network::ControlClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ControlClient::new("127.0.0.1:9999", "secret");
//!     let status = client.status().await?;
//!     println!("{} matches running", status.match_count);
//!     Ok(())
//! }
//! ```

pub mod network;
