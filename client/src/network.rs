use log::{debug, info};
use serde::Serialize;
use shared::control::{AbortRequest, StatusRequest, AUTH_ERROR};
use shared::{MatchConfig, StatusReply};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("tracker did not answer within {0:?}")]
    Timeout(Duration),
    #[error("tracker rejected the token")]
    AuthRejected,
    #[error("tracker rejected the request: {0}")]
    Rejected(String),
    #[error("tracker sent no reply where one was expected")]
    UnexpectedReply,
}

/// Client for the tracker's control channel. Opens one connection per request.
pub struct ControlClient {
    addr: String,
    token: String,
    timeout: Duration,
}

impl ControlClient {
    pub fn new(addr: &str, token: &str) -> Self {
        Self {
            addr: addr.to_string(),
            token: token.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Creates a match. The tracker only answers when creation failed.
    pub async fn create_match(&self, config: &MatchConfig) -> Result<(), ControlError> {
        let mut config = config.clone();
        config.token = self.token.clone();

        info!("Creating match {} on {}", config.match_id, config.address());
        match self.send(&config).await? {
            None => Ok(()),
            Some(reason) => Err(ControlError::Rejected(reason)),
        }
    }

    pub async fn abort_match(&self, match_id: u64) -> Result<(), ControlError> {
        let request = AbortRequest {
            token: self.token.clone(),
            match_id,
            abort_match: true,
        };

        info!("Aborting match {}", match_id);
        match self.send(&request).await? {
            None => Ok(()),
            Some(reason) => Err(ControlError::Rejected(reason)),
        }
    }

    pub async fn status(&self) -> Result<StatusReply, ControlError> {
        let reply = self
            .send(&StatusRequest::new(self.token.clone()))
            .await?
            .ok_or(ControlError::UnexpectedReply)?;
        Ok(serde_json::from_str(&reply)?)
    }

    async fn send<T: Serialize>(&self, request: &T) -> Result<Option<String>, ControlError> {
        let data = serde_json::to_vec(request)?;
        let exchanged = async {
            let mut stream = TcpStream::connect(&self.addr).await?;
            exchange(&mut stream, &data).await
        };

        match timeout(self.timeout, exchanged).await {
            Ok(result) => result,
            Err(_) => Err(ControlError::Timeout(self.timeout)),
        }
    }
}

/// Writes one request and reads the reply until the tracker closes the connection.
///
/// An empty reply means the tracker had nothing to say, which is how it
/// acknowledges successful create and abort requests.
pub async fn exchange<S>(stream: &mut S, request: &[u8]) -> Result<Option<String>, ControlError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(request).await?;
    stream.flush().await?;

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await?;
    debug!("Received {} bytes from tracker", reply.len());

    let reply = String::from_utf8_lossy(&reply).trim().to_string();
    if reply.is_empty() {
        return Ok(None);
    }
    if reply == AUTH_ERROR {
        return Err(ControlError::AuthRejected);
    }
    Ok(Some(reply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_exchange_returns_reply() {
        let mut stream = Builder::new()
            .write(br#"{"token":"t","action":"status_request"}"#)
            .read(br#"{"match_count":0,"matches":[]}"#)
            .build();

        let reply = exchange(&mut stream, br#"{"token":"t","action":"status_request"}"#)
            .await
            .unwrap();
        assert_eq!(reply.as_deref(), Some(r#"{"match_count":0,"matches":[]}"#));
    }

    #[tokio::test]
    async fn test_exchange_without_reply() {
        let mut stream = Builder::new().write(b"{}").build();

        let reply = exchange(&mut stream, b"{}").await.unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_exchange_auth_error() {
        let mut stream = Builder::new().write(b"{}").read(b"auth error").build();

        let result = exchange(&mut stream, b"{}").await;
        assert!(matches!(result, Err(ControlError::AuthRejected)));
    }

    #[tokio::test]
    async fn test_unreachable_tracker() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = ControlClient::new(&addr, "t").with_timeout(Duration::from_secs(2));
        let result = client.abort_match(1).await;
        assert!(matches!(result, Err(ControlError::Io(_))));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ControlError::Rejected("pick mode x is not supported".to_string()).to_string(),
            "tracker rejected the request: pick mode x is not supported"
        );
        assert_eq!(ControlError::AuthRejected.to_string(), "tracker rejected the token");
    }
}
