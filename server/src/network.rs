//! Network layer: control channel, log receiver and report delivery.
//!
//! Each concern runs as its own tokio task and talks to the tracker loop over
//! one unbounded channel. The tracker loop itself is synchronous (console
//! commands block) and runs on a blocking thread, ticking at a fixed interval.

use crate::config::TrackerConfig;
use crate::rcon::TcpConnector;
use crate::report::{post_report, Report, ReportQueue};
use crate::tracker::Tracker;
use crate::utils::unix_time;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

const CONTROL_READ_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_CONTROL_REQUEST: usize = 64 * 1024;
const REPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Messages sent from network tasks to the tracker loop
#[derive(Debug)]
pub enum ServerMessage {
    ControlRequest {
        payload: Value,
        peer: SocketAddr,
        reply: oneshot::Sender<Option<String>>,
    },
    LogPacket {
        payload: Vec<u8>,
        addr: SocketAddr,
    },
    ReportFailed {
        report: Report,
    },
    Shutdown,
}

pub struct Server {
    config: TrackerConfig,
    control_listener: Option<TcpListener>,
    log_socket: Arc<UdpSocket>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    report_tx: mpsc::UnboundedSender<Report>,
    report_rx: Option<mpsc::UnboundedReceiver<Report>>,
}

impl Server {
    pub async fn new(config: TrackerConfig) -> Result<Self, BoxError> {
        let control_listener = TcpListener::bind(&config.control_address).await?;
        info!("Control channel listening on {}", control_listener.local_addr()?);

        let log_socket = Arc::new(UdpSocket::bind(&config.log_listen_address).await?);
        info!("Log receiver listening on {}", log_socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = mpsc::unbounded_channel();

        Ok(Server {
            config,
            control_listener: Some(control_listener),
            log_socket,
            server_tx,
            server_rx,
            report_tx,
            report_rx: Some(report_rx),
        })
    }

    pub fn control_addr(&self) -> std::io::Result<SocketAddr> {
        match &self.control_listener {
            Some(listener) => listener.local_addr(),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "control listener already running",
            )),
        }
    }

    pub fn log_addr(&self) -> std::io::Result<SocketAddr> {
        self.log_socket.local_addr()
    }

    /// Sender that stops the tracker loop when given [`ServerMessage::Shutdown`].
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that accepts control connections, one request each
    fn spawn_control_listener(&mut self) {
        let Some(listener) = self.control_listener.take() else {
            return;
        };
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!("Control connection from {}", peer);
                        tokio::spawn(handle_control_connection(stream, peer, server_tx.clone()));
                    }
                    Err(e) => {
                        error!("Error accepting control connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that forwards every log datagram to the tracker loop
    fn spawn_log_receiver(&self) {
        let socket = Arc::clone(&self.log_socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 8192];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        let payload = buffer[..len].to_vec();
                        if let Err(e) = server_tx.send(ServerMessage::LogPacket { payload, addr }) {
                            error!("Failed to send log packet to tracker loop: {}", e);
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error receiving log packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that posts queued reports and hands failures back
    fn spawn_report_sender(&mut self) -> Result<(), BoxError> {
        let Some(mut report_rx) = self.report_rx.take() else {
            return Ok(());
        };
        let server_tx = self.server_tx.clone();
        let client = reqwest::Client::builder().timeout(REPORT_TIMEOUT).build()?;

        tokio::spawn(async move {
            while let Some(report) = report_rx.recv().await {
                let client = client.clone();
                let server_tx = server_tx.clone();
                tokio::spawn(async move {
                    match post_report(&client, &report).await {
                        Ok(body) => info!(
                            "MATCH {} | {} report returns: {}",
                            report.match_id,
                            report.type_name(),
                            body.trim()
                        ),
                        Err(e) => {
                            warn!(
                                "MATCH {} | {} report failed: {}",
                                report.match_id,
                                report.type_name(),
                                e
                            );
                            let _ = server_tx.send(ServerMessage::ReportFailed { report });
                        }
                    }
                });
            }
        });
        Ok(())
    }

    /// Main loop: spawns the network tasks, then runs the tracker until shutdown
    pub async fn run(mut self) -> Result<(), BoxError> {
        self.spawn_control_listener();
        self.spawn_log_receiver();
        self.spawn_report_sender()?;

        let tracker = Tracker::new(
            self.config.clone(),
            Box::new(TcpConnector::new(self.config.rcon.clone())),
            Box::new(ReportQueue::new(self.report_tx.clone())),
        );
        let tick = self.config.tick;
        let server_rx = self.server_rx;

        info!("Tracker loop started, tick every {:?}", tick);
        tokio::task::spawn_blocking(move || run_tracker_loop(tracker, server_rx, tick)).await?;
        info!("Tracker loop stopped");
        Ok(())
    }
}

/// Drains pending messages, ticks the tracker, sleeps; until shutdown
fn run_tracker_loop(
    mut tracker: Tracker,
    mut server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    tick: Duration,
) {
    loop {
        let now = unix_time();
        let mut datagrams: HashMap<String, Vec<Vec<u8>>> = HashMap::new();

        loop {
            match server_rx.try_recv() {
                Ok(ServerMessage::ControlRequest {
                    payload,
                    peer,
                    reply,
                }) => {
                    debug!("Control request from {}", peer);
                    let answer = tracker.handle_control(payload, now);
                    let _ = reply.send(answer);
                }
                Ok(ServerMessage::LogPacket { payload, addr }) => {
                    datagrams.entry(addr.to_string()).or_default().push(payload);
                }
                Ok(ServerMessage::ReportFailed { report }) => tracker.report_failed(report, now),
                Ok(ServerMessage::Shutdown) | Err(TryRecvError::Disconnected) => {
                    info!("Tracker loop shutting down with {} matches", tracker.len());
                    return;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        tracker.tick(now, datagrams);
        std::thread::sleep(tick);
    }
}

/// Reads one JSON request, forwards it and writes the reply, if any
async fn handle_control_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    let Some(payload) = read_request(&mut stream, peer).await else {
        return;
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    let message = ServerMessage::ControlRequest {
        payload,
        peer,
        reply: reply_tx,
    };
    if server_tx.send(message).is_err() {
        error!("Tracker loop is gone, dropping control request from {}", peer);
        return;
    }

    if let Ok(Some(answer)) = reply_rx.await {
        if let Err(e) = stream.write_all(answer.as_bytes()).await {
            warn!("Failed to reply to {}: {}", peer, e);
        }
    }
    let _ = stream.shutdown().await;
}

async fn read_request(stream: &mut TcpStream, peer: SocketAddr) -> Option<Value> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let read = match timeout(CONTROL_READ_TIMEOUT, stream.read(&mut chunk)).await {
            Ok(Ok(read)) => read,
            Ok(Err(e)) => {
                warn!("Error reading control request from {}: {}", peer, e);
                return None;
            }
            Err(_) => {
                warn!("Control request from {} timed out", peer);
                return None;
            }
        };
        if read == 0 {
            debug!("Control connection from {} closed before a complete request", peer);
            return None;
        }

        buffer.extend_from_slice(&chunk[..read]);
        if buffer.len() > MAX_CONTROL_REQUEST {
            warn!("Control request from {} is too large", peer);
            return None;
        }

        match serde_json::from_slice::<Value>(&buffer) {
            Ok(value) => return Some(value),
            Err(e) if e.is_eof() => continue,
            Err(e) => {
                warn!("Invalid control request from {}: {}", peer, e);
                return None;
            }
        }
    }
}
