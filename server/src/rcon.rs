//! Remote console client for Source game servers.
//!
//! One [`RconClient`] owns one authenticated TCP connection. An answer may span
//! several packets with no end marker, so every command is followed by an empty
//! sentinel packet: everything the server sends before echoing the sentinel
//! belongs to the answer.
//!
//! Only [`RconClient::connect`] can fail. Afterwards a lost connection is
//! re-established on the spot and the affected command degrades to an empty
//! answer; the caller never sees an error.

use crate::config::RconSettings;
use log::{debug, info, warn};
use shared::rcon::{
    FrameError, PacketBuffer, RconPacket, AUTH_FAILED_ID, SENTINEL_ID, SERVERDATA_AUTH_RESPONSE,
};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RconError {
    #[error("cannot resolve {0}")]
    Resolve(String),
    #[error("connection to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("rcon password rejected by {0}")]
    AuthFailed(String),
    #[error("no answer from game server")]
    NoResponse,
    #[error("connection closed by game server")]
    Closed,
    #[error("answer exceeds {0} packets")]
    TooManyPackets(usize),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt packet: {0}")]
    Frame(#[from] FrameError),
}

/// Executes console commands on one game server.
pub trait Rcon: Send {
    /// Runs `command` and returns its answer; empty when the answer was lost.
    fn execute(&mut self, command: &str) -> String;

    fn disconnect(&mut self) {}
}

/// Opens authenticated console connections.
pub trait RconConnector: Send {
    fn connect(
        &self,
        address: &str,
        password: &str,
        label: &str,
    ) -> Result<Box<dyn Rcon>, RconError>;
}

#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    settings: RconSettings,
}

impl TcpConnector {
    pub fn new(settings: RconSettings) -> Self {
        Self { settings }
    }
}

impl RconConnector for TcpConnector {
    fn connect(
        &self,
        address: &str,
        password: &str,
        label: &str,
    ) -> Result<Box<dyn Rcon>, RconError> {
        let client = RconClient::connect(address, password, label, self.settings.clone())?;
        Ok(Box::new(client))
    }
}

#[derive(Debug)]
pub struct RconClient {
    address: String,
    password: String,
    /// Prefix of every log line, e.g. `MATCH 42`
    label: String,
    settings: RconSettings,
    stream: Option<TcpStream>,
    buffer: PacketBuffer,
    next_id: i32,
}

impl RconClient {
    pub fn connect(
        address: &str,
        password: &str,
        label: &str,
        settings: RconSettings,
    ) -> Result<Self, RconError> {
        let mut client = Self {
            address: address.to_string(),
            password: password.to_string(),
            label: label.to_string(),
            settings,
            stream: None,
            buffer: PacketBuffer::new(),
            next_id: 0,
        };
        client.open()?;
        info!("{} | rcon connected to {}", client.label, client.address);
        Ok(client)
    }

    /// Replaces the current connection with a fresh, authenticated one.
    fn open(&mut self) -> Result<(), RconError> {
        self.stream = None;
        self.buffer.clear();

        let addresses = self
            .address
            .to_socket_addrs()
            .map_err(|_| RconError::Resolve(self.address.clone()))?;

        let mut last_error = None;
        for address in addresses {
            match TcpStream::connect_timeout(&address, self.settings.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.settings.read_timeout))?;
                    stream.set_nodelay(true)?;
                    self.stream = Some(stream);
                    break;
                }
                Err(e) => last_error = Some(e),
            }
        }

        if self.stream.is_none() {
            return Err(RconError::Connect {
                address: self.address.clone(),
                source: last_error.unwrap_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, "no address to connect to")
                }),
            });
        }

        self.authenticate()
    }

    fn authenticate(&mut self) -> Result<(), RconError> {
        let password = self.password.clone();
        self.send(&RconPacket::auth(&password))?;

        // An empty response value usually precedes the actual auth response
        for _ in 0..2 {
            let packet = self.read_packet()?;
            if packet.kind == SERVERDATA_AUTH_RESPONSE {
                if packet.id == AUTH_FAILED_ID {
                    return Err(RconError::AuthFailed(self.address.clone()));
                }
                return Ok(());
            }
        }
        Err(RconError::NoResponse)
    }

    fn reconnect(&mut self) -> bool {
        info!("{} | rcon reconnecting to {}", self.label, self.address);
        match self.open() {
            Ok(()) => true,
            Err(e) => {
                warn!("{} | rcon reconnect failed: {}", self.label, e);
                false
            }
        }
    }

    fn stream(&mut self) -> Result<&mut TcpStream, RconError> {
        self.stream.as_mut().ok_or(RconError::Closed)
    }

    fn send(&mut self, packet: &RconPacket) -> Result<(), RconError> {
        let stream = self.stream()?;
        stream.write_all(&packet.encode())?;
        stream.flush()?;
        Ok(())
    }

    fn send_command(&mut self, command: &str) -> Result<(), RconError> {
        if !self.is_alive() {
            return Err(RconError::Closed);
        }
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.send(&RconPacket::command(self.next_id, command))?;
        self.send(&RconPacket::sentinel())
    }

    /// Detects a connection the server has already closed, before writing into it.
    fn is_alive(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        if stream.set_nonblocking(true).is_err() {
            return false;
        }
        let mut probe = [0u8; 1];
        let alive = match stream.peek(&mut probe) {
            Ok(0) => false,
            Ok(_) => true,
            Err(e) => e.kind() == io::ErrorKind::WouldBlock,
        };
        alive && stream.set_nonblocking(false).is_ok()
    }

    fn read_packet(&mut self) -> Result<RconPacket, RconError> {
        let mut chunk = [0u8; 4096];
        for _ in 0..self.settings.read_attempts {
            if let Some(packet) = self.buffer.next_packet()? {
                return Ok(packet);
            }
            let read = self.stream()?.read(&mut chunk);
            match read {
                Ok(0) => return Err(RconError::Closed),
                Ok(read) => self.buffer.extend(&chunk[..read]),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.buffer.next_packet()?.ok_or(RconError::NoResponse)
    }

    fn collect_answer(&mut self) -> Result<String, RconError> {
        let mut answer = Vec::new();
        for _ in 0..self.settings.max_response_packets {
            let packet = self.read_packet()?;
            if packet.id == SENTINEL_ID {
                return Ok(String::from_utf8_lossy(&answer).into_owned());
            }
            answer.extend_from_slice(&packet.body);
        }
        Err(RconError::TooManyPackets(self.settings.max_response_packets))
    }
}

impl Rcon for RconClient {
    fn execute(&mut self, command: &str) -> String {
        if let Err(e) = self.send_command(command) {
            warn!(
                "{} | rcon connection lost while sending command \"{}\": {}",
                self.label, command, e
            );
            if !self.reconnect() {
                return String::new();
            }
            info!("{} | resending command \"{}\"", self.label, command);
            if let Err(e) = self.send_command(command) {
                warn!("{} | resending command failed: {}", self.label, e);
                return String::new();
            }
        }

        match self.collect_answer() {
            Ok(answer) => answer,
            Err(e) => {
                warn!(
                    "{} | rcon connection lost while getting answer to \"{}\": {}",
                    self.label, command, e
                );
                self.reconnect();
                String::new()
            }
        }
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!("{} | rcon disconnect from {}", self.label, self.address);
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.buffer.clear();
    }
}
