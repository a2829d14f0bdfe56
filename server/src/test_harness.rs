//! Doubles for game servers and the report endpoint.
//!
//! [`FakeGameServer`] speaks the remote console protocol over real TCP and can be
//! told to drop connections. The `Recording*` types stand in for the console,
//! the connector and the report sink without any I/O.

use crate::rcon::{Rcon, RconConnector, RconError};
use crate::report::{Report, ReportSink};
use shared::rcon::{
    PacketBuffer, RconPacket, AUTH_FAILED_ID, SENTINEL_ID, SERVERDATA_AUTH,
    SERVERDATA_AUTH_RESPONSE, SERVERDATA_EXECCOMMAND, SERVERDATA_RESPONSE_VALUE,
};
use std::collections::{HashMap, HashSet};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// Commands received by a console double, in order.
#[derive(Debug, Clone, Default)]
pub struct CommandLog(Arc<Mutex<Vec<String>>>);

impl CommandLog {
    pub fn push(&self, command: &str) {
        if let Ok(mut commands) = self.0.lock() {
            commands.push(command.to_string());
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.0.lock().map(|commands| commands.clone()).unwrap_or_default()
    }

    /// Chat lines without the `say <prefix> ` part.
    pub fn said(&self) -> Vec<String> {
        self.commands()
            .iter()
            .filter_map(|command| command.strip_prefix("say "))
            .map(|line| match line.split_once(' ') {
                Some((prefix, text)) if prefix.starts_with('[') => text.to_string(),
                _ => line.to_string(),
            })
            .collect()
    }

    pub fn contains(&self, command: &str) -> bool {
        self.commands().iter().any(|known| known == command)
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|known| *known == command).count()
    }

    pub fn clear(&self) {
        if let Ok(mut commands) = self.0.lock() {
            commands.clear();
        }
    }
}

/// Console that records every command and answers from a fixed table.
#[derive(Debug, Clone, Default)]
pub struct RecordingRcon {
    log: CommandLog,
    answers: Arc<Mutex<HashMap<String, String>>>,
}

impl RecordingRcon {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> CommandLog {
        self.log.clone()
    }

    pub fn set_answer(&self, command: &str, answer: &str) {
        if let Ok(mut answers) = self.answers.lock() {
            answers.insert(command.to_string(), answer.to_string());
        }
    }
}

impl Rcon for RecordingRcon {
    fn execute(&mut self, command: &str) -> String {
        self.log.push(command);
        self.answers
            .lock()
            .ok()
            .and_then(|answers| answers.get(command).cloned())
            .unwrap_or_default()
    }
}

/// Hands out one [`RecordingRcon`] per server address.
#[derive(Debug, Clone, Default)]
pub struct RecordingConnector {
    consoles: Arc<Mutex<HashMap<String, RecordingRcon>>>,
    refused: Arc<Mutex<HashSet<String>>>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn console(&self, address: &str) -> RecordingRcon {
        let mut consoles = match self.consoles.lock() {
            Ok(consoles) => consoles,
            Err(poisoned) => poisoned.into_inner(),
        };
        consoles.entry(address.to_string()).or_default().clone()
    }

    pub fn log_for(&self, address: &str) -> CommandLog {
        self.console(address).log()
    }

    pub fn refuse(&self, address: &str) {
        if let Ok(mut refused) = self.refused.lock() {
            refused.insert(address.to_string());
        }
    }
}

impl RconConnector for RecordingConnector {
    fn connect(
        &self,
        address: &str,
        _password: &str,
        _label: &str,
    ) -> Result<Box<dyn Rcon>, RconError> {
        let refused = self
            .refused
            .lock()
            .map(|refused| refused.contains(address))
            .unwrap_or(false);
        if refused {
            return Err(RconError::Connect {
                address: address.to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
            });
        }
        Ok(Box::new(self.console(address)))
    }
}

/// Report sink that keeps everything submitted to it.
#[derive(Debug, Clone, Default)]
pub struct RecordingReports(Arc<Mutex<Vec<Report>>>);

impl RecordingReports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.0.lock().map(|reports| reports.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.reports().iter().map(Report::type_name).collect()
    }
}

impl ReportSink for RecordingReports {
    fn submit(&self, report: Report) {
        if let Ok(mut reports) = self.0.lock() {
            reports.push(report);
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakeServerOptions {
    password: String,
    answers: HashMap<String, String>,
    chunk_size: usize,
    drop_on_command: Option<usize>,
    close_after_answers: Option<usize>,
}

impl FakeServerOptions {
    pub fn new(password: &str) -> Self {
        Self {
            password: password.to_string(),
            answers: HashMap::new(),
            chunk_size: 4096,
            drop_on_command: None,
            close_after_answers: None,
        }
    }

    pub fn answer(mut self, command: &str, answer: &str) -> Self {
        self.answers.insert(command.to_string(), answer.to_string());
        self
    }

    /// Largest body of a single answer packet.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Closes the first connection, unanswered, when the n-th command arrives.
    pub fn drop_on_command(mut self, n: usize) -> Self {
        self.drop_on_command = Some(n);
        self
    }

    /// Closes the first connection right after the n-th complete answer.
    pub fn close_after_answers(mut self, n: usize) -> Self {
        self.close_after_answers = Some(n);
        self
    }
}

/// Game server console on a loopback port, one thread per connection.
pub struct FakeGameServer {
    address: SocketAddr,
    commands: CommandLog,
    connections: Arc<AtomicUsize>,
}

impl FakeGameServer {
    pub fn start(options: FakeServerOptions) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let address = listener.local_addr()?;
        let commands = CommandLog::default();
        let connections = Arc::new(AtomicUsize::new(0));

        let log = commands.clone();
        let counter = Arc::clone(&connections);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
                let options = options.clone();
                let log = log.clone();
                thread::spawn(move || {
                    let _ = serve(stream, &options, &log, first);
                });
            }
        });

        Ok(Self {
            address,
            commands,
            connections,
        })
    }

    pub fn address(&self) -> String {
        self.address.to_string()
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    pub fn commands(&self) -> CommandLog {
        self.commands.clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

fn serve(
    mut stream: TcpStream,
    options: &FakeServerOptions,
    log: &CommandLog,
    first: bool,
) -> io::Result<()> {
    let mut buffer = PacketBuffer::new();
    let mut chunk = [0u8; 4096];
    let mut received = 0;
    let mut answered = 0;

    loop {
        while let Ok(Some(packet)) = buffer.next_packet() {
            match packet.kind {
                SERVERDATA_AUTH => {
                    let id = if packet.body_text() == options.password {
                        packet.id
                    } else {
                        AUTH_FAILED_ID
                    };
                    write(&mut stream, packet.id, SERVERDATA_RESPONSE_VALUE, b"")?;
                    write(&mut stream, id, SERVERDATA_AUTH_RESPONSE, b"")?;
                }
                SERVERDATA_EXECCOMMAND if packet.id == SENTINEL_ID => {
                    write(&mut stream, SENTINEL_ID, SERVERDATA_RESPONSE_VALUE, b"")?;
                    answered += 1;
                    if first && options.close_after_answers == Some(answered) {
                        return Ok(());
                    }
                }
                SERVERDATA_EXECCOMMAND => {
                    let command = packet.body_text();
                    log.push(&command);
                    received += 1;
                    if first && options.drop_on_command == Some(received) {
                        return Ok(());
                    }
                    let answer = options.answers.get(&command).cloned().unwrap_or_default();
                    if answer.is_empty() {
                        write(&mut stream, packet.id, SERVERDATA_RESPONSE_VALUE, b"")?;
                    }
                    for part in answer.as_bytes().chunks(options.chunk_size) {
                        write(&mut stream, packet.id, SERVERDATA_RESPONSE_VALUE, part)?;
                    }
                }
                _ => {}
            }
        }

        let read = stream.read(&mut chunk)?;
        if read == 0 {
            return Ok(());
        }
        buffer.extend(&chunk[..read]);
    }
}

fn write(stream: &mut TcpStream, id: i32, kind: i32, body: &[u8]) -> io::Result<()> {
    stream.write_all(&RconPacket::new(id, kind, body).encode())
}
