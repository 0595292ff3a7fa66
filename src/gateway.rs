//! Switch control channel.
//!
//! Each switch holds one TCP session speaking newline-delimited JSON. The
//! first line must be a `hello` naming the datapath; after that every line is
//! a switch event, and every command the core produces is written back as one
//! line. Sessions run as independent tokio tasks, so one switch's events are
//! handled in order while different switches proceed in parallel.
//!
//! Lines longer than [`MAX_LINE_BYTES`] (configurable per gateway) end the
//! session with [`GatewayError::LineTooLong`].

use crate::controller::{ControllerCore, ControllerEvent, PacketIn};
use crate::flow_rule::{hex_bytes, DatapathId, SwitchCommand};
use crate::stats::{FlowStatsEntry, PortReason};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Longest accepted control-channel line, newline excluded
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Control-channel errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),
}

/// Messages a switch sends on its control channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum SwitchMessage {
    Hello {
        datapath_id: DatapathId,
    },
    PacketIn {
        in_port: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        buffer_id: Option<u32>,
        #[serde(with = "hex_bytes")]
        data: Vec<u8>,
    },
    PortStatus {
        port_no: u32,
        reason: PortReason,
    },
    FlowStatsReply {
        entries: Vec<FlowStatsEntry>,
    },
}

impl SwitchMessage {
    fn kind(&self) -> &'static str {
        match self {
            SwitchMessage::Hello { .. } => "hello",
            SwitchMessage::PacketIn { .. } => "packet_in",
            SwitchMessage::PortStatus { .. } => "port_status",
            SwitchMessage::FlowStatsReply { .. } => "flow_stats_reply",
        }
    }

    /// Core event for a message on an established session
    pub fn into_event(self, datapath_id: DatapathId) -> Option<ControllerEvent> {
        match self {
            SwitchMessage::Hello { .. } => None,
            SwitchMessage::PacketIn {
                in_port,
                buffer_id,
                data,
            } => Some(ControllerEvent::PacketIn(PacketIn {
                datapath_id,
                in_port,
                buffer_id,
                data,
            })),
            SwitchMessage::PortStatus { port_no, reason } => Some(ControllerEvent::PortStatus {
                datapath_id,
                port_no,
                reason,
            }),
            SwitchMessage::FlowStatsReply { entries } => Some(ControllerEvent::FlowStatsReply {
                datapath_id,
                entries,
            }),
        }
    }
}

/// Accepts switch sessions and feeds them to the controller core
pub struct SwitchGateway<R: RngCore + Send + 'static> {
    core: Arc<ControllerCore<R>>,
    stats_poll: Option<Duration>,
    max_line_bytes: usize,
}

impl<R: RngCore + Send + 'static> Clone for SwitchGateway<R> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            stats_poll: self.stats_poll,
            max_line_bytes: self.max_line_bytes,
        }
    }
}

impl<R: RngCore + Send + 'static> SwitchGateway<R> {
    /// `stats_poll` enables periodic flow statistics requests per switch
    pub fn new(core: Arc<ControllerCore<R>>, stats_poll: Option<Duration>) -> Self {
        Self {
            core,
            stats_poll,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes.max(1);
        self
    }

    pub fn core(&self) -> &Arc<ControllerCore<R>> {
        &self.core
    }

    /// Accept sessions until the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayError> {
        info!("Control channel listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept control connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
            }

            let gateway = self.clone();
            tokio::spawn(async move {
                gateway.run_session(stream, peer).await;
            });
        }
    }

    async fn run_session<S>(&self, stream: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        debug!("Control connection from {}", peer);
        match self.handle_session(stream).await {
            Ok(datapath_id) => info!("Session for switch {:#x} from {} closed", datapath_id, peer),
            Err(e) => error!("Session from {} failed: {}", peer, e),
        }
    }

    /// Drive one switch session to completion.
    ///
    /// Returns the datapath id once the switch hangs up. A session that ended
    /// after the handshake always reports the switch as disconnected.
    pub async fn handle_session<S>(&self, stream: S) -> Result<DatapathId, GatewayError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = LineReader::new(reader, self.max_line_bytes);

        let datapath_id = match lines.next_line().await? {
            Some(line) => match serde_json::from_str::<SwitchMessage>(&line) {
                Ok(SwitchMessage::Hello { datapath_id }) => datapath_id,
                Ok(other) => {
                    return Err(GatewayError::Handshake(format!(
                        "expected hello, got {}",
                        other.kind()
                    )))
                }
                Err(e) => return Err(GatewayError::Handshake(format!("malformed hello: {}", e))),
            },
            None => {
                return Err(GatewayError::Handshake(
                    "connection closed before hello".to_string(),
                ))
            }
        };

        let connected = self.core.on_connected(datapath_id);
        let result = match write_commands(&mut writer, &connected.commands).await {
            Ok(()) => self.event_loop(datapath_id, &mut lines, &mut writer).await,
            Err(e) => Err(e),
        };

        // A reconnect may already own the switch; the core drops stale sessions.
        self.core.handle_event(ControllerEvent::Disconnected {
            datapath_id,
            session: connected.session,
        });
        result.map(|()| datapath_id)
    }

    async fn event_loop<Rd, W>(
        &self,
        datapath_id: DatapathId,
        lines: &mut LineReader<Rd>,
        writer: &mut W,
    ) -> Result<(), GatewayError>
    where
        Rd: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut poll = self.stats_poll.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        return Ok(());
                    };
                    if line.trim().is_empty() {
                        continue;
                    }

                    match serde_json::from_str::<SwitchMessage>(&line) {
                        Ok(message) => {
                            let kind = message.kind();
                            match message.into_event(datapath_id) {
                                Some(event) => {
                                    let commands = self.core.handle_event(event);
                                    write_commands(writer, &commands).await?;
                                }
                                None => warn!("Switch {:#x}: ignoring repeated {}", datapath_id, kind),
                            }
                        }
                        Err(e) => warn!("Switch {:#x}: dropping malformed message: {}", datapath_id, e),
                    }
                }
                _ = next_tick(&mut poll) => {
                    write_commands(writer, &[SwitchCommand::FlowStatsRequest { datapath_id }]).await?;
                }
            }
        }
    }
}

/// Newline-delimited reader with a length cap.
///
/// Partial lines stay in `buf` across calls, so `next_line` can be raced in
/// `select!` without losing input.
struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(reader: R, max_len: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
            max_len,
        }
    }

    /// Next line without its terminator, or `None` at end of stream
    async fn next_line(&mut self) -> Result<Option<String>, GatewayError> {
        loop {
            let room = (self.max_len + 1).saturating_sub(self.buf.len()) as u64;
            let read = (&mut self.reader)
                .take(room)
                .read_until(b'\n', &mut self.buf)
                .await?;

            if self.buf.last() == Some(&b'\n') {
                self.buf.pop();
                if self.buf.last() == Some(&b'\r') {
                    self.buf.pop();
                }
                return Ok(Some(self.take_line()));
            }
            if self.buf.len() > self.max_len {
                self.buf.clear();
                return Err(GatewayError::LineTooLong(self.max_len));
            }
            if read == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_line()));
            }
        }
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        line
    }
}

async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn command_kind(command: &SwitchCommand) -> &'static str {
    match command {
        SwitchCommand::FlowMod(_) => "flow_mod",
        SwitchCommand::PacketOut(_) => "packet_out",
        SwitchCommand::FlowStatsRequest { .. } => "flow_stats_request",
    }
}

async fn write_commands<W>(writer: &mut W, commands: &[SwitchCommand]) -> Result<(), GatewayError>
where
    W: AsyncWrite + Unpin,
{
    if commands.is_empty() {
        return Ok(());
    }

    let mut buf = Vec::with_capacity(256 * commands.len());
    for command in commands {
        debug!("Sending {} to switch {:#x}", command_kind(command), command.datapath_id());
        serde_json::to_writer(&mut buf, command)?;
        buf.push(b'\n');
    }
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}
