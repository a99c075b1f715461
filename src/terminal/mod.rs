//! The duplex terminal pump.
//!
//! Once the WebSocket is open three flows run until the shared cancellation
//! signal fires:
//!
//! 1. the input-capture thread ([`input::spawn_input_capture`]) feeding the
//!    captured-input queue,
//! 2. the send path (this module's main loop) draining the queue into one
//!    text frame per cycle, awaiting each send before starting the next,
//! 3. the receive task writing each inbound fragment to the output sink as it
//!    arrives, without waiting for the rest of its message.

mod input;
mod queue;
mod reassembly;
mod socket;

pub use input::{encode_key, spawn_input_capture, ConsoleInput, InputSource, RawModeGuard};
pub use queue::{input_queue, InputQueue, InputSender, QueueClosed};
pub use reassembly::MessageAssembler;

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::{CloseCode, Control, Data, OpCode};
use tokio_tungstenite::tungstenite::protocol::frame::Frame;

use crate::cancel::CancellationSignal;
use crate::config::CloudShellConfig;
use crate::errors::{CloudShellError, Result};
use socket::{close_frame, text_frame, FrameReader, FrameWriter, SocketStream};

type SharedWriter<W> = Arc<Mutex<FrameWriter<W>>>;

/// Connection state of the terminal socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Open => "Open",
            ConnectionState::Closing => "Closing",
            ConnectionState::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// Local console endpoints the terminal is relayed to
pub struct Console {
    pub input: Box<dyn InputSource>,
    pub output: Box<dyn Write + Send>,
}

impl Console {
    pub fn new(input: Box<dyn InputSource>, output: Box<dyn Write + Send>) -> Self {
        Self { input, output }
    }

    /// Keyboard in, stdout out
    pub fn interactive() -> Self {
        Self::new(Box::new(ConsoleInput), Box::new(std::io::stdout()))
    }
}

/// Close status taken from a close frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseStatus {
    pub code: u16,
    pub reason: String,
}

impl CloseStatus {
    /// Decode a close frame payload: big-endian status code, then a UTF-8 reason
    pub fn from_payload(payload: &[u8]) -> Self {
        match payload {
            [high, low, reason @ ..] => Self {
                code: u16::from_be_bytes([*high, *low]),
                reason: String::from_utf8_lossy(reason).into_owned(),
            },
            _ => Self {
                code: u16::from(CloseCode::Status),
                reason: String::new(),
            },
        }
    }
}

/// Final state of a finished terminal session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub state: ConnectionState,
    pub close_code: Option<u16>,
    pub close_reason: String,
    /// Transport or console fault that ended the session, if any
    pub fault: Option<String>,
}

impl SessionReport {
    pub fn is_clean(&self) -> bool {
        self.fault.is_none()
    }

    /// Turn a faulted report into [`CloudShellError::TransportFault`]
    pub fn into_result(self) -> Result<SessionReport> {
        match &self.fault {
            Some(fault) => Err(CloudShellError::TransportFault(fault.clone())),
            None => Ok(self),
        }
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state: {}", self.state)?;
        if let Some(code) = self.close_code {
            write!(f, ", close status: {}", code)?;
        }
        if !self.close_reason.is_empty() {
            write!(f, ", description: {}", self.close_reason)?;
        }
        if let Some(fault) = &self.fault {
            write!(f, ", fault: {}", fault)?;
        }
        Ok(())
    }
}

/// Shared state of one terminal session
#[derive(Debug, Clone)]
pub struct SessionState {
    connection: std::sync::Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationSignal,
}

impl SessionState {
    pub fn new(cancel: CancellationSignal) -> Self {
        let (connection, _) = watch::channel(ConnectionState::Connecting);
        Self {
            connection: std::sync::Arc::new(connection),
            cancel,
        }
    }

    pub fn connection(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Observe connection state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub fn cancellation(&self) -> &CancellationSignal {
        &self.cancel
    }

    fn set_connection(&self, state: ConnectionState) {
        let previous = self.connection.send_replace(state);
        if previous != state {
            log::debug!("Terminal socket {} -> {}", previous, state);
        }
    }
}

struct ReceiveOutcome<R> {
    reader: FrameReader<R>,
    peer_close: Option<CloseStatus>,
    fault: Option<String>,
}

/// Owns the WebSocket connection to one cloud shell terminal
pub struct TerminalSession {
    config: CloudShellConfig,
    state: SessionState,
}

impl TerminalSession {
    pub fn new(config: CloudShellConfig, cancel: CancellationSignal) -> Self {
        Self {
            config,
            state: SessionState::new(cancel),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Connect to `socket_uri` and relay the console until the session ends
    pub async fn run(&self, socket_uri: &str, console: Console) -> Result<SessionReport> {
        let (stream, leftover) = self.connect(socket_uri).await?;
        let (read_half, write_half): (ReadHalf<SocketStream>, WriteHalf<SocketStream>) =
            tokio::io::split(stream);
        let reader = FrameReader::new(read_half, leftover);
        let writer = Arc::new(Mutex::new(FrameWriter::new(write_half)));
        let cancel = self.state.cancel.clone();

        let receive_task = tokio::spawn(receive_loop(
            reader,
            writer.clone(),
            MessageAssembler::new(console.output, self.config.receive_buffer_size),
            cancel.clone(),
        ));

        let (sender, mut queue) = input_queue();
        let mut fault = None;
        let input_thread = match spawn_input_capture(
            console.input,
            sender,
            cancel.clone(),
            self.config.input_poll_interval,
        ) {
            Ok(handle) => Some(handle),
            Err(e) => {
                fault = Some(format!("failed to start input capture: {}", e));
                cancel.cancel();
                None
            }
        };

        if let Some(send_fault) = send_loop(&writer, &mut queue, &cancel).await {
            fault.get_or_insert(send_fault);
        }

        cancel.cancel();
        self.state.set_connection(ConnectionState::Closing);

        let outcome = match receive_task.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                fault.get_or_insert(format!("receive task failed: {}", e));
                None
            }
        };

        let mut report = SessionReport {
            state: ConnectionState::Closing,
            close_code: None,
            close_reason: String::new(),
            fault,
        };

        let close = match outcome {
            Some(ReceiveOutcome {
                reader,
                peer_close,
                fault: receive_fault,
            }) => {
                if let Some(receive_fault) = receive_fault {
                    report.fault.get_or_insert(receive_fault);
                }
                self.close_handshake(&writer, reader, peer_close).await
            }
            None => None,
        };

        if let Some(handle) = input_thread {
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => {
                    report
                        .fault
                        .get_or_insert(format!("console input failed: {}", e));
                }
                _ => log::warn!("Input capture thread panicked"),
            }
        }

        self.state.set_connection(ConnectionState::Closed);
        report.state = ConnectionState::Closed;
        if let Some(close) = close {
            report.close_code = Some(close.code);
            report.close_reason = close.reason;
        } else if let Some(fault) = &report.fault {
            report.close_reason = fault.clone();
        }

        log::info!("Terminal session ended ({})", report);
        Ok(report)
    }

    /// Open the socket; resolves once the connection has left `Connecting`
    async fn connect(&self, socket_uri: &str) -> Result<(SocketStream, BytesMut)> {
        self.state.set_connection(ConnectionState::Connecting);
        log::info!("Connecting to terminal socket");

        let connected = tokio::select! {
            biased;
            _ = self.state.cancel.cancelled() => Err(CloudShellError::OperationCancelled),
            connected = socket::connect(socket_uri) => connected,
        };

        match connected {
            Ok(connection) => {
                self.state.set_connection(ConnectionState::Open);
                Ok(connection)
            }
            Err(e) => {
                self.state.set_connection(ConnectionState::Closed);
                Err(e)
            }
        }
    }

    /// Send a normal-closure frame unless the peer closed first, then wait
    /// for the peer's close status within the configured timeout.
    /// `None` when no close status was received.
    async fn close_handshake<R, W>(
        &self,
        writer: &SharedWriter<W>,
        mut reader: FrameReader<R>,
        peer_close: Option<CloseStatus>,
    ) -> Option<CloseStatus>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        // Already answered by the receive loop
        if peer_close.is_some() {
            return peer_close;
        }

        let normal = u16::from(CloseCode::Normal);
        if let Err(e) = writer.lock().await.write_frame(close_frame(Some(normal))).await {
            log::debug!("Failed to send close frame: {}", e);
            return None;
        }

        let reply = tokio::time::timeout(self.config.close_timeout, async {
            loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) if frame.header().opcode == OpCode::Control(Control::Close) => {
                        return Some(CloseStatus::from_payload(frame.payload()));
                    }
                    Ok(Some(_)) => continue,
                    Ok(None) | Err(_) => return None,
                }
            }
        })
        .await;

        reply.unwrap_or_else(|_| {
            log::warn!(
                "Peer did not answer close frame within {:?}",
                self.config.close_timeout
            );
            None
        })
    }
}

/// Drain the queue into one text frame per cycle until cancelled.
/// Each send completes before the next batch is taken.
async fn send_loop<W: AsyncWrite + Unpin>(
    writer: &SharedWriter<W>,
    queue: &mut InputQueue,
    cancel: &CancellationSignal,
) -> Option<String> {
    loop {
        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            batch = queue.next_batch() => batch,
        };

        let Some(batch) = batch else {
            return None;
        };

        let text = String::from_utf8_lossy(&batch).into_owned();
        log::trace!("Sending {} byte(s)", text.len());
        if let Err(e) = writer.lock().await.write_frame(text_frame(text)).await {
            log::error!("Failed to send terminal input: {}", e);
            cancel.cancel();
            return Some(e.to_string());
        }
    }
}

/// Write each inbound data fragment as it arrives; the fragment's FIN bit
/// marks the end of the logical message.
async fn receive_loop<R, W>(
    mut reader: FrameReader<R>,
    writer: SharedWriter<W>,
    mut assembler: MessageAssembler<Box<dyn Write + Send>>,
    cancel: CancellationSignal,
) -> ReceiveOutcome<R>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut peer_close = None;
    let mut fault = None;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = reader.read_frame() => next,
        };

        let frame = match next {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::error!("Terminal socket closed without a close frame");
                fault = Some("connection closed without a close frame".to_string());
                cancel.cancel();
                break;
            }
            Err(e) => {
                log::error!("Terminal socket receive failed: {}", e);
                fault = Some(e.to_string());
                cancel.cancel();
                break;
            }
        };

        let opcode = frame.header().opcode;
        let is_final = frame.header().is_final;
        let written = match opcode {
            OpCode::Data(Data::Text | Data::Binary | Data::Continue) => {
                assembler.push_frame(frame.payload(), is_final)
            }
            OpCode::Control(Control::Ping) => {
                reply(&writer, Frame::pong(frame.into_payload())).await;
                Ok(())
            }
            OpCode::Control(Control::Close) => {
                let status = CloseStatus::from_payload(frame.payload());
                log::info!("Terminal closed by peer ({})", status.code);
                let echoed = (!frame.payload().is_empty()).then_some(status.code);
                reply(&writer, close_frame(echoed)).await;
                peer_close = Some(status);
                cancel.cancel();
                break;
            }
            _ => Ok(()),
        };

        if let Err(e) = written {
            log::error!("Failed to write terminal output: {}", e);
            fault = Some(format!("output error: {}", e));
            cancel.cancel();
            break;
        }
    }

    ReceiveOutcome {
        reader,
        peer_close,
        fault,
    }
}

async fn reply<W: AsyncWrite + Unpin>(writer: &SharedWriter<W>, frame: Frame) {
    if let Err(e) = writer.lock().await.write_frame(frame).await {
        log::debug!("Failed to answer control frame: {}", e);
    }
}
