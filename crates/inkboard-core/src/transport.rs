//! WebSocket transport for the protocol client.
//!
//! The socket runs on a background thread; the owner exchanges text frames
//! with it through channels and polls for events, so nothing here blocks the
//! thread that drives the board.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TransportError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("invalid WebSocket URL scheme: {0}")]
    BadScheme(String),
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("socket thread has closed")]
    Closed,
}

/// Connection state of the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Events surfaced by [`NativeTransport::poll_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    /// A text frame from the server.
    Message(String),
    Error { message: String },
}

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use super::*;
    use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use tungstenite::{Message, connect};
    use url::Url;

    enum Command {
        Send(String),
        Close,
    }

    /// Validate a socket URL, returning it normalised.
    pub fn parse_socket_url(url: &str) -> Result<Url, TransportError> {
        let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        match parsed.scheme() {
            "ws" | "wss" => Ok(parsed),
            other => Err(TransportError::BadScheme(other.to_string())),
        }
    }

    /// WebSocket client backed by a background thread.
    pub struct NativeTransport {
        state: SocketState,
        events: Vec<TransportEvent>,
        cmd_tx: Option<Sender<Command>>,
        event_rx: Option<Receiver<TransportEvent>>,
        _thread: Option<JoinHandle<()>>,
    }

    impl NativeTransport {
        pub fn new() -> Self {
            Self { state: SocketState::Disconnected, events: Vec::new(), cmd_tx: None, event_rx: None, _thread: None }
        }

        /// Start connecting. Progress is reported through [`Self::poll_events`].
        pub fn connect(&mut self, url: &str) -> Result<(), TransportError> {
            if self.cmd_tx.is_some() {
                return Err(TransportError::AlreadyConnected);
            }
            let url = parse_socket_url(url)?;

            self.state = SocketState::Connecting;
            let (cmd_tx, cmd_rx) = channel::<Command>();
            let (event_tx, event_rx) = channel::<TransportEvent>();

            let handle = thread::spawn(move || run_socket(url, cmd_rx, event_tx));

            self.cmd_tx = Some(cmd_tx);
            self.event_rx = Some(event_rx);
            self._thread = Some(handle);
            Ok(())
        }

        pub fn disconnect(&mut self) {
            if let Some(tx) = self.cmd_tx.take() {
                let _ = tx.send(Command::Close);
            }
            self.event_rx = None;
            self._thread = None;
            self.state = SocketState::Disconnected;
        }

        /// Queue a text frame for sending.
        pub fn send(&self, frame: String) -> Result<(), TransportError> {
            let tx = self.cmd_tx.as_ref().ok_or(TransportError::NotConnected)?;
            tx.send(Command::Send(frame)).map_err(|_| TransportError::Closed)
        }

        /// Drain pending events without blocking.
        pub fn poll_events(&mut self) -> Vec<TransportEvent> {
            if let Some(rx) = &self.event_rx {
                while let Ok(event) = rx.try_recv() {
                    match &event {
                        TransportEvent::Connected => self.state = SocketState::Connected,
                        TransportEvent::Disconnected => self.state = SocketState::Disconnected,
                        TransportEvent::Error { .. } => self.state = SocketState::Error,
                        TransportEvent::Message(_) => {}
                    }
                    self.events.push(event);
                }
            }
            std::mem::take(&mut self.events)
        }

        pub fn state(&self) -> SocketState {
            self.state
        }

        pub fn is_connected(&self) -> bool {
            self.state == SocketState::Connected
        }
    }

    impl Default for NativeTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Drop for NativeTransport {
        fn drop(&mut self) {
            self.disconnect();
        }
    }

    fn run_socket(url: Url, cmd_rx: Receiver<Command>, event_tx: Sender<TransportEvent>) {
        log::info!("Socket thread: connecting to {}", url);
        let (mut socket, response) = match connect(url.as_str()) {
            Ok(connected) => connected,
            Err(e) => {
                log::error!("Socket connection failed: {}", e);
                let _ = event_tx.send(TransportEvent::Error { message: format!("connection failed: {e}") });
                return;
            }
        };
        log::info!("Socket connected, status: {}", response.status());
        let _ = event_tx.send(TransportEvent::Connected);

        match socket.get_mut() {
            tungstenite::stream::MaybeTlsStream::Plain(tcp) => {
                let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
                let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
            }
            #[allow(unreachable_patterns)]
            _ => log::debug!("TLS stream, relying on default timeouts"),
        }

        loop {
            match cmd_rx.try_recv() {
                Ok(Command::Send(frame)) => {
                    log::trace!("Socket sending: {:.100}", frame);
                    if let Err(e) = socket.send(Message::Text(frame)) {
                        log::error!("Socket send error: {}", e);
                        break;
                    }
                }
                Ok(Command::Close) => {
                    log::info!("Socket close requested");
                    let _ = socket.close(None);
                    break;
                }
                Err(TryRecvError::Disconnected) => {
                    log::info!("Socket command channel closed");
                    break;
                }
                Err(TryRecvError::Empty) => {}
            }

            match socket.read() {
                Ok(Message::Text(text)) => {
                    log::trace!("Socket received: {:.100}", text);
                    if event_tx.send(TransportEvent::Message(text)).is_err() {
                        break;
                    }
                }
                Ok(Message::Ping(data)) => {
                    let _ = socket.send(Message::Pong(data));
                }
                Ok(Message::Close(_)) => {
                    log::info!("Socket received close frame");
                    break;
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(ref e))
                    if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    log::error!("Socket read error: {}", e);
                    break;
                }
            }
        }

        log::info!("Socket thread exiting");
        let _ = event_tx.send(TransportEvent::Disconnected);
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native::{NativeTransport, parse_socket_url};
