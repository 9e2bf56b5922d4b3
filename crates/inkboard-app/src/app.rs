//! Application driver: session, socket and board, polled from one loop.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use futures::executor::LocalPool;
use futures::task::{LocalSpawnExt, SpawnError};
use inkboard_core::{
    Board, BoardError, BootstrapReport, ClientInfo, ItemId, LocalSelectionState, MethodCall, NativeTransport,
    RawClient, ServerError, TransportError, TransportEvent,
};
use thiserror::Error;
use url::Url;

use crate::{headless, session};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid server URL: {0}")]
    ServerUrl(#[from] url::ParseError),
    #[error("server URL must be http or https, got {0}")]
    Scheme(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server refused the session: {0}")]
    Refused(#[source] ServerError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error("could not schedule board task: {0}")]
    Spawn(#[from] SpawnError),
    #[error("connection closed before the board was loaded")]
    ConnectionLost,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: String,
    pub board: String,
    pub name: String,
    /// Stop after this long. Runs until the connection closes when unset.
    pub duration: Option<Duration>,
    pub poll_interval: Duration,
    /// Items to select once the board is loaded.
    pub select: Vec<ItemId>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: "http://127.0.0.1:8080".to_string(),
            board: "default".to_string(),
            name: "inkboard".to_string(),
            duration: None,
            poll_interval: Duration::from_millis(20),
            select: Vec::new(),
        }
    }
}

/// What the client saw before it exited.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub board: String,
    pub report: BootstrapReport,
    pub items: usize,
    pub clients: usize,
    pub selected: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "board {}", self.board)?;
        writeln!(f, "  items:    {} ({} failed to load)", self.items, self.report.failed.len())?;
        writeln!(f, "  clients:  {}", self.clients)?;
        write!(f, "  selected: {}", self.selected)
    }
}

type Bootstrap = Rc<RefCell<Option<Result<BootstrapReport, BoardError>>>>;

pub struct App {
    config: AppConfig,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn run(self) -> Result<Summary, AppError> {
        let config = self.config;
        let server = Url::parse(&config.server)?;
        let info = ClientInfo::new(config.name.clone());

        let http = reqwest::blocking::Client::new();
        let connection = session::open_session(&http, &server, &config.board, &info)?;
        log::info!("Joined {} as {} (session {})", config.board, connection.client_id, connection.session_id);

        let mut transport = NativeTransport::new();
        transport.connect(session::socket_url(&server, connection.session_id)?.as_str())?;

        let client = RawClient::new();
        let board = Board::new(client.clone(), connection.client_id, info);
        headless::bind(board.capabilities());
        let _events = board.item_events().subscribe(|event| log::debug!("Item event: {:?}", event));
        let _selection = board.selection_state().watch(|state| match state {
            LocalSelectionState::None => log::info!("Nothing selected"),
            LocalSelectionState::One { id, item } => log::info!("Selected {} ({})", id, item.item_type()),
            LocalSelectionState::Multiple(ids) => log::info!("Selected {} items", ids.len()),
        });

        let mut pool = LocalPool::new();
        let spawner = pool.spawner();
        let bootstrap: Bootstrap = Rc::new(RefCell::new(None));
        {
            let board = board.clone();
            let slot = bootstrap.clone();
            spawner.spawn_local(async move {
                let result = board.bootstrap().await;
                *slot.borrow_mut() = Some(result);
            })?;
        }

        let deadline = config.duration.map(|d| Instant::now() + d);
        let mut report = None;
        let mut closed = false;
        loop {
            pool.run_until_stalled();

            if report.is_none() {
                match bootstrap.borrow_mut().take() {
                    Some(Ok(loaded)) => {
                        report = Some(loaded);
                        if !config.select.is_empty() {
                            match board.add_own_selection(&config.select) {
                                Some(call) => spawner.spawn_local(log_ack(call))?,
                                None => log::warn!("None of {:?} could be selected", config.select),
                            }
                        }
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => {}
                }
            }

            for frame in client.take_outgoing() {
                transport.send(frame)?;
            }
            for event in transport.poll_events() {
                match event {
                    TransportEvent::Message(text) => {
                        if let Err(e) = client.handle_message(&text) {
                            log::warn!("Dropping frame: {}", e);
                        }
                    }
                    TransportEvent::Connected => log::info!("Connected"),
                    TransportEvent::Disconnected => closed = true,
                    TransportEvent::Error { message } => {
                        log::error!("Socket error: {}", message);
                        closed = true;
                    }
                }
            }

            if closed || deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
            thread::sleep(config.poll_interval);
        }

        let report = report.ok_or(AppError::ConnectionLost)?;
        let selected = board.with_selection(|s| s.own_entry().items.len());
        if !closed {
            if let Some(call) = board.cancel_selection() {
                log::info!("Releasing selection ({})", call.name());
                for frame in client.take_outgoing() {
                    transport.send(frame)?;
                }
            }
        }
        transport.disconnect();

        Ok(Summary {
            board: config.board,
            report,
            items: board.with_table(|t| t.len()),
            clients: board.with_selection(|s| s.clients().count()),
            selected,
        })
    }
}

async fn log_ack(call: MethodCall<serde_json::Value>) {
    let name = call.name();
    match call.await {
        Ok(ack) => log::debug!("{} acknowledged: {}", name, ack),
        Err(e) => log::warn!("{} failed: {}", name, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkboard_core::ErrorCode;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server, "http://127.0.0.1:8080");
        assert!(config.duration.is_none());
        assert!(config.select.is_empty());
    }

    #[test]
    fn test_summary_display() {
        let summary = Summary {
            board: "demo".into(),
            report: BootstrapReport { inserted: 3, failed: vec![ItemId(4)], undecodable: 0, clients: 1 },
            items: 3,
            clients: 1,
            selected: 0,
        };
        let text = summary.to_string();
        assert!(text.starts_with("board demo"));
        assert!(text.contains("3 (1 failed to load)"));
    }

    #[test]
    fn test_refused_session_message() {
        let err = AppError::Refused(ServerError { code: ErrorCode::NotFound, msg: Some("no board".into()) });
        assert_eq!(err.to_string(), "server refused the session: server error NotFound: no board");
    }
}
