//! Inkboard headless client.
//!
//! Opens a session on a board server, follows the board over a WebSocket and
//! logs what happens on it.

pub mod app;
pub mod headless;
pub mod session;

pub use app::{App, AppConfig, AppError, Summary};
