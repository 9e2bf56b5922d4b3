//! Session opening over HTTP.

use inkboard_core::{ClientInfo, ConnectionInfo, ServerResult};
use url::Url;

use crate::app::AppError;

/// Join `board` as `info`, returning the ids the server assigned.
pub fn open_session(
    http: &reqwest::blocking::Client,
    server: &Url,
    board: &str,
    info: &ClientInfo,
) -> Result<ConnectionInfo, AppError> {
    let url = server.join(&format!("api/board/{board}"))?;
    log::debug!("Opening session at {}", url);
    let result: ServerResult<ConnectionInfo> = http.post(url).json(info).send()?.error_for_status()?.json()?;
    result.into_result().map_err(AppError::Refused)
}

/// The WebSocket endpoint of a session, on the same host as `server`.
pub fn socket_url(server: &Url, session_id: u32) -> Result<Url, AppError> {
    let mut url = server.join(&format!("/api/session/{session_id}/"))?;
    let scheme = match server.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(AppError::Scheme(other.to_string())),
    };
    url.set_scheme(scheme).map_err(|()| AppError::Scheme(scheme.to_string()))?;
    Ok(url)
}
