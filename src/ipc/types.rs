use std::collections::HashMap;
use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::Config;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: Option<Config>,
    /// Opaque session token -> tutor email. The cookie jar itself lives in
    /// the frontend; this map is the daemon-side source of truth for which
    /// tokens are still valid.
    pub sessions: HashMap<String, String>,
}
