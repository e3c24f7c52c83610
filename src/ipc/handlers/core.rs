use crate::config;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    let conn = match db::open_db(&path) {
        Ok(conn) => conn,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    };

    // Config is a one-shot snapshot: defaults are persisted on first open
    // and later edits only apply on the next open.
    let cfg = match config::load(&conn) {
        Ok(cfg) => cfg,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    };
    tracing::info!(
        path = %path.to_string_lossy(),
        tz = %cfg.tz_name,
        page_length = cfg.page_length,
        "workspace opened"
    );

    // The frontend owns cookies, the OAuth exchange, and CAPTCHA; it gets
    // the settings for those back when the workspace opens.
    let result = json!({
        "workspacePath": path.to_string_lossy(),
        "tzName": cfg.tz_name,
        "pageLength": cfg.page_length,
        "sessionLifetimeMinutes": cfg.session_lifetime_minutes,
        "secretKey": cfg.secret_key,
        "oauthClientId": cfg.oauth_client_id,
        "oauthClientSecret": cfg.oauth_client_secret,
        "captchaKey": cfg.captcha_key,
        "captchaSecret": cfg.captcha_secret,
    });
    state.workspace = Some(path);
    state.db = Some(conn);
    state.config = Some(cfg);
    state.sessions.clear();

    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
