use crate::auth;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

/// Login consumes the email the OAuth callback resolved; the token
/// exchange itself happens in the frontend. The daemon only decides
/// whether that email names a usable tutor account.
fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(email) = helpers::opt_str(&req.params, "email") else {
        return err(&req.id, "bad_params", "missing email", None);
    };

    let tutor = match auth::tutor_by_email(conn, &email) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let tutor = match tutor {
        Some(t) if t.is_active => t,
        Some(_) => {
            tracing::info!(email = %email, "login rejected: tutor is not active");
            return err(
                &req.id,
                "unknown_identity",
                format!("user is not active: {}", email),
                None,
            );
        }
        None => {
            // First login into an empty workspace provisions the initial
            // administrator; every later unknown email is rejected.
            let count: i64 = match conn.query_row("SELECT COUNT(*) FROM tutors", [], |r| r.get(0))
            {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            if count != 0 {
                tracing::info!(email = %email, "login rejected: tutor does not exist");
                return err(
                    &req.id,
                    "unknown_identity",
                    format!("user does not exist: {}", email),
                    None,
                );
            }
            if let Err(e) = conn.execute(
                "INSERT INTO tutors(email, is_active, is_superuser, is_working)
                 VALUES(?, 1, 1, 0)",
                [&email],
            ) {
                return err(&req.id, "db_insert_failed", e.to_string(), None);
            }
            tracing::info!(email = %email, "bootstrapped first tutor as superuser");
            match auth::tutor_by_email(conn, &email) {
                Ok(Some(t)) => t,
                Ok(None) => return err(&req.id, "not_found", "tutor not found", None),
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
        }
    };

    let token = Uuid::new_v4().to_string();
    state.sessions.insert(token.clone(), email.clone());
    tracing::info!(email = %email, "login ok");

    ok(&req.id, json!({ "session": token, "tutor": tutor.to_json() }))
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Some(token) = req.params.get("session").and_then(|v| v.as_str()) {
        state.sessions.remove(token);
    }
    ok(&req.id, json!({ "clearSession": true }))
}

fn handle_whoami(state: &mut AppState, req: &Request) -> serde_json::Value {
    let outcome = match helpers::resolve_user(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut result = json!({ "tutor": outcome.tutor.map(|t| t.to_json()) });
    if outcome.cleared {
        result["clearSession"] = json!(true);
    }
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "auth.whoami" => Some(handle_whoami(state, req)),
        _ => None,
    }
}
