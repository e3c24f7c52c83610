use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;

use crate::auth::{self, Tutor};
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::model::DATE_FMT;

// ---- field coercion -------------------------------------------------------
//
// Form values arrive as loosely typed JSON. Each field gets one declared
// coercion; values that fail it coerce to None rather than erroring, and
// required-field enforcement happens at commit time.

pub fn opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

pub fn opt_int(params: &serde_json::Value, key: &str) -> Option<i64> {
    match params.get(key) {
        Some(v) if v.is_i64() => v.as_i64(),
        Some(v) => v.as_str().and_then(|s| s.trim().parse::<i64>().ok()),
        None => None,
    }
}

pub fn get_bool(params: &serde_json::Value, key: &str) -> bool {
    match params.get(key) {
        Some(v) if v.is_boolean() => v.as_bool().unwrap_or(false),
        Some(v) if v.is_i64() => v.as_i64().unwrap_or(0) != 0,
        // Checkbox semantics: any non-empty string is true.
        Some(v) => v.as_str().map(|s| !s.is_empty()).unwrap_or(false),
        None => false,
    }
}

pub fn opt_date(params: &serde_json::Value, key: &str) -> Option<NaiveDate> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .and_then(|s| NaiveDate::parse_from_str(s.trim(), DATE_FMT).ok())
}

// ---- pagination -----------------------------------------------------------

pub fn page_number(params: &serde_json::Value) -> i64 {
    opt_int(params, "page").filter(|p| *p >= 1).unwrap_or(1)
}

/// 1-based page count: max(1, ceil(num_items / limit)).
pub fn max_page(num_items: i64, limit: i64) -> i64 {
    let pages = (num_items - 1).div_euclid(limit) + 1;
    pages.max(1)
}

// ---- authorization gate ---------------------------------------------------

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Resolves the request's session token to a tutor, clearing stale
/// sessions as a side effect.
pub fn resolve_user(
    state: &mut AppState,
    req: &Request,
) -> Result<auth::AuthOutcome, serde_json::Value> {
    let Some(conn) = state.db.as_ref() else {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let token = req.params.get("session").and_then(|v| v.as_str());
    auth::authenticate(&mut state.sessions, conn, token)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

fn forbidden(req: &Request, cleared: bool) -> serde_json::Value {
    let details = if cleared {
        Some(json!({ "clearSession": true }))
    } else {
        None
    };
    err(&req.id, "forbidden", "you don't have access to this page", details)
}

pub fn require_tutor(state: &mut AppState, req: &Request) -> Result<Tutor, serde_json::Value> {
    let outcome = resolve_user(state, req)?;
    outcome.tutor.ok_or_else(|| forbidden(req, outcome.cleared))
}

pub fn require_superuser(state: &mut AppState, req: &Request) -> Result<Tutor, serde_json::Value> {
    let tutor = require_tutor(state, req)?;
    if !tutor.is_superuser {
        return Err(forbidden(req, false));
    }
    Ok(tutor)
}

/// A tutor may act on their own record; anything else needs superuser.
pub fn require_self_or_superuser(
    state: &mut AppState,
    req: &Request,
    target_id: Option<i64>,
) -> Result<Tutor, serde_json::Value> {
    let tutor = require_tutor(state, req)?;
    if tutor.is_superuser || Some(tutor.id) == target_id {
        Ok(tutor)
    } else {
        Err(forbidden(req, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coercions_follow_form_semantics() {
        let p = json!({
            "a": "  hello ",
            "b": "",
            "c": "42",
            "d": 7,
            "e": "not a number",
            "f": true,
            "g": "on",
            "h": "2024-01-31",
            "i": "01/31/2024",
        });
        assert_eq!(opt_str(&p, "a"), Some("hello".to_string()));
        assert_eq!(opt_str(&p, "b"), None);
        assert_eq!(opt_str(&p, "missing"), None);
        assert_eq!(opt_int(&p, "c"), Some(42));
        assert_eq!(opt_int(&p, "d"), Some(7));
        assert_eq!(opt_int(&p, "e"), None);
        assert!(get_bool(&p, "f"));
        assert!(get_bool(&p, "g"));
        assert!(!get_bool(&p, "b"));
        assert!(!get_bool(&p, "missing"));
        assert_eq!(
            opt_date(&p, "h"),
            NaiveDate::from_ymd_opt(2024, 1, 31)
        );
        assert_eq!(opt_date(&p, "i"), None);
    }

    #[test]
    fn max_page_formula() {
        assert_eq!(max_page(0, 100), 1);
        assert_eq!(max_page(1, 100), 1);
        assert_eq!(max_page(100, 100), 1);
        assert_eq!(max_page(101, 100), 2);
        assert_eq!(max_page(250, 100), 3);
    }

    #[test]
    fn page_number_defaults_to_one() {
        assert_eq!(page_number(&json!({})), 1);
        assert_eq!(page_number(&json!({ "page": 3 })), 3);
        assert_eq!(page_number(&json!({ "page": 0 })), 1);
        assert_eq!(page_number(&json!({ "page": -2 })), 1);
        assert_eq!(page_number(&json!({ "page": "junk" })), 1);
    }
}
