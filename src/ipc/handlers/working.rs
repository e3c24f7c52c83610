use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = helpers::require_tutor(state, req) {
        return e;
    }
    let conn = match helpers::db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, email, fname, lname, is_working
         FROM tutors
         WHERE is_active = 1
         ORDER BY is_working DESC, lname, fname",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, i64>(0)?,
                "email": row.get::<_, Option<String>>(1)?,
                "fname": row.get::<_, Option<String>>(2)?,
                "lname": row.get::<_, Option<String>>(3)?,
                "isWorking": row.get::<_, Option<i64>>(4)?.unwrap_or(0) != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(tutors) => ok(&req.id, json!({ "tutors": tutors })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Batch working-status update from the sign-in form. The form lists all
/// active tutors, so any tutor absent from the submitted map is off shift.
fn handle_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = helpers::require_tutor(state, req) {
        return e;
    }
    let conn = match helpers::db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let working = req.params.get("working").and_then(|v| v.as_object());
    let Some(working) = working else {
        return err(&req.id, "bad_params", "missing working map", None);
    };

    let ids = {
        let mut stmt = match conn.prepare("SELECT id FROM tutors WHERE is_active = 1") {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match ids {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for id in &ids {
        let is_working = working
            .get(&id.to_string())
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if let Err(e) = tx.execute(
            "UPDATE tutors SET is_working = ? WHERE id = ?",
            (is_working as i64, id),
        ) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "updated": ids.len() }))
}

/// End-of-day reset: everyone off shift, active or not.
fn handle_deactivate_all(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = helpers::require_tutor(state, req) {
        return e;
    }
    let conn = match helpers::db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    match conn.execute("UPDATE tutors SET is_working = 0", []) {
        Ok(n) => {
            tracing::info!(count = n, "working list reset");
            ok(&req.id, json!({ "updated": n }))
        }
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "working.list" => Some(handle_list(state, req)),
        "working.set" => Some(handle_set(state, req)),
        "working.deactivateAll" => Some(handle_deactivate_all(state, req)),
        _ => None,
    }
}
