use std::collections::HashSet;

use crate::auth;
use crate::ipc::error::{db_code, err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde_json::json;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = helpers::require_superuser(state, req) {
        return e;
    }
    let (conn, page_length) = match (state.db.as_ref(), state.config.as_ref()) {
        (Some(conn), Some(cfg)) => (conn, cfg.page_length),
        _ => return err(&req.id, "no_workspace", "select a workspace first", None),
    };

    let page = helpers::page_number(&req.params);
    let offset = (page - 1) * page_length;

    let num_items: i64 = match conn.query_row("SELECT COUNT(*) FROM tutors", [], |r| r.get(0)) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT id, email, fname, lname, is_active, is_superuser, is_working
         FROM tutors
         ORDER BY is_active DESC, is_working DESC, is_superuser DESC, lname, fname
         LIMIT ? OFFSET ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let items = stmt
        .query_map((page_length, offset), |row| {
            Ok(json!({
                "id": row.get::<_, i64>(0)?,
                "email": row.get::<_, Option<String>>(1)?,
                "fname": row.get::<_, Option<String>>(2)?,
                "lname": row.get::<_, Option<String>>(3)?,
                "isActive": row.get::<_, Option<i64>>(4)?.unwrap_or(0) != 0,
                "isSuperuser": row.get::<_, Option<i64>>(5)?.unwrap_or(0) != 0,
                "isWorking": row.get::<_, Option<i64>>(6)?.unwrap_or(0) != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let items = match items {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "items": items,
            "numItems": num_items,
            "page": page,
            "maxPage": helpers::max_page(num_items, page_length),
        }),
    )
}

fn assigned_course_ids(conn: &Connection, tutor_id: i64) -> rusqlite::Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT course_id FROM can_tutor WHERE tutor_id = ? ORDER BY course_id")?;
    let ids = stmt
        .query_map([tutor_id], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(id) = helpers::opt_int(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };
    if let Err(e) = helpers::require_self_or_superuser(state, req, Some(id)) {
        return e;
    }
    let conn = match helpers::db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let tutor = match auth::tutor_by_id(conn, id) {
        Ok(Some(t)) => t,
        Ok(None) => return err(&req.id, "not_found", "tutor not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let course_ids = match assigned_course_ids(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({ "tutor": tutor.to_json(), "courseIds": course_ids }),
    )
}

/// Full-replace reconciliation of the can_tutor relation: assignments
/// missing from the new set are added, assignments outside it removed.
/// Calling twice with the same set is a no-op the second time.
fn set_courses(
    conn: &Connection,
    tutor_id: i64,
    course_ids: &HashSet<i64>,
) -> rusqlite::Result<()> {
    let current: HashSet<i64> = assigned_course_ids(conn, tutor_id)?.into_iter().collect();

    let tx = conn.unchecked_transaction()?;
    for id in course_ids.difference(&current) {
        tx.execute(
            "INSERT INTO can_tutor(tutor_id, course_id) VALUES(?, ?)",
            (tutor_id, id),
        )?;
    }
    for id in current.difference(course_ids) {
        tx.execute(
            "DELETE FROM can_tutor WHERE tutor_id = ? AND course_id = ?",
            (tutor_id, id),
        )?;
    }
    tx.commit()
}

fn param_course_ids(params: &serde_json::Value) -> Option<HashSet<i64>> {
    params.get("courseIds").and_then(|v| v.as_array()).map(|a| {
        a.iter()
            .filter_map(|v| v.as_i64())
            .collect::<HashSet<i64>>()
    })
}

/// Tutors may edit their own name, shift flag, and course assignments;
/// email and the active/superuser flags only change under a superuser,
/// and self-submitted values for them are ignored rather than rejected.
fn handle_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let target_id = helpers::opt_int(&req.params, "id");
    let actor = match helpers::require_self_or_superuser(state, req, target_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let conn = match helpers::db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut columns: Vec<(&str, Value)> = Vec::new();
    if req.params.get("fname").is_some() {
        columns.push((
            "fname",
            match helpers::opt_str(&req.params, "fname") {
                Some(s) => Value::Text(s),
                None => Value::Null,
            },
        ));
    }
    if req.params.get("lname").is_some() {
        columns.push((
            "lname",
            match helpers::opt_str(&req.params, "lname") {
                Some(s) => Value::Text(s),
                None => Value::Null,
            },
        ));
    }
    if req.params.get("isWorking").is_some() {
        columns.push((
            "is_working",
            Value::Integer(helpers::get_bool(&req.params, "isWorking") as i64),
        ));
    }
    if actor.is_superuser {
        if req.params.get("email").is_some() {
            columns.push((
                "email",
                match helpers::opt_str(&req.params, "email") {
                    Some(s) => Value::Text(s),
                    None => Value::Null,
                },
            ));
        }
        if req.params.get("isActive").is_some() {
            columns.push((
                "is_active",
                Value::Integer(helpers::get_bool(&req.params, "isActive") as i64),
            ));
        }
        if req.params.get("isSuperuser").is_some() {
            columns.push((
                "is_superuser",
                Value::Integer(helpers::get_bool(&req.params, "isSuperuser") as i64),
            ));
        }
    }

    let tutor_id = match target_id {
        Some(id) => {
            if auth::tutor_by_id(conn, id).ok().flatten().is_none() {
                return err(&req.id, "not_found", "tutor not found", None);
            }
            if !columns.is_empty() {
                let sets: Vec<String> =
                    columns.iter().map(|(c, _)| format!("{} = ?", c)).collect();
                let mut values: Vec<Value> =
                    columns.into_iter().map(|(_, v)| v).collect();
                values.push(Value::Integer(id));
                let sql = format!("UPDATE tutors SET {} WHERE id = ?", sets.join(", "));
                if let Err(e) = conn.execute(&sql, params_from_iter(values)) {
                    return err(&req.id, db_code(&e, "db_update_failed"), e.to_string(), None);
                }
            }
            id
        }
        None => {
            // Creating new tutor accounts is an administrator action.
            if !actor.is_superuser {
                return err(&req.id, "forbidden", "you don't have access to this page", None);
            }
            if helpers::opt_str(&req.params, "email").is_none() {
                return err(&req.id, "validation_error", "email is required", None);
            }
            let cols: Vec<&str> = columns.iter().map(|(c, _)| *c).collect();
            let placeholders = vec!["?"; cols.len()].join(", ");
            let values: Vec<Value> = columns.into_iter().map(|(_, v)| v).collect();
            let sql = format!(
                "INSERT INTO tutors({}) VALUES({})",
                cols.join(", "),
                placeholders
            );
            if let Err(e) = conn.execute(&sql, params_from_iter(values)) {
                return err(&req.id, db_code(&e, "db_insert_failed"), e.to_string(), None);
            }
            let id = conn.last_insert_rowid();
            tracing::info!(tutor_id = id, "tutor created");
            id
        }
    };

    if let Some(course_ids) = param_course_ids(&req.params) {
        if let Err(e) = set_courses(conn, tutor_id, &course_ids) {
            return err(&req.id, db_code(&e, "db_update_failed"), e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "id": tutor_id }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = helpers::require_superuser(state, req) {
        return e;
    }
    let conn = match helpers::db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(id) = helpers::opt_int(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    // Tickets reference tutors with NO ACTION, so a tutor with history
    // cannot be deleted; deactivate them instead. can_tutor rows cascade.
    let deleted = match conn.execute("DELETE FROM tutors WHERE id = ?", [id]) {
        Ok(n) => n,
        Err(e) => return err(&req.id, db_code(&e, "db_delete_failed"), e.to_string(), None),
    };
    if deleted == 0 {
        return err(&req.id, "not_found", "tutor not found", None);
    }
    tracing::info!(tutor_id = id, "tutor deleted");
    ok(&req.id, json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tutors.list" => Some(handle_list(state, req)),
        "tutors.get" => Some(handle_get(state, req)),
        "tutors.save" => Some(handle_save(state, req)),
        "tutors.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
