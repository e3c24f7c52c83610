use crate::ipc::error::{db_code, err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use crate::model::{self, Status};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::json;

fn opt_text(v: Option<String>) -> Value {
    match v {
        Some(s) => Value::Text(s),
        None => Value::Null,
    }
}

fn opt_integer(v: Option<i64>) -> Value {
    match v {
        Some(n) => Value::Integer(n),
        None => Value::Null,
    }
}

/// Students open tickets anonymously; there are no student accounts.
fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match helpers::db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let student_email = helpers::opt_str(&req.params, "studentEmail");
    let section_id = helpers::opt_int(&req.params, "sectionId");
    // Required by the schema; fail before touching the database.
    if student_email.is_none() || section_id.is_none() {
        return err(
            &req.id,
            "validation_error",
            "studentEmail and sectionId are required",
            None,
        );
    }

    let result = conn.execute(
        "INSERT INTO tickets(
            student_email, student_fname, student_lname, assignment, question,
            problem_type_id, section_id, status, time_created
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params_from_iter([
            opt_text(student_email),
            opt_text(helpers::opt_str(&req.params, "studentFname")),
            opt_text(helpers::opt_str(&req.params, "studentLname")),
            opt_text(helpers::opt_str(&req.params, "assignment")),
            opt_text(helpers::opt_str(&req.params, "question")),
            opt_integer(helpers::opt_int(&req.params, "problemTypeId")),
            opt_integer(section_id),
            Value::Integer(Status::Open as i64),
            Value::Text(model::now_utc()),
        ]),
    );
    if let Err(e) = result {
        return err(&req.id, db_code(&e, "db_insert_failed"), e.to_string(), None);
    }

    let ticket_id = conn.last_insert_rowid();
    tracing::info!(ticket_id, "ticket opened");
    ok(&req.id, json!({ "ticketId": ticket_id }))
}

fn ticket_row_json(row: &rusqlite::Row) -> rusqlite::Result<(Option<i64>, serde_json::Value)> {
    let status: Option<i64> = row.get(6)?;
    let course_number: Option<String> = row.get(12)?;
    let section_number: i64 = row.get(11)?;
    let course = match &course_number {
        Some(n) => format!("{}-{:03}", n, section_number),
        None => format!("{:03}", section_number),
    };
    let value = json!({
        "id": row.get::<_, i64>(0)?,
        "studentEmail": row.get::<_, String>(1)?,
        "studentFname": row.get::<_, Option<String>>(2)?,
        "studentLname": row.get::<_, Option<String>>(3)?,
        "assignment": row.get::<_, Option<String>>(4)?,
        "question": row.get::<_, Option<String>>(5)?,
        "status": status,
        "timeCreated": row.get::<_, String>(7)?,
        "timeClosed": row.get::<_, Option<String>>(8)?,
        "tutorId": row.get::<_, Option<i64>>(9)?,
        "problemTypeId": row.get::<_, Option<i64>>(10)?,
        "course": course,
    });
    Ok((status, value))
}

/// The work queue: everything created or closed today (configured
/// timezone) plus anything still unresolved regardless of age, so old
/// open tickets never fall off the list.
fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = helpers::require_tutor(state, req) {
        return e;
    }
    let (conn, tz) = match (state.db.as_ref(), state.config.as_ref()) {
        (Some(conn), Some(cfg)) => (conn, cfg.tz),
        _ => return err(&req.id, "no_workspace", "select a workspace first", None),
    };

    let today_start = model::local_day_start_utc(tz, model::today_in(tz));
    let mut stmt = match conn.prepare(
        "SELECT t.id, t.student_email, t.student_fname, t.student_lname,
                t.assignment, t.question, t.status, t.time_created, t.time_closed,
                t.tutor_id, t.problem_type_id, s.number, c.number
         FROM tickets t
         JOIN sections s ON s.id = t.section_id
         LEFT JOIN courses c ON c.id = s.course_id
         WHERE t.time_created >= ?1
            OR t.time_closed >= ?1
            OR t.status IS NULL
            OR t.status IN (1, 2)
         ORDER BY t.time_created",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&today_start], ticket_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut open = Vec::new();
    let mut claimed = Vec::new();
    let mut closed = Vec::new();
    for (status, value) in rows {
        match Status::from_db(status) {
            Ok(None) | Ok(Some(Status::Open)) => open.push(value),
            Ok(Some(Status::Claimed)) => claimed.push(value),
            Ok(Some(Status::Closed)) => closed.push(value),
            Err(other) => {
                return err(
                    &req.id,
                    "integrity_error",
                    format!("invalid ticket status: {}", other),
                    None,
                )
            }
        }
    }

    ok(
        &req.id,
        json!({ "open": open, "claimed": claimed, "closed": closed }),
    )
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = helpers::require_tutor(state, req) {
        return e;
    }
    let conn = match helpers::db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(ticket_id) = helpers::opt_int(&req.params, "ticketId") else {
        return err(&req.id, "bad_params", "missing ticketId", None);
    };

    let row = conn
        .query_row(
            "SELECT t.id, t.student_email, t.student_fname, t.student_lname,
                    t.assignment, t.question, t.status, t.time_created, t.time_closed,
                    t.session_duration, t.was_successful,
                    t.tutor_id, t.assistant_tutor_id, t.section_id, t.problem_type_id,
                    s.number, c.number, c.name,
                    pt.description,
                    sem.year, sem.season,
                    p.fname, p.lname
             FROM tickets t
             JOIN sections s ON s.id = t.section_id
             LEFT JOIN courses c ON c.id = s.course_id
             LEFT JOIN problem_types pt ON pt.id = t.problem_type_id
             LEFT JOIN semesters sem ON sem.id = s.semester_id
             LEFT JOIN professors p ON p.id = s.professor_id
             WHERE t.id = ?",
            [ticket_id],
            |row| {
                let status: Option<i64> = row.get(6)?;
                let year: Option<i64> = row.get(19)?;
                let season: Option<i64> = row.get(20)?;
                let semester = match (year, season) {
                    (Some(y), Some(s)) => Some(model::semester_title(y, s)),
                    _ => None,
                };
                let p_fname: Option<String> = row.get(21)?;
                let p_lname: Option<String> = row.get(22)?;
                let professor = match (p_lname, p_fname) {
                    (Some(l), Some(f)) => Some(format!("{}, {}", l, f)),
                    _ => None,
                };
                Ok(json!({
                    "id": row.get::<_, i64>(0)?,
                    "studentEmail": row.get::<_, String>(1)?,
                    "studentFname": row.get::<_, Option<String>>(2)?,
                    "studentLname": row.get::<_, Option<String>>(3)?,
                    "assignment": row.get::<_, Option<String>>(4)?,
                    "question": row.get::<_, Option<String>>(5)?,
                    "status": status,
                    "statusName": match Status::from_db(status) {
                        Ok(Some(s)) => s.name(),
                        Ok(None) => "Open",
                        Err(_) => "Unknown",
                    },
                    "timeCreated": row.get::<_, String>(7)?,
                    "timeClosed": row.get::<_, Option<String>>(8)?,
                    "sessionDuration": row.get::<_, Option<i64>>(9)?,
                    "wasSuccessful": row.get::<_, Option<i64>>(10)?.map(|v| v != 0),
                    "tutorId": row.get::<_, Option<i64>>(11)?,
                    "assistantTutorId": row.get::<_, Option<i64>>(12)?,
                    "sectionId": row.get::<_, i64>(13)?,
                    "problemTypeId": row.get::<_, Option<i64>>(14)?,
                    "sectionNumber": row.get::<_, i64>(15)?,
                    "courseNumber": row.get::<_, Option<String>>(16)?,
                    "courseName": row.get::<_, Option<String>>(17)?,
                    "problemType": row.get::<_, Option<String>>(18)?,
                    "semester": semester,
                    "professor": professor,
                }))
            },
        )
        .optional();

    match row {
        Ok(Some(ticket)) => ok(&req.id, json!({ "ticket": ticket })),
        Ok(None) => err(&req.id, "not_found", "ticket not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Claim or close a ticket. Any authenticated tutor may do either; there
/// is no ownership lock and concurrent saves are last-write-wins.
fn handle_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = helpers::require_tutor(state, req) {
        return e;
    }
    let conn = match helpers::db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(ticket_id) = helpers::opt_int(&req.params, "ticketId") else {
        return err(&req.id, "bad_params", "missing ticketId", None);
    };
    let submit = req.params.get("submit").and_then(|v| v.as_str());
    let new_status = match submit {
        Some("claim") => Status::Claimed,
        Some("close") => Status::Closed,
        other => {
            return err(
                &req.id,
                "bad_params",
                format!("invalid submit type: {:?}", other),
                None,
            )
        }
    };

    let current = conn
        .query_row(
            "SELECT status, assignment, question, session_duration, was_successful,
                    tutor_id, assistant_tutor_id, section_id, problem_type_id
             FROM tickets WHERE id = ?",
            [ticket_id],
            |row| {
                let status: Option<i64> = row.get(0)?;
                let mut vals = Vec::with_capacity(8);
                for i in 1..9 {
                    vals.push(row.get::<_, Value>(i)?);
                }
                Ok((status, vals))
            },
        )
        .optional();
    let (status, current) = match current {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "ticket not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Forward-only state machine: a closed ticket can only leave Closed
    // through the explicit reopen action.
    if new_status == Status::Claimed {
        match Status::from_db(status) {
            Ok(Some(Status::Closed)) => {
                return err(
                    &req.id,
                    "validation_error",
                    "cannot claim a closed ticket; reopen it instead",
                    None,
                )
            }
            Ok(_) => {}
            Err(other) => {
                return err(
                    &req.id,
                    "integrity_error",
                    format!("invalid ticket status: {}", other),
                    None,
                )
            }
        }
    }

    // Coerce submitted fields; keys absent from the request are left
    // untouched, present keys are written only when the value changed.
    let columns: [(&str, Option<Value>); 8] = [
        (
            "assignment",
            req.params
                .get("assignment")
                .map(|_| opt_text(helpers::opt_str(&req.params, "assignment"))),
        ),
        (
            "question",
            req.params
                .get("question")
                .map(|_| opt_text(helpers::opt_str(&req.params, "question"))),
        ),
        (
            "session_duration",
            req.params
                .get("sessionDuration")
                .map(|_| opt_integer(helpers::opt_int(&req.params, "sessionDuration"))),
        ),
        (
            "was_successful",
            req.params
                .get("wasSuccessful")
                .map(|_| Value::Integer(helpers::get_bool(&req.params, "wasSuccessful") as i64)),
        ),
        (
            "tutor_id",
            req.params
                .get("tutorId")
                .map(|_| opt_integer(helpers::opt_int(&req.params, "tutorId"))),
        ),
        (
            "assistant_tutor_id",
            req.params
                .get("assistantTutorId")
                .map(|_| opt_integer(helpers::opt_int(&req.params, "assistantTutorId"))),
        ),
        (
            "section_id",
            req.params
                .get("sectionId")
                .map(|_| opt_integer(helpers::opt_int(&req.params, "sectionId"))),
        ),
        (
            "problem_type_id",
            req.params
                .get("problemTypeId")
                .map(|_| opt_integer(helpers::opt_int(&req.params, "problemTypeId"))),
        ),
    ];

    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    for (i, (col, submitted)) in columns.iter().enumerate() {
        if let Some(value) = submitted {
            if *value != current[i] {
                sets.push(format!("{} = ?", col));
                values.push(value.clone());
            }
        }
    }

    sets.push("status = ?".to_string());
    values.push(Value::Integer(new_status as i64));
    if new_status == Status::Closed {
        sets.push("time_closed = ?".to_string());
        values.push(Value::Text(model::now_utc()));
    }
    values.push(Value::Integer(ticket_id));

    let sql = format!("UPDATE tickets SET {} WHERE id = ?", sets.join(", "));
    if let Err(e) = conn.execute(&sql, params_from_iter(values)) {
        return err(&req.id, db_code(&e, "db_update_failed"), e.to_string(), None);
    }
    tracing::info!(ticket_id, status = new_status.name(), "ticket saved");

    ok(&req.id, json!({ "ticketId": ticket_id, "status": new_status as i64 }))
}

/// Closed -> Claimed only. time_closed is deliberately left in place; the
/// engine never clears timestamps on reopen.
fn handle_reopen(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = helpers::require_tutor(state, req) {
        return e;
    }
    let conn = match helpers::db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(ticket_id) = helpers::opt_int(&req.params, "ticketId") else {
        return err(&req.id, "bad_params", "missing ticketId", None);
    };

    let status: Option<Option<i64>> = match conn
        .query_row("SELECT status FROM tickets WHERE id = ?", [ticket_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(status) = status else {
        return err(&req.id, "not_found", "ticket not found", None);
    };
    if Status::from_db(status) != Ok(Some(Status::Closed)) {
        return err(
            &req.id,
            "validation_error",
            "only closed tickets can be reopened",
            None,
        );
    }

    if let Err(e) = conn.execute(
        "UPDATE tickets SET status = ? WHERE id = ?",
        (Status::Claimed as i64, ticket_id),
    ) {
        return err(&req.id, db_code(&e, "db_update_failed"), e.to_string(), None);
    }
    tracing::info!(ticket_id, "ticket reopened");

    ok(&req.id, json!({ "ticketId": ticket_id, "status": Status::Claimed as i64 }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = helpers::require_superuser(state, req) {
        return e;
    }
    let conn = match helpers::db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(ticket_id) = helpers::opt_int(&req.params, "ticketId") else {
        return err(&req.id, "bad_params", "missing ticketId", None);
    };

    let deleted = match conn.execute("DELETE FROM tickets WHERE id = ?", [ticket_id]) {
        Ok(n) => n,
        Err(e) => return err(&req.id, db_code(&e, "db_delete_failed"), e.to_string(), None),
    };
    if deleted == 0 {
        return err(&req.id, "not_found", "ticket not found", None);
    }
    tracing::info!(ticket_id, "ticket deleted");

    ok(&req.id, json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tickets.open" => Some(handle_open(state, req)),
        "tickets.list" => Some(handle_list(state, req)),
        "tickets.get" => Some(handle_get(state, req)),
        "tickets.save" => Some(handle_save(state, req)),
        "tickets.reopen" => Some(handle_reopen(state, req)),
        "tickets.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
