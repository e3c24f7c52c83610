use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model;
use chrono::Days;
use rusqlite::Connection;
use serde_json::json;

fn conn_and_tz<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<(&'a Connection, chrono_tz::Tz), serde_json::Value> {
    match (state.db.as_ref(), state.config.as_ref()) {
        (Some(conn), Some(cfg)) => Ok((conn, cfg.tz)),
        _ => Err(err(&req.id, "no_workspace", "select a workspace first", None)),
    }
}

/// Announcements whose display window covers today. Message text is
/// returned raw; markdown rendering and sanitization are the frontend's.
fn handle_messages(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, tz) = match conn_and_tz(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let today = model::today_in(tz);
    // The start bound is deliberately loose by a day so a message posted
    // for "tomorrow" is already visible during the evening shift.
    let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);

    let mut stmt = match conn.prepare(
        "SELECT id, message, start_date, end_date
         FROM messages
         WHERE (start_date IS NULL OR start_date <= ?)
           AND (end_date IS NULL OR end_date >= ?)
         ORDER BY end_date DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map(
            (
                tomorrow.format(model::DATE_FMT).to_string(),
                today.format(model::DATE_FMT).to_string(),
            ),
            |row| {
                Ok(json!({
                    "id": row.get::<_, i64>(0)?,
                    "message": row.get::<_, Option<String>>(1)?,
                    "startDate": row.get::<_, Option<String>>(2)?,
                    "endDate": row.get::<_, Option<String>>(3)?,
                }))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(messages) => ok(&req.id, json!({ "messages": messages })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn unresolved_ticket_count(conn: &Connection, course_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*)
         FROM tickets t
         JOIN sections s ON s.id = t.section_id
         WHERE s.course_id = ?
           AND (t.status IS NULL OR t.status IN (1, 2))",
        [course_id],
        |r| r.get(0),
    )
}

fn working_tutor_count(conn: &Connection, course_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*)
         FROM tutors tu
         JOIN can_tutor ct ON ct.tutor_id = tu.id
         WHERE ct.course_id = ?
           AND tu.is_active = 1
           AND tu.is_working = 1",
        [course_id],
        |r| r.get(0),
    )
}

/// The status dashboard table: one row per displayed course, an Other
/// bucket for tickets under courses that are not displayed, and a Total
/// row across everything.
fn handle_courses(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _tz) = match conn_and_tz(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, number, name FROM courses WHERE on_display = 1 ORDER BY number",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let displayed = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let number: String = row.get(1)?;
            let name: Option<String> = row.get(2)?;
            Ok((id, number, name))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let displayed = match displayed {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut rows = Vec::with_capacity(displayed.len() + 2);
    let mut ticket_total: i64 = 0;
    for (id, number, name) in &displayed {
        let tickets = match unresolved_ticket_count(conn, *id) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let tutors = match working_tutor_count(conn, *id) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        ticket_total += tickets;
        let display_name = match name {
            Some(n) => format!("{}: {}", number, n),
            None => number.clone(),
        };
        rows.push(json!({
            "name": display_name,
            "currentTickets": tickets,
            "currentTutors": tutors,
        }));
    }

    let displayed_ids: Vec<String> = displayed.iter().map(|(id, _, _)| id.to_string()).collect();
    let other_sql = format!(
        "SELECT COUNT(*)
         FROM tickets t
         JOIN sections s ON s.id = t.section_id
         WHERE (t.status IS NULL OR t.status IN (1, 2))
           AND s.course_id NOT IN ({})",
        if displayed_ids.is_empty() {
            "-1".to_string()
        } else {
            displayed_ids.join(", ")
        }
    );
    let other_tickets: i64 = match conn.query_row(&other_sql, [], |r| r.get(0)) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ticket_total += other_tickets;

    let total_tutors: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM tutors WHERE is_active = 1 AND is_working = 1",
        [],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    rows.push(json!({
        "name": "Other",
        "currentTickets": other_tickets,
        "currentTutors": "-",
    }));
    rows.push(json!({
        "name": "Total",
        "currentTickets": ticket_total,
        "currentTutors": total_tutors,
    }));

    ok(&req.id, json!({ "courses": rows }))
}

/// Courses and sections for semesters whose window covers today, grouped
/// per course for the open-ticket form's section picker.
fn handle_open_courses(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, tz) = match conn_and_tz(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let today = model::today_in(tz);
    // A semester starting tomorrow already accepts tickets.
    let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);

    let mut stmt = match conn.prepare(
        "SELECT c.id, c.number, c.name, s.id, s.number, s.time
         FROM courses c
         JOIN sections s ON s.course_id = c.id
         JOIN semesters sem ON sem.id = s.semester_id
         WHERE sem.start_date <= ? AND sem.end_date >= ?
         ORDER BY c.number, s.number",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map(
            (
                tomorrow.format(model::DATE_FMT).to_string(),
                today.format(model::DATE_FMT).to_string(),
            ),
            |row| {
                let course_id: i64 = row.get(0)?;
                let number: String = row.get(1)?;
                let name: Option<String> = row.get(2)?;
                let section_id: i64 = row.get(3)?;
                let section_number: i64 = row.get(4)?;
                let time: Option<String> = row.get(5)?;
                Ok((course_id, number, name, section_id, section_number, time))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut courses: Vec<serde_json::Value> = Vec::new();
    for (course_id, number, name, section_id, section_number, time) in rows {
        let section = json!({
            "id": section_id,
            "number": section_number,
            "time": time,
        });
        match courses.last_mut() {
            Some(last) if last["id"] == json!(course_id) => {
                if let Some(sections) = last["sections"].as_array_mut() {
                    sections.push(section);
                }
            }
            _ => courses.push(json!({
                "id": course_id,
                "number": number,
                "name": name,
                "sections": [section],
            })),
        }
    }

    ok(&req.id, json!({ "courses": courses }))
}

fn handle_problem_types(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _tz) = match conn_and_tz(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn
        .prepare("SELECT id, description FROM problem_types ORDER BY description")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, i64>(0)?,
                "description": row.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(problems) => ok(&req.id, json!({ "problemTypes": problems })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "status.messages" => Some(handle_messages(state, req)),
        "status.courses" => Some(handle_courses(state, req)),
        "status.openCourses" => Some(handle_open_courses(state, req)),
        "status.problemTypes" => Some(handle_problem_types(state, req)),
        _ => None,
    }
}
