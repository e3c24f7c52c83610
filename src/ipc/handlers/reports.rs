use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use crate::model::{self, Status};
use chrono::{Days, NaiveDate};
use chrono_tz::Tz;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde_json::json;

#[derive(Debug, Clone, Default)]
struct TicketFilters {
    min_date: Option<NaiveDate>,
    max_date: Option<NaiveDate>,
    semester_id: Option<i64>,
    course_id: Option<i64>,
}

fn parse_filters(params: &serde_json::Value) -> TicketFilters {
    TicketFilters {
        min_date: helpers::opt_date(params, "minDate"),
        max_date: helpers::opt_date(params, "maxDate"),
        semester_id: helpers::opt_int(params, "semesterId"),
        course_id: helpers::opt_int(params, "courseId"),
    }
}

/// Builds the shared WHERE tail for report queries. Filters are optional
/// and AND-combined; date bounds are interpreted in the display timezone,
/// minDate from local midnight and maxDate through the whole day
/// (strictly before the following midnight).
fn filter_clause(filters: &TicketFilters, tz: Tz) -> (String, Vec<Value>) {
    let mut sql = String::new();
    let mut params: Vec<Value> = Vec::new();

    if let Some(min) = filters.min_date {
        sql.push_str(" AND t.time_created >= ?");
        params.push(Value::Text(model::local_day_start_utc(tz, min)));
    }
    if let Some(max) = filters.max_date {
        let next = max.checked_add_days(Days::new(1)).unwrap_or(max);
        sql.push_str(" AND t.time_created < ?");
        params.push(Value::Text(model::local_day_start_utc(tz, next)));
    }
    if let Some(semester_id) = filters.semester_id {
        sql.push_str(" AND s.semester_id = ?");
        params.push(Value::Integer(semester_id));
    }
    if let Some(course_id) = filters.course_id {
        sql.push_str(" AND s.course_id = ?");
        params.push(Value::Integer(course_id));
    }

    (sql, params)
}

fn count_filtered(conn: &Connection, filters: &TicketFilters, tz: Tz) -> rusqlite::Result<i64> {
    let (clause, params) = filter_clause(filters, tz);
    let sql = format!(
        "SELECT COUNT(*)
         FROM tickets t
         JOIN sections s ON s.id = t.section_id
         WHERE 1=1{}",
        clause
    );
    conn.query_row(&sql, params_from_iter(params), |r| r.get(0))
}

fn filtered_page(
    conn: &Connection,
    filters: &TicketFilters,
    tz: Tz,
    limit: i64,
    offset: i64,
) -> rusqlite::Result<Vec<serde_json::Value>> {
    let (clause, mut params) = filter_clause(filters, tz);
    let sql = format!(
        "SELECT t.id, t.student_email, t.student_fname, t.student_lname,
                t.assignment, t.status, t.time_created, t.time_closed,
                s.number, c.number
         FROM tickets t
         JOIN sections s ON s.id = t.section_id
         LEFT JOIN courses c ON c.id = s.course_id
         WHERE 1=1{}
         ORDER BY t.time_created DESC
         LIMIT ? OFFSET ?",
        clause
    );
    params.push(Value::Integer(limit));
    params.push(Value::Integer(offset));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params), |row| {
            let status: Option<i64> = row.get(5)?;
            Ok(json!({
                "id": row.get::<_, i64>(0)?,
                "studentEmail": row.get::<_, String>(1)?,
                "studentFname": row.get::<_, Option<String>>(2)?,
                "studentLname": row.get::<_, Option<String>>(3)?,
                "assignment": row.get::<_, Option<String>>(4)?,
                "status": status,
                "statusName": match Status::from_db(status) {
                    Ok(Some(s)) => s.name(),
                    Ok(None) | Err(_) => "Unknown",
                },
                "timeCreated": row.get::<_, String>(6)?,
                "timeClosed": row.get::<_, Option<String>>(7)?,
                "sectionNumber": row.get::<_, i64>(8)?,
                "courseNumber": row.get::<_, Option<String>>(9)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Neutralizes spreadsheet formula injection: cells that a spreadsheet
/// would evaluate get a quote prefix. Trailing whitespace is stripped.
fn fix_dde(cell: &str) -> String {
    let prefixed = if cell.starts_with(['=', '+', '-', '@']) {
        format!("' {}", cell)
    } else {
        cell.to_string()
    };
    prefixed.trim_end().to_string()
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// "Last, First: email" for an assigned tutor, "None" when the LEFT JOIN
/// found nobody.
fn tutor_label(fname: Option<String>, lname: Option<String>, email: Option<String>) -> String {
    if fname.is_none() && lname.is_none() && email.is_none() {
        return "None".to_string();
    }
    format!(
        "{}, {}: {}",
        lname.unwrap_or_default(),
        fname.unwrap_or_default(),
        email.unwrap_or_default()
    )
}

const CSV_HEADERS: [&str; 17] = [
    "URL",
    "Student Email",
    "Student First Name",
    "Student Last Name",
    "Assignment",
    "Question",
    "Problem Type",
    "Status",
    "Time Created",
    "Time Closed",
    "Was Successful",
    "Primary Tutor",
    "Assistant Tutor",
    "Semester",
    "Course Number",
    "Section Number",
    "Professor",
];

fn export_csv(conn: &Connection, filters: &TicketFilters, tz: Tz) -> rusqlite::Result<String> {
    let (clause, params) = filter_clause(filters, tz);
    let sql = format!(
        "SELECT t.id, t.student_email, t.student_fname, t.student_lname,
                t.assignment, t.question, pt.description, t.status,
                t.time_created, t.time_closed, t.was_successful,
                tu.fname, tu.lname, tu.email,
                au.fname, au.lname, au.email,
                sem.year, sem.season, c.number, s.number,
                p.fname, p.lname
         FROM tickets t
         JOIN sections s ON s.id = t.section_id
         LEFT JOIN problem_types pt ON pt.id = t.problem_type_id
         LEFT JOIN tutors tu ON tu.id = t.tutor_id
         LEFT JOIN tutors au ON au.id = t.assistant_tutor_id
         LEFT JOIN courses c ON c.id = s.course_id
         LEFT JOIN semesters sem ON sem.id = s.semester_id
         LEFT JOIN professors p ON p.id = s.professor_id
         WHERE 1=1{}
         ORDER BY t.time_created DESC",
        clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params), |row| {
            let id: i64 = row.get(0)?;
            let status: Option<i64> = row.get(7)?;
            let was_successful: Option<i64> = row.get(10)?;
            let tutor = tutor_label(row.get(11)?, row.get(12)?, row.get(13)?);
            let assistant = tutor_label(row.get(14)?, row.get(15)?, row.get(16)?);
            let year: Option<i64> = row.get(17)?;
            let season: Option<i64> = row.get(18)?;
            let semester = match (year, season) {
                (Some(y), Some(s)) => model::semester_title(y, s),
                _ => String::new(),
            };
            let p_fname: Option<String> = row.get(21)?;
            let p_lname: Option<String> = row.get(22)?;
            let professor = match (p_lname, p_fname) {
                (Some(l), Some(f)) => format!("{}, {}", l, f),
                _ => String::new(),
            };

            Ok(vec![
                format!("/reports/ticket/{}", id),
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                match Status::from_db(status) {
                    Ok(Some(s)) => s.name().to_string(),
                    Ok(None) | Err(_) => "Unknown".to_string(),
                },
                row.get::<_, String>(8)?,
                row.get::<_, Option<String>>(9)?
                    .unwrap_or_else(|| "Not closed yet".to_string()),
                match was_successful {
                    Some(v) if v != 0 => "True".to_string(),
                    Some(_) => "False".to_string(),
                    None => String::new(),
                },
                tutor,
                assistant,
                semester,
                row.get::<_, Option<String>>(19)?.unwrap_or_default(),
                row.get::<_, i64>(20)?.to_string(),
                professor,
            ])
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut csv = CSV_HEADERS
        .iter()
        .map(|h| csv_quote(h))
        .collect::<Vec<_>>()
        .join(",");
    csv.push('\n');
    for fields in rows {
        let line = fields
            .iter()
            .map(|f| csv_quote(&fix_dde(f)))
            .collect::<Vec<_>>()
            .join(",");
        csv.push_str(&line);
        csv.push('\n');
    }
    Ok(csv)
}

fn handle_tickets(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = helpers::require_superuser(state, req) {
        return e;
    }
    let (conn, tz, page_length) = match (state.db.as_ref(), state.config.as_ref()) {
        (Some(conn), Some(cfg)) => (conn, cfg.tz, cfg.page_length),
        _ => return err(&req.id, "no_workspace", "select a workspace first", None),
    };

    let filters = parse_filters(&req.params);
    let page = helpers::page_number(&req.params);
    let offset = (page - 1) * page_length;

    let num_items = match count_filtered(conn, &filters, tz) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let items = match filtered_page(conn, &filters, tz, page_length, offset) {
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

fn handle_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = helpers::require_superuser(state, req) {
        return e;
    }
    let (conn, tz) = match (state.db.as_ref(), state.config.as_ref()) {
        (Some(conn), Some(cfg)) => (conn, cfg.tz),
        _ => return err(&req.id, "no_workspace", "select a workspace first", None),
    };

    let filters = parse_filters(&req.params);
    match export_csv(conn, &filters, tz) {
        Ok(csv) => ok(&req.id, json!({ "csv": csv })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.tickets" => Some(handle_tickets(state, req)),
        "reports.csv" => Some(handle_csv(state, req)),
        _ => None,
    }
}
