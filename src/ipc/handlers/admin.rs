use crate::ipc::error::{db_code, err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use crate::model::DATE_FMT;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::json;

// One CRUD surface over the six reference-data entity types. Each entity
// declares its typed field list once; coercion and SQL are driven from
// the table below instead of per-entity handlers.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Str,
    Int,
    Bool,
    Date,
    Season,
}

struct FieldSpec {
    param: &'static str,
    column: &'static str,
    kind: FieldKind,
    required: bool,
}

struct EntitySpec {
    name: &'static str,
    table: &'static str,
    fields: &'static [FieldSpec],
    /// Join clause used only to realize the canonical listing order.
    list_joins: &'static str,
    order_by: &'static str,
}

const fn field(
    param: &'static str,
    column: &'static str,
    kind: FieldKind,
    required: bool,
) -> FieldSpec {
    FieldSpec {
        param,
        column,
        kind,
        required,
    }
}

static SEMESTERS: EntitySpec = EntitySpec {
    name: "semesters",
    table: "semesters",
    fields: &[
        field("year", "year", FieldKind::Int, true),
        field("season", "season", FieldKind::Season, true),
        field("startDate", "start_date", FieldKind::Date, true),
        field("endDate", "end_date", FieldKind::Date, true),
    ],
    list_joins: "",
    order_by: "x.start_date DESC",
};

static PROFESSORS: EntitySpec = EntitySpec {
    name: "professors",
    table: "professors",
    fields: &[
        field("fname", "fname", FieldKind::Str, true),
        field("lname", "lname", FieldKind::Str, true),
    ],
    list_joins: "",
    order_by: "x.lname, x.fname",
};

static COURSES: EntitySpec = EntitySpec {
    name: "courses",
    table: "courses",
    fields: &[
        field("number", "number", FieldKind::Str, true),
        field("name", "name", FieldKind::Str, false),
        field("onDisplay", "on_display", FieldKind::Bool, false),
    ],
    list_joins: "",
    order_by: "x.number",
};

static SECTIONS: EntitySpec = EntitySpec {
    name: "sections",
    table: "sections",
    fields: &[
        field("number", "number", FieldKind::Int, true),
        field("time", "time", FieldKind::Str, false),
        field("courseId", "course_id", FieldKind::Int, true),
        field("semesterId", "semester_id", FieldKind::Int, false),
        field("professorId", "professor_id", FieldKind::Int, false),
    ],
    list_joins: "LEFT JOIN semesters sem ON sem.id = x.semester_id
                 LEFT JOIN courses c ON c.id = x.course_id",
    order_by: "sem.start_date DESC, c.number, x.number",
};

static PROBLEMS: EntitySpec = EntitySpec {
    name: "problems",
    table: "problem_types",
    fields: &[field("description", "description", FieldKind::Str, true)],
    list_joins: "",
    order_by: "x.description",
};

static MESSAGES: EntitySpec = EntitySpec {
    name: "messages",
    table: "messages",
    fields: &[
        field("message", "message", FieldKind::Str, false),
        field("startDate", "start_date", FieldKind::Date, false),
        field("endDate", "end_date", FieldKind::Date, false),
    ],
    list_joins: "",
    order_by: "x.end_date DESC",
};

fn entity_spec(name: &str) -> Option<&'static EntitySpec> {
    match name {
        "semesters" => Some(&SEMESTERS),
        "professors" => Some(&PROFESSORS),
        "courses" => Some(&COURSES),
        "sections" => Some(&SECTIONS),
        "problems" => Some(&PROBLEMS),
        "messages" => Some(&MESSAGES),
        _ => None,
    }
}

fn coerce_field(params: &serde_json::Value, spec: &FieldSpec) -> Value {
    match spec.kind {
        FieldKind::Str => match helpers::opt_str(params, spec.param) {
            Some(s) => Value::Text(s),
            None => Value::Null,
        },
        FieldKind::Int => match helpers::opt_int(params, spec.param) {
            Some(n) => Value::Integer(n),
            None => Value::Null,
        },
        FieldKind::Bool => Value::Integer(helpers::get_bool(params, spec.param) as i64),
        FieldKind::Date => match helpers::opt_date(params, spec.param) {
            Some(d) => Value::Text(d.format(DATE_FMT).to_string()),
            None => Value::Null,
        },
        FieldKind::Season => match helpers::opt_int(params, spec.param).filter(|n| (1..=3).contains(n)) {
            Some(n) => Value::Integer(n),
            None => Value::Null,
        },
    }
}

fn field_to_json(kind: FieldKind, value: &Value) -> serde_json::Value {
    match (kind, value) {
        (_, Value::Null) => json!(null),
        (FieldKind::Bool, Value::Integer(n)) => json!(*n != 0),
        (_, Value::Integer(n)) => json!(n),
        (_, Value::Real(f)) => json!(f),
        (_, Value::Text(s)) => json!(s),
        (_, Value::Blob(_)) => json!(null),
    }
}

fn select_columns(spec: &EntitySpec) -> String {
    let mut cols = vec!["x.id".to_string()];
    cols.extend(spec.fields.iter().map(|f| format!("x.{}", f.column)));
    cols.join(", ")
}

fn row_json(spec: &EntitySpec, row: &rusqlite::Row) -> rusqlite::Result<serde_json::Value> {
    let mut obj = serde_json::Map::new();
    obj.insert("id".to_string(), json!(row.get::<_, i64>(0)?));
    for (i, f) in spec.fields.iter().enumerate() {
        let value: Value = row.get(i + 1)?;
        obj.insert(f.param.to_string(), field_to_json(f.kind, &value));
    }
    Ok(serde_json::Value::Object(obj))
}

fn require_entity(req: &Request) -> Result<&'static EntitySpec, serde_json::Value> {
    let name = req.params.get("entity").and_then(|v| v.as_str());
    name.and_then(entity_spec).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "entity must be one of: semesters, professors, courses, sections, problems, messages",
            None,
        )
    })
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = helpers::require_superuser(state, req) {
        return e;
    }
    let (conn, page_length) = match (state.db.as_ref(), state.config.as_ref()) {
        (Some(conn), Some(cfg)) => (conn, cfg.page_length),
        _ => return err(&req.id, "no_workspace", "select a workspace first", None),
    };
    let spec = match require_entity(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let page = helpers::page_number(&req.params);
    let offset = (page - 1) * page_length;

    let num_items: i64 = match conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", spec.table),
        [],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let sql = format!(
        "SELECT {} FROM {} x {} ORDER BY {} LIMIT ? OFFSET ?",
        select_columns(spec),
        spec.table,
        spec.list_joins,
        spec.order_by,
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let items = stmt
        .query_map((page_length, offset), |row| row_json(spec, row))
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

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = helpers::require_superuser(state, req) {
        return e;
    }
    let conn = match helpers::db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let spec = match require_entity(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(id) = helpers::opt_int(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let sql = format!(
        "SELECT {} FROM {} x WHERE x.id = ?",
        select_columns(spec),
        spec.table
    );
    match conn
        .query_row(&sql, [id], |row| row_json(spec, row))
        .optional()
    {
        Ok(Some(item)) => ok(&req.id, json!({ "item": item })),
        Ok(None) => err(&req.id, "not_found", format!("{} not found", spec.name), None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Create (no id) or update (id present). Updates write only columns
/// whose coerced value differs from what is stored.
fn handle_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = helpers::require_superuser(state, req) {
        return e;
    }
    let conn = match helpers::db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let spec = match require_entity(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut coerced: Vec<Value> = Vec::with_capacity(spec.fields.len());
    for f in spec.fields {
        let value = coerce_field(&req.params, f);
        if f.required && value == Value::Null {
            return err(
                &req.id,
                "validation_error",
                format!("{} is required", f.param),
                None,
            );
        }
        coerced.push(value);
    }

    match helpers::opt_int(&req.params, "id") {
        Some(id) => {
            let sql = format!(
                "SELECT {} FROM {} x WHERE x.id = ?",
                select_columns(spec),
                spec.table
            );
            let current = conn
                .query_row(&sql, [id], |row| {
                    let mut vals = Vec::with_capacity(spec.fields.len());
                    for i in 0..spec.fields.len() {
                        vals.push(row.get::<_, Value>(i + 1)?);
                    }
                    Ok(vals)
                })
                .optional();
            let current = match current {
                Ok(Some(v)) => v,
                Ok(None) => {
                    return err(&req.id, "not_found", format!("{} not found", spec.name), None)
                }
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };

            let mut sets: Vec<String> = Vec::new();
            let mut values: Vec<Value> = Vec::new();
            for (i, f) in spec.fields.iter().enumerate() {
                if coerced[i] != current[i] {
                    sets.push(format!("{} = ?", f.column));
                    values.push(coerced[i].clone());
                }
            }
            if sets.is_empty() {
                // Nothing changed; avoid the no-op write entirely.
                return ok(&req.id, json!({ "id": id, "updated": false }));
            }
            values.push(Value::Integer(id));
            let sql = format!(
                "UPDATE {} SET {} WHERE id = ?",
                spec.table,
                sets.join(", ")
            );
            if let Err(e) = conn.execute(&sql, params_from_iter(values)) {
                return err(&req.id, db_code(&e, "db_update_failed"), e.to_string(), None);
            }
            ok(&req.id, json!({ "id": id, "updated": true }))
        }
        None => {
            let columns: Vec<&str> = spec.fields.iter().map(|f| f.column).collect();
            let placeholders = vec!["?"; columns.len()].join(", ");
            let sql = format!(
                "INSERT INTO {}({}) VALUES({})",
                spec.table,
                columns.join(", "),
                placeholders
            );
            if let Err(e) = conn.execute(&sql, params_from_iter(coerced)) {
                return err(&req.id, db_code(&e, "db_insert_failed"), e.to_string(), None);
            }
            let id = conn.last_insert_rowid();
            tracing::info!(entity = spec.name, id, "created");
            ok(&req.id, json!({ "id": id, "created": true }))
        }
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = helpers::require_superuser(state, req) {
        return e;
    }
    let conn = match helpers::db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let spec = match require_entity(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(id) = helpers::opt_int(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let sql = format!("DELETE FROM {} WHERE id = ?", spec.table);
    // ON DELETE NO ACTION: a referenced row fails here with a constraint
    // violation instead of cascading.
    let deleted = match conn.execute(&sql, [id]) {
        Ok(n) => n,
        Err(e) => return err(&req.id, db_code(&e, "db_delete_failed"), e.to_string(), None),
    };
    if deleted == 0 {
        return err(&req.id, "not_found", format!("{} not found", spec.name), None);
    }
    tracing::info!(entity = spec.name, id, "deleted");
    ok(&req.id, json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admin.list" => Some(handle_list(state, req)),
        "admin.get" => Some(handle_get(state, req)),
        "admin.save" => Some(handle_save(state, req)),
        "admin.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
