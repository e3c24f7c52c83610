use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Maps a rusqlite failure to the portal's error vocabulary. Constraint
/// violations (duplicate unique value, blocked delete, missing required
/// column) are integrity errors; everything else keeps the caller-provided
/// database code.
pub fn db_code(e: &rusqlite::Error, fallback: &'static str) -> &'static str {
    match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            "integrity_error"
        }
        _ => fallback,
    }
}
