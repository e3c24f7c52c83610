use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

#[derive(Debug, Clone)]
pub struct Tutor {
    pub id: i64,
    pub email: Option<String>,
    pub fname: Option<String>,
    pub lname: Option<String>,
    pub is_active: bool,
    pub is_superuser: bool,
    pub is_working: bool,
}

impl Tutor {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "email": self.email,
            "fname": self.fname,
            "lname": self.lname,
            "isActive": self.is_active,
            "isSuperuser": self.is_superuser,
            "isWorking": self.is_working,
        })
    }
}

fn tutor_from_row(row: &rusqlite::Row) -> rusqlite::Result<Tutor> {
    Ok(Tutor {
        id: row.get(0)?,
        email: row.get(1)?,
        fname: row.get(2)?,
        lname: row.get(3)?,
        is_active: row.get::<_, Option<i64>>(4)?.unwrap_or(0) != 0,
        is_superuser: row.get::<_, Option<i64>>(5)?.unwrap_or(0) != 0,
        is_working: row.get::<_, Option<i64>>(6)?.unwrap_or(0) != 0,
    })
}

const TUTOR_COLS: &str = "id, email, fname, lname, is_active, is_superuser, is_working";

pub fn tutor_by_email(conn: &Connection, email: &str) -> rusqlite::Result<Option<Tutor>> {
    conn.query_row(
        &format!("SELECT {} FROM tutors WHERE email = ?", TUTOR_COLS),
        [email],
        tutor_from_row,
    )
    .optional()
}

pub fn tutor_by_id(conn: &Connection, id: i64) -> rusqlite::Result<Option<Tutor>> {
    conn.query_row(
        &format!("SELECT {} FROM tutors WHERE id = ?", TUTOR_COLS),
        [id],
        tutor_from_row,
    )
    .optional()
}

/// Result of resolving a session token. `cleared` means the token mapped
/// to a stale identity (deleted or deactivated tutor) and was removed
/// from the session store; the frontend must drop its cookie in response.
#[derive(Debug)]
pub struct AuthOutcome {
    pub tutor: Option<Tutor>,
    pub cleared: bool,
}

pub fn authenticate(
    sessions: &mut HashMap<String, String>,
    conn: &Connection,
    token: Option<&str>,
) -> rusqlite::Result<AuthOutcome> {
    let Some(token) = token else {
        return Ok(AuthOutcome {
            tutor: None,
            cleared: false,
        });
    };
    let Some(email) = sessions.get(token).cloned() else {
        return Ok(AuthOutcome {
            tutor: None,
            cleared: false,
        });
    };

    match tutor_by_email(conn, &email)? {
        Some(tutor) if tutor.is_active => Ok(AuthOutcome {
            tutor: Some(tutor),
            cleared: false,
        }),
        Some(_) => {
            // Deactivation invalidates any live session on the next request.
            sessions.remove(token);
            tracing::warn!(email = %email, "session cleared: tutor is not active");
            Ok(AuthOutcome {
                tutor: None,
                cleared: true,
            })
        }
        None => {
            sessions.remove(token);
            tracing::warn!(email = %email, "session cleared: tutor does not exist");
            Ok(AuthOutcome {
                tutor: None,
                cleared: true,
            })
        }
    }
}
