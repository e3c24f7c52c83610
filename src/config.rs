use chrono_tz::Tz;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

/// Immutable configuration snapshot, loaded once when a workspace is
/// opened. Values live in the configuration table; missing keys are
/// seeded with defaults on first load. Edits take effect on the next
/// workspace open (restart semantics), never mid-process.
#[derive(Debug, Clone)]
pub struct Config {
    pub secret_key: String,
    pub session_lifetime_minutes: i64,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
    pub captcha_key: Option<String>,
    pub captcha_secret: Option<String>,
    pub tz_name: String,
    pub tz: Tz,
    pub page_length: i64,
}

const DEFAULT_SESSION_LIFETIME: i64 = 30;
const DEFAULT_TZ_NAME: &str = "America/Chicago";
const DEFAULT_PAGE_LENGTH: i64 = 100;

fn get_or_seed(
    conn: &Connection,
    name: &str,
    default: Option<&str>,
) -> anyhow::Result<Option<String>> {
    let existing: Option<Option<String>> = conn
        .query_row(
            "SELECT setting FROM configuration WHERE name = ?",
            [name],
            |r| r.get(0),
        )
        .optional()?;
    match existing {
        Some(value) => Ok(value),
        None => {
            conn.execute(
                "INSERT INTO configuration(name, setting) VALUES(?, ?)",
                (name, default),
            )?;
            Ok(default.map(|s| s.to_string()))
        }
    }
}

pub fn load(conn: &Connection) -> anyhow::Result<Config> {
    let generated_secret = Uuid::new_v4().to_string();
    let secret_key = get_or_seed(conn, "SECRET_KEY", Some(&generated_secret))?
        .unwrap_or(generated_secret);

    let session_lifetime_minutes = get_or_seed(
        conn,
        "PERMANENT_SESSION_LIFETIME",
        Some(&DEFAULT_SESSION_LIFETIME.to_string()),
    )?
    .and_then(|s| s.parse::<i64>().ok())
    .unwrap_or(DEFAULT_SESSION_LIFETIME);

    let oauth_client_id = get_or_seed(conn, "OAUTH_CLIENT_ID", None)?;
    let oauth_client_secret = get_or_seed(conn, "OAUTH_CLIENT_SECRET", None)?;
    // Carried for the frontend's form flow; the daemon never verifies these.
    let captcha_key = get_or_seed(conn, "CAPTCHA_KEY", None)?;
    let captcha_secret = get_or_seed(conn, "CAPTCHA_SECRET", None)?;

    let tz_name = get_or_seed(conn, "TZ_NAME", Some(DEFAULT_TZ_NAME))?
        .unwrap_or_else(|| DEFAULT_TZ_NAME.to_string());
    let tz = match tz_name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            tracing::warn!(tz_name = %tz_name, "unknown timezone, using UTC");
            chrono_tz::UTC
        }
    };

    let page_length = get_or_seed(conn, "PAGE_LENGTH", Some(&DEFAULT_PAGE_LENGTH.to_string()))?
        .and_then(|s| s.parse::<i64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_PAGE_LENGTH);

    Ok(Config {
        secret_key,
        session_lifetime_minutes,
        oauth_client_id,
        oauth_client_secret,
        captcha_key,
        captcha_secret,
        tz_name,
        tz,
        page_length,
    })
}
