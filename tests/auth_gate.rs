use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_tutordeskd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn tutordeskd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn login(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    email: &str,
) -> (String, i64) {
    let result = request_ok(stdin, reader, id, "auth.login", json!({ "email": email }));
    let session = result
        .get("session")
        .and_then(|v| v.as_str())
        .expect("session")
        .to_string();
    let tutor_id = result
        .get("tutor")
        .and_then(|t| t.get("id"))
        .and_then(|v| v.as_i64())
        .expect("tutor id");
    (session, tutor_id)
}

#[test]
fn anonymous_and_bogus_sessions_are_forbidden() {
    let workspace = temp_dir("tutordesk-auth-anon");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let anon = request(&mut stdin, &mut reader, "2", "tickets.list", json!({}));
    assert_eq!(error_code(&anon), "forbidden");

    let bogus = request(
        &mut stdin,
        &mut reader,
        "3",
        "tickets.list",
        json!({ "session": "not-a-token" }),
    );
    assert_eq!(error_code(&bogus), "forbidden");
    // An unknown token was never a session, so there is nothing to clear.
    assert!(bogus
        .get("error")
        .and_then(|e| e.get("details"))
        .map(|d| d.is_null())
        .unwrap_or(true));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn first_login_bootstraps_administrator_then_strangers_are_rejected() {
    let workspace = temp_dir("tutordesk-auth-bootstrap");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.login",
        json!({ "email": "admin@example.edu" }),
    );
    let tutor = first.get("tutor").expect("tutor");
    assert_eq!(tutor.get("isActive").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(tutor.get("isSuperuser").and_then(|v| v.as_bool()), Some(true));
    let session = first
        .get("session")
        .and_then(|v| v.as_str())
        .expect("session")
        .to_string();

    // The bootstrap path only exists while the tutor table is empty.
    let stranger = request(
        &mut stdin,
        &mut reader,
        "3",
        "auth.login",
        json!({ "email": "stranger@example.edu" }),
    );
    assert_eq!(error_code(&stranger), "unknown_identity");

    let whoami = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "auth.whoami",
        json!({ "session": session }),
    );
    assert_eq!(
        whoami
            .get("tutor")
            .and_then(|t| t.get("email"))
            .and_then(|v| v.as_str()),
        Some("admin@example.edu")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "auth.logout",
        json!({ "session": session }),
    );
    let after = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "auth.whoami",
        json!({ "session": session }),
    );
    assert!(after.get("tutor").map(|v| v.is_null()).unwrap_or(false));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn deactivation_invalidates_live_sessions() {
    let workspace = temp_dir("tutordesk-auth-deactivate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (admin_session, _) = login(&mut stdin, &mut reader, "2", "admin@example.edu");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "tutors.save",
        json!({
            "session": admin_session,
            "email": "tutor@example.edu",
            "fname": "Terry",
            "lname": "Tutor",
            "isActive": true
        }),
    );
    let tutor_id = created.get("id").and_then(|v| v.as_i64()).expect("tutor id");

    let (tutor_session, _) = login(&mut stdin, &mut reader, "4", "tutor@example.edu");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "tickets.list",
        json!({ "session": tutor_session }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "tutors.save",
        json!({ "session": admin_session, "id": tutor_id, "isActive": false }),
    );

    // The very next request on the stale session fails and tells the
    // frontend to drop its cookie.
    let denied = request(
        &mut stdin,
        &mut reader,
        "7",
        "tickets.list",
        json!({ "session": tutor_session }),
    );
    assert_eq!(error_code(&denied), "forbidden");
    assert_eq!(
        denied
            .get("error")
            .and_then(|e| e.get("details"))
            .and_then(|d| d.get("clearSession"))
            .and_then(|v| v.as_bool()),
        Some(true)
    );

    // The session is gone now; a repeat is plain forbidden.
    let whoami = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "auth.whoami",
        json!({ "session": tutor_session }),
    );
    assert!(whoami.get("tutor").map(|v| v.is_null()).unwrap_or(false));
    assert!(whoami.get("clearSession").is_none());

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn self_edits_cannot_touch_privileged_fields() {
    let workspace = temp_dir("tutordesk-auth-selfedit");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (admin_session, admin_id) = login(&mut stdin, &mut reader, "2", "admin@example.edu");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "tutors.save",
        json!({
            "session": admin_session,
            "email": "tutor@example.edu",
            "fname": "Terry",
            "lname": "Tutor",
            "isActive": true
        }),
    );
    let tutor_id = created.get("id").and_then(|v| v.as_i64()).expect("tutor id");
    let (tutor_session, _) = login(&mut stdin, &mut reader, "4", "tutor@example.edu");

    // Privileged fields in a self-edit are ignored, the rest applies.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "tutors.save",
        json!({
            "session": tutor_session,
            "id": tutor_id,
            "fname": "Terrence",
            "isSuperuser": true,
            "email": "hijack@example.edu"
        }),
    );
    let me = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "tutors.get",
        json!({ "session": tutor_session, "id": tutor_id }),
    );
    let me = me.get("tutor").expect("tutor");
    assert_eq!(me.get("fname").and_then(|v| v.as_str()), Some("Terrence"));
    assert_eq!(me.get("isSuperuser").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        me.get("email").and_then(|v| v.as_str()),
        Some("tutor@example.edu")
    );

    // Editing anyone else requires superuser.
    let other = request(
        &mut stdin,
        &mut reader,
        "7",
        "tutors.save",
        json!({ "session": tutor_session, "id": admin_id, "fname": "Mallory" }),
    );
    assert_eq!(error_code(&other), "forbidden");

    // So does creating accounts.
    let create = request(
        &mut stdin,
        &mut reader,
        "8",
        "tutors.save",
        json!({ "session": tutor_session, "email": "new@example.edu" }),
    );
    assert_eq!(error_code(&create), "forbidden");

    // And the roster itself.
    let roster = request(
        &mut stdin,
        &mut reader,
        "9",
        "tutors.list",
        json!({ "session": tutor_session }),
    );
    assert_eq!(error_code(&roster), "forbidden");

    let _ = std::fs::remove_dir_all(workspace);
}
