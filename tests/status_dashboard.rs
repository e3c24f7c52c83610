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

fn course_row<'a>(result: &'a serde_json::Value, name: &str) -> &'a serde_json::Value {
    result
        .get("courses")
        .and_then(|v| v.as_array())
        .and_then(|rows| {
            rows.iter()
                .find(|r| r.get("name").and_then(|v| v.as_str()) == Some(name))
        })
        .unwrap_or_else(|| panic!("missing dashboard row {}", name))
}

#[test]
fn dashboard_counts_unresolved_tickets_per_displayed_course() {
    let workspace = temp_dir("tutordesk-status-dashboard");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let login = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.login",
        json!({ "email": "admin@example.edu" }),
    );
    let session = login
        .get("session")
        .and_then(|v| v.as_str())
        .expect("session");
    let admin_id = login
        .get("tutor")
        .and_then(|t| t.get("id"))
        .and_then(|v| v.as_i64())
        .expect("tutor id");

    let semester = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "admin.save",
        json!({
            "session": session,
            "entity": "semesters",
            "year": 2024,
            "season": 2,
            "startDate": "2000-01-01",
            "endDate": "2099-12-31"
        }),
    );
    let semester_id = semester.get("id").and_then(|v| v.as_i64()).expect("id");

    let mut sections = Vec::new();
    let mut course_ids = Vec::new();
    for (i, (number, name, display)) in [
        ("CSCI 1400", Some("Intro to Programming"), true),
        ("MATH 2300", None, true),
        ("PHYS 2010", None, false),
    ]
    .iter()
    .enumerate()
    {
        let course = request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "admin.save",
            json!({
                "session": session,
                "entity": "courses",
                "number": number,
                "name": name,
                "onDisplay": display
            }),
        );
        let course_id = course.get("id").and_then(|v| v.as_i64()).expect("id");
        let section = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "admin.save",
            json!({
                "session": session,
                "entity": "sections",
                "number": 1,
                "courseId": course_id,
                "semesterId": semester_id
            }),
        );
        course_ids.push(course_id);
        sections.push(section.get("id").and_then(|v| v.as_i64()).expect("id"));
    }

    let mut ticket_ids = Vec::new();
    for (i, section_id) in [sections[0], sections[0], sections[0], sections[2]]
        .iter()
        .enumerate()
    {
        let opened = request_ok(
            &mut stdin,
            &mut reader,
            &format!("t{}", i),
            "tickets.open",
            json!({ "studentEmail": "s@example.edu", "sectionId": section_id }),
        );
        ticket_ids.push(opened.get("ticketId").and_then(|v| v.as_i64()).expect("id"));
    }

    // Put the administrator on shift for the first course.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "tutors.save",
        json!({
            "session": session,
            "id": admin_id,
            "isWorking": true,
            "courseIds": [course_ids[0]]
        }),
    );

    // The dashboard itself is the lobby screen; no session required.
    let dashboard = request_ok(&mut stdin, &mut reader, "5", "status.courses", json!({}));
    let first = course_row(&dashboard, "CSCI 1400: Intro to Programming");
    assert_eq!(first.get("currentTickets").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(first.get("currentTutors").and_then(|v| v.as_i64()), Some(1));
    let second = course_row(&dashboard, "MATH 2300");
    assert_eq!(second.get("currentTickets").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(second.get("currentTutors").and_then(|v| v.as_i64()), Some(0));
    let other = course_row(&dashboard, "Other");
    assert_eq!(other.get("currentTickets").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(other.get("currentTutors").and_then(|v| v.as_str()), Some("-"));
    let total = course_row(&dashboard, "Total");
    assert_eq!(total.get("currentTickets").and_then(|v| v.as_i64()), Some(4));
    assert_eq!(total.get("currentTutors").and_then(|v| v.as_i64()), Some(1));

    // Closing a ticket takes it out of the unresolved counts.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "tickets.save",
        json!({ "session": session, "ticketId": ticket_ids[0], "submit": "close" }),
    );
    let dashboard = request_ok(&mut stdin, &mut reader, "7", "status.courses", json!({}));
    let first = course_row(&dashboard, "CSCI 1400: Intro to Programming");
    assert_eq!(first.get("currentTickets").and_then(|v| v.as_i64()), Some(2));
    let total = course_row(&dashboard, "Total");
    assert_eq!(total.get("currentTickets").and_then(|v| v.as_i64()), Some(3));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn section_picker_shows_only_current_semesters() {
    let workspace = temp_dir("tutordesk-status-picker");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let login = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.login",
        json!({ "email": "admin@example.edu" }),
    );
    let session = login
        .get("session")
        .and_then(|v| v.as_str())
        .expect("session");

    let current = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "admin.save",
        json!({
            "session": session,
            "entity": "semesters",
            "year": 2024,
            "season": 3,
            "startDate": "2000-01-01",
            "endDate": "2099-12-31"
        }),
    );
    let current_id = current.get("id").and_then(|v| v.as_i64()).expect("id");
    let past = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "admin.save",
        json!({
            "session": session,
            "entity": "semesters",
            "year": 2001,
            "season": 1,
            "startDate": "2001-01-01",
            "endDate": "2001-05-15"
        }),
    );
    let past_id = past.get("id").and_then(|v| v.as_i64()).expect("id");

    let course = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "admin.save",
        json!({ "session": session, "entity": "courses", "number": "CSCI 1400" }),
    );
    let course_id = course.get("id").and_then(|v| v.as_i64()).expect("id");

    for (i, (number, semester_id, time)) in [
        (1, current_id, Some("MWF 9:00")),
        (2, current_id, None),
        (3, past_id, None),
    ]
    .iter()
    .enumerate()
    {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "admin.save",
            json!({
                "session": session,
                "entity": "sections",
                "number": number,
                "courseId": course_id,
                "semesterId": semester_id,
                "time": time
            }),
        );
    }

    let picker = request_ok(&mut stdin, &mut reader, "6", "status.openCourses", json!({}));
    let courses = picker.get("courses").and_then(|v| v.as_array()).expect("courses");
    assert_eq!(courses.len(), 1);
    let sections = courses[0]
        .get("sections")
        .and_then(|v| v.as_array())
        .expect("sections");
    // The past-semester section stays out of the picker.
    let numbers: Vec<i64> = sections
        .iter()
        .filter_map(|s| s.get("number").and_then(|v| v.as_i64()))
        .collect();
    assert_eq!(numbers, vec![1, 2]);
    assert_eq!(
        sections[0].get("time").and_then(|v| v.as_str()),
        Some("MWF 9:00")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn announcements_show_while_their_window_covers_today() {
    let workspace = temp_dir("tutordesk-status-messages");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let login = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.login",
        json!({ "email": "admin@example.edu" }),
    );
    let session = login
        .get("session")
        .and_then(|v| v.as_str())
        .expect("session");

    for (i, (message, start, end)) in [
        ("current", Some("2000-01-01"), Some("2099-12-31")),
        ("expired", Some("2000-01-01"), Some("2001-01-01")),
        ("not yet", Some("2098-01-01"), Some("2099-12-31")),
        ("evergreen", None, None),
    ]
    .iter()
    .enumerate()
    {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("m{}", i),
            "admin.save",
            json!({
                "session": session,
                "entity": "messages",
                "message": message,
                "startDate": start,
                "endDate": end
            }),
        );
    }

    let shown = request_ok(&mut stdin, &mut reader, "3", "status.messages", json!({}));
    let mut texts: Vec<&str> = shown
        .get("messages")
        .and_then(|v| v.as_array())
        .map(|rows| {
            rows.iter()
                .filter_map(|r| r.get("message").and_then(|v| v.as_str()))
                .collect()
        })
        .unwrap_or_default();
    texts.sort_unstable();
    assert_eq!(texts, vec!["current", "evergreen"]);

    let _ = std::fs::remove_dir_all(workspace);
}
