use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("tutordesk.sqlite3");
    let conn = Connection::open(db_path)?;
    create_schema(&conn)?;
    Ok(conn)
}

/// Idempotent schema creation. Foreign keys follow the portal contract:
/// ON UPDATE CASCADE / ON DELETE NO ACTION, so deleting a referenced row
/// fails with a constraint violation instead of cascading. The can_tutor
/// join table is the one exception and cascades on both sides.
pub fn create_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS configuration(
            name TEXT PRIMARY KEY,
            setting TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semesters(
            id INTEGER PRIMARY KEY,
            year INTEGER NOT NULL,
            season INTEGER NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS professors(
            id INTEGER PRIMARY KEY,
            fname TEXT NOT NULL,
            lname TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id INTEGER PRIMARY KEY,
            number TEXT NOT NULL,
            name TEXT,
            on_display INTEGER
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections(
            id INTEGER PRIMARY KEY,
            number INTEGER NOT NULL,
            time TEXT,
            course_id INTEGER NOT NULL,
            semester_id INTEGER,
            professor_id INTEGER,
            FOREIGN KEY(course_id) REFERENCES courses(id)
                ON UPDATE CASCADE ON DELETE NO ACTION,
            FOREIGN KEY(semester_id) REFERENCES semesters(id)
                ON UPDATE CASCADE ON DELETE NO ACTION,
            FOREIGN KEY(professor_id) REFERENCES professors(id)
                ON UPDATE CASCADE ON DELETE NO ACTION
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sections_course ON sections(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sections_semester ON sections(semester_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS problem_types(
            id INTEGER PRIMARY KEY,
            description TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages(
            id INTEGER PRIMARY KEY,
            message TEXT,
            start_date TEXT,
            end_date TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tutors(
            id INTEGER PRIMARY KEY,
            email TEXT UNIQUE,
            fname TEXT,
            lname TEXT,
            is_active INTEGER,
            is_superuser INTEGER,
            is_working INTEGER
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS can_tutor(
            tutor_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            PRIMARY KEY(tutor_id, course_id),
            FOREIGN KEY(tutor_id) REFERENCES tutors(id)
                ON UPDATE CASCADE ON DELETE CASCADE,
            FOREIGN KEY(course_id) REFERENCES courses(id)
                ON UPDATE CASCADE ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_can_tutor_course ON can_tutor(course_id)",
        [],
    )?;

    // Student identity lives on the ticket itself; students have no accounts.
    // status: NULL = legacy open, 1 = Open, 2 = Claimed, 3 = Closed.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tickets(
            id INTEGER PRIMARY KEY,
            student_email TEXT NOT NULL,
            student_fname TEXT,
            student_lname TEXT,
            assignment TEXT,
            question TEXT,
            status INTEGER,
            time_created TEXT NOT NULL,
            time_closed TEXT,
            session_duration INTEGER,
            was_successful INTEGER,
            tutor_id INTEGER,
            assistant_tutor_id INTEGER,
            section_id INTEGER NOT NULL,
            problem_type_id INTEGER,
            FOREIGN KEY(tutor_id) REFERENCES tutors(id)
                ON UPDATE CASCADE ON DELETE NO ACTION,
            FOREIGN KEY(assistant_tutor_id) REFERENCES tutors(id)
                ON UPDATE CASCADE ON DELETE NO ACTION,
            FOREIGN KEY(section_id) REFERENCES sections(id)
                ON UPDATE CASCADE ON DELETE NO ACTION,
            FOREIGN KEY(problem_type_id) REFERENCES problem_types(id)
                ON UPDATE CASCADE ON DELETE NO ACTION
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tickets_section ON tickets(section_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tickets_created ON tickets(time_created)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status)",
        [],
    )?;

    Ok(())
}
