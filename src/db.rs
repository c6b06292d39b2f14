use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "resultd.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semesters(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            session TEXT NOT NULL,
            department TEXT NOT NULL,
            semester_no INTEGER NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            UNIQUE(department, session, semester_no)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            semester_id TEXT NOT NULL,
            roll_no TEXT NOT NULL,
            registration_no TEXT NOT NULL,
            name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(semester_id) REFERENCES semesters(id),
            UNIQUE(semester_id, roll_no)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_semester ON students(semester_id, sort_order)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_registration ON students(registration_no)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            designation TEXT,
            department TEXT,
            external INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            semester_id TEXT NOT NULL,
            code TEXT NOT NULL,
            title TEXT NOT NULL,
            credit REAL NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(semester_id) REFERENCES semesters(id),
            UNIQUE(semester_id, code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_semester ON courses(semester_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS committees(
            id TEXT PRIMARY KEY,
            semester_id TEXT NOT NULL UNIQUE,
            president_teacher_id TEXT NOT NULL,
            formed_at TEXT NOT NULL,
            FOREIGN KEY(semester_id) REFERENCES semesters(id),
            FOREIGN KEY(president_teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS committee_members(
            committee_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            PRIMARY KEY(committee_id, teacher_id),
            FOREIGN KEY(committee_id) REFERENCES committees(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_examiners(
            course_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            role TEXT NOT NULL,
            PRIMARY KEY(course_id, role),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_examiners_teacher ON course_examiners(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            student_type TEXT NOT NULL,
            carried_internal REAL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(student_id, course_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_course ON enrollments(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS internal_marks(
            enrollment_id TEXT PRIMARY KEY,
            exam_marks REAL NOT NULL,
            attendance_marks REAL NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS external_marks(
            enrollment_id TEXT NOT NULL,
            role TEXT NOT NULL,
            marks REAL NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(enrollment_id, role),
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS approvals(
            semester_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            actor TEXT,
            note TEXT,
            updated_at TEXT,
            FOREIGN KEY(semester_id) REFERENCES semesters(id)
        )",
        [],
    )?;

    // Existing workspaces may predate the improvement-enrollment column.
    ensure_enrollments_carried_internal(&conn)?;
    ensure_approvals_note(&conn)?;

    Ok(conn)
}

fn ensure_enrollments_carried_internal(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "enrollments", "carried_internal")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE enrollments ADD COLUMN carried_internal REAL", [])?;
    Ok(())
}

fn ensure_approvals_note(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "approvals", "note")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE approvals ADD COLUMN note TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
