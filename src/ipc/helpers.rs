use rusqlite::{Connection, OptionalExtension};

use super::error::err;
use super::types::{AppState, Request};
use crate::grade;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

pub fn required_f64(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_f64(req: &Request, key: &str) -> Result<Option<f64>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a number", key),
                None,
            )
        }),
    }
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_bool(req: &Request, key: &str) -> Option<bool> {
    req.params.get(key).and_then(|v| v.as_bool())
}

pub fn grade_err(req: &Request, e: grade::GradeError) -> serde_json::Value {
    err(&req.id, &e.code, e.message, e.details)
}

pub fn db_query_err(req: &Request, e: impl ToString) -> serde_json::Value {
    err(&req.id, "db_query_failed", e.to_string(), None)
}

pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Workflow status of a semester; a missing approvals row means draft.
pub fn semester_status(conn: &Connection, semester_id: &str) -> Result<String, rusqlite::Error> {
    Ok(conn
        .query_row(
            "SELECT status FROM approvals WHERE semester_id = ?",
            [semester_id],
            |r| r.get::<_, String>(0),
        )
        .optional()?
        .unwrap_or_else(|| "draft".to_string()))
}

/// Approved and published semesters are read-only for mark entry and
/// enrollment mutation.
pub fn semester_locked(conn: &Connection, semester_id: &str) -> Result<bool, rusqlite::Error> {
    let status = semester_status(conn, semester_id)?;
    Ok(status == "approved" || status == "published")
}

pub fn semester_exists(conn: &Connection, semester_id: &str) -> Result<bool, rusqlite::Error> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM semesters WHERE id = ?",
            [semester_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

/// Resolve the semester an enrollment belongs to (via its course).
pub fn enrollment_semester(
    conn: &Connection,
    enrollment_id: &str,
) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT c.semester_id
         FROM enrollments e
         JOIN courses c ON c.id = e.course_id
         WHERE e.id = ?",
        [enrollment_id],
        |r| r.get(0),
    )
    .optional()
}
