use crate::grade::ExaminerRole;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, db_query_err, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

fn handle_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let role_raw = match required_str(req, "role") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(role) = ExaminerRole::parse(&role_raw) else {
        return err(
            &req.id,
            "bad_params",
            "role must be one of: internal, first, second, third",
            Some(json!({ "role": role_raw })),
        );
    };

    let course_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [&course_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };
    if course_exists.is_none() {
        return err(&req.id, "not_found", "course not found", None);
    }

    let teacher_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };
    if teacher_exists.is_none() {
        return err(&req.id, "not_found", "teacher not found", None);
    }

    // One teacher per role per course; reassignment replaces.
    match conn.execute(
        "INSERT OR REPLACE INTO course_examiners(course_id, teacher_id, role) VALUES (?, ?, ?)",
        (&course_id, &teacher_id, role.as_str()),
    ) {
        Ok(_) => ok(
            &req.id,
            json!({ "courseId": course_id, "teacherId": teacher_id, "role": role.as_str() }),
        ),
        Err(e) => db_query_err(req, e),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT ce.role, t.id, t.name, t.designation, t.department, t.external
         FROM course_examiners ce
         JOIN teachers t ON t.id = ce.teacher_id
         WHERE ce.course_id = ?
         ORDER BY ce.role",
    ) {
        Ok(s) => s,
        Err(e) => return db_query_err(req, e),
    };
    let examiners = match stmt
        .query_map([&course_id], |r| {
            let external: i64 = r.get(5)?;
            Ok(json!({
                "role": r.get::<_, String>(0)?,
                "teacher": {
                    "id": r.get::<_, String>(1)?,
                    "name": r.get::<_, String>(2)?,
                    "designation": r.get::<_, Option<String>>(3)?,
                    "department": r.get::<_, Option<String>>(4)?,
                    "external": external != 0,
                }
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };

    ok(&req.id, json!({ "examiners": examiners }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "examiners.assign" => Some(handle_assign(state, req)),
        "examiners.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
