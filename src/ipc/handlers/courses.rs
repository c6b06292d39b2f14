use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, db_query_err, is_unique_violation, optional_f64, optional_str, required_f64,
    required_str, semester_exists,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, code, title, credit, sort_order
         FROM courses
         WHERE semester_id = ?
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return db_query_err(req, e),
    };
    let courses = match stmt
        .query_map([&semester_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "title": r.get::<_, String>(2)?,
                "credit": r.get::<_, f64>(3)?,
                "sortOrder": r.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };

    ok(&req.id, json!({ "courses": courses }))
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let code = match required_str(req, "code") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let credit = match required_f64(req, "credit") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if credit <= 0.0 {
        return err(
            &req.id,
            "validation_failed",
            "credit must be positive",
            Some(json!({ "credit": credit })),
        );
    }

    match semester_exists(conn, &semester_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "semester not found", None),
        Err(e) => return db_query_err(req, e),
    }

    let next_sort: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM courses WHERE semester_id = ?",
        [&semester_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };

    let id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO courses(id, semester_id, code, title, credit, sort_order)
         VALUES (?, ?, ?, ?, ?, ?)",
        (&id, &semester_id, &code, &title, credit, next_sort),
    ) {
        Ok(_) => ok(&req.id, json!({ "courseId": id })),
        Err(e) if is_unique_violation(&e) => err(
            &req.id,
            "conflict",
            "course code already exists in this semester",
            Some(json!({ "code": code })),
        ),
        Err(e) => db_query_err(req, e),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let title = optional_str(req, "title");
    let credit = match optional_f64(req, "credit") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if title.is_none() && credit.is_none() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }
    if let Some(credit) = credit {
        if credit <= 0.0 {
            return err(
                &req.id,
                "validation_failed",
                "credit must be positive",
                Some(json!({ "credit": credit })),
            );
        }
    }

    if let Some(title) = &title {
        if let Err(e) = conn.execute(
            "UPDATE courses SET title = ? WHERE id = ?",
            (title, &course_id),
        ) {
            return db_query_err(req, e);
        }
    }
    if let Some(credit) = credit {
        if let Err(e) = conn.execute(
            "UPDATE courses SET credit = ? WHERE id = ?",
            (credit, &course_id),
        ) {
            return db_query_err(req, e);
        }
    }

    ok(&req.id, json!({ "courseId": course_id }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let enrolled: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM enrollments WHERE course_id = ?",
        [&course_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };
    if enrolled > 0 {
        return err(&req.id, "conflict", "course still has enrollments", None);
    }

    if let Err(e) = conn.execute(
        "DELETE FROM course_examiners WHERE course_id = ?",
        [&course_id],
    ) {
        return db_query_err(req, e);
    }
    match conn.execute("DELETE FROM courses WHERE id = ?", [&course_id]) {
        Ok(0) => err(&req.id, "not_found", "course not found", None),
        Ok(_) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => db_query_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(handle_list(state, req)),
        "courses.create" => Some(handle_create(state, req)),
        "courses.update" => Some(handle_update(state, req)),
        "courses.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
