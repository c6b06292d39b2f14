use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, db_query_err, is_unique_violation, optional_bool, optional_str, required_str,
    semester_exists,
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
        "SELECT id, roll_no, registration_no, name, active, sort_order
         FROM students
         WHERE semester_id = ?
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return db_query_err(req, e),
    };
    let students = match stmt
        .query_map([&semester_id], |r| {
            let active: i64 = r.get(4)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "rollNo": r.get::<_, String>(1)?,
                "registrationNo": r.get::<_, String>(2)?,
                "name": r.get::<_, String>(3)?,
                "active": active != 0,
                "sortOrder": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };

    ok(&req.id, json!({ "students": students }))
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
    let roll_no = match required_str(req, "rollNo") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let registration_no = match required_str(req, "registrationNo") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match semester_exists(conn, &semester_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "semester not found", None),
        Err(e) => return db_query_err(req, e),
    }

    let next_sort: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE semester_id = ?",
        [&semester_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };

    let id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO students(id, semester_id, roll_no, registration_no, name, active, sort_order)
         VALUES (?, ?, ?, ?, ?, 1, ?)",
        (&id, &semester_id, &roll_no, &registration_no, &name, next_sort),
    ) {
        Ok(_) => ok(&req.id, json!({ "studentId": id })),
        Err(e) if is_unique_violation(&e) => err(
            &req.id,
            "conflict",
            "roll number already exists in this semester",
            Some(json!({ "rollNo": roll_no })),
        ),
        Err(e) => db_query_err(req, e),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let name = optional_str(req, "name");
    let active = optional_bool(req, "active");
    if name.is_none() && active.is_none() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    if let Some(name) = &name {
        if let Err(e) = conn.execute(
            "UPDATE students SET name = ? WHERE id = ?",
            (name, &student_id),
        ) {
            return db_query_err(req, e);
        }
    }
    if let Some(active) = active {
        if let Err(e) = conn.execute(
            "UPDATE students SET active = ? WHERE id = ?",
            (active as i64, &student_id),
        ) {
            return db_query_err(req, e);
        }
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let enrolled: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM enrollments WHERE student_id = ?",
        [&student_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };
    if enrolled > 0 {
        return err(&req.id, "conflict", "student still has enrollments", None);
    }

    match conn.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        Ok(0) => err(&req.id, "not_found", "student not found", None),
        Ok(_) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => db_query_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_list(state, req)),
        "students.create" => Some(handle_create(state, req)),
        "students.update" => Some(handle_update(state, req)),
        "students.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
