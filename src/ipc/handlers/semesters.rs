use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, db_query_err, is_unique_violation, optional_bool, optional_str, required_i64,
    required_str, semester_status,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, session, department, semester_no, active
         FROM semesters
         ORDER BY department, session, semester_no",
    ) {
        Ok(s) => s,
        Err(e) => return db_query_err(req, e),
    };
    let rows: Vec<(String, String, String, String, i64, i64)> = match stmt
        .query_map([], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };

    let mut semesters = Vec::with_capacity(rows.len());
    for (id, name, session, department, semester_no, active) in rows {
        let status = match semester_status(conn, &id) {
            Ok(v) => v,
            Err(e) => return db_query_err(req, e),
        };
        semesters.push(json!({
            "id": id,
            "name": name,
            "session": session,
            "department": department,
            "semesterNo": semester_no,
            "active": active != 0,
            "status": status,
        }));
    }

    ok(&req.id, json!({ "semesters": semesters }))
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match required_str(req, "session") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let department = match required_str(req, "department") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester_no = match required_i64(req, "semesterNo") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if semester_no < 1 {
        return err(&req.id, "validation_failed", "semesterNo must be >= 1", None);
    }

    let id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO semesters(id, name, session, department, semester_no, active)
         VALUES (?, ?, ?, ?, ?, 1)",
        (&id, &name, &session, &department, semester_no),
    ) {
        Ok(_) => ok(&req.id, json!({ "semesterId": id })),
        Err(e) if is_unique_violation(&e) => err(
            &req.id,
            "conflict",
            "semester already exists for this department/session",
            Some(json!({ "department": department, "session": session, "semesterNo": semester_no })),
        ),
        Err(e) => db_query_err(req, e),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester_id = match required_str(req, "semesterId") {
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
            "UPDATE semesters SET name = ? WHERE id = ?",
            (name, &semester_id),
        ) {
            return db_query_err(req, e);
        }
    }
    if let Some(active) = active {
        if let Err(e) = conn.execute(
            "UPDATE semesters SET active = ? WHERE id = ?",
            (active as i64, &semester_id),
        ) {
            return db_query_err(req, e);
        }
    }

    ok(&req.id, json!({ "semesterId": semester_id }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let in_use: i64 = match conn.query_row(
        "SELECT (SELECT COUNT(*) FROM courses WHERE semester_id = ?1)
              + (SELECT COUNT(*) FROM students WHERE semester_id = ?1)",
        [&semester_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };
    if in_use > 0 {
        return err(
            &req.id,
            "conflict",
            "semester still has courses or students",
            None,
        );
    }

    if let Err(e) = conn.execute("DELETE FROM approvals WHERE semester_id = ?", [&semester_id]) {
        return db_query_err(req, e);
    }
    match conn.execute("DELETE FROM semesters WHERE id = ?", [&semester_id]) {
        Ok(0) => err(&req.id, "not_found", "semester not found", None),
        Ok(_) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => db_query_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "semesters.list" => Some(handle_list(state, req)),
        "semesters.create" => Some(handle_create(state, req)),
        "semesters.update" => Some(handle_update(state, req)),
        "semesters.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
