use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, db_query_err, optional_bool, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, designation, department, external
         FROM teachers
         ORDER BY name",
    ) {
        Ok(s) => s,
        Err(e) => return db_query_err(req, e),
    };
    let teachers = match stmt
        .query_map([], |r| {
            let external: i64 = r.get(4)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "designation": r.get::<_, Option<String>>(2)?,
                "department": r.get::<_, Option<String>>(3)?,
                "external": external != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };

    ok(&req.id, json!({ "teachers": teachers }))
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
    let designation = optional_str(req, "designation");
    let department = optional_str(req, "department");
    let external = optional_bool(req, "external").unwrap_or(false);

    let id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO teachers(id, name, designation, department, external)
         VALUES (?, ?, ?, ?, ?)",
        (&id, &name, &designation, &department, external as i64),
    ) {
        Ok(_) => ok(&req.id, json!({ "teacherId": id })),
        Err(e) => db_query_err(req, e),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let name = optional_str(req, "name");
    let designation = optional_str(req, "designation");
    let department = optional_str(req, "department");
    let external = optional_bool(req, "external");
    if name.is_none() && designation.is_none() && department.is_none() && external.is_none() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    if let Some(name) = &name {
        if let Err(e) = conn.execute(
            "UPDATE teachers SET name = ? WHERE id = ?",
            (name, &teacher_id),
        ) {
            return db_query_err(req, e);
        }
    }
    if let Some(designation) = &designation {
        if let Err(e) = conn.execute(
            "UPDATE teachers SET designation = ? WHERE id = ?",
            (designation, &teacher_id),
        ) {
            return db_query_err(req, e);
        }
    }
    if let Some(department) = &department {
        if let Err(e) = conn.execute(
            "UPDATE teachers SET department = ? WHERE id = ?",
            (department, &teacher_id),
        ) {
            return db_query_err(req, e);
        }
    }
    if let Some(external) = external {
        if let Err(e) = conn.execute(
            "UPDATE teachers SET external = ? WHERE id = ?",
            (external as i64, &teacher_id),
        ) {
            return db_query_err(req, e);
        }
    }

    ok(&req.id, json!({ "teacherId": teacher_id }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let in_use: i64 = match conn.query_row(
        "SELECT (SELECT COUNT(*) FROM course_examiners WHERE teacher_id = ?1)
              + (SELECT COUNT(*) FROM committee_members WHERE teacher_id = ?1)
              + (SELECT COUNT(*) FROM committees WHERE president_teacher_id = ?1)",
        [&teacher_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };
    if in_use > 0 {
        return err(
            &req.id,
            "conflict",
            "teacher is assigned as examiner or committee member",
            None,
        );
    }

    match conn.execute("DELETE FROM teachers WHERE id = ?", [&teacher_id]) {
        Ok(0) => err(&req.id, "not_found", "teacher not found", None),
        Ok(_) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => db_query_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(handle_list(state, req)),
        "teachers.create" => Some(handle_create(state, req)),
        "teachers.update" => Some(handle_update(state, req)),
        "teachers.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
