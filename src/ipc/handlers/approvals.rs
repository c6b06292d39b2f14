use crate::grade::{self, GradeContext, StudentType};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, db_query_err, grade_err, now_rfc3339, optional_str, required_str, semester_exists,
    semester_status,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn set_status(
    conn: &Connection,
    semester_id: &str,
    status: &str,
    actor: Option<&str>,
    note: Option<&str>,
) -> Result<(), rusqlite::Error> {
    let updated_at = now_rfc3339();
    conn.execute(
        "INSERT INTO approvals(semester_id, status, actor, note, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(semester_id)
         DO UPDATE SET status = ?2, actor = ?3, note = ?4, updated_at = ?5",
        (semester_id, status, actor, note, &updated_at),
    )?;
    Ok(())
}

fn handle_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match semester_exists(conn, &semester_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "semester not found", None),
        Err(e) => return db_query_err(req, e),
    }

    let row: Option<(String, Option<String>, Option<String>, Option<String>)> = match conn
        .query_row(
            "SELECT status, actor, note, updated_at FROM approvals WHERE semester_id = ?",
            [&semester_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };

    let (status, actor, note, updated_at) =
        row.unwrap_or_else(|| ("draft".to_string(), None, None, None));
    ok(
        &req.id,
        json!({
            "semesterId": semester_id,
            "status": status,
            "actor": actor,
            "note": note,
            "updatedAt": updated_at,
        }),
    )
}

fn expect_status(
    conn: &Connection,
    req: &Request,
    semester_id: &str,
    expected: &str,
) -> Result<(), serde_json::Value> {
    match semester_status(conn, semester_id) {
        Ok(status) if status == expected => Ok(()),
        Ok(status) => Err(err(
            &req.id,
            "conflict",
            format!("semester is {}, expected {}", status, expected),
            None,
        )),
        Err(e) => Err(db_query_err(req, e)),
    }
}

fn handle_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let actor = optional_str(req, "actor");
    let note = optional_str(req, "note");

    match semester_exists(conn, &semester_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "semester not found", None),
        Err(e) => return db_query_err(req, e),
    }
    if let Err(resp) = expect_status(conn, req, &semester_id, "draft") {
        return resp;
    }

    let has_committee: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM committees WHERE semester_id = ?",
            [&semester_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };
    if has_committee.is_none() {
        return err(
            &req.id,
            "conflict",
            "an exam committee must be formed before submission",
            None,
        );
    }

    match set_status(conn, &semester_id, "submitted", actor.as_deref(), note.as_deref()) {
        Ok(()) => ok(&req.id, json!({ "status": "submitted" })),
        Err(e) => db_query_err(req, e),
    }
}

fn handle_approve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let actor = optional_str(req, "actor");
    let note = optional_str(req, "note");

    if let Err(resp) = expect_status(conn, req, &semester_id, "submitted") {
        return resp;
    }

    // Every attempt must have a resolved course result before approval.
    let ctx = GradeContext {
        conn,
        semester_id: &semester_id,
    };
    let mut pending: Vec<serde_json::Value> = Vec::new();
    for student_type in [StudentType::Regular, StudentType::Improvement] {
        let results = match grade::compute_semester_results(&ctx, student_type) {
            Ok(v) => v,
            Err(e) => return grade_err(req, e),
        };
        for row in &results.rows {
            if !row.incomplete_courses.is_empty() {
                pending.push(json!({
                    "rollNo": row.roll_no,
                    "studentType": student_type.as_str(),
                    "courses": row.incomplete_courses,
                }));
            }
        }
    }
    if !pending.is_empty() {
        return err(
            &req.id,
            "conflict",
            "semester has unresolved course results",
            Some(json!({ "pending": pending })),
        );
    }

    match set_status(conn, &semester_id, "approved", actor.as_deref(), note.as_deref()) {
        Ok(()) => ok(&req.id, json!({ "status": "approved" })),
        Err(e) => db_query_err(req, e),
    }
}

fn handle_publish(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let actor = optional_str(req, "actor");
    let note = optional_str(req, "note");

    if let Err(resp) = expect_status(conn, req, &semester_id, "approved") {
        return resp;
    }

    match set_status(conn, &semester_id, "published", actor.as_deref(), note.as_deref()) {
        Ok(()) => ok(&req.id, json!({ "status": "published" })),
        Err(e) => db_query_err(req, e),
    }
}

fn handle_reopen(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let actor = optional_str(req, "actor");
    let note = optional_str(req, "note");

    match semester_status(conn, &semester_id) {
        Ok(status) if status != "draft" => {}
        Ok(_) => return err(&req.id, "conflict", "semester is already draft", None),
        Err(e) => return db_query_err(req, e),
    }

    match set_status(conn, &semester_id, "draft", actor.as_deref(), note.as_deref()) {
        Ok(()) => ok(&req.id, json!({ "status": "draft" })),
        Err(e) => db_query_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "approval.status" => Some(handle_status(state, req)),
        "approval.submit" => Some(handle_submit(state, req)),
        "approval.approve" => Some(handle_approve(state, req)),
        "approval.publish" => Some(handle_publish(state, req)),
        "approval.reopen" => Some(handle_reopen(state, req)),
        _ => None,
    }
}
