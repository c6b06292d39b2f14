use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, db_query_err, now_rfc3339, required_str, semester_exists, semester_status,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn teacher_json(
    conn: &rusqlite::Connection,
    teacher_id: &str,
) -> Result<Option<serde_json::Value>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, name, designation, department, external FROM teachers WHERE id = ?",
        [teacher_id],
        |r| {
            let external: i64 = r.get(4)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "designation": r.get::<_, Option<String>>(2)?,
                "department": r.get::<_, Option<String>>(3)?,
                "external": external != 0,
            }))
        },
    )
    .optional()
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let row: Option<(String, String, String)> = match conn
        .query_row(
            "SELECT id, president_teacher_id, formed_at FROM committees WHERE semester_id = ?",
            [&semester_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };
    let Some((committee_id, president_id, formed_at)) = row else {
        return ok(&req.id, json!({ "committee": null }));
    };

    let president = match teacher_json(conn, &president_id) {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };

    let mut stmt = match conn.prepare(
        "SELECT t.id, t.name, t.designation, t.department, t.external
         FROM committee_members cm
         JOIN teachers t ON t.id = cm.teacher_id
         WHERE cm.committee_id = ?
         ORDER BY t.name",
    ) {
        Ok(s) => s,
        Err(e) => return db_query_err(req, e),
    };
    let members = match stmt
        .query_map([&committee_id], |r| {
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

    ok(
        &req.id,
        json!({
            "committee": {
                "id": committee_id,
                "president": president,
                "members": members,
                "formedAt": formed_at,
            }
        }),
    )
}

fn handle_form(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let president_id = match required_str(req, "presidentTeacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let member_ids: Vec<String> = match req.params.get("memberTeacherIds") {
        Some(v) => match v.as_array() {
            Some(arr) => {
                let mut out = Vec::with_capacity(arr.len());
                for item in arr {
                    match item.as_str() {
                        Some(s) => out.push(s.to_string()),
                        None => {
                            return err(
                                &req.id,
                                "bad_params",
                                "memberTeacherIds must be an array of ids",
                                None,
                            )
                        }
                    }
                }
                out
            }
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "memberTeacherIds must be an array of ids",
                    None,
                )
            }
        },
        None => Vec::new(),
    };

    match semester_exists(conn, &semester_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "semester not found", None),
        Err(e) => return db_query_err(req, e),
    }
    match semester_status(conn, &semester_id) {
        Ok(status) if status == "draft" => {}
        Ok(status) => {
            return err(
                &req.id,
                "conflict",
                format!("committee can only change while draft (status: {})", status),
                None,
            )
        }
        Err(e) => return db_query_err(req, e),
    }

    if member_ids.iter().any(|m| *m == president_id) {
        return err(
            &req.id,
            "validation_failed",
            "president must not appear among members",
            None,
        );
    }

    for teacher_id in std::iter::once(&president_id).chain(member_ids.iter()) {
        match teacher_json(conn, teacher_id) {
            Ok(Some(_)) => {}
            Ok(None) => {
                return err(
                    &req.id,
                    "not_found",
                    "teacher not found",
                    Some(json!({ "teacherId": teacher_id })),
                )
            }
            Err(e) => return db_query_err(req, e),
        }
    }

    // Replace any existing committee for the semester.
    let existing: Option<String> = match conn
        .query_row(
            "SELECT id FROM committees WHERE semester_id = ?",
            [&semester_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };
    if let Some(old_id) = existing {
        if let Err(e) = conn.execute(
            "DELETE FROM committee_members WHERE committee_id = ?",
            [&old_id],
        ) {
            return db_query_err(req, e);
        }
        if let Err(e) = conn.execute("DELETE FROM committees WHERE id = ?", [&old_id]) {
            return db_query_err(req, e);
        }
    }

    let committee_id = Uuid::new_v4().to_string();
    let formed_at = now_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO committees(id, semester_id, president_teacher_id, formed_at)
         VALUES (?, ?, ?, ?)",
        (&committee_id, &semester_id, &president_id, &formed_at),
    ) {
        return db_query_err(req, e);
    }
    for member_id in &member_ids {
        if let Err(e) = conn.execute(
            "INSERT OR IGNORE INTO committee_members(committee_id, teacher_id) VALUES (?, ?)",
            (&committee_id, member_id),
        ) {
            return db_query_err(req, e);
        }
    }

    ok(
        &req.id,
        json!({ "committeeId": committee_id, "formedAt": formed_at }),
    )
}

fn handle_dissolve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match semester_status(conn, &semester_id) {
        Ok(status) if status == "draft" => {}
        Ok(status) => {
            return err(
                &req.id,
                "conflict",
                format!("committee can only change while draft (status: {})", status),
                None,
            )
        }
        Err(e) => return db_query_err(req, e),
    }

    let existing: Option<String> = match conn
        .query_row(
            "SELECT id FROM committees WHERE semester_id = ?",
            [&semester_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };
    let Some(committee_id) = existing else {
        return err(&req.id, "not_found", "no committee for this semester", None);
    };

    if let Err(e) = conn.execute(
        "DELETE FROM committee_members WHERE committee_id = ?",
        [&committee_id],
    ) {
        return db_query_err(req, e);
    }
    if let Err(e) = conn.execute("DELETE FROM committees WHERE id = ?", [&committee_id]) {
        return db_query_err(req, e);
    }

    ok(&req.id, json!({ "dissolved": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "committee.get" => Some(handle_get(state, req)),
        "committee.form" => Some(handle_form(state, req)),
        "committee.dissolve" => Some(handle_dissolve(state, req)),
        _ => None,
    }
}
