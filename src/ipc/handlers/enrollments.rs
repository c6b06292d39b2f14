use crate::grade::{StudentType, INTERNAL_MAX};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, db_query_err, is_unique_violation, optional_f64, optional_str, required_str,
    semester_locked,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let type_raw = match required_str(req, "studentType") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(student_type) = StudentType::parse(&type_raw) else {
        return err(
            &req.id,
            "bad_params",
            "studentType must be regular or improvement",
            Some(json!({ "studentType": type_raw })),
        );
    };
    let carried_internal = match optional_f64(req, "carriedInternal") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let student_semester: Option<String> = match conn
        .query_row(
            "SELECT semester_id FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };
    let Some(student_semester) = student_semester else {
        return err(&req.id, "not_found", "student not found", None);
    };

    let course_semester: Option<String> = match conn
        .query_row(
            "SELECT semester_id FROM courses WHERE id = ?",
            [&course_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };
    let Some(course_semester) = course_semester else {
        return err(&req.id, "not_found", "course not found", None);
    };

    if student_semester != course_semester {
        return err(
            &req.id,
            "validation_failed",
            "student and course belong to different semesters",
            None,
        );
    }

    match semester_locked(conn, &course_semester) {
        Ok(false) => {}
        Ok(true) => {
            return err(
                &req.id,
                "conflict",
                "semester result is approved; reopen it first",
                None,
            )
        }
        Err(e) => return db_query_err(req, e),
    }

    match student_type {
        StudentType::Improvement => {
            let Some(carried) = carried_internal else {
                return err(
                    &req.id,
                    "validation_failed",
                    "improvement enrollment requires carriedInternal",
                    None,
                );
            };
            if !(0.0..=INTERNAL_MAX).contains(&carried) {
                return err(
                    &req.id,
                    "validation_failed",
                    format!("carriedInternal must be between 0 and {}", INTERNAL_MAX),
                    Some(json!({ "carriedInternal": carried })),
                );
            }
        }
        StudentType::Regular => {
            if carried_internal.is_some() {
                return err(
                    &req.id,
                    "validation_failed",
                    "carriedInternal only applies to improvement enrollments",
                    None,
                );
            }
        }
    }

    let id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO enrollments(id, student_id, course_id, student_type, carried_internal)
         VALUES (?, ?, ?, ?, ?)",
        (
            &id,
            &student_id,
            &course_id,
            student_type.as_str(),
            carried_internal,
        ),
    ) {
        Ok(_) => ok(&req.id, json!({ "enrollmentId": id })),
        Err(e) if is_unique_violation(&e) => err(
            &req.id,
            "conflict",
            "student is already enrolled in this course",
            None,
        ),
        Err(e) => db_query_err(req, e),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let type_filter = match optional_str(req, "studentType") {
        None => None,
        Some(raw) => match StudentType::parse(&raw) {
            Some(t) => Some(t),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "studentType must be regular or improvement",
                    Some(json!({ "studentType": raw })),
                )
            }
        },
    };

    let mut stmt = match conn.prepare(
        "SELECT e.id, e.student_id, st.roll_no, e.course_id, c.code, e.student_type,
                e.carried_internal
         FROM enrollments e
         JOIN students st ON st.id = e.student_id
         JOIN courses c ON c.id = e.course_id
         WHERE c.semester_id = ?
         ORDER BY st.sort_order, c.sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return db_query_err(req, e),
    };
    let rows = match stmt
        .query_map([&semester_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, Option<f64>>(6)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };

    let enrollments: Vec<serde_json::Value> = rows
        .into_iter()
        .filter(|(_, _, _, _, _, student_type, _)| {
            type_filter
                .map(|t| student_type == t.as_str())
                .unwrap_or(true)
        })
        .map(
            |(id, student_id, roll_no, course_id, code, student_type, carried)| {
                json!({
                    "id": id,
                    "studentId": student_id,
                    "rollNo": roll_no,
                    "courseId": course_id,
                    "courseCode": code,
                    "studentType": student_type,
                    "carriedInternal": carried,
                })
            },
        )
        .collect();

    ok(&req.id, json!({ "enrollments": enrollments }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let enrollment_id = match required_str(req, "enrollmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let semester_id =
        match crate::ipc::helpers::enrollment_semester(conn, &enrollment_id) {
            Ok(Some(v)) => v,
            Ok(None) => return err(&req.id, "not_found", "enrollment not found", None),
            Err(e) => return db_query_err(req, e),
        };
    match semester_locked(conn, &semester_id) {
        Ok(false) => {}
        Ok(true) => {
            return err(
                &req.id,
                "conflict",
                "semester result is approved; reopen it first",
                None,
            )
        }
        Err(e) => return db_query_err(req, e),
    }

    let marked: i64 = match conn.query_row(
        "SELECT (SELECT COUNT(*) FROM internal_marks WHERE enrollment_id = ?1)
              + (SELECT COUNT(*) FROM external_marks WHERE enrollment_id = ?1)",
        [&enrollment_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };
    if marked > 0 {
        return err(&req.id, "conflict", "enrollment already has marks", None);
    }

    match conn.execute("DELETE FROM enrollments WHERE id = ?", [&enrollment_id]) {
        Ok(0) => err(&req.id, "not_found", "enrollment not found", None),
        Ok(_) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => db_query_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollments.create" => Some(handle_create(state, req)),
        "enrollments.list" => Some(handle_list(state, req)),
        "enrollments.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
