use crate::grade::{
    self, ExaminerRole, ExternalResolution, StudentType, EXTERNAL_MAX, INTERNAL_ATTENDANCE_MAX,
    INTERNAL_EXAM_MAX,
};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, db_query_err, now_rfc3339, required_f64, required_str, semester_locked,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

struct EnrollmentRow {
    student_type: StudentType,
    semester_id: String,
}

fn load_enrollment(
    conn: &Connection,
    enrollment_id: &str,
) -> Result<Option<EnrollmentRow>, rusqlite::Error> {
    conn.query_row(
        "SELECT e.student_type, c.semester_id
         FROM enrollments e
         JOIN courses c ON c.id = e.course_id
         WHERE e.id = ?",
        [enrollment_id],
        |r| {
            let type_raw: String = r.get(0)?;
            Ok((type_raw, r.get::<_, String>(1)?))
        },
    )
    .optional()
    .map(|row| {
        row.and_then(|(type_raw, semester_id)| {
            StudentType::parse(&type_raw).map(|student_type| EnrollmentRow {
                student_type,
                semester_id,
            })
        })
    })
}

fn guard_unlocked(
    conn: &Connection,
    req: &Request,
    semester_id: &str,
) -> Result<(), serde_json::Value> {
    match semester_locked(conn, semester_id) {
        Ok(false) => Ok(()),
        Ok(true) => Err(err(
            &req.id,
            "conflict",
            "semester result is approved; reopen it first",
            None,
        )),
        Err(e) => Err(db_query_err(req, e)),
    }
}

fn stored_script(
    conn: &Connection,
    enrollment_id: &str,
    role: ExaminerRole,
) -> Result<Option<f64>, rusqlite::Error> {
    conn.query_row(
        "SELECT marks FROM external_marks WHERE enrollment_id = ? AND role = ?",
        (enrollment_id, role.as_str()),
        |r| r.get(0),
    )
    .optional()
}

fn handle_internal_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let enrollment_id = match required_str(req, "enrollmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_marks = match required_f64(req, "examMarks") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let attendance_marks = match required_f64(req, "attendanceMarks") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let enrollment = match load_enrollment(conn, &enrollment_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "enrollment not found", None),
        Err(e) => return db_query_err(req, e),
    };
    if let Err(resp) = guard_unlocked(conn, req, &enrollment.semester_id) {
        return resp;
    }
    if enrollment.student_type == StudentType::Improvement {
        return err(
            &req.id,
            "validation_failed",
            "improvement enrollments carry their previous internal marks",
            None,
        );
    }

    if !(0.0..=INTERNAL_EXAM_MAX).contains(&exam_marks) {
        return err(
            &req.id,
            "validation_failed",
            format!("examMarks must be between 0 and {}", INTERNAL_EXAM_MAX),
            Some(json!({ "examMarks": exam_marks })),
        );
    }
    if !(0.0..=INTERNAL_ATTENDANCE_MAX).contains(&attendance_marks) {
        return err(
            &req.id,
            "validation_failed",
            format!(
                "attendanceMarks must be between 0 and {}",
                INTERNAL_ATTENDANCE_MAX
            ),
            Some(json!({ "attendanceMarks": attendance_marks })),
        );
    }

    let updated_at = now_rfc3339();
    match conn.execute(
        "INSERT INTO internal_marks(enrollment_id, exam_marks, attendance_marks, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(enrollment_id)
         DO UPDATE SET exam_marks = ?2, attendance_marks = ?3, updated_at = ?4",
        (&enrollment_id, exam_marks, attendance_marks, &updated_at),
    ) {
        Ok(_) => ok(
            &req.id,
            json!({
                "enrollmentId": enrollment_id,
                "internalTotal": exam_marks + attendance_marks,
            }),
        ),
        Err(e) => db_query_err(req, e),
    }
}

fn handle_external_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let enrollment_id = match required_str(req, "enrollmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let role_raw = match required_str(req, "role") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let marks = match required_f64(req, "marks") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let role = match ExaminerRole::parse(&role_raw) {
        Some(ExaminerRole::Internal) | None => {
            return err(
                &req.id,
                "bad_params",
                "role must be one of: first, second, third",
                Some(json!({ "role": role_raw })),
            )
        }
        Some(role) => role,
    };

    let enrollment = match load_enrollment(conn, &enrollment_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "enrollment not found", None),
        Err(e) => return db_query_err(req, e),
    };
    if let Err(resp) = guard_unlocked(conn, req, &enrollment.semester_id) {
        return resp;
    }

    if !(0.0..=EXTERNAL_MAX).contains(&marks) {
        return err(
            &req.id,
            "validation_failed",
            format!("marks must be between 0 and {}", EXTERNAL_MAX),
            Some(json!({ "marks": marks })),
        );
    }

    if role == ExaminerRole::Third {
        let first = match stored_script(conn, &enrollment_id, ExaminerRole::First) {
            Ok(v) => v,
            Err(e) => return db_query_err(req, e),
        };
        let second = match stored_script(conn, &enrollment_id, ExaminerRole::Second) {
            Ok(v) => v,
            Err(e) => return db_query_err(req, e),
        };
        if !grade::third_examiner_required(first, second) {
            return err(
                &req.id,
                "validation_failed",
                "third examiner is not required for this script",
                Some(json!({ "first": first, "second": second })),
            );
        }
    }

    let updated_at = now_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO external_marks(enrollment_id, role, marks, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(enrollment_id, role)
         DO UPDATE SET marks = ?3, updated_at = ?4",
        (&enrollment_id, role.as_str(), marks, &updated_at),
    ) {
        return db_query_err(req, e);
    }

    let first = match stored_script(conn, &enrollment_id, ExaminerRole::First) {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };
    let second = match stored_script(conn, &enrollment_id, ExaminerRole::Second) {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };
    let third = match stored_script(conn, &enrollment_id, ExaminerRole::Third) {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };

    ok(
        &req.id,
        json!({
            "enrollmentId": enrollment_id,
            "external": grade::resolve_external(first, second, third),
        }),
    )
}

fn handle_course_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let course: Option<(String, String)> = match conn
        .query_row(
            "SELECT code, title FROM courses WHERE id = ?",
            [&course_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };
    let Some((code, title)) = course else {
        return err(&req.id, "not_found", "course not found", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT e.id, st.id, st.roll_no, st.name, e.student_type, e.carried_internal,
                im.exam_marks, im.attendance_marks,
                MAX(CASE WHEN xm.role = 'first' THEN xm.marks END),
                MAX(CASE WHEN xm.role = 'second' THEN xm.marks END),
                MAX(CASE WHEN xm.role = 'third' THEN xm.marks END)
         FROM enrollments e
         JOIN students st ON st.id = e.student_id
         LEFT JOIN internal_marks im ON im.enrollment_id = e.id
         LEFT JOIN external_marks xm ON xm.enrollment_id = e.id
         WHERE e.course_id = ?
         GROUP BY e.id
         ORDER BY st.sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return db_query_err(req, e),
    };

    type StatusRow = (
        String,
        String,
        String,
        String,
        String,
        Option<f64>,
        Option<f64>,
        Option<f64>,
        Option<f64>,
        Option<f64>,
        Option<f64>,
    );
    let rows: Vec<StatusRow> = match stmt
        .query_map([&course_id], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
                r.get(6)?,
                r.get(7)?,
                r.get(8)?,
                r.get(9)?,
                r.get(10)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };

    let mut out = Vec::with_capacity(rows.len());
    for (
        enrollment_id,
        student_id,
        roll_no,
        name,
        type_raw,
        carried,
        exam,
        attendance,
        first,
        second,
        third,
    ) in rows
    {
        let student_type = StudentType::parse(&type_raw).unwrap_or(StudentType::Regular);
        let internal = match student_type {
            StudentType::Regular => match (exam, attendance) {
                (Some(e), Some(a)) => Some(e + a),
                _ => None,
            },
            StudentType::Improvement => carried,
        };
        let resolution = grade::resolve_external(first, second, third);
        let result = match (internal, &resolution) {
            (Some(internal), ExternalResolution::Resolved { marks: external }) => {
                Some(grade::course_result(internal, *external))
            }
            _ => None,
        };

        let mut row = json!({
            "enrollmentId": enrollment_id,
            "studentId": student_id,
            "rollNo": roll_no,
            "name": name,
            "studentType": type_raw,
            "internal": internal,
            "scripts": { "first": first, "second": second, "third": third },
            "external": resolution,
        });
        if let Some(result) = result {
            row["result"] = json!(result);
        }
        out.push(row);
    }

    ok(
        &req.id,
        json!({
            "course": { "id": course_id, "code": code, "title": title },
            "students": out,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.internalSet" => Some(handle_internal_set(state, req)),
        "marks.externalSet" => Some(handle_external_set(state, req)),
        "marks.courseStatus" => Some(handle_course_status(state, req)),
        _ => None,
    }
}
