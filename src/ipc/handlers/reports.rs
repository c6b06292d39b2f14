use crate::grade::{self, GradeContext, StudentResultRow, StudentType};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, db_query_err, grade_err, now_rfc3339, optional_str, required_str, semester_status,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

/// Tabulation sheets print 25 student rows per page.
pub const TABULATION_ROWS_PER_PAGE: usize = 25;

fn gpa_display(gpa: Option<f64>) -> serde_json::Value {
    match gpa {
        Some(v) => json!(v),
        None => json!("N/A"),
    }
}

fn remarks_for(row: &StudentResultRow) -> Vec<String> {
    let mut remarks = Vec::new();
    if !row.failed_courses.is_empty() {
        remarks.push(format!("F in {}", row.failed_courses.join(", ")));
    }
    if !row.incomplete_courses.is_empty() {
        remarks.push(format!("Incomplete: {}", row.incomplete_courses.join(", ")));
    }
    remarks
}

fn row_json(row: &StudentResultRow) -> serde_json::Value {
    json!({
        "studentId": row.student_id,
        "rollNo": row.roll_no,
        "registrationNo": row.registration_no,
        "name": row.name,
        "cells": row.cells,
        "creditsAttempted": row.credits_attempted,
        "creditsEarned": row.credits_earned,
        "gpa": gpa_display(row.gpa),
        "status": row.status,
        "remarks": remarks_for(row),
    })
}

fn paginate(rows: Vec<serde_json::Value>) -> (Vec<serde_json::Value>, usize) {
    if rows.is_empty() {
        return (vec![json!({ "pageNo": 1, "rows": [] })], 1);
    }
    let pages: Vec<serde_json::Value> = rows
        .chunks(TABULATION_ROWS_PER_PAGE)
        .enumerate()
        .map(|(i, chunk)| json!({ "pageNo": i + 1, "rows": chunk }))
        .collect();
    let count = pages.len();
    (pages, count)
}

fn handle_semester_result_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_type = match optional_str(req, "studentType") {
        None => StudentType::Regular,
        Some(raw) => match StudentType::parse(&raw) {
            Some(t) => t,
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

    let ctx = GradeContext {
        conn,
        semester_id: &semester_id,
    };
    let results = match grade::compute_semester_results(&ctx, student_type) {
        Ok(v) => v,
        Err(e) => return grade_err(req, e),
    };
    let approval = match semester_status(conn, &semester_id) {
        Ok(v) => v,
        Err(e) => return db_query_err(req, e),
    };

    let rows_json: Vec<serde_json::Value> = results.rows.iter().map(row_json).collect();
    let (pages, page_count) = paginate(rows_json);

    ok(
        &req.id,
        json!({
            "semester": results.semester,
            "studentType": results.student_type,
            "approvalStatus": approval,
            "generatedAt": now_rfc3339(),
            "courses": results.courses,
            "courseSummary": results.course_summary,
            "rowsPerPage": TABULATION_ROWS_PER_PAGE,
            "pageCount": page_count,
            "pages": pages,
        }),
    )
}

fn handle_transcript_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let transcript = match grade::compute_transcript(conn, &student_id) {
        Ok(v) => v,
        Err(e) => return grade_err(req, e),
    };

    let semesters: Vec<serde_json::Value> = transcript
        .semesters
        .iter()
        .map(|s| {
            json!({
                "semester": s.semester,
                "rollNo": s.roll_no,
                "courses": s.courses,
                "gpa": gpa_display(s.gpa),
                "creditsEarned": s.credits_earned,
                "status": s.status,
                "failedCourses": s.failed_courses,
                "incompleteCourses": s.incomplete_courses,
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "registrationNo": transcript.registration_no,
            "name": transcript.name,
            "department": transcript.department,
            "session": transcript.session,
            "generatedAt": now_rfc3339(),
            "semesters": semesters,
            "cumulativeGpa": gpa_display(transcript.cumulative_gpa),
            "totalCreditsEarned": transcript.total_credits_earned,
            "improvements": transcript.improvements,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.semesterResultModel" => Some(handle_semester_result_model(state, req)),
        "reports.transcriptModel" => Some(handle_transcript_model(state, req)),
        _ => None,
    }
}
