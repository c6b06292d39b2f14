use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_resultd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn resultd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{}",
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "expected error: {}",
        value
    );
    value
        .pointer("/error/code")
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

fn seed_enrollment(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
) -> (String, String) {
    let semester = request_ok(
        stdin,
        reader,
        "s",
        "semesters.create",
        json!({ "name": "5th", "session": "2019-20", "department": "CSE", "semesterNo": 5 }),
    )["semesterId"]
        .as_str()
        .expect("semesterId")
        .to_string();
    let student = request_ok(
        stdin,
        reader,
        "st",
        "students.create",
        json!({ "semesterId": semester, "rollNo": "1901", "registrationNo": "REG-1901", "name": "S" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    let course = request_ok(
        stdin,
        reader,
        "c",
        "courses.create",
        json!({ "semesterId": semester, "code": "CSE-501", "title": "T", "credit": 3.0 }),
    )["courseId"]
        .as_str()
        .expect("courseId")
        .to_string();
    let enrollment = request_ok(
        stdin,
        reader,
        "e",
        "enrollments.create",
        json!({ "studentId": student, "courseId": course, "studentType": "regular" }),
    )["enrollmentId"]
        .as_str()
        .expect("enrollmentId")
        .to_string();
    (course, enrollment)
}

#[test]
fn third_script_rejected_until_required() {
    let workspace = temp_dir("resultd-third-gate");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (_, enrollment) = seed_enrollment(&mut stdin, &mut reader);

    // No scripts yet.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "x3a",
        "marks.externalSet",
        json!({ "enrollmentId": enrollment, "role": "third", "marks": 30.0 }),
    );
    assert_eq!(code, "validation_failed");

    // Close scripts: still no third.
    request_ok(
        &mut stdin,
        &mut reader,
        "x1",
        "marks.externalSet",
        json!({ "enrollmentId": enrollment, "role": "first", "marks": 50.0 }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "x2",
        "marks.externalSet",
        json!({ "enrollmentId": enrollment, "role": "second", "marks": 42.0 }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "x3b",
        "marks.externalSet",
        json!({ "enrollmentId": enrollment, "role": "third", "marks": 30.0 }),
    );
    assert_eq!(code, "validation_failed");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn wide_gap_forces_third_then_averages_closest_pair() {
    let workspace = temp_dir("resultd-third-avg");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (course, enrollment) = seed_enrollment(&mut stdin, &mut reader);

    request_ok(
        &mut stdin,
        &mut reader,
        "x1",
        "marks.externalSet",
        json!({ "enrollmentId": enrollment, "role": "first", "marks": 55.0 }),
    );
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "x2",
        "marks.externalSet",
        json!({ "enrollmentId": enrollment, "role": "second", "marks": 40.0 }),
    );
    assert_eq!(
        result.pointer("/external/state").and_then(|v| v.as_str()),
        Some("thirdRequired")
    );

    let status = request_ok(
        &mut stdin,
        &mut reader,
        "cs1",
        "marks.courseStatus",
        json!({ "courseId": course }),
    );
    assert_eq!(
        status
            .pointer("/students/0/external/state")
            .and_then(|v| v.as_str()),
        Some("thirdRequired")
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "x3",
        "marks.externalSet",
        json!({ "enrollmentId": enrollment, "role": "third", "marks": 52.0 }),
    );
    // Closest pair is (55, 52) -> 53.5.
    assert_eq!(
        result.pointer("/external/state").and_then(|v| v.as_str()),
        Some("resolved")
    );
    assert_eq!(
        result.pointer("/external/marks").and_then(|v| v.as_f64()),
        Some(53.5)
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn close_scripts_resolve_without_third() {
    let workspace = temp_dir("resultd-third-skip");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (_, enrollment) = seed_enrollment(&mut stdin, &mut reader);

    request_ok(
        &mut stdin,
        &mut reader,
        "x1",
        "marks.externalSet",
        json!({ "enrollmentId": enrollment, "role": "first", "marks": 52.0 }),
    );
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "x2",
        "marks.externalSet",
        json!({ "enrollmentId": enrollment, "role": "second", "marks": 40.0 }),
    );
    // Gap of exactly 12 stays within the two-examiner rule.
    assert_eq!(
        result.pointer("/external/state").and_then(|v| v.as_str()),
        Some("resolved")
    );
    assert_eq!(
        result.pointer("/external/marks").and_then(|v| v.as_f64()),
        Some(46.0)
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn external_marks_validate_range() {
    let workspace = temp_dir("resultd-ext-range");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (_, enrollment) = seed_enrollment(&mut stdin, &mut reader);

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "x1",
        "marks.externalSet",
        json!({ "enrollmentId": enrollment, "role": "first", "marks": 61.0 }),
    );
    assert_eq!(code, "validation_failed");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "im",
        "marks.internalSet",
        json!({ "enrollmentId": enrollment, "examMarks": 33.0, "attendanceMarks": 5.0 }),
    );
    assert_eq!(code, "validation_failed");

    drop(stdin);
    let _ = child.wait();
}
