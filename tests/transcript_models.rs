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

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct Semester {
    student: String,
    courses: Vec<String>,
}

fn seed_semester(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    semester_no: i64,
    roll: &str,
    registration: &str,
    course_codes: &[(&str, f64)],
) -> Semester {
    let semester = request_ok(
        stdin,
        reader,
        "sem",
        "semesters.create",
        json!({
            "name": format!("Semester {}", semester_no),
            "session": "2019-20",
            "department": "CSE",
            "semesterNo": semester_no,
        }),
    )["semesterId"]
        .as_str()
        .expect("semesterId")
        .to_string();

    let student = request_ok(
        stdin,
        reader,
        "stu",
        "students.create",
        json!({
            "semesterId": semester,
            "rollNo": roll,
            "registrationNo": registration,
            "name": "Anika Tabassum",
        }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();

    let mut courses = Vec::new();
    for (code, credit) in course_codes {
        let id = request_ok(
            stdin,
            reader,
            "crs",
            "courses.create",
            json!({
                "semesterId": semester,
                "code": code,
                "title": format!("Course {}", code),
                "credit": credit,
            }),
        )["courseId"]
            .as_str()
            .expect("courseId")
            .to_string();
        courses.push(id);
    }

    Semester { student, courses }
}

fn enroll_and_mark(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    student: &str,
    course: &str,
    exam: f64,
    attendance: f64,
    external: f64,
) {
    let enrollment = request_ok(
        stdin,
        reader,
        "enr",
        "enrollments.create",
        json!({ "studentId": student, "courseId": course, "studentType": "regular" }),
    )["enrollmentId"]
        .as_str()
        .expect("enrollmentId")
        .to_string();
    request_ok(
        stdin,
        reader,
        "im",
        "marks.internalSet",
        json!({ "enrollmentId": enrollment, "examMarks": exam, "attendanceMarks": attendance }),
    );
    for role in ["first", "second"] {
        request_ok(
            stdin,
            reader,
            "xm",
            "marks.externalSet",
            json!({ "enrollmentId": enrollment, "role": role, "marks": external }),
        );
    }
}

#[test]
fn transcript_spans_semesters_by_registration_number() {
    let workspace = temp_dir("resultd-transcript");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // Two semester memberships sharing one registration number.
    let fifth = seed_semester(
        &mut stdin,
        &mut reader,
        5,
        "1901",
        "REG-2019-1901",
        &[("CSE-501", 3.0), ("CSE-502", 1.5)],
    );
    let sixth = seed_semester(
        &mut stdin,
        &mut reader,
        6,
        "1901",
        "REG-2019-1901",
        &[("CSE-601", 3.0), ("CSE-602", 3.0)],
    );

    // 5th semester: 86 (A+, 4.00) and 58 (B-, 2.75).
    enroll_and_mark(
        &mut stdin,
        &mut reader,
        &fifth.student,
        &fifth.courses[0],
        30.0,
        8.0,
        48.0,
    );
    enroll_and_mark(
        &mut stdin,
        &mut reader,
        &fifth.student,
        &fifth.courses[1],
        20.0,
        6.0,
        32.0,
    );

    // 6th semester: 62 (B, 3.00) as a regular attempt.
    enroll_and_mark(
        &mut stdin,
        &mut reader,
        &sixth.student,
        &sixth.courses[0],
        24.0,
        7.0,
        31.0,
    );

    // Improvement attempt in the 6th semester; carries its internal and
    // stays out of the cumulative GPA.
    let improvement = request_ok(
        &mut stdin,
        &mut reader,
        "imp",
        "enrollments.create",
        json!({
            "studentId": sixth.student,
            "courseId": sixth.courses[1],
            "studentType": "improvement",
            "carriedInternal": 26.0,
        }),
    )["enrollmentId"]
        .as_str()
        .expect("enrollmentId")
        .to_string();
    for role in ["first", "second"] {
        request_ok(
            &mut stdin,
            &mut reader,
            "impx",
            "marks.externalSet",
            json!({ "enrollmentId": improvement, "role": role, "marks": 40.0 }),
        );
    }

    let transcript = request_ok(
        &mut stdin,
        &mut reader,
        "tr",
        "reports.transcriptModel",
        json!({ "studentId": fifth.student }),
    );

    assert_eq!(
        transcript
            .get("registrationNo")
            .and_then(|v| v.as_str()),
        Some("REG-2019-1901")
    );
    let semesters = transcript
        .get("semesters")
        .and_then(|v| v.as_array())
        .expect("semesters");
    assert_eq!(semesters.len(), 2);

    // (3*4.00 + 1.5*2.75) / 4.5 = 3.5833 -> 3.58
    assert_eq!(
        semesters[0].get("gpa").and_then(|v| v.as_f64()),
        Some(3.58)
    );
    assert_eq!(
        semesters[0]
            .pointer("/semester/semesterNo")
            .and_then(|v| v.as_i64()),
        Some(5)
    );
    assert_eq!(
        semesters[1].get("gpa").and_then(|v| v.as_f64()),
        Some(3.0)
    );
    assert_eq!(
        semesters[1]
            .pointer("/courses/0/cell/letter")
            .and_then(|v| v.as_str()),
        Some("B")
    );

    // (3*4.00 + 1.5*2.75 + 3*3.00) / 7.5 = 3.35; improvement excluded.
    assert_eq!(
        transcript.get("cumulativeGpa").and_then(|v| v.as_f64()),
        Some(3.35)
    );
    assert_eq!(
        transcript
            .get("totalCreditsEarned")
            .and_then(|v| v.as_f64()),
        Some(7.5)
    );

    let improvements = transcript
        .get("improvements")
        .and_then(|v| v.as_array())
        .expect("improvements");
    assert_eq!(improvements.len(), 1);
    assert_eq!(
        improvements[0].get("code").and_then(|v| v.as_str()),
        Some("CSE-602")
    );
    // carried 26 + external 40 = 66 (B+).
    assert_eq!(
        improvements[0]
            .pointer("/cell/total")
            .and_then(|v| v.as_f64()),
        Some(66.0)
    );
    assert_eq!(
        improvements[0]
            .pointer("/cell/letter")
            .and_then(|v| v.as_str()),
        Some("B+")
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn transcript_with_unresolved_marks_has_no_gpa() {
    let workspace = temp_dir("resultd-transcript-na");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let fifth = seed_semester(
        &mut stdin,
        &mut reader,
        5,
        "1901",
        "REG-2019-1901",
        &[("CSE-501", 3.0)],
    );
    let enrollment = request_ok(
        &mut stdin,
        &mut reader,
        "enr",
        "enrollments.create",
        json!({ "studentId": fifth.student, "courseId": fifth.courses[0], "studentType": "regular" }),
    )["enrollmentId"]
        .as_str()
        .expect("enrollmentId")
        .to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "im",
        "marks.internalSet",
        json!({ "enrollmentId": enrollment, "examMarks": 25.0, "attendanceMarks": 7.0 }),
    );

    let transcript = request_ok(
        &mut stdin,
        &mut reader,
        "tr",
        "reports.transcriptModel",
        json!({ "studentId": fifth.student }),
    );

    assert_eq!(
        transcript.pointer("/semesters/0/gpa").and_then(|v| v.as_str()),
        Some("N/A")
    );
    assert_eq!(
        transcript
            .pointer("/semesters/0/status")
            .and_then(|v| v.as_str()),
        Some("Failed")
    );
    assert_eq!(
        transcript.get("cumulativeGpa").and_then(|v| v.as_str()),
        Some("N/A")
    );
    assert_eq!(
        transcript
            .get("totalCreditsEarned")
            .and_then(|v| v.as_f64()),
        Some(0.0)
    );

    drop(stdin);
    let _ = child.wait();
}
