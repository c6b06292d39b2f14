use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;

pub const INTERNAL_EXAM_MAX: f64 = 32.0;
pub const INTERNAL_ATTENDANCE_MAX: f64 = 8.0;
pub const INTERNAL_MAX: f64 = 40.0;
pub const EXTERNAL_MAX: f64 = 60.0;
pub const PASS_MARK: f64 = 40.0;

/// Gap between first and second examiner marks beyond which a third
/// examiner must evaluate the script (20% of the external full marks).
pub const THIRD_EXAMINER_GAP: f64 = 12.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Grade {
    pub letter: &'static str,
    pub point: f64,
}

/// Ordered boundary table: contiguous bands, point decreasing with the
/// mark band. Totals exactly on a boundary take the higher band.
const GRADE_BANDS: [(f64, &str, f64); 9] = [
    (80.0, "A+", 4.00),
    (75.0, "A", 3.75),
    (70.0, "A-", 3.50),
    (65.0, "B+", 3.25),
    (60.0, "B", 3.00),
    (55.0, "B-", 2.75),
    (50.0, "C+", 2.50),
    (45.0, "C", 2.25),
    (40.0, "D", 2.00),
];

pub fn letter_grade(total: f64) -> Grade {
    for (floor, letter, point) in GRADE_BANDS {
        if total >= floor {
            return Grade { letter, point };
        }
    }
    Grade {
        letter: "F",
        point: 0.0,
    }
}

/// Half-up rounding to 2 decimals, matching the registrar's published
/// GPA figures: `Int(100*x + 0.5) / 100`.
pub fn round_half_up_2(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Credit-weighted grade point average. `None` when total credit is
/// zero; report models render that as "N/A".
pub fn gpa<I>(courses: I) -> Option<f64>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let mut credit_sum = 0.0_f64;
    let mut weighted = 0.0_f64;
    for (credit, point) in courses {
        credit_sum += credit;
        weighted += credit * point;
    }
    if credit_sum > 0.0 {
        Some(weighted / credit_sum)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ExternalResolution {
    Resolved { marks: f64 },
    ThirdRequired,
    Pending { missing: Vec<&'static str> },
}

/// Resolve the final external mark from up to three examiner scripts,
/// each out of 60.
///
/// First and second within THIRD_EXAMINER_GAP of each other average
/// directly. A wider gap forces a third evaluation; once it exists the
/// closest pair is averaged, the higher-valued pair winning an exact
/// distance tie.
pub fn resolve_external(
    first: Option<f64>,
    second: Option<f64>,
    third: Option<f64>,
) -> ExternalResolution {
    let (Some(e1), Some(e2)) = (first, second) else {
        let mut missing = Vec::new();
        if first.is_none() {
            missing.push("first");
        }
        if second.is_none() {
            missing.push("second");
        }
        return ExternalResolution::Pending { missing };
    };

    if (e1 - e2).abs() <= THIRD_EXAMINER_GAP {
        return ExternalResolution::Resolved {
            marks: (e1 + e2) / 2.0,
        };
    }

    let Some(e3) = third else {
        return ExternalResolution::ThirdRequired;
    };

    let mut best = (e1, e2);
    let mut best_gap = (e1 - e2).abs();
    for (a, b) in [(e1, e3), (e2, e3)] {
        let gap = (a - b).abs();
        if gap < best_gap || (gap == best_gap && a + b > best.0 + best.1) {
            best = (a, b);
            best_gap = gap;
        }
    }
    ExternalResolution::Resolved {
        marks: (best.0 + best.1) / 2.0,
    }
}

pub fn third_examiner_required(first: Option<f64>, second: Option<f64>) -> bool {
    matches!(
        resolve_external(first, second, None),
        ExternalResolution::ThirdRequired
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseResult {
    pub total: f64,
    pub letter: &'static str,
    pub point: f64,
    pub passed: bool,
}

pub fn course_result(internal_total: f64, external_final: f64) -> CourseResult {
    let total = internal_total + external_final;
    let grade = letter_grade(total);
    CourseResult {
        total,
        letter: grade.letter,
        point: grade.point,
        passed: total >= PASS_MARK,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentType {
    Regular,
    Improvement,
}

impl StudentType {
    pub fn as_str(self) -> &'static str {
        match self {
            StudentType::Regular => "regular",
            StudentType::Improvement => "improvement",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "regular" => Some(StudentType::Regular),
            "improvement" => Some(StudentType::Improvement),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExaminerRole {
    Internal,
    First,
    Second,
    Third,
}

impl ExaminerRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ExaminerRole::Internal => "internal",
            ExaminerRole::First => "first",
            ExaminerRole::Second => "second",
            ExaminerRole::Third => "third",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "internal" => Some(ExaminerRole::Internal),
            "first" => Some(ExaminerRole::First),
            "second" => Some(ExaminerRole::Second),
            "third" => Some(ExaminerRole::Third),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GradeError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl GradeError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

fn db_err(e: impl ToString) -> GradeError {
    GradeError::new("db_query_failed", e.to_string())
}

#[derive(Debug, Clone)]
pub struct GradeContext<'a> {
    pub conn: &'a Connection,
    pub semester_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterHeader {
    pub id: String,
    pub name: String,
    pub session: String,
    pub department: String,
    pub semester_no: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseDef {
    pub course_id: String,
    pub code: String,
    pub title: String,
    pub credit: f64,
}

/// One cell of the tabulation grid: the state of a single student's
/// attempt at a single course.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum CourseCell {
    Completed {
        internal: f64,
        external: f64,
        total: f64,
        letter: &'static str,
        point: f64,
        passed: bool,
    },
    AwaitingThird,
    Incomplete {
        missing: Vec<&'static str>,
    },
    NotEnrolled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResultStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentResultRow {
    pub student_id: String,
    pub roll_no: String,
    pub registration_no: String,
    pub name: String,
    /// Parallel to the semester's course list.
    pub cells: Vec<CourseCell>,
    pub credits_attempted: f64,
    pub credits_earned: f64,
    pub gpa: Option<f64>,
    pub status: ResultStatus,
    pub failed_courses: Vec<String>,
    pub incomplete_courses: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSummary {
    pub course_id: String,
    pub code: String,
    pub appeared: usize,
    pub passed: usize,
    pub pass_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterResults {
    pub semester: SemesterHeader,
    pub student_type: StudentType,
    pub courses: Vec<CourseDef>,
    pub rows: Vec<StudentResultRow>,
    pub course_summary: Vec<CourseSummary>,
}

#[derive(Debug, Clone)]
struct EnrollmentMarks {
    carried_internal: Option<f64>,
    internal: Option<f64>,
    first: Option<f64>,
    second: Option<f64>,
    third: Option<f64>,
}

impl EnrollmentMarks {
    fn internal_total(&self, student_type: StudentType) -> Option<f64> {
        match student_type {
            StudentType::Regular => self.internal,
            StudentType::Improvement => self.carried_internal,
        }
    }
}

pub fn load_semester_header(
    conn: &Connection,
    semester_id: &str,
) -> Result<SemesterHeader, GradeError> {
    conn.query_row(
        "SELECT id, name, session, department, semester_no FROM semesters WHERE id = ?",
        [semester_id],
        |r| {
            Ok(SemesterHeader {
                id: r.get(0)?,
                name: r.get(1)?,
                session: r.get(2)?,
                department: r.get(3)?,
                semester_no: r.get(4)?,
            })
        },
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| GradeError::new("not_found", "semester not found"))
}

struct SemesterStudent {
    id: String,
    roll_no: String,
    registration_no: String,
    name: String,
}

fn load_marks_by_pair(
    conn: &Connection,
    course_ids: &[String],
    student_type: StudentType,
) -> Result<HashMap<(String, String), EnrollmentMarks>, GradeError> {
    let mut by_pair: HashMap<(String, String), EnrollmentMarks> = HashMap::new();
    if course_ids.is_empty() {
        return Ok(by_pair);
    }

    let placeholders = std::iter::repeat("?")
        .take(course_ids.len())
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "SELECT e.id, e.student_id, e.course_id, e.carried_internal,
                im.exam_marks, im.attendance_marks,
                MAX(CASE WHEN xm.role = 'first' THEN xm.marks END),
                MAX(CASE WHEN xm.role = 'second' THEN xm.marks END),
                MAX(CASE WHEN xm.role = 'third' THEN xm.marks END)
         FROM enrollments e
         LEFT JOIN internal_marks im ON im.enrollment_id = e.id
         LEFT JOIN external_marks xm ON xm.enrollment_id = e.id
         WHERE e.course_id IN ({}) AND e.student_type = ?
         GROUP BY e.id",
        placeholders
    );

    let mut bind_values: Vec<Value> = Vec::with_capacity(course_ids.len() + 1);
    for id in course_ids {
        bind_values.push(Value::Text(id.clone()));
    }
    bind_values.push(Value::Text(student_type.as_str().to_string()));

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params_from_iter(bind_values), |r| {
            let student_id: String = r.get(1)?;
            let course_id: String = r.get(2)?;
            let carried_internal: Option<f64> = r.get(3)?;
            let exam: Option<f64> = r.get(4)?;
            let attendance: Option<f64> = r.get(5)?;
            let first: Option<f64> = r.get(6)?;
            let second: Option<f64> = r.get(7)?;
            let third: Option<f64> = r.get(8)?;
            let internal = match (exam, attendance) {
                (Some(e), Some(a)) => Some(e + a),
                _ => None,
            };
            Ok((
                (student_id, course_id),
                EnrollmentMarks {
                    carried_internal,
                    internal,
                    first,
                    second,
                    third,
                },
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    for (pair, marks) in rows {
        by_pair.insert(pair, marks);
    }
    Ok(by_pair)
}

fn cell_for(marks: &EnrollmentMarks, student_type: StudentType) -> CourseCell {
    let internal = marks.internal_total(student_type);
    let external = resolve_external(marks.first, marks.second, marks.third);

    match (internal, external) {
        (Some(internal), ExternalResolution::Resolved { marks: external }) => {
            let result = course_result(internal, external);
            CourseCell::Completed {
                internal,
                external,
                total: result.total,
                letter: result.letter,
                point: result.point,
                passed: result.passed,
            }
        }
        (Some(_), ExternalResolution::ThirdRequired) => CourseCell::AwaitingThird,
        (None, ExternalResolution::Resolved { .. } | ExternalResolution::ThirdRequired) => {
            CourseCell::Incomplete {
                missing: vec!["internal"],
            }
        }
        (internal, ExternalResolution::Pending { missing: scripts }) => {
            let mut missing = Vec::new();
            if internal.is_none() {
                missing.push("internal");
            }
            missing.extend(scripts);
            CourseCell::Incomplete { missing }
        }
    }
}

/// Aggregate one semester's results for one attempt partition.
/// Regular and improvement attempts never mix: each partition carries
/// its own GPA, pass/fail status and remarks.
pub fn compute_semester_results(
    ctx: &GradeContext<'_>,
    student_type: StudentType,
) -> Result<SemesterResults, GradeError> {
    let conn = ctx.conn;
    let semester = load_semester_header(conn, ctx.semester_id)?;

    let mut courses_stmt = conn
        .prepare(
            "SELECT id, code, title, credit
             FROM courses
             WHERE semester_id = ?
             ORDER BY sort_order",
        )
        .map_err(db_err)?;
    let courses: Vec<CourseDef> = courses_stmt
        .query_map([ctx.semester_id], |r| {
            Ok(CourseDef {
                course_id: r.get(0)?,
                code: r.get(1)?,
                title: r.get(2)?,
                credit: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut students_stmt = conn
        .prepare(
            "SELECT id, roll_no, registration_no, name
             FROM students
             WHERE semester_id = ? AND active = 1
             ORDER BY sort_order",
        )
        .map_err(db_err)?;
    let students: Vec<SemesterStudent> = students_stmt
        .query_map([ctx.semester_id], |r| {
            Ok(SemesterStudent {
                id: r.get(0)?,
                roll_no: r.get(1)?,
                registration_no: r.get(2)?,
                name: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let course_ids: Vec<String> = courses.iter().map(|c| c.course_id.clone()).collect();
    let marks_by_pair = load_marks_by_pair(conn, &course_ids, student_type)?;

    let mut rows: Vec<StudentResultRow> = Vec::new();
    let mut appeared_by_course: HashMap<String, usize> = HashMap::new();
    let mut passed_by_course: HashMap<String, usize> = HashMap::new();

    for s in &students {
        let mut cells: Vec<CourseCell> = Vec::with_capacity(courses.len());
        let mut enrolled_any = false;
        let mut credits_attempted = 0.0_f64;
        let mut credits_earned = 0.0_f64;
        let mut gpa_terms: Vec<(f64, f64)> = Vec::new();
        let mut failed_courses: Vec<String> = Vec::new();
        let mut incomplete_courses: Vec<String> = Vec::new();

        for c in &courses {
            let Some(marks) = marks_by_pair.get(&(s.id.clone(), c.course_id.clone())) else {
                cells.push(CourseCell::NotEnrolled);
                continue;
            };
            enrolled_any = true;
            credits_attempted += c.credit;
            *appeared_by_course.entry(c.course_id.clone()).or_insert(0) += 1;

            let cell = cell_for(marks, student_type);
            match &cell {
                CourseCell::Completed { point, passed, .. } => {
                    gpa_terms.push((c.credit, *point));
                    if *passed {
                        credits_earned += c.credit;
                        *passed_by_course.entry(c.course_id.clone()).or_insert(0) += 1;
                    } else {
                        failed_courses.push(c.code.clone());
                    }
                }
                CourseCell::AwaitingThird | CourseCell::Incomplete { .. } => {
                    incomplete_courses.push(c.code.clone());
                }
                CourseCell::NotEnrolled => {}
            }
            cells.push(cell);
        }

        if !enrolled_any {
            continue;
        }

        let status = if failed_courses.is_empty() && incomplete_courses.is_empty() {
            ResultStatus::Passed
        } else {
            ResultStatus::Failed
        };

        rows.push(StudentResultRow {
            student_id: s.id.clone(),
            roll_no: s.roll_no.clone(),
            registration_no: s.registration_no.clone(),
            name: s.name.clone(),
            cells,
            credits_attempted,
            credits_earned,
            gpa: gpa(gpa_terms).map(round_half_up_2),
            status,
            failed_courses,
            incomplete_courses,
        });
    }

    let course_summary: Vec<CourseSummary> = courses
        .iter()
        .map(|c| {
            let appeared = appeared_by_course.get(&c.course_id).copied().unwrap_or(0);
            let passed = passed_by_course.get(&c.course_id).copied().unwrap_or(0);
            let pass_rate = if appeared > 0 {
                Some(round_half_up_2(100.0 * passed as f64 / appeared as f64))
            } else {
                None
            };
            CourseSummary {
                course_id: c.course_id.clone(),
                code: c.code.clone(),
                appeared,
                passed,
                pass_rate,
            }
        })
        .collect();

    Ok(SemesterResults {
        semester,
        student_type,
        courses,
        rows,
        course_summary,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSemester {
    pub semester: SemesterHeader,
    pub roll_no: String,
    pub courses: Vec<TranscriptCourse>,
    pub gpa: Option<f64>,
    pub credits_earned: f64,
    pub status: ResultStatus,
    pub failed_courses: Vec<String>,
    pub incomplete_courses: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptCourse {
    pub code: String,
    pub title: String,
    pub credit: f64,
    pub cell: CourseCell,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImprovementAttempt {
    pub semester_no: i64,
    pub semester_name: String,
    pub code: String,
    pub title: String,
    pub credit: f64,
    pub cell: CourseCell,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub registration_no: String,
    pub name: String,
    pub department: String,
    pub session: String,
    pub semesters: Vec<TranscriptSemester>,
    /// Credit-weighted across all completed regular courses. Excludes
    /// improvement attempts.
    pub cumulative_gpa: Option<f64>,
    pub total_credits_earned: f64,
    pub improvements: Vec<ImprovementAttempt>,
}

/// Build the full academic transcript for a student. Student rows
/// sharing a registration number are the same person across semesters.
pub fn compute_transcript(conn: &Connection, student_id: &str) -> Result<Transcript, GradeError> {
    let identity: Option<(String, String)> = conn
        .query_row(
            "SELECT registration_no, name FROM students WHERE id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((registration_no, name)) = identity else {
        return Err(GradeError::new("not_found", "student not found"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT st.id, st.semester_id
             FROM students st
             JOIN semesters sm ON sm.id = st.semester_id
             WHERE st.registration_no = ?
             ORDER BY sm.semester_no",
        )
        .map_err(db_err)?;
    let memberships: Vec<(String, String)> = stmt
        .query_map([&registration_no], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut semesters_out: Vec<TranscriptSemester> = Vec::new();
    let mut improvements: Vec<ImprovementAttempt> = Vec::new();
    let mut cumulative_terms: Vec<(f64, f64)> = Vec::new();
    let mut total_credits_earned = 0.0_f64;
    let mut department: Option<String> = None;
    let mut session: Option<String> = None;

    for (member_student_id, semester_id) in &memberships {
        let ctx = GradeContext {
            conn,
            semester_id,
        };

        let regular = compute_semester_results(&ctx, StudentType::Regular)?;
        if department.is_none() {
            department = Some(regular.semester.department.clone());
            session = Some(regular.semester.session.clone());
        }

        if let Some(row) = regular
            .rows
            .iter()
            .find(|r| r.student_id == *member_student_id)
        {
            let mut courses_out: Vec<TranscriptCourse> = Vec::new();
            for (c, cell) in regular.courses.iter().zip(row.cells.iter()) {
                if *cell == CourseCell::NotEnrolled {
                    continue;
                }
                if let CourseCell::Completed { point, passed, .. } = cell {
                    cumulative_terms.push((c.credit, *point));
                    if *passed {
                        total_credits_earned += c.credit;
                    }
                }
                courses_out.push(TranscriptCourse {
                    code: c.code.clone(),
                    title: c.title.clone(),
                    credit: c.credit,
                    cell: cell.clone(),
                });
            }
            semesters_out.push(TranscriptSemester {
                semester: regular.semester.clone(),
                roll_no: row.roll_no.clone(),
                courses: courses_out,
                gpa: row.gpa,
                credits_earned: row.credits_earned,
                status: row.status,
                failed_courses: row.failed_courses.clone(),
                incomplete_courses: row.incomplete_courses.clone(),
            });
        }

        let improvement = compute_semester_results(&ctx, StudentType::Improvement)?;
        if let Some(row) = improvement
            .rows
            .iter()
            .find(|r| r.student_id == *member_student_id)
        {
            for (c, cell) in improvement.courses.iter().zip(row.cells.iter()) {
                if *cell == CourseCell::NotEnrolled {
                    continue;
                }
                improvements.push(ImprovementAttempt {
                    semester_no: improvement.semester.semester_no,
                    semester_name: improvement.semester.name.clone(),
                    code: c.code.clone(),
                    title: c.title.clone(),
                    credit: c.credit,
                    cell: cell.clone(),
                });
            }
        }
    }

    Ok(Transcript {
        registration_no,
        name,
        department: department.unwrap_or_default(),
        session: session.unwrap_or_default(),
        semesters: semesters_out,
        cumulative_gpa: gpa(cumulative_terms).map(round_half_up_2),
        total_credits_earned,
        improvements,
    })
}
