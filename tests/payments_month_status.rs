mod test_support;

use serde_json::json;
use test_support::{open_workspace, request_ok, seed_enrollment, spawn_daemon};

fn month_status(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    id: &str,
    student_id: &str,
    course_id: &str,
    month: &str,
) -> String {
    let res = request_ok(
        stdin,
        reader,
        id,
        "payments.monthStatus",
        json!({ "studentId": student_id, "courseId": course_id, "month": month }),
    );
    res["status"].as_str().expect("status").to_string()
}

#[test]
fn month_status_covers_every_outcome() {
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _workspace = open_workspace(&mut stdin, &mut reader, "academy-month-status");
    let (_school_id, course_id, student_id) =
        seed_enrollment(&mut stdin, &mut reader, "2026-01-01");

    // No rows at all.
    assert_eq!(
        month_status(&mut stdin, &mut reader, "1", &student_id, &course_id, "2026-01"),
        "NOT_PAID"
    );

    // One installment that does not settle the month.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "payments.create",
        json!({
            "studentId": student_id.clone(),
            "courseId": course_id.clone(),
            "month": "2026-01",
            "amount": 200.0
        }),
    );
    assert_eq!(
        month_status(&mut stdin, &mut reader, "3", &student_id, &course_id, "2026-01"),
        "PARTIAL"
    );

    // A liquidated payment settles the month even next to installments.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "payments.create",
        json!({
            "studentId": student_id.clone(),
            "courseId": course_id.clone(),
            "month": "2026-01",
            "amount": 300.0,
            "liquidated": true
        }),
    );
    assert_eq!(
        month_status(&mut stdin, &mut reader, "5", &student_id, &course_id, "2026-01"),
        "PAID"
    );

    // A zero-amount row marks the month exempt, regardless of other rows.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "payments.create",
        json!({
            "studentId": student_id.clone(),
            "courseId": course_id.clone(),
            "month": "2026-01",
            "amount": 0.0
        }),
    );
    assert_eq!(
        month_status(&mut stdin, &mut reader, "7", &student_id, &course_id, "2026-01"),
        "NOT_APPLICABLE"
    );
}

#[test]
fn status_board_reports_roster_cells_over_range() {
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _workspace = open_workspace(&mut stdin, &mut reader, "academy-status-board");
    let (school_id, course_id, student_id) =
        seed_enrollment(&mut stdin, &mut reader, "2026-01-01");

    // Second student on the same roster.
    let other = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({
            "schoolId": school_id,
            "courseId": course_id.clone(),
            "firstName": "Bruno",
            "lastName": "Avila",
            "enrolledAt": "2026-01-01"
        }),
    );
    let other_id = other["studentId"].as_str().expect("studentId").to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "payments.create",
        json!({
            "studentId": student_id.clone(),
            "courseId": course_id.clone(),
            "month": "2026-01",
            "amount": 500.0,
            "liquidated": true
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "payments.create",
        json!({
            "studentId": other_id.clone(),
            "courseId": course_id.clone(),
            "month": "2026-02",
            "amount": 100.0
        }),
    );

    let board = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "payments.statusBoard",
        json!({
            "courseId": course_id,
            "fromMonth": "2026-01",
            "toMonth": "2026-02"
        }),
    );

    assert_eq!(
        board["months"].as_array().expect("months").len(),
        2,
        "two month columns expected"
    );
    let rows = board["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 2);

    // Roster is ordered by last name: Avila before Torres.
    assert_eq!(
        rows[0]["studentId"].as_str(),
        Some(other_id.as_str())
    );
    assert_eq!(rows[0]["months"][0]["status"].as_str(), Some("NOT_PAID"));
    assert_eq!(rows[0]["months"][1]["status"].as_str(), Some("PARTIAL"));

    assert_eq!(rows[1]["studentId"].as_str(), Some(student_id.as_str()));
    assert_eq!(rows[1]["months"][0]["status"].as_str(), Some("PAID"));
    assert_eq!(rows[1]["months"][1]["status"].as_str(), Some("NOT_PAID"));
}
