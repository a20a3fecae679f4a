mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{open_workspace, request_err, request_ok, seed_enrollment, spawn_daemon};

fn pay(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    student_id: &str,
    course_id: &str,
    month: &str,
    paid_at: &str,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        id,
        "payments.create",
        json!({
            "studentId": student_id,
            "courseId": course_id,
            "month": month,
            "amount": 500.0,
            "liquidated": true,
            "paidAt": paid_at
        }),
    )
}

#[test]
fn receipt_numbers_increment_per_day_and_never_repeat() {
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _workspace = open_workspace(&mut stdin, &mut reader, "academy-receipts");
    let (_school_id, course_id, student_id) =
        seed_enrollment(&mut stdin, &mut reader, "2026-01-01");

    let first = pay(
        &mut stdin, &mut reader, "1", &student_id, &course_id, "2026-01", "2026-03-05",
    );
    let second = pay(
        &mut stdin, &mut reader, "2", &student_id, &course_id, "2026-02", "2026-03-05",
    );
    // A different day runs its own sequence.
    let other_day = pay(
        &mut stdin, &mut reader, "3", &student_id, &course_id, "2026-03", "2026-03-06",
    );

    assert_eq!(first["receiptNo"].as_str(), Some("R-20260305-001"));
    assert_eq!(second["receiptNo"].as_str(), Some("R-20260305-002"));
    assert_eq!(other_day["receiptNo"].as_str(), Some("R-20260306-001"));

    // Deleting a payment burns its number.
    let second_id = second["paymentId"].as_str().expect("paymentId").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "payments.delete",
        json!({ "paymentId": second_id }),
    );
    let replacement = pay(
        &mut stdin, &mut reader, "5", &student_id, &course_id, "2026-02", "2026-03-05",
    );
    assert_eq!(replacement["receiptNo"].as_str(), Some("R-20260305-003"));
}

#[test]
fn payment_create_validates_month_amount_and_bank() {
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _workspace = open_workspace(&mut stdin, &mut reader, "academy-payment-validate");
    let (_school_id, course_id, student_id) =
        seed_enrollment(&mut stdin, &mut reader, "2026-01-01");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "payments.create",
        json!({
            "studentId": student_id.clone(),
            "courseId": course_id.clone(),
            "month": "January",
            "amount": 500.0
        }),
    );
    assert_eq!(e["code"].as_str(), Some("bad_params"));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "payments.create",
        json!({
            "studentId": student_id.clone(),
            "courseId": course_id.clone(),
            "month": "2026-01",
            "amount": -5.0
        }),
    );
    assert_eq!(e["code"].as_str(), Some("bad_params"));

    // Non-cash methods need a bank.
    let e = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "payments.create",
        json!({
            "studentId": student_id.clone(),
            "courseId": course_id.clone(),
            "month": "2026-01",
            "amount": 500.0,
            "method": "transfer"
        }),
    );
    assert_eq!(e["code"].as_str(), Some("bad_params"));

    let bank = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "banks.create",
        json!({ "name": "Banco Norte" }),
    );
    let bank_id = bank["bankId"].as_str().expect("bankId").to_string();

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "payments.create",
        json!({
            "studentId": student_id.clone(),
            "courseId": course_id.clone(),
            "month": "2026-01",
            "amount": 500.0,
            "method": "transfer",
            "bankId": bank_id,
            "reference": "SPEI-778812"
        }),
    );
    assert!(created["receiptNo"].as_str().is_some());

    let e = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "payments.create",
        json!({
            "studentId": student_id,
            "courseId": course_id,
            "month": "2026-01",
            "amount": 500.0,
            "method": "crypto"
        }),
    );
    assert_eq!(e["code"].as_str(), Some("bad_params"));
}
