mod test_support;

use serde_json::json;
use test_support::{open_workspace, request_err, request_ok, seed_enrollment, spawn_daemon};

#[test]
fn bank_with_recorded_payments_cannot_be_deleted() {
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _workspace = open_workspace(&mut stdin, &mut reader, "academy-banks");
    let (_school_id, course_id, student_id) =
        seed_enrollment(&mut stdin, &mut reader, "2026-01-01");

    let bank = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "banks.create",
        json!({ "name": "Banco Poniente" }),
    );
    let bank_id = bank["bankId"].as_str().expect("bankId").to_string();

    let e = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "banks.create",
        json!({ "name": "Banco Poniente" }),
    );
    assert_eq!(e["code"].as_str(), Some("conflict"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "payments.create",
        json!({
            "studentId": student_id,
            "courseId": course_id,
            "month": "2026-01",
            "amount": 500.0,
            "method": "card",
            "bankId": bank_id.clone()
        }),
    );

    let e = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "banks.delete",
        json!({ "bankId": bank_id.clone() }),
    );
    assert_eq!(e["code"].as_str(), Some("conflict"));

    // Deactivation is the supported path for banks in use.
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "banks.setActive",
        json!({ "bankId": bank_id.clone(), "active": false }),
    );
    assert_eq!(res["active"].as_bool(), Some(false));

    let listed = request_ok(&mut stdin, &mut reader, "6", "banks.list", json!({}));
    assert_eq!(listed["banks"][0]["active"].as_bool(), Some(false));

    // An unused bank deletes cleanly.
    let spare = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "banks.create",
        json!({ "name": "Banco Sobrante" }),
    );
    let spare_id = spare["bankId"].as_str().expect("bankId").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "banks.delete",
        json!({ "bankId": spare_id }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "9", "banks.list", json!({}));
    assert_eq!(listed["banks"].as_array().expect("banks").len(), 1);
}
