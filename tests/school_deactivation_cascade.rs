mod test_support;

use serde_json::json;
use test_support::{open_workspace, request_ok, spawn_daemon};

#[test]
fn deactivating_school_deactivates_courses_but_reactivation_does_not() {
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _workspace = open_workspace(&mut stdin, &mut reader, "academy-school-cascade");

    let school = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schools.create",
        json!({ "name": "Centro Poniente" }),
    );
    let school_id = school["schoolId"].as_str().expect("schoolId").to_string();

    for (i, name) in ["Chess Beginners", "Chess Advanced"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "courses.create",
            json!({ "schoolId": school_id.clone(), "name": name, "monthlyFee": 500.0 }),
        );
    }

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schools.setActive",
        json!({ "schoolId": school_id.clone(), "active": false }),
    );
    assert_eq!(res.get("coursesDeactivated").and_then(|v| v.as_i64()), Some(2));

    let courses = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "courses.list",
        json!({ "schoolId": school_id.clone() }),
    );
    for course in courses["courses"].as_array().expect("courses") {
        assert_eq!(course.get("active").and_then(|v| v.as_bool()), Some(false));
    }

    // Reactivating the school leaves archived courses archived.
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schools.setActive",
        json!({ "schoolId": school_id.clone(), "active": true }),
    );
    assert_eq!(res.get("coursesDeactivated").and_then(|v| v.as_i64()), Some(0));

    let courses = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "courses.list",
        json!({ "schoolId": school_id }),
    );
    for course in courses["courses"].as_array().expect("courses") {
        assert_eq!(course.get("active").and_then(|v| v.as_bool()), Some(false));
    }

    let schools = request_ok(&mut stdin, &mut reader, "6", "schools.list", json!({}));
    assert_eq!(
        schools["schools"][0].get("active").and_then(|v| v.as_bool()),
        Some(true)
    );
}

#[test]
fn course_deactivation_keeps_enrolled_students() {
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _workspace = open_workspace(&mut stdin, &mut reader, "academy-course-deactivate");
    let (_school_id, course_id, student_id) =
        test_support::seed_enrollment(&mut stdin, &mut reader, "2026-01-15");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "courses.setActive",
        json!({ "courseId": course_id.clone(), "active": false }),
    );

    let students = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.list",
        json!({ "courseId": course_id }),
    );
    let rows = students["students"].as_array().expect("students");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("id").and_then(|v| v.as_str()),
        Some(student_id.as_str())
    );
    assert_eq!(rows[0].get("active").and_then(|v| v.as_bool()), Some(true));
}

#[test]
fn course_delete_unlinks_students_and_drops_payments() {
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _workspace = open_workspace(&mut stdin, &mut reader, "academy-course-delete");
    let (_school_id, course_id, student_id) =
        test_support::seed_enrollment(&mut stdin, &mut reader, "2026-01-15");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "payments.create",
        json!({
            "studentId": student_id,
            "courseId": course_id.clone(),
            "month": "2026-01",
            "amount": 500.0,
            "liquidated": true
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.delete",
        json!({ "courseId": course_id }),
    );

    let students = request_ok(&mut stdin, &mut reader, "3", "students.list", json!({}));
    let rows = students["students"].as_array().expect("students");
    assert_eq!(rows.len(), 1);
    assert!(rows[0].get("courseId").expect("courseId field").is_null());

    let payments = request_ok(&mut stdin, &mut reader, "4", "payments.list", json!({}));
    assert!(payments["payments"].as_array().expect("payments").is_empty());
}
