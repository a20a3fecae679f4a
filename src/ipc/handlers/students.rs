use crate::db;
use crate::finance;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_from, get_bool_or, get_optional_str, get_required_bool, get_required_str, map_insert_err,
    map_update_err, require_row, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::{Datelike, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let school_id = get_optional_str(&req.params, "schoolId");
    let course_id = get_optional_str(&req.params, "courseId");
    let active = req.params.get("active").and_then(|v| v.as_bool());

    let sql = "SELECT
           id, control_no, school_id, course_id, first_name, last_name,
           enrolled_at, tutor_name, tutor_phone, email, active, debt_months
         FROM students
         WHERE (?1 IS NULL OR school_id = ?1)
           AND (?2 IS NULL OR course_id = ?2)
           AND (?3 IS NULL OR active = ?3)
         ORDER BY last_name, first_name";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map(
            (&school_id, &course_id, active.map(|b| b as i64)),
            |row| {
                let first: String = row.get(4)?;
                let last: String = row.get(5)?;
                Ok(json!({
                    "id": row.get::<_, String>(0)?,
                    "controlNo": row.get::<_, String>(1)?,
                    "schoolId": row.get::<_, String>(2)?,
                    "courseId": row.get::<_, Option<String>>(3)?,
                    "firstName": first.clone(),
                    "lastName": last.clone(),
                    "displayName": format!("{}, {}", last, first),
                    "enrolledAt": row.get::<_, String>(6)?,
                    "tutorName": row.get::<_, Option<String>>(7)?,
                    "tutorPhone": row.get::<_, Option<String>>(8)?,
                    "email": row.get::<_, Option<String>>(9)?,
                    "active": row.get::<_, i64>(10)? != 0,
                    "debtMonths": row.get::<_, i64>(11)?
                }))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn parse_date(raw: &str, key: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;
    require_row(conn, "schools", &school_id, "school")?;

    let course_id = get_optional_str(params, "courseId");
    if let Some(cid) = &course_id {
        require_row(conn, "courses", cid, "course")?;
    }

    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let enrolled_at = match get_optional_str(params, "enrolledAt") {
        Some(raw) => parse_date(&raw, "enrolledAt")?,
        None => Utc::now().date_naive(),
    };
    let tutor_name = get_optional_str(params, "tutorName");
    let tutor_phone = get_optional_str(params, "tutorPhone");
    let email = get_optional_str(params, "email");
    let active = get_bool_or(params, "active", true);

    // Allocate the control number and insert in one transaction so the
    // sequence bump commits only with the row it numbered.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    let year = enrolled_at.year();
    let seq = db::next_sequence(&tx, "control_no", &year.to_string())
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    let control_no = finance::control_number(year, seq);

    let student_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO students(
           id, control_no, school_id, course_id, first_name, last_name,
           enrolled_at, tutor_name, tutor_phone, email, active, debt_months, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
        (
            &student_id,
            &control_no,
            &school_id,
            &course_id,
            &first_name,
            &last_name,
            enrolled_at.format("%Y-%m-%d").to_string(),
            &tutor_name,
            &tutor_phone,
            &email,
            active as i64,
            db::now_iso(),
        ),
    )
    .map_err(|e| map_insert_err(e, "students"))?;

    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    db::log_activity(
        conn,
        &actor_from(params),
        "create",
        "student",
        Some(&student_id),
        Some(&control_no),
    );

    Ok(json!({
        "studentId": student_id,
        "controlNo": control_no
    }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    require_row(conn, "students", &student_id, "student")?;

    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let course_id = get_optional_str(params, "courseId");
    if let Some(cid) = &course_id {
        require_row(conn, "courses", cid, "course")?;
    }
    let tutor_name = get_optional_str(params, "tutorName");
    let tutor_phone = get_optional_str(params, "tutorPhone");
    let email = get_optional_str(params, "email");

    conn.execute(
        "UPDATE students
         SET first_name = ?, last_name = ?, course_id = ?, tutor_name = ?,
             tutor_phone = ?, email = ?, updated_at = ?
         WHERE id = ?",
        (
            &first_name,
            &last_name,
            &course_id,
            &tutor_name,
            &tutor_phone,
            &email,
            db::now_iso(),
            &student_id,
        ),
    )
    .map_err(|e| map_update_err(e, "students"))?;

    db::log_activity(
        conn,
        &actor_from(params),
        "update",
        "student",
        Some(&student_id),
        None,
    );

    Ok(json!({ "studentId": student_id }))
}

fn students_set_active(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let active = get_required_bool(params, "active")?;
    require_row(conn, "students", &student_id, "student")?;

    conn.execute(
        "UPDATE students SET active = ?, updated_at = ? WHERE id = ?",
        (active as i64, db::now_iso(), &student_id),
    )
    .map_err(|e| map_update_err(e, "students"))?;

    db::log_activity(
        conn,
        &actor_from(params),
        if active { "activate" } else { "deactivate" },
        "student",
        Some(&student_id),
        None,
    );

    Ok(json!({ "studentId": student_id, "active": active }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    require_row(conn, "students", &student_id, "student")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    tx.execute("DELETE FROM payments WHERE student_id = ?", [&student_id])
        .map_err(|e| HandlerErr::db_on_table("db_delete_failed", e, "payments"))?;

    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| HandlerErr::db_on_table("db_delete_failed", e, "students"))?;

    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    db::log_activity(
        conn,
        &actor_from(params),
        "delete",
        "student",
        Some(&student_id),
        None,
    );

    Ok(json!({ "ok": true }))
}

/// Recompute the cached owed-month count for one student from the month
/// statuses over their enrollment range. A student without a course owes
/// nothing.
pub fn recompute_student_debt(conn: &Connection, student_id: &str) -> Result<i64, HandlerErr> {
    let row: Option<(Option<String>, String)> = conn
        .query_row(
            "SELECT course_id, enrolled_at FROM students WHERE id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((course_id, enrolled_at)) = row else {
        return Err(HandlerErr::not_found("student not found"));
    };

    let debt = match course_id {
        None => 0,
        Some(course_id) => {
            let enrolled = parse_date(&enrolled_at, "enrolledAt")?;
            let today = Utc::now().date_naive();

            let mut by_month: HashMap<String, Vec<finance::PaymentFacts>> = HashMap::new();
            let mut stmt = conn
                .prepare(
                    "SELECT month, amount, liquidated FROM payments
                     WHERE student_id = ? AND course_id = ?",
                )
                .map_err(|e| HandlerErr::db("db_query_failed", e))?;
            let rows = stmt
                .query_map((student_id, &course_id), |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        finance::PaymentFacts {
                            amount: r.get(1)?,
                            liquidated: r.get::<_, i64>(2)? != 0,
                        },
                    ))
                })
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(|e| HandlerErr::db("db_query_failed", e))?;
            for (month, facts) in rows {
                by_month.entry(month).or_default().push(facts);
            }

            let months = finance::month_range(
                (enrolled.year(), enrolled.month()),
                (today.year(), today.month()),
            );
            finance::months_owed(months.iter().map(|m| {
                finance::month_status(by_month.get(m).map(Vec::as_slice).unwrap_or(&[]))
            }))
        }
    };

    conn.execute(
        "UPDATE students SET debt_months = ?, updated_at = ? WHERE id = ?",
        (debt, db::now_iso(), student_id),
    )
    .map_err(|e| map_update_err(e, "students"))?;

    Ok(debt)
}

fn students_recompute_debt(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let debt = recompute_student_debt(conn, &student_id)?;
    Ok(json!({ "studentId": student_id, "debtMonths": debt }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(with_db(state, req, students_create)),
        "students.update" => Some(with_db(state, req, students_update)),
        "students.setActive" => Some(with_db(state, req, students_set_active)),
        "students.delete" => Some(with_db(state, req, students_delete)),
        "students.recomputeDebt" => Some(with_db(state, req, students_recompute_debt)),
        _ => None,
    }
}
