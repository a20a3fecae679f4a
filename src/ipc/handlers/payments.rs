use crate::db;
use crate::finance;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_from, get_bool_or, get_optional_str, get_required_f64, get_required_str, map_insert_err,
    map_update_err, require_row, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

const METHODS: [&str; 3] = ["cash", "transfer", "card"];

fn handle_payments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "payments": [] }));
    };

    let student_id = get_optional_str(&req.params, "studentId");
    let course_id = get_optional_str(&req.params, "courseId");
    let month = get_optional_str(&req.params, "month");

    let sql = "SELECT
           id, receipt_no, student_id, course_id, month, amount, liquidated,
           method, bank_id, reference, notes, paid_at, created_at
         FROM payments
         WHERE (?1 IS NULL OR student_id = ?1)
           AND (?2 IS NULL OR course_id = ?2)
           AND (?3 IS NULL OR month = ?3)
         ORDER BY paid_at DESC, receipt_no DESC";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((&student_id, &course_id, &month), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "receiptNo": row.get::<_, String>(1)?,
                "studentId": row.get::<_, String>(2)?,
                "courseId": row.get::<_, String>(3)?,
                "month": row.get::<_, String>(4)?,
                "amount": row.get::<_, f64>(5)?,
                "liquidated": row.get::<_, i64>(6)? != 0,
                "method": row.get::<_, String>(7)?,
                "bankId": row.get::<_, Option<String>>(8)?,
                "reference": row.get::<_, Option<String>>(9)?,
                "notes": row.get::<_, Option<String>>(10)?,
                "paidAt": row.get::<_, String>(11)?,
                "createdAt": row.get::<_, String>(12)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(payments) => ok(&req.id, json!({ "payments": payments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn parse_method(params: &serde_json::Value) -> Result<String, HandlerErr> {
    let method = get_optional_str(params, "method").unwrap_or_else(|| "cash".to_string());
    if !METHODS.contains(&method.as_str()) {
        return Err(HandlerErr::bad_params(
            "method must be one of: cash, transfer, card",
        ));
    }
    Ok(method)
}

fn parse_paid_at(params: &serde_json::Value) -> Result<NaiveDate, HandlerErr> {
    match get_optional_str(params, "paidAt") {
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map_err(|_| HandlerErr::bad_params("paidAt must be YYYY-MM-DD")),
        None => Ok(Utc::now().date_naive()),
    }
}

fn validate_bank(
    conn: &Connection,
    method: &str,
    bank_id: &Option<String>,
) -> Result<(), HandlerErr> {
    match bank_id {
        Some(bid) => require_row(conn, "banks", bid, "bank"),
        None if method != "cash" => Err(HandlerErr::bad_params(
            "bankId is required for transfer and card payments",
        )),
        None => Ok(()),
    }
}

fn payments_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    require_row(conn, "students", &student_id, "student")?;
    let course_id = get_required_str(params, "courseId")?;
    require_row(conn, "courses", &course_id, "course")?;

    let month_raw = get_required_str(params, "month")?;
    let (year, month_num) =
        finance::parse_month_key(&month_raw).map_err(HandlerErr::bad_params)?;
    let month = finance::format_month_key(year, month_num);

    let amount = get_required_f64(params, "amount")?;
    if amount < 0.0 {
        return Err(HandlerErr::bad_params("amount must not be negative"));
    }
    let liquidated = get_bool_or(params, "liquidated", false);
    let method = parse_method(params)?;
    let bank_id = get_optional_str(params, "bankId");
    validate_bank(conn, &method, &bank_id)?;
    let reference = get_optional_str(params, "reference");
    let notes = get_optional_str(params, "notes");
    let paid_at = parse_paid_at(params)?;

    // Receipt number allocation and the insert commit together; the UNIQUE
    // constraint on receipt_no backstops the allocator.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    let day_prefix = finance::receipt_day_prefix(paid_at);
    let seq = db::next_sequence(&tx, "receipt", &day_prefix)
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    let receipt_no = finance::receipt_number(paid_at, seq);

    let payment_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO payments(
           id, receipt_no, student_id, course_id, month, amount, liquidated,
           method, bank_id, reference, notes, paid_at, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &payment_id,
            &receipt_no,
            &student_id,
            &course_id,
            &month,
            amount,
            liquidated as i64,
            &method,
            &bank_id,
            &reference,
            &notes,
            paid_at.format("%Y-%m-%d").to_string(),
            db::now_iso(),
        ),
    )
    .map_err(|e| map_insert_err(e, "payments"))?;

    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    // Keep the cached debt in step with the rows that drive it.
    let debt_months = super::students::recompute_student_debt(conn, &student_id)?;

    db::log_activity(
        conn,
        &actor_from(params),
        "create",
        "payment",
        Some(&payment_id),
        Some(&receipt_no),
    );

    Ok(json!({
        "paymentId": payment_id,
        "receiptNo": receipt_no,
        "month": month,
        "debtMonths": debt_months
    }))
}

fn payments_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let payment_id = get_required_str(params, "paymentId")?;
    let student_id: Option<String> = conn
        .query_row(
            "SELECT student_id FROM payments WHERE id = ?",
            [&payment_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some(student_id) = student_id else {
        return Err(HandlerErr::not_found("payment not found"));
    };

    let month_raw = get_required_str(params, "month")?;
    let (year, month_num) =
        finance::parse_month_key(&month_raw).map_err(HandlerErr::bad_params)?;
    let month = finance::format_month_key(year, month_num);

    let amount = get_required_f64(params, "amount")?;
    if amount < 0.0 {
        return Err(HandlerErr::bad_params("amount must not be negative"));
    }
    let liquidated = get_bool_or(params, "liquidated", false);
    let method = parse_method(params)?;
    let bank_id = get_optional_str(params, "bankId");
    validate_bank(conn, &method, &bank_id)?;
    let reference = get_optional_str(params, "reference");
    let notes = get_optional_str(params, "notes");

    conn.execute(
        "UPDATE payments
         SET month = ?, amount = ?, liquidated = ?, method = ?, bank_id = ?,
             reference = ?, notes = ?
         WHERE id = ?",
        (
            &month,
            amount,
            liquidated as i64,
            &method,
            &bank_id,
            &reference,
            &notes,
            &payment_id,
        ),
    )
    .map_err(|e| map_update_err(e, "payments"))?;

    let debt_months = super::students::recompute_student_debt(conn, &student_id)?;

    db::log_activity(
        conn,
        &actor_from(params),
        "update",
        "payment",
        Some(&payment_id),
        None,
    );

    Ok(json!({ "paymentId": payment_id, "debtMonths": debt_months }))
}

fn payments_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let payment_id = get_required_str(params, "paymentId")?;
    let student_id: Option<String> = conn
        .query_row(
            "SELECT student_id FROM payments WHERE id = ?",
            [&payment_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some(student_id) = student_id else {
        return Err(HandlerErr::not_found("payment not found"));
    };

    conn.execute("DELETE FROM payments WHERE id = ?", [&payment_id])
        .map_err(|e| HandlerErr::db_on_table("db_delete_failed", e, "payments"))?;

    let debt_months = super::students::recompute_student_debt(conn, &student_id)?;

    db::log_activity(
        conn,
        &actor_from(params),
        "delete",
        "payment",
        Some(&payment_id),
        None,
    );

    Ok(json!({ "ok": true, "debtMonths": debt_months }))
}

fn month_facts(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
    month: &str,
) -> Result<Vec<finance::PaymentFacts>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT amount, liquidated FROM payments
             WHERE student_id = ? AND course_id = ? AND month = ?",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map((student_id, course_id, month), |r| {
        Ok(finance::PaymentFacts {
            amount: r.get(0)?,
            liquidated: r.get::<_, i64>(1)? != 0,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn payments_month_status(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    require_row(conn, "students", &student_id, "student")?;
    let course_id = get_required_str(params, "courseId")?;
    require_row(conn, "courses", &course_id, "course")?;

    let month_raw = get_required_str(params, "month")?;
    let (year, month_num) =
        finance::parse_month_key(&month_raw).map_err(HandlerErr::bad_params)?;
    let month = finance::format_month_key(year, month_num);

    let facts = month_facts(conn, &student_id, &course_id, &month)?;
    let status = finance::month_status(&facts);
    let paid_total: f64 = facts.iter().map(|f| f.amount).sum();

    Ok(json!({
        "studentId": student_id,
        "courseId": course_id,
        "month": month,
        "status": status.as_str(),
        "paidTotal": paid_total,
        "paymentCount": facts.len()
    }))
}

/// Status of every (student, month) cell for a course roster over an
/// inclusive month range. One query, grouped in memory; the board is the
/// screen the front desk lives in.
fn payments_status_board(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    require_row(conn, "courses", &course_id, "course")?;

    let from = finance::parse_month_key(&get_required_str(params, "fromMonth")?)
        .map_err(HandlerErr::bad_params)?;
    let to = finance::parse_month_key(&get_required_str(params, "toMonth")?)
        .map_err(HandlerErr::bad_params)?;
    let months = finance::month_range(from, to);
    let Some((first_month, last_month)) = months.first().zip(months.last()) else {
        return Err(HandlerErr::bad_params("fromMonth must not be after toMonth"));
    };
    let (first_month, last_month) = (first_month.clone(), last_month.clone());

    let mut stmt = conn
        .prepare(
            "SELECT id, control_no, first_name, last_name FROM students
             WHERE course_id = ? AND active = 1
             ORDER BY last_name, first_name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let students = stmt
        .query_map([&course_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut by_cell: HashMap<(String, String), Vec<finance::PaymentFacts>> = HashMap::new();
    let mut pay_stmt = conn
        .prepare(
            "SELECT student_id, month, amount, liquidated FROM payments
             WHERE course_id = ? AND month >= ? AND month <= ?",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let pay_rows = pay_stmt
        .query_map(
            (&course_id, &first_month, &last_month),
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    finance::PaymentFacts {
                        amount: r.get(2)?,
                        liquidated: r.get::<_, i64>(3)? != 0,
                    },
                ))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    for (sid, month, facts) in pay_rows {
        by_cell.entry((sid, month)).or_default().push(facts);
    }

    let rows: Vec<serde_json::Value> = students
        .into_iter()
        .map(|(sid, control_no, first, last)| {
            let statuses: Vec<serde_json::Value> = months
                .iter()
                .map(|m| {
                    let facts = by_cell
                        .get(&(sid.clone(), m.clone()))
                        .map(Vec::as_slice)
                        .unwrap_or(&[]);
                    json!({
                        "month": m,
                        "status": finance::month_status(facts).as_str()
                    })
                })
                .collect();
            json!({
                "studentId": sid,
                "controlNo": control_no,
                "displayName": format!("{}, {}", last, first),
                "months": statuses
            })
        })
        .collect();

    Ok(json!({
        "courseId": course_id,
        "months": months,
        "rows": rows
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "payments.list" => Some(handle_payments_list(state, req)),
        "payments.create" => Some(with_db(state, req, payments_create)),
        "payments.update" => Some(with_db(state, req, payments_update)),
        "payments.delete" => Some(with_db(state, req, payments_delete)),
        "payments.monthStatus" => Some(with_db(state, req, payments_month_status)),
        "payments.statusBoard" => Some(with_db(state, req, payments_status_board)),
        _ => None,
    }
}
