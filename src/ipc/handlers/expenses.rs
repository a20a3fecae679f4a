use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_from, get_optional_str, get_required_f64, get_required_str, map_insert_err,
    map_update_err, require_row, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn handle_expenses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "expenses": [] }));
    };

    let supplier_id = get_optional_str(&req.params, "supplierId");
    // Month filter matches on the YYYY-MM prefix of spent_at.
    let month = get_optional_str(&req.params, "month");

    let sql = "SELECT
           e.id, e.supplier_id, s.name, e.concept, e.amount, e.spent_at,
           e.receipt_ref, e.notes, e.created_at
         FROM expenses e
         JOIN suppliers s ON s.id = e.supplier_id
         WHERE (?1 IS NULL OR e.supplier_id = ?1)
           AND (?2 IS NULL OR substr(e.spent_at, 1, 7) = ?2)
         ORDER BY e.spent_at DESC";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((&supplier_id, &month), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "supplierId": row.get::<_, String>(1)?,
                "supplierName": row.get::<_, String>(2)?,
                "concept": row.get::<_, String>(3)?,
                "amount": row.get::<_, f64>(4)?,
                "spentAt": row.get::<_, String>(5)?,
                "receiptRef": row.get::<_, Option<String>>(6)?,
                "notes": row.get::<_, Option<String>>(7)?,
                "createdAt": row.get::<_, String>(8)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(expenses) => ok(&req.id, json!({ "expenses": expenses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn parse_spent_at(params: &serde_json::Value) -> Result<String, HandlerErr> {
    let raw = get_required_str(params, "spentAt")?;
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params("spentAt must be YYYY-MM-DD"))?;
    Ok(raw)
}

fn expenses_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let supplier_id = get_required_str(params, "supplierId")?;
    require_row(conn, "suppliers", &supplier_id, "supplier")?;

    let concept = get_required_str(params, "concept")?;
    let amount = get_required_f64(params, "amount")?;
    if amount <= 0.0 {
        return Err(HandlerErr::bad_params("amount must be positive"));
    }
    let spent_at = parse_spent_at(params)?;
    let receipt_ref = get_optional_str(params, "receiptRef");
    let notes = get_optional_str(params, "notes");

    let expense_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO expenses(id, supplier_id, concept, amount, spent_at, receipt_ref, notes, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &expense_id,
            &supplier_id,
            &concept,
            amount,
            &spent_at,
            &receipt_ref,
            &notes,
            db::now_iso(),
        ),
    )
    .map_err(|e| map_insert_err(e, "expenses"))?;

    db::log_activity(
        conn,
        &actor_from(params),
        "create",
        "expense",
        Some(&expense_id),
        Some(&concept),
    );

    Ok(json!({ "expenseId": expense_id }))
}

fn expenses_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let expense_id = get_required_str(params, "expenseId")?;
    require_row(conn, "expenses", &expense_id, "expense")?;

    let concept = get_required_str(params, "concept")?;
    let amount = get_required_f64(params, "amount")?;
    if amount <= 0.0 {
        return Err(HandlerErr::bad_params("amount must be positive"));
    }
    let spent_at = parse_spent_at(params)?;
    let receipt_ref = get_optional_str(params, "receiptRef");
    let notes = get_optional_str(params, "notes");

    conn.execute(
        "UPDATE expenses
         SET concept = ?, amount = ?, spent_at = ?, receipt_ref = ?, notes = ?
         WHERE id = ?",
        (&concept, amount, &spent_at, &receipt_ref, &notes, &expense_id),
    )
    .map_err(|e| map_update_err(e, "expenses"))?;

    db::log_activity(
        conn,
        &actor_from(params),
        "update",
        "expense",
        Some(&expense_id),
        Some(&concept),
    );

    Ok(json!({ "expenseId": expense_id }))
}

fn expenses_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let expense_id = get_required_str(params, "expenseId")?;
    require_row(conn, "expenses", &expense_id, "expense")?;

    conn.execute("DELETE FROM expenses WHERE id = ?", [&expense_id])
        .map_err(|e| HandlerErr::db_on_table("db_delete_failed", e, "expenses"))?;

    db::log_activity(
        conn,
        &actor_from(params),
        "delete",
        "expense",
        Some(&expense_id),
        None,
    );

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "expenses.list" => Some(handle_expenses_list(state, req)),
        "expenses.create" => Some(with_db(state, req, expenses_create)),
        "expenses.update" => Some(with_db(state, req, expenses_update)),
        "expenses.delete" => Some(with_db(state, req, expenses_delete)),
        _ => None,
    }
}
