use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_from, get_bool_or, get_optional_str, get_required_bool, get_required_str, map_insert_err,
    map_update_err, require_row, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn handle_suppliers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "suppliers": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           s.id, s.name, s.contact_name, s.phone, s.email, s.active,
           (SELECT COUNT(*) FROM expenses e WHERE e.supplier_id = s.id) AS expense_count
         FROM suppliers s
         ORDER BY s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "contactName": row.get::<_, Option<String>>(2)?,
                "phone": row.get::<_, Option<String>>(3)?,
                "email": row.get::<_, Option<String>>(4)?,
                "active": row.get::<_, i64>(5)? != 0,
                "expenseCount": row.get::<_, i64>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(suppliers) => ok(&req.id, json!({ "suppliers": suppliers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn suppliers_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let contact_name = get_optional_str(params, "contactName");
    let phone = get_optional_str(params, "phone");
    let email = get_optional_str(params, "email");
    let active = get_bool_or(params, "active", true);

    let supplier_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO suppliers(id, name, contact_name, phone, email, active)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &supplier_id,
            &name,
            &contact_name,
            &phone,
            &email,
            active as i64,
        ),
    )
    .map_err(|e| map_insert_err(e, "suppliers"))?;

    db::log_activity(
        conn,
        &actor_from(params),
        "create",
        "supplier",
        Some(&supplier_id),
        Some(&name),
    );

    Ok(json!({ "supplierId": supplier_id, "name": name }))
}

fn suppliers_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let supplier_id = get_required_str(params, "supplierId")?;
    require_row(conn, "suppliers", &supplier_id, "supplier")?;

    let name = get_required_str(params, "name")?;
    let contact_name = get_optional_str(params, "contactName");
    let phone = get_optional_str(params, "phone");
    let email = get_optional_str(params, "email");

    conn.execute(
        "UPDATE suppliers SET name = ?, contact_name = ?, phone = ?, email = ? WHERE id = ?",
        (&name, &contact_name, &phone, &email, &supplier_id),
    )
    .map_err(|e| map_update_err(e, "suppliers"))?;

    db::log_activity(
        conn,
        &actor_from(params),
        "update",
        "supplier",
        Some(&supplier_id),
        Some(&name),
    );

    Ok(json!({ "supplierId": supplier_id }))
}

fn suppliers_set_active(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let supplier_id = get_required_str(params, "supplierId")?;
    let active = get_required_bool(params, "active")?;
    require_row(conn, "suppliers", &supplier_id, "supplier")?;

    conn.execute(
        "UPDATE suppliers SET active = ? WHERE id = ?",
        (active as i64, &supplier_id),
    )
    .map_err(|e| map_update_err(e, "suppliers"))?;

    Ok(json!({ "supplierId": supplier_id, "active": active }))
}

fn suppliers_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let supplier_id = get_required_str(params, "supplierId")?;
    require_row(conn, "suppliers", &supplier_id, "supplier")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    tx.execute("DELETE FROM expenses WHERE supplier_id = ?", [&supplier_id])
        .map_err(|e| HandlerErr::db_on_table("db_delete_failed", e, "expenses"))?;

    tx.execute("DELETE FROM suppliers WHERE id = ?", [&supplier_id])
        .map_err(|e| HandlerErr::db_on_table("db_delete_failed", e, "suppliers"))?;

    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    db::log_activity(
        conn,
        &actor_from(params),
        "delete",
        "supplier",
        Some(&supplier_id),
        None,
    );

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "suppliers.list" => Some(handle_suppliers_list(state, req)),
        "suppliers.create" => Some(with_db(state, req, suppliers_create)),
        "suppliers.update" => Some(with_db(state, req, suppliers_update)),
        "suppliers.setActive" => Some(with_db(state, req, suppliers_set_active)),
        "suppliers.delete" => Some(with_db(state, req, suppliers_delete)),
        _ => None,
    }
}
