use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_from, get_bool_or, get_required_bool, get_required_str, map_insert_err, map_update_err,
    require_row, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_banks_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "banks": [] }));
    };

    let mut stmt = match conn.prepare("SELECT id, name, active FROM banks ORDER BY name") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "active": row.get::<_, i64>(2)? != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(banks) => ok(&req.id, json!({ "banks": banks })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn banks_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let active = get_bool_or(params, "active", true);

    let bank_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO banks(id, name, active) VALUES(?, ?, ?)",
        (&bank_id, &name, active as i64),
    )
    .map_err(|e| map_insert_err(e, "banks"))?;

    db::log_activity(conn, &actor_from(params), "create", "bank", Some(&bank_id), Some(&name));

    Ok(json!({ "bankId": bank_id, "name": name }))
}

fn banks_set_active(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let bank_id = get_required_str(params, "bankId")?;
    let active = get_required_bool(params, "active")?;
    require_row(conn, "banks", &bank_id, "bank")?;

    conn.execute(
        "UPDATE banks SET active = ? WHERE id = ?",
        (active as i64, &bank_id),
    )
    .map_err(|e| map_update_err(e, "banks"))?;

    Ok(json!({ "bankId": bank_id, "active": active }))
}

fn banks_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let bank_id = get_required_str(params, "bankId")?;
    require_row(conn, "banks", &bank_id, "bank")?;

    // Payments keep their receipt history; a bank with recorded payments can
    // only be deactivated.
    let in_use: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM payments WHERE bank_id = ? LIMIT 1",
            [&bank_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if in_use.is_some() {
        return Err(HandlerErr::conflict(
            "bank has recorded payments; deactivate it instead",
        ));
    }

    conn.execute("DELETE FROM banks WHERE id = ?", [&bank_id])
        .map_err(|e| HandlerErr::db_on_table("db_delete_failed", e, "banks"))?;

    db::log_activity(conn, &actor_from(params), "delete", "bank", Some(&bank_id), None);

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "banks.list" => Some(handle_banks_list(state, req)),
        "banks.create" => Some(with_db(state, req, banks_create)),
        "banks.setActive" => Some(with_db(state, req, banks_set_active)),
        "banks.delete" => Some(with_db(state, req, banks_delete)),
        _ => None,
    }
}
