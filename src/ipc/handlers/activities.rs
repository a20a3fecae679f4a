use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

/// The activity log is written by the mutating handlers; this surface only
/// reads it back, most recent first.
fn handle_activities_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "activities": [] }));
    };

    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(50)
        .clamp(1, 500);

    let mut stmt = match conn.prepare(
        "SELECT actor, action, entity, entity_id, detail, at
         FROM activities ORDER BY at DESC, rowid DESC LIMIT ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([limit], |row| {
            Ok(json!({
                "actor": row.get::<_, String>(0)?,
                "action": row.get::<_, String>(1)?,
                "entity": row.get::<_, String>(2)?,
                "entityId": row.get::<_, Option<String>>(3)?,
                "detail": row.get::<_, Option<String>>(4)?,
                "at": row.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(activities) => ok(&req.id, json!({ "activities": activities })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "activities.list" => Some(handle_activities_list(state, req)),
        _ => None,
    }
}
