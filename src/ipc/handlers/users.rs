use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_from, get_optional_str, get_required_bool, get_required_str, map_insert_err,
    map_update_err, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

const ROLES: [&str; 3] = ["admin", "staff", "readonly"];

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn parse_role(params: &serde_json::Value) -> Result<String, HandlerErr> {
    let role = get_required_str(params, "role")?.to_ascii_lowercase();
    if !ROLES.contains(&role.as_str()) {
        return Err(HandlerErr::bad_params(
            "role must be one of: admin, staff, readonly",
        ));
    }
    Ok(role)
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "users": [] }));
    };

    // Password material never leaves the daemon.
    let mut stmt = match conn.prepare(
        "SELECT id, username, role, display_name, active, created_at
         FROM users ORDER BY username",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "username": row.get::<_, String>(1)?,
                "role": row.get::<_, String>(2)?,
                "displayName": row.get::<_, String>(3)?,
                "active": row.get::<_, i64>(4)? != 0,
                "createdAt": row.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn users_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let username = get_required_str(params, "username")?.to_ascii_lowercase();
    let password = get_required_str(params, "password")?;
    if password.len() < 8 {
        return Err(HandlerErr::bad_params(
            "password must be at least 8 characters",
        ));
    }
    let role = parse_role(params)?;
    let display_name =
        get_optional_str(params, "displayName").unwrap_or_else(|| username.clone());

    let salt = Uuid::new_v4().simple().to_string();
    let user_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, username, password_hash, password_salt, role, display_name, active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &user_id,
            &username,
            hash_password(&salt, &password),
            &salt,
            &role,
            &display_name,
            db::now_iso(),
        ),
    )
    .map_err(|e| map_insert_err(e, "users"))?;

    db::log_activity(
        conn,
        &actor_from(params),
        "create",
        "user",
        Some(&user_id),
        Some(&username),
    );

    Ok(json!({ "userId": user_id, "username": username }))
}

fn users_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [&user_id], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if exists.is_none() {
        return Err(HandlerErr::not_found("user not found"));
    }

    let role = parse_role(params)?;
    let display_name = get_required_str(params, "displayName")?;
    let new_password = get_optional_str(params, "newPassword");
    if let Some(p) = &new_password {
        if p.len() < 8 {
            return Err(HandlerErr::bad_params(
                "newPassword must be at least 8 characters",
            ));
        }
    }

    conn.execute(
        "UPDATE users SET role = ?, display_name = ? WHERE id = ?",
        (&role, &display_name, &user_id),
    )
    .map_err(|e| map_update_err(e, "users"))?;

    if let Some(new_password) = new_password {
        let salt = Uuid::new_v4().simple().to_string();
        conn.execute(
            "UPDATE users SET password_hash = ?, password_salt = ? WHERE id = ?",
            (hash_password(&salt, &new_password), &salt, &user_id),
        )
        .map_err(|e| map_update_err(e, "users"))?;
    }

    db::log_activity(
        conn,
        &actor_from(params),
        "update",
        "user",
        Some(&user_id),
        None,
    );

    Ok(json!({ "userId": user_id }))
}

fn users_set_active(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let active = get_required_bool(params, "active")?;

    let changed = conn
        .execute(
            "UPDATE users SET active = ? WHERE id = ?",
            (active as i64, &user_id),
        )
        .map_err(|e| map_update_err(e, "users"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("user not found"));
    }

    db::log_activity(
        conn,
        &actor_from(params),
        if active { "activate" } else { "deactivate" },
        "user",
        Some(&user_id),
        None,
    );

    Ok(json!({ "userId": user_id, "active": active }))
}

fn users_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;

    let changed = conn
        .execute("DELETE FROM users WHERE id = ?", [&user_id])
        .map_err(|e| HandlerErr::db_on_table("db_delete_failed", e, "users"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("user not found"));
    }

    db::log_activity(
        conn,
        &actor_from(params),
        "delete",
        "user",
        Some(&user_id),
        None,
    );

    Ok(json!({ "ok": true }))
}

fn users_verify_password(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let username = get_required_str(params, "username")?.to_ascii_lowercase();
    let password = get_required_str(params, "password")?;

    let row: Option<(String, String, String, String, i64)> = conn
        .query_row(
            "SELECT id, password_hash, password_salt, role, active FROM users WHERE username = ?",
            [&username],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                ))
            },
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    // Unknown user, wrong password, and deactivated user all collapse into
    // the same response shape.
    match row {
        Some((user_id, hash, salt, role, active))
            if active != 0 && hash_password(&salt, &password) == hash =>
        {
            Ok(json!({ "valid": true, "userId": user_id, "role": role }))
        }
        _ => Ok(json!({ "valid": false })),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.list" => Some(handle_users_list(state, req)),
        "users.create" => Some(with_db(state, req, users_create)),
        "users.update" => Some(with_db(state, req, users_update)),
        "users.setActive" => Some(with_db(state, req, users_set_active)),
        "users.delete" => Some(with_db(state, req, users_delete)),
        "users.verifyPassword" => Some(with_db(state, req, users_verify_password)),
        _ => None,
    }
}
