use rusqlite::{Connection, OptionalExtension};

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};

/// Handler-internal error carried until the response is built; keeps the
/// fallible body of each handler on plain `?` propagation.
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            code: "not_found",
            message: message.into(),
            details: None,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            code: "conflict",
            message: message.into(),
            details: None,
        }
    }

    pub fn db(code: &'static str, e: impl std::fmt::Display) -> Self {
        Self {
            code,
            message: e.to_string(),
            details: None,
        }
    }

    pub fn db_on_table(code: &'static str, e: impl std::fmt::Display, table: &str) -> Self {
        Self {
            code,
            message: e.to_string(),
            details: Some(serde_json::json!({ "table": table })),
        }
    }
}

/// UNIQUE/FK violations surface as `conflict` so callers can distinguish a
/// duplicate name from a storage failure.
pub fn map_insert_err(e: rusqlite::Error, table: &str) -> HandlerErr {
    if is_constraint_violation(&e) {
        return HandlerErr {
            code: "conflict",
            message: e.to_string(),
            details: Some(serde_json::json!({ "table": table })),
        };
    }
    HandlerErr::db_on_table("db_insert_failed", e, table)
}

pub fn map_update_err(e: rusqlite::Error, table: &str) -> HandlerErr {
    if is_constraint_violation(&e) {
        return HandlerErr {
            code: "conflict",
            message: e.to_string(),
            details: Some(serde_json::json!({ "table": table })),
        };
    }
    HandlerErr::db_on_table("db_update_failed", e, table)
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let s = params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    if s.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(s)
}

/// Trimmed optional string; empty and null both collapse to None.
pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_bool_or(params: &serde_json::Value, key: &str, default: bool) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

pub fn get_required_bool(params: &serde_json::Value, key: &str) -> Result<bool, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Mutating handlers attribute their activity-log entries to params.actor.
pub fn actor_from(params: &serde_json::Value) -> String {
    get_optional_str(params, "actor").unwrap_or_else(|| "system".to_string())
}

/// Run a handler body against the open workspace database, mapping the
/// missing-workspace case and HandlerErr results to response envelopes.
pub fn with_db(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn row_exists(conn: &Connection, table: &str, id: &str) -> Result<bool, HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    conn.query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(|e| HandlerErr::db("db_query_failed", e))
}

pub fn require_row(conn: &Connection, table: &str, id: &str, what: &str) -> Result<(), HandlerErr> {
    if !row_exists(conn, table, id)? {
        return Err(HandlerErr::not_found(format!("{} not found", what)));
    }
    Ok(())
}
