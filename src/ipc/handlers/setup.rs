use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Billing,
    Receipts,
    Notifications,
    Security,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "billing" => Some(Self::Billing),
            "receipts" => Some(Self::Receipts),
            "notifications" => Some(Self::Notifications),
            "security" => Some(Self::Security),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Billing => "setup.billing",
            Self::Receipts => "setup.receipts",
            Self::Notifications => "setup.notifications",
            Self::Security => "setup.security",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Billing => json!({
            "currency": "MXN",
            "defaultMonthlyFee": 0,
            "billInactiveCourses": false,
            "graceDays": 5
        }),
        SetupSection::Receipts => json!({
            "showBankOnReceipt": true,
            "footerNote": "",
            "copies": 1
        }),
        SetupSection::Notifications => json!({
            "enabled": false,
            "fromName": "",
            "replyTo": "",
            "subjectPrefix": "Academy",
            "defaultCc": ""
        }),
        SetupSection::Security => json!({
            "confirmDeletes": true,
            "autoLockMinutes": 0,
            "minPasswordLength": 8
        }),
    }
}

/// Default-aware read of the notifications subject prefix; used when
/// rendering outgoing mail.
pub fn notification_subject_prefix(conn: &rusqlite::Connection) -> String {
    let stored = db::settings_get_json(conn, SetupSection::Notifications.key())
        .ok()
        .flatten();
    if let Some(prefix) = stored
        .as_ref()
        .and_then(|v| v.get("subjectPrefix"))
        .and_then(|v| v.as_str())
    {
        return prefix.to_string();
    }
    default_section(SetupSection::Notifications)
        .get("subjectPrefix")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_f64_min(v: &Value, key: &str, min: f64) -> Result<f64, String> {
    let n = v.as_f64().ok_or_else(|| format!("{} must be a number", key))?;
    if n < min {
        return Err(format!("{} must be >= {}", key, min));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Billing => match k.as_str() {
                "currency" => {
                    let s = parse_string_max(v, k, 8)?.to_ascii_uppercase();
                    if s.is_empty() {
                        return Err("currency must not be empty".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "defaultMonthlyFee" => {
                    obj.insert(k.clone(), Value::from(parse_f64_min(v, k, 0.0)?));
                }
                "billInactiveCourses" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "graceDays" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 28)?));
                }
                _ => return Err(format!("unknown billing field: {}", k)),
            },
            SetupSection::Receipts => match k.as_str() {
                "showBankOnReceipt" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "footerNote" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 300)?));
                }
                "copies" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 5)?));
                }
                _ => return Err(format!("unknown receipts field: {}", k)),
            },
            SetupSection::Notifications => match k.as_str() {
                "enabled" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "fromName" | "replyTo" | "subjectPrefix" | "defaultCc" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 120)?));
                }
                _ => return Err(format!("unknown notifications field: {}", k)),
            },
            SetupSection::Security => match k.as_str() {
                "confirmDeletes" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "autoLockMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 240)?));
                }
                "minPasswordLength" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 8, 64)?));
                }
                _ => return Err(format!("unknown security field: {}", k)),
            },
        }
    }
    Ok(())
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(section) = req
        .params
        .get("section")
        .and_then(|v| v.as_str())
        .and_then(SetupSection::parse)
    else {
        return err(
            &req.id,
            "bad_params",
            "section must be one of: billing, receipts, notifications, security",
            None,
        );
    };

    let stored = match db::settings_get_json(conn, section.key()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Stored values overlay the defaults so new fields pick up defaults on
    // old workspaces.
    let mut value = default_section(section);
    if let (Some(base), Some(saved)) = (value.as_object_mut(), stored.and_then(|s| s.as_object().cloned())) {
        for (k, v) in saved {
            base.insert(k, v);
        }
    }

    ok(&req.id, json!({ "settings": value }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(section) = req
        .params
        .get("section")
        .and_then(|v| v.as_str())
        .and_then(SetupSection::parse)
    else {
        return err(
            &req.id,
            "bad_params",
            "section must be one of: billing, receipts, notifications, security",
            None,
        );
    };

    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing params.patch object", None);
    };

    let stored = match db::settings_get_json(conn, section.key()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let mut value = default_section(section);
    if let (Some(base), Some(saved)) = (value.as_object_mut(), stored.and_then(|s| s.as_object().cloned())) {
        for (k, v) in saved {
            base.insert(k, v);
        }
    }

    if let Err(msg) = merge_section_patch(section, &mut value, patch) {
        return err(&req.id, "bad_params", msg, None);
    }

    if let Err(e) = db::settings_set_json(conn, section.key(), &value) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "settings": value }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
