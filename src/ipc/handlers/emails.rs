use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_from, get_bool_or, get_required_str, map_insert_err, require_row, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

/// Replace `{{key}}` markers with their values; unknown markers are left in
/// place so a typo is visible in the rendered mail instead of vanishing.
fn render_template(text: &str, vars: &HashMap<&str, String>) -> String {
    let mut out = text.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{}}}}}", key), value);
    }
    out
}

fn handle_templates_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "templates": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, subject, body, active FROM email_templates ORDER BY name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "subject": row.get::<_, String>(2)?,
                "body": row.get::<_, String>(3)?,
                "active": row.get::<_, i64>(4)? != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(templates) => ok(&req.id, json!({ "templates": templates })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn templates_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let subject = get_required_str(params, "subject")?;
    let body = get_required_str(params, "body")?;
    let active = get_bool_or(params, "active", true);

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM email_templates WHERE name = ?",
            [&name],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let template_id = match existing {
        Some(id) => {
            conn.execute(
                "UPDATE email_templates SET subject = ?, body = ?, active = ? WHERE id = ?",
                (&subject, &body, active as i64, &id),
            )
            .map_err(|e| HandlerErr::db_on_table("db_update_failed", e, "email_templates"))?;
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO email_templates(id, name, subject, body, active) VALUES(?, ?, ?, ?, ?)",
                (&id, &name, &subject, &body, active as i64),
            )
            .map_err(|e| map_insert_err(e, "email_templates"))?;
            id
        }
    };

    db::log_activity(
        conn,
        &actor_from(params),
        "upsert",
        "email_template",
        Some(&template_id),
        Some(&name),
    );

    Ok(json!({ "templateId": template_id, "name": name }))
}

fn templates_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let template_id = get_required_str(params, "templateId")?;
    require_row(conn, "email_templates", &template_id, "template")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    // Sent mail keeps its rendered copy; only the template link is dropped.
    tx.execute(
        "UPDATE email_outbox SET template_id = NULL WHERE template_id = ?",
        [&template_id],
    )
    .map_err(|e| HandlerErr::db_on_table("db_update_failed", e, "email_outbox"))?;

    tx.execute("DELETE FROM email_templates WHERE id = ?", [&template_id])
        .map_err(|e| HandlerErr::db_on_table("db_delete_failed", e, "email_templates"))?;

    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({ "ok": true }))
}

struct Template {
    id: String,
    subject: String,
    body: String,
    active: bool,
}

fn load_template(conn: &Connection, params: &serde_json::Value) -> Result<Template, HandlerErr> {
    let template_id = get_required_str(params, "templateId")?;
    let row: Option<Template> = conn
        .query_row(
            "SELECT id, subject, body, active FROM email_templates WHERE id = ?",
            [&template_id],
            |r| {
                Ok(Template {
                    id: r.get(0)?,
                    subject: r.get(1)?,
                    body: r.get(2)?,
                    active: r.get::<_, i64>(3)? != 0,
                })
            },
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some(template) = row else {
        return Err(HandlerErr::not_found("template not found"));
    };
    if !template.active {
        return Err(HandlerErr::conflict("template is inactive"));
    }
    Ok(template)
}

fn subject_prefix(conn: &Connection) -> String {
    let prefix = super::setup::notification_subject_prefix(conn);
    if prefix.is_empty() {
        String::new()
    } else {
        format!("[{}] ", prefix)
    }
}

fn queue_message(
    conn: &Connection,
    template_id: Option<&str>,
    recipient: &str,
    subject: &str,
    body: &str,
    status: &str,
) -> Result<String, HandlerErr> {
    let outbox_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO email_outbox(id, template_id, recipient, subject, body, status, queued_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &outbox_id,
            template_id,
            recipient,
            subject,
            body,
            status,
            db::now_iso(),
        ),
    )
    .map_err(|e| map_insert_err(e, "email_outbox"))?;
    Ok(outbox_id)
}

/// Render a template for one student and queue it. Transport is the relay's
/// job; the daemon records what should go out.
fn emails_send(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let template = load_template(conn, params)?;
    let student_id = get_required_str(params, "studentId")?;

    let row: Option<(String, String, Option<String>, String, i64, Option<String>, Option<String>)> =
        conn.query_row(
            "SELECT st.first_name, st.last_name, st.email, st.control_no, st.debt_months,
                    sc.name, c.name
             FROM students st
             JOIN schools sc ON sc.id = st.school_id
             LEFT JOIN courses c ON c.id = st.course_id
             WHERE st.id = ?",
            [&student_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get::<_, Option<String>>(5)?,
                    r.get(6)?,
                ))
            },
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((first, last, email, control_no, debt_months, school_name, course_name)) = row
    else {
        return Err(HandlerErr::not_found("student not found"));
    };
    let Some(recipient) = email else {
        return Err(HandlerErr::conflict("student has no email address"));
    };

    let mut vars: HashMap<&str, String> = HashMap::new();
    vars.insert("studentName", format!("{} {}", first, last));
    vars.insert("controlNo", control_no);
    vars.insert("debtMonths", debt_months.to_string());
    vars.insert("schoolName", school_name.unwrap_or_default());
    vars.insert("courseName", course_name.unwrap_or_default());

    let subject = format!(
        "{}{}",
        subject_prefix(conn),
        render_template(&template.subject, &vars)
    );
    let body = render_template(&template.body, &vars);

    let outbox_id = queue_message(conn, Some(&template.id), &recipient, &subject, &body, "queued")?;

    db::log_activity(
        conn,
        &actor_from(params),
        "send",
        "email",
        Some(&outbox_id),
        Some(&recipient),
    );

    Ok(json!({
        "outboxId": outbox_id,
        "recipient": recipient,
        "subject": subject
    }))
}

fn emails_send_test(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let template = load_template(conn, params)?;
    let recipient = get_required_str(params, "recipient")?;

    let mut vars: HashMap<&str, String> = HashMap::new();
    vars.insert("studentName", "Sample Student".to_string());
    vars.insert("controlNo", "2026-0000".to_string());
    vars.insert("debtMonths", "2".to_string());
    vars.insert("schoolName", "Sample School".to_string());
    vars.insert("courseName", "Sample Course".to_string());

    let subject = format!(
        "{}{}",
        subject_prefix(conn),
        render_template(&template.subject, &vars)
    );
    let body = render_template(&template.body, &vars);

    let outbox_id = queue_message(conn, Some(&template.id), &recipient, &subject, &body, "test")?;

    Ok(json!({
        "outboxId": outbox_id,
        "recipient": recipient,
        "subject": subject,
        "body": body
    }))
}

fn handle_outbox_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "messages": [] }));
    };

    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(50)
        .clamp(1, 500);

    let mut stmt = match conn.prepare(
        "SELECT id, template_id, recipient, subject, status, queued_at
         FROM email_outbox ORDER BY queued_at DESC, rowid DESC LIMIT ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([limit], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "templateId": row.get::<_, Option<String>>(1)?,
                "recipient": row.get::<_, String>(2)?,
                "subject": row.get::<_, String>(3)?,
                "status": row.get::<_, String>(4)?,
                "queuedAt": row.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(messages) => ok(&req.id, json!({ "messages": messages })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "emails.templates.list" => Some(handle_templates_list(state, req)),
        "emails.templates.upsert" => Some(with_db(state, req, templates_upsert)),
        "emails.templates.delete" => Some(with_db(state, req, templates_delete)),
        "emails.send" => Some(with_db(state, req, emails_send)),
        "emails.sendTest" => Some(with_db(state, req, emails_send_test)),
        "emails.outbox.list" => Some(handle_outbox_list(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_replaces_known_markers_and_keeps_unknown() {
        let mut vars: HashMap<&str, String> = HashMap::new();
        vars.insert("studentName", "Ana Torres".to_string());
        vars.insert("debtMonths", "3".to_string());

        let out = render_template(
            "Hello {{studentName}}, you owe {{debtMonths}} months. {{mystery}}",
            &vars,
        );
        assert_eq!(out, "Hello Ana Torres, you owe 3 months. {{mystery}}");
    }
}
