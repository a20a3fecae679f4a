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

fn handle_schools_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "schools": [] }));
    };

    // Include basic counts so the UI can show a useful dashboard.
    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           s.id,
           s.name,
           s.address,
           s.phone,
           s.active,
           (SELECT COUNT(*) FROM courses c WHERE c.school_id = s.id) AS course_count,
           (SELECT COUNT(*) FROM students st WHERE st.school_id = s.id) AS student_count
         FROM schools s
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
                "address": row.get::<_, Option<String>>(2)?,
                "phone": row.get::<_, Option<String>>(3)?,
                "active": row.get::<_, i64>(4)? != 0,
                "courseCount": row.get::<_, i64>(5)?,
                "studentCount": row.get::<_, i64>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(schools) => ok(&req.id, json!({ "schools": schools })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn schools_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let address = get_optional_str(params, "address");
    let phone = get_optional_str(params, "phone");
    let active = get_bool_or(params, "active", true);

    let school_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO schools(id, name, address, phone, active) VALUES(?, ?, ?, ?, ?)",
        (&school_id, &name, &address, &phone, active as i64),
    )
    .map_err(|e| map_insert_err(e, "schools"))?;

    db::log_activity(
        conn,
        &actor_from(params),
        "create",
        "school",
        Some(&school_id),
        Some(&name),
    );

    Ok(json!({ "schoolId": school_id, "name": name }))
}

fn schools_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;
    require_row(conn, "schools", &school_id, "school")?;

    let name = get_required_str(params, "name")?;
    let address = get_optional_str(params, "address");
    let phone = get_optional_str(params, "phone");

    conn.execute(
        "UPDATE schools SET name = ?, address = ?, phone = ? WHERE id = ?",
        (&name, &address, &phone, &school_id),
    )
    .map_err(|e| map_update_err(e, "schools"))?;

    db::log_activity(
        conn,
        &actor_from(params),
        "update",
        "school",
        Some(&school_id),
        Some(&name),
    );

    Ok(json!({ "schoolId": school_id }))
}

/// Deactivating a school takes its courses with it; reactivating leaves
/// courses alone so a previously archived course does not come back by
/// accident.
fn schools_set_active(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;
    let active = get_required_bool(params, "active")?;
    require_row(conn, "schools", &school_id, "school")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    tx.execute(
        "UPDATE schools SET active = ? WHERE id = ?",
        (active as i64, &school_id),
    )
    .map_err(|e| map_update_err(e, "schools"))?;

    let mut courses_deactivated = 0usize;
    if !active {
        courses_deactivated = tx
            .execute(
                "UPDATE courses SET active = 0 WHERE school_id = ? AND active = 1",
                [&school_id],
            )
            .map_err(|e| map_update_err(e, "courses"))?;
    }

    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    db::log_activity(
        conn,
        &actor_from(params),
        if active { "activate" } else { "deactivate" },
        "school",
        Some(&school_id),
        None,
    );

    Ok(json!({
        "schoolId": school_id,
        "active": active,
        "coursesDeactivated": courses_deactivated
    }))
}

fn schools_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;
    require_row(conn, "schools", &school_id, "school")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    tx.execute(
        "DELETE FROM payments
         WHERE student_id IN (SELECT id FROM students WHERE school_id = ?)
            OR course_id IN (SELECT id FROM courses WHERE school_id = ?)",
        [&school_id, &school_id],
    )
    .map_err(|e| HandlerErr::db_on_table("db_delete_failed", e, "payments"))?;

    tx.execute("DELETE FROM students WHERE school_id = ?", [&school_id])
        .map_err(|e| HandlerErr::db_on_table("db_delete_failed", e, "students"))?;

    tx.execute("DELETE FROM courses WHERE school_id = ?", [&school_id])
        .map_err(|e| HandlerErr::db_on_table("db_delete_failed", e, "courses"))?;

    tx.execute("DELETE FROM schools WHERE id = ?", [&school_id])
        .map_err(|e| HandlerErr::db_on_table("db_delete_failed", e, "schools"))?;

    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    db::log_activity(
        conn,
        &actor_from(params),
        "delete",
        "school",
        Some(&school_id),
        None,
    );

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schools.list" => Some(handle_schools_list(state, req)),
        "schools.create" => Some(with_db(state, req, schools_create)),
        "schools.update" => Some(with_db(state, req, schools_update)),
        "schools.setActive" => Some(with_db(state, req, schools_set_active)),
        "schools.delete" => Some(with_db(state, req, schools_delete)),
        _ => None,
    }
}
