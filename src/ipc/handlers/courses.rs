use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_from, get_bool_or, get_optional_str, get_required_bool, get_required_f64,
    get_required_str, map_insert_err, map_update_err, require_row, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "courses": [] }));
    };

    let school_id = get_optional_str(&req.params, "schoolId");

    let sql = "SELECT
           c.id,
           c.school_id,
           c.name,
           c.schedule,
           c.monthly_fee,
           c.active,
           (SELECT COUNT(*) FROM students st WHERE st.course_id = c.id) AS enrolled_count
         FROM courses c
         WHERE (?1 IS NULL OR c.school_id = ?1)
         ORDER BY c.name";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&school_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "schoolId": row.get::<_, String>(1)?,
                "name": row.get::<_, String>(2)?,
                "schedule": row.get::<_, Option<String>>(3)?,
                "monthlyFee": row.get::<_, f64>(4)?,
                "active": row.get::<_, i64>(5)? != 0,
                "enrolledCount": row.get::<_, i64>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn courses_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;
    require_row(conn, "schools", &school_id, "school")?;

    let name = get_required_str(params, "name")?;
    let schedule = get_optional_str(params, "schedule");
    let monthly_fee = get_required_f64(params, "monthlyFee")?;
    if monthly_fee < 0.0 {
        return Err(HandlerErr::bad_params("monthlyFee must not be negative"));
    }
    let active = get_bool_or(params, "active", true);

    let course_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, school_id, name, schedule, monthly_fee, active)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &course_id,
            &school_id,
            &name,
            &schedule,
            monthly_fee,
            active as i64,
        ),
    )
    .map_err(|e| map_insert_err(e, "courses"))?;

    db::log_activity(
        conn,
        &actor_from(params),
        "create",
        "course",
        Some(&course_id),
        Some(&name),
    );

    Ok(json!({ "courseId": course_id, "name": name }))
}

fn courses_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    require_row(conn, "courses", &course_id, "course")?;

    let name = get_required_str(params, "name")?;
    let schedule = get_optional_str(params, "schedule");
    let monthly_fee = get_required_f64(params, "monthlyFee")?;
    if monthly_fee < 0.0 {
        return Err(HandlerErr::bad_params("monthlyFee must not be negative"));
    }

    conn.execute(
        "UPDATE courses SET name = ?, schedule = ?, monthly_fee = ? WHERE id = ?",
        (&name, &schedule, monthly_fee, &course_id),
    )
    .map_err(|e| map_update_err(e, "courses"))?;

    db::log_activity(
        conn,
        &actor_from(params),
        "update",
        "course",
        Some(&course_id),
        Some(&name),
    );

    Ok(json!({ "courseId": course_id }))
}

fn courses_set_active(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let active = get_required_bool(params, "active")?;
    require_row(conn, "courses", &course_id, "course")?;

    // An inactive course keeps its enrolled students; it only drops out of
    // billing and the status board.
    conn.execute(
        "UPDATE courses SET active = ? WHERE id = ?",
        (active as i64, &course_id),
    )
    .map_err(|e| map_update_err(e, "courses"))?;

    db::log_activity(
        conn,
        &actor_from(params),
        if active { "activate" } else { "deactivate" },
        "course",
        Some(&course_id),
        None,
    );

    Ok(json!({ "courseId": course_id, "active": active }))
}

fn courses_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    require_row(conn, "courses", &course_id, "course")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    tx.execute("DELETE FROM payments WHERE course_id = ?", [&course_id])
        .map_err(|e| HandlerErr::db_on_table("db_delete_failed", e, "payments"))?;

    // Enrolled students stay; they just lose the course link.
    tx.execute(
        "UPDATE students SET course_id = NULL WHERE course_id = ?",
        [&course_id],
    )
    .map_err(|e| HandlerErr::db_on_table("db_update_failed", e, "students"))?;

    tx.execute("DELETE FROM courses WHERE id = ?", [&course_id])
        .map_err(|e| HandlerErr::db_on_table("db_delete_failed", e, "courses"))?;

    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    db::log_activity(
        conn,
        &actor_from(params),
        "delete",
        "course",
        Some(&course_id),
        None,
    );

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.create" => Some(with_db(state, req, courses_create)),
        "courses.update" => Some(with_db(state, req, courses_update)),
        "courses.setActive" => Some(with_db(state, req, courses_set_active)),
        "courses.delete" => Some(with_db(state, req, courses_delete)),
        _ => None,
    }
}
