use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{class_key_param, get_bool, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::roster;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn students_upsert(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let key = class_key_param(params)?;
    let Some(entries) = params.get("students").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing students"));
    };

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let mut ids = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let Some(name) = entry.get("name").and_then(|v| v.as_str()) else {
            return Err(HandlerErr::bad_params(format!(
                "students[{}] missing name",
                i
            )));
        };
        let Some(roll_no) = entry.get("rollNo").and_then(|v| v.as_i64()) else {
            return Err(HandlerErr::bad_params(format!(
                "students[{}] missing rollNo",
                i
            )));
        };
        let id = entry
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let active = entry.get("active").and_then(|v| v.as_bool()).unwrap_or(true);

        tx.execute(
            "INSERT INTO students(id, name, roll_no, course_type, year, stream, section, active, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               roll_no = excluded.roll_no,
               course_type = excluded.course_type,
               year = excluded.year,
               stream = excluded.stream,
               section = excluded.section,
               active = excluded.active,
               sort_order = excluded.sort_order",
            (
                &id,
                name,
                roll_no,
                &key.course_type,
                key.year,
                &key.stream,
                &key.section,
                active as i64,
                i as i64,
            ),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "students" })),
        })?;
        ids.push(id);
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "studentIds": ids }))
}

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let key = class_key_param(params)?;
    let include_inactive = get_bool(params, "includeInactive", false);
    let students = roster::class_students(conn, &key, include_inactive)?;
    let rows: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "name": s.name,
                "rollNo": s.roll_no,
                "active": s.active,
                "sortOrder": s.sort_order
            })
        })
        .collect();
    Ok(json!({ "students": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let run = |f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
               state: &mut AppState,
               req: &Request| {
        let Some(conn) = state.db.as_ref() else {
            return err(&req.id, "no_workspace", "select a workspace first", None);
        };
        match f(conn, &req.params) {
            Ok(result) => ok(&req.id, result),
            Err(error) => error.response(&req.id),
        }
    };

    match req.method.as_str() {
        "students.upsert" => Some(run(students_upsert, state, req)),
        "students.list" => Some(run(students_list, state, req)),
        _ => None,
    }
}
