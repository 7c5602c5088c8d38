use crate::detect::{self, MissedSectionEntry, Priority, WorklistFilter};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{class_key_json, date_param, get_bool, get_opt_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::STAMP_FMT;
use chrono::Local;
use rusqlite::Connection;
use serde_json::json;

fn entry_json(e: &MissedSectionEntry) -> serde_json::Value {
    json!({
        "classKey": class_key_json(&e.class_key),
        "class": e.class_key.label(),
        "date": e.date.to_string(),
        "period": e.period_no,
        "subjectName": e.subject_name,
        "dayOfWeek": e.day_of_week,
        "detectedAt": e.detected_at.format(STAMP_FMT).to_string(),
        "priority": e.priority.as_str(),
        "isCompleted": e.is_completed,
        "completedAt": e.completed_at.map(|t| t.format(STAMP_FMT).to_string()),
    })
}

fn missed_detect(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let from = date_param(params, "from")?;
    let to = date_param(params, "to")?;
    let entries = detect::detect(conn, from, to, Local::now().naive_local())?;
    let rows: Vec<serde_json::Value> = entries.iter().map(entry_json).collect();
    Ok(json!({ "entries": rows }))
}

fn missed_worklist(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let priority = match get_opt_str(params, "priority") {
        None => None,
        Some(raw) => Some(Priority::parse(&raw).ok_or_else(|| {
            HandlerErr::bad_params("priority must be one of: normal, urgent, overdue")
        })?),
    };
    let filter = WorklistFilter {
        priority,
        include_completed: get_bool(params, "includeCompleted", false),
        course_type: get_opt_str(params, "courseType"),
    };
    let entries = detect::worklist(conn, &filter)?;
    let rows: Vec<serde_json::Value> = entries.iter().map(entry_json).collect();
    Ok(json!({ "entries": rows }))
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
        "missed.detect" => Some(run(missed_detect, state, req)),
        "missed.worklist" => Some(run(missed_worklist, state, req)),
        _ => None,
    }
}
