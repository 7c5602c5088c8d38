use std::collections::{BTreeMap, HashMap};

use crate::commit::{commit_slot, CommitRequest};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    class_key_param, date_param, get_opt_str, get_required_u32, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{AttendanceMark, STAMP_FMT};
use crate::store::SqliteRemote;
use crate::{lock, resolve, roster, signals, store, timetable};
use chrono::Local;
use rusqlite::Connection;
use serde_json::json;

fn lock_json(
    conn: &Connection,
    key: &crate::model::ClassKey,
    date: chrono::NaiveDate,
    period_no: u32,
    now: chrono::NaiveDateTime,
) -> Result<serde_json::Value, HandlerErr> {
    let state = lock::lock_state(conn, key, date, period_no)?;
    Ok(match state.filter(|s| s.is_active(now)) {
        Some(s) => json!({
            "locked": true,
            "remainingMinutes": s.remaining_minutes(now),
            "lockedAt": s.locked_at.format(STAMP_FMT).to_string(),
            "unlocksAt": s.unlocks_at.format(STAMP_FMT).to_string(),
        }),
        None => json!({ "locked": false }),
    })
}

fn attendance_prepare(
    conn: &Connection,
    online: bool,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let key = class_key_param(params)?;
    let date = date_param(params, "date")?;
    let period_no = get_required_u32(params, "period")?;
    let now = Local::now().naive_local();

    let scheduled = timetable::periods_for(conn, &key, date)?;
    let Some(period) = scheduled.iter().find(|p| p.number == period_no) else {
        return Err(HandlerErr::bad_params(format!(
            "period {} is not scheduled for {} on {}",
            period_no,
            key.label(),
            date
        )));
    };

    let slot_signals = signals::load_slot_signals(conn, &key, date, period_no)?;
    let records: HashMap<String, AttendanceMark> =
        store::query_attendance(conn, online, &key, date, Some(period_no))?
            .into_iter()
            .map(|r| (r.student_id, r.mark))
            .collect();
    let students = roster::class_students(conn, &key, false)?;
    let resolved = resolve::resolve_slot(&slot_signals, &records, &students);

    let rows: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            let status = &resolved[&s.id];
            json!({
                "studentId": s.id,
                "name": s.name,
                "rollNo": s.roll_no,
                "mark": status.mark.as_str(),
                "source": status.source.as_str(),
                "editable": status.editable(),
                "reason": status.reason,
            })
        })
        .collect();

    let block = resolve::slot_block(&slot_signals);
    Ok(json!({
        "class": key.label(),
        "date": date.to_string(),
        "period": period_no,
        "subjectName": period.subject_name,
        "blocked": block.is_some(),
        "blockCode": block.as_ref().map(|e| e.code()),
        "blockReason": block.as_ref().map(|e| e.to_string()),
        "lock": lock_json(conn, &key, date, period_no, now)?,
        "canEditFromHistory": lock::can_edit_from_history(date, now.date()),
        "rows": rows,
    }))
}

fn attendance_commit(
    conn: &Connection,
    online: bool,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let key = class_key_param(params)?;
    let date = date_param(params, "date")?;
    let period_no = get_required_u32(params, "period")?;
    let Some(raw_marks) = params.get("marks").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing marks"));
    };

    let mut marks = BTreeMap::new();
    for (student_id, value) in raw_marks {
        let Some(raw) = value.as_str() else {
            return Err(HandlerErr::bad_params(format!(
                "mark for student {} must be a string",
                student_id
            )));
        };
        let Some(mark) = AttendanceMark::parse(raw) else {
            return Err(HandlerErr::bad_params(format!(
                "unknown mark {} for student {}",
                raw, student_id
            )));
        };
        marks.insert(student_id.clone(), mark);
    }

    let request = CommitRequest {
        class_key: key,
        date,
        period_no,
        marks,
        history_note: get_opt_str(params, "historyNote"),
    };
    let mut remote = SqliteRemote { conn };
    let summary = commit_slot(
        conn,
        &mut remote,
        online,
        &request,
        Local::now().naive_local(),
    )?;

    Ok(json!({
        "persistedCount": summary.persisted,
        "pendingCount": summary.pending,
        "coerced": summary.coerced,
        "lockedUntil": summary
            .locked_until
            .map(|t| t.format(STAMP_FMT).to_string()),
        "completedMissedSection": summary.completed_missed,
    }))
}

fn attendance_lock_status(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let key = class_key_param(params)?;
    let date = date_param(params, "date")?;
    let period_no = get_required_u32(params, "period")?;
    lock_json(conn, &key, date, period_no, Local::now().naive_local())
}

fn attendance_can_edit_from_history(
    _conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let _key = class_key_param(params)?;
    let date = date_param(params, "date")?;
    let today = Local::now().naive_local().date();
    Ok(json!({ "allowed": lock::can_edit_from_history(date, today) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let online = state.online;
    let run = |f: fn(&Connection, bool, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
               state: &mut AppState,
               req: &Request| {
        let Some(conn) = state.db.as_ref() else {
            return err(&req.id, "no_workspace", "select a workspace first", None);
        };
        match f(conn, online, &req.params) {
            Ok(result) => ok(&req.id, result),
            Err(error) => error.response(&req.id),
        }
    };

    match req.method.as_str() {
        "attendance.prepare" => Some(run(attendance_prepare, state, req)),
        "attendance.commit" => Some(run(attendance_commit, state, req)),
        "attendance.lockStatus" => Some(run(
            |conn, _online, params| attendance_lock_status(conn, params),
            state,
            req,
        )),
        "attendance.canEditFromHistory" => Some(run(
            |conn, _online, params| attendance_can_edit_from_history(conn, params),
            state,
            req,
        )),
        _ => None,
    }
}
