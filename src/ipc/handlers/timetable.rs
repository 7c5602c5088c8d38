use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{class_key_param, date_param, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{parse_time, Period, TIME_FMT};
use crate::timetable;
use chrono::Weekday;
use rusqlite::Connection;
use serde_json::json;

fn weekday_param(params: &serde_json::Value, key: &str) -> Result<Weekday, HandlerErr> {
    let raw = get_required_str(params, key)?;
    raw.parse::<Weekday>()
        .map_err(|_| HandlerErr::bad_params(format!("{} must be a weekday name", key)))
}

fn period_from_json(entry: &serde_json::Value, i: usize) -> Result<Period, HandlerErr> {
    let number = entry
        .get("number")
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| HandlerErr::bad_params(format!("periods[{}] missing number", i)))?;
    let subject_code = entry
        .get("subjectCode")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params(format!("periods[{}] missing subjectCode", i)))?;
    let subject_name = entry
        .get("subjectName")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params(format!("periods[{}] missing subjectName", i)))?;
    let start_raw = entry
        .get("startTime")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params(format!("periods[{}] missing startTime", i)))?;
    let end_raw = entry
        .get("endTime")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params(format!("periods[{}] missing endTime", i)))?;
    let (Some(start_time), Some(end_time)) = (parse_time(start_raw), parse_time(end_raw)) else {
        return Err(HandlerErr::bad_params(format!(
            "periods[{}] times must be HH:MM",
            i
        )));
    };
    Ok(Period {
        number,
        subject_code: subject_code.to_string(),
        subject_name: subject_name.to_string(),
        start_time,
        end_time,
    })
}

fn period_json(p: &Period) -> serde_json::Value {
    json!({
        "number": p.number,
        "subjectCode": p.subject_code,
        "subjectName": p.subject_name,
        "startTime": p.start_time.format(TIME_FMT).to_string(),
        "endTime": p.end_time.format(TIME_FMT).to_string(),
    })
}

fn timetable_set_day(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let key = class_key_param(params)?;
    let weekday = weekday_param(params, "weekday")?;
    let Some(entries) = params.get("periods").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing periods"));
    };
    let mut periods = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        periods.push(period_from_json(entry, i)?);
    }
    timetable::replace_day(conn, &key, weekday, &periods)?;
    Ok(json!({ "periodCount": periods.len() }))
}

fn timetable_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let key = class_key_param(params)?;
    let periods = if params.get("date").is_some() {
        let date = date_param(params, "date")?;
        timetable::periods_for(conn, &key, date)?
    } else {
        let weekday = weekday_param(params, "weekday")?;
        timetable::periods_for_weekday(conn, &key, weekday)?
    };
    let rows: Vec<serde_json::Value> = periods.iter().map(period_json).collect();
    Ok(json!({ "periods": rows }))
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
        "timetable.setDay" => Some(run(timetable_set_day, state, req)),
        "timetable.get" => Some(run(timetable_get, state, req)),
        _ => None,
    }
}
