use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    class_key_param, date_param, get_opt_str, get_required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{known_course_types, DATE_FMT, STAMP_FMT};
use crate::signals::WEEKLY_HOLIDAY_KEY;
use chrono::{Local, Weekday};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn set_weekly_holiday(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let raw = get_required_str(params, "weekday")?;
    let weekday = raw
        .parse::<Weekday>()
        .map_err(|_| HandlerErr::bad_params("weekday must be a weekday name"))?;
    db::settings_set(conn, WEEKLY_HOLIDAY_KEY, &weekday.to_string()).map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(json!({ "weekday": weekday.to_string() }))
}

// affectedCourseTypes accepts "all" or an explicit list of known
// course types; stored as CSV.
fn parse_affected(params: &serde_json::Value) -> Result<String, HandlerErr> {
    let Some(raw) = params.get("affectedCourseTypes") else {
        return Ok("all".to_string());
    };
    if raw.as_str() == Some("all") {
        return Ok("all".to_string());
    }
    let Some(list) = raw.as_array() else {
        return Err(HandlerErr::bad_params(
            "affectedCourseTypes must be \"all\" or a list of course types",
        ));
    };
    let known = known_course_types();
    let mut out = Vec::with_capacity(list.len());
    for v in list {
        let Some(s) = v.as_str() else {
            return Err(HandlerErr::bad_params(
                "affectedCourseTypes entries must be strings",
            ));
        };
        let s = s.trim().to_ascii_lowercase();
        if s == "all" {
            return Ok("all".to_string());
        }
        if !known.contains(&s.as_str()) {
            return Err(HandlerErr::bad_params(format!(
                "unknown course type: {}",
                s
            )));
        }
        out.push(s);
    }
    if out.is_empty() {
        return Err(HandlerErr::bad_params(
            "affectedCourseTypes must not be empty",
        ));
    }
    Ok(out.join(","))
}

fn holidays_declare(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date = date_param(params, "date")?;
    let name = get_required_str(params, "name")?;
    let affected = parse_affected(params)?;
    conn.execute(
        "INSERT INTO holidays(date, name, affected_course_types) VALUES(?, ?, ?)
         ON CONFLICT(date) DO UPDATE SET
           name = excluded.name,
           affected_course_types = excluded.affected_course_types",
        (date.format(DATE_FMT).to_string(), &name, &affected),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "holidays" })),
    })?;
    Ok(json!({ "date": date.format(DATE_FMT).to_string(), "name": name }))
}

fn holidays_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (clause, args): (&str, Vec<String>) =
        match (get_opt_str(params, "from"), get_opt_str(params, "to")) {
            (Some(from), Some(to)) => ("WHERE date >= ? AND date <= ?", vec![from, to]),
            _ => ("", vec![]),
        };
    let sql = format!(
        "SELECT date, name, affected_course_types FROM holidays {} ORDER BY date",
        clause
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), |r| {
            Ok(json!({
                "date": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "affectedCourseTypes": r.get::<_, String>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    Ok(json!({ "holidays": rows }))
}

fn leaves_approve(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let from_date = date_param(params, "fromDate")?;
    let to_date = date_param(params, "toDate")?;
    let reason = get_required_str(params, "reason")?;
    if from_date > to_date {
        return Err(HandlerErr::bad_params("fromDate must not be after toDate"));
    }

    let exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?
        .is_some();
    if !exists {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: Some(json!({ "studentId": student_id })),
        });
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO leaves(id, student_id, from_date, to_date, reason, approved_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &id,
            &student_id,
            from_date.format(DATE_FMT).to_string(),
            to_date.format(DATE_FMT).to_string(),
            &reason,
            Local::now().naive_local().format(STAMP_FMT).to_string(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "leaves" })),
    })?;
    Ok(json!({ "leaveId": id }))
}

fn leaves_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (clause, args): (&str, Vec<String>) = if params.get("date").is_some() {
        let date = date_param(params, "date")?.format(DATE_FMT).to_string();
        ("WHERE from_date <= ? AND to_date >= ?", vec![date.clone(), date])
    } else if let Some(student_id) = get_opt_str(params, "studentId") {
        ("WHERE student_id = ?", vec![student_id])
    } else {
        ("", vec![])
    };
    let sql = format!(
        "SELECT id, student_id, from_date, to_date, reason FROM leaves {} ORDER BY from_date",
        clause
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "fromDate": r.get::<_, String>(2)?,
                "toDate": r.get::<_, String>(3)?,
                "reason": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    Ok(json!({ "leaves": rows }))
}

fn emergency_declare(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let key = class_key_param(params)?;
    let date = date_param(params, "date")?;
    let reason = get_required_str(params, "reason")?;
    // No periods list means the whole day.
    let periods_csv = match params.get("periods").and_then(|v| v.as_array()) {
        None => String::new(),
        Some(list) => {
            let mut nums = Vec::with_capacity(list.len());
            for v in list {
                let Some(n) = v.as_u64().and_then(|n| u32::try_from(n).ok()) else {
                    return Err(HandlerErr::bad_params(
                        "periods entries must be period numbers",
                    ));
                };
                nums.push(n.to_string());
            }
            nums.join(",")
        }
    };

    conn.execute(
        "INSERT INTO emergency_leaves(
            course_type, year, stream, section, date, affected_periods, reason, declared_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(course_type, year, stream, section, date) DO UPDATE SET
           affected_periods = excluded.affected_periods,
           reason = excluded.reason,
           declared_at = excluded.declared_at",
        (
            &key.course_type,
            key.year,
            &key.stream,
            &key.section,
            date.format(DATE_FMT).to_string(),
            &periods_csv,
            &reason,
            Local::now().naive_local().format(STAMP_FMT).to_string(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "emergency_leaves" })),
    })?;
    Ok(json!({ "class": key.label(), "date": date.format(DATE_FMT).to_string() }))
}

fn emergency_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date = date_param(params, "date")?;
    let mut stmt = conn
        .prepare(
            "SELECT course_type, year, stream, section, affected_periods, reason
             FROM emergency_leaves WHERE date = ?
             ORDER BY course_type, year, stream, section",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let rows = stmt
        .query_map([date.format(DATE_FMT).to_string()], |r| {
            Ok(json!({
                "classKey": {
                    "courseType": r.get::<_, String>(0)?,
                    "year": r.get::<_, u32>(1)?,
                    "stream": r.get::<_, String>(2)?,
                    "section": r.get::<_, String>(3)?,
                },
                "affectedPeriods": r.get::<_, String>(4)?,
                "reason": r.get::<_, String>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    Ok(json!({ "emergencies": rows }))
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
        "settings.setWeeklyHoliday" => Some(run(set_weekly_holiday, state, req)),
        "holidays.declare" => Some(run(holidays_declare, state, req)),
        "holidays.list" => Some(run(holidays_list, state, req)),
        "leaves.approve" => Some(run(leaves_approve, state, req)),
        "leaves.list" => Some(run(leaves_list, state, req)),
        "emergency.declare" => Some(run(emergency_declare, state, req)),
        "emergency.list" => Some(run(emergency_list, state, req)),
        _ => None,
    }
}
