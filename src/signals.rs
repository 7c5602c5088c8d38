use std::collections::{BTreeSet, HashMap};

use chrono::{Datelike, NaiveDate, Weekday};
use rusqlite::{Connection, OptionalExtension};

use crate::db;
use crate::error::EngineError;
use crate::model::{ClassKey, DATE_FMT};

pub const WEEKLY_HOLIDAY_KEY: &str = "weekly_holiday";
pub const DEFAULT_WEEKLY_HOLIDAY: Weekday = Weekday::Sun;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolidayKind {
    Declared,
    Weekly,
}

#[derive(Debug, Clone)]
pub struct HolidaySignal {
    pub name: String,
    pub kind: HolidayKind,
}

#[derive(Debug, Clone)]
pub struct EmergencySignal {
    pub reason: String,
}

/// Everything the resolver needs to know about one slot, loaded in one
/// pass. Leaves are keyed by student id with the approval reason.
#[derive(Debug, Clone, Default)]
pub struct SlotSignals {
    pub holiday: Option<HolidaySignal>,
    pub emergency: Option<EmergencySignal>,
    pub leaves: HashMap<String, String>,
}

fn unavailable(source: &str) -> impl Fn(rusqlite::Error) -> EngineError + '_ {
    move |e| EngineError::SignalUnavailable(format!("{}: {}", source, e))
}

pub fn weekly_holiday_weekday(conn: &Connection) -> Result<Weekday, EngineError> {
    let raw = db::settings_get(conn, WEEKLY_HOLIDAY_KEY)
        .map_err(|e| EngineError::SignalUnavailable(format!("weekly holiday setting: {}", e)))?;
    match raw {
        None => Ok(DEFAULT_WEEKLY_HOLIDAY),
        Some(s) => s.parse::<Weekday>().map_err(|_| {
            EngineError::SignalUnavailable(format!("weekly holiday setting is invalid: {}", s))
        }),
    }
}

/// Holiday resolution for (class key, date): a declared holiday whose
/// affected-course set covers the key's course type (or `all`), else
/// the fixed weekly holiday weekday. Both block identically.
pub fn holiday_signal(
    conn: &Connection,
    key: &ClassKey,
    date: NaiveDate,
) -> Result<Option<HolidaySignal>, EngineError> {
    let declared: Option<(String, String)> = conn
        .query_row(
            "SELECT name, affected_course_types FROM holidays WHERE date = ?",
            [date.format(DATE_FMT).to_string()],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(unavailable("holiday calendar"))?;

    if let Some((name, affected)) = declared {
        if course_set_covers(&affected, &key.course_type) {
            return Ok(Some(HolidaySignal {
                name,
                kind: HolidayKind::Declared,
            }));
        }
    }

    let weekly = weekly_holiday_weekday(conn)?;
    if date.weekday() == weekly {
        return Ok(Some(HolidaySignal {
            name: format!("weekly holiday ({})", weekly),
            kind: HolidayKind::Weekly,
        }));
    }
    Ok(None)
}

fn course_set_covers(affected: &str, course_type: &str) -> bool {
    affected
        .split(',')
        .map(|s| s.trim())
        .any(|s| s.eq_ignore_ascii_case("all") || s.eq_ignore_ascii_case(course_type))
}

pub fn emergency_signal(
    conn: &Connection,
    key: &ClassKey,
    date: NaiveDate,
    period_no: u32,
) -> Result<Option<EmergencySignal>, EngineError> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT affected_periods, reason FROM emergency_leaves
             WHERE course_type = ? AND year = ? AND stream = ? AND section = ? AND date = ?",
            (
                &key.course_type,
                key.year,
                &key.stream,
                &key.section,
                date.format(DATE_FMT).to_string(),
            ),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(unavailable("emergency leave registry"))?;

    let Some((periods_raw, reason)) = row else {
        return Ok(None);
    };
    // Empty affected-period set means the whole day.
    let periods = parse_period_set(&periods_raw);
    if periods.is_empty() || periods.contains(&period_no) {
        return Ok(Some(EmergencySignal { reason }));
    }
    Ok(None)
}

pub fn parse_period_set(raw: &str) -> BTreeSet<u32> {
    raw.split(',')
        .filter_map(|s| s.trim().parse::<u32>().ok())
        .collect()
}

/// Leaves whose inclusive `[from_date, to_date]` range contains `date`,
/// keyed by student id.
pub fn active_leaves(
    conn: &Connection,
    date: NaiveDate,
) -> Result<HashMap<String, String>, EngineError> {
    let day = date.format(DATE_FMT).to_string();
    let mut stmt = conn
        .prepare(
            "SELECT student_id, reason FROM leaves
             WHERE from_date <= ? AND to_date >= ?",
        )
        .map_err(unavailable("leave registry"))?;
    let rows = stmt
        .query_map((&day, &day), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(unavailable("leave registry"))?;
    Ok(rows.into_iter().collect())
}

pub fn load_slot_signals(
    conn: &Connection,
    key: &ClassKey,
    date: NaiveDate,
    period_no: u32,
) -> Result<SlotSignals, EngineError> {
    let holiday = holiday_signal(conn, key, date)?;
    let emergency = emergency_signal(conn, key, date, period_no)?;
    let leaves = active_leaves(conn, date)?;
    Ok(SlotSignals {
        holiday,
        emergency,
        leaves,
    })
}
