use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{Connection, Row};

use crate::error::EngineError;
use crate::model::{parse_date, parse_stamp, ClassKey, DATE_FMT, STAMP_FMT};
use crate::{signals, store, timetable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    Urgent,
    Overdue,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Normal => "normal",
            Priority::Urgent => "urgent",
            Priority::Overdue => "overdue",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Some(Priority::Normal),
            "urgent" => Some(Priority::Urgent),
            "overdue" => Some(Priority::Overdue),
            _ => None,
        }
    }

    /// More than 7 elapsed days is overdue, more than 3 urgent.
    pub fn classify(elapsed_days: i64) -> Self {
        if elapsed_days > 7 {
            Priority::Overdue
        } else if elapsed_days > 3 {
            Priority::Urgent
        } else {
            Priority::Normal
        }
    }
}

#[derive(Debug, Clone)]
pub struct MissedSectionEntry {
    pub class_key: ClassKey,
    pub date: NaiveDate,
    pub period_no: u32,
    pub subject_name: String,
    pub day_of_week: String,
    pub detected_at: NaiveDateTime,
    pub priority: Priority,
    pub is_completed: bool,
    pub completed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Default)]
pub struct WorklistFilter {
    pub priority: Option<Priority>,
    pub include_completed: bool,
    pub course_type: Option<String>,
}

/// Institution-wide scan: for every class key with active students and
/// every date in the window, compare the timetable against committed
/// records and upsert an entry for each fully elapsed, unattended
/// period. Idempotent by slot key; completed entries never resurface.
/// Detection itself writes no attendance records.
pub fn detect(
    conn: &Connection,
    window_start: NaiveDate,
    window_end: NaiveDate,
    now: NaiveDateTime,
) -> Result<Vec<MissedSectionEntry>, EngineError> {
    if window_start > window_end {
        return Err(EngineError::Validation(
            "window start must not be after window end".to_string(),
        ));
    }
    let today = now.date();
    let end = window_end.min(today);
    let keys = timetable::class_keys_with_students(conn)?;

    let mut scanned = 0usize;
    let mut date = window_start;
    while date <= end {
        for key in &keys {
            // Holiday days are not missed teaching days.
            if let Some(holiday) = signals::holiday_signal(conn, key, date)? {
                tracing::debug!(
                    class = %key.label(),
                    date = %date,
                    holiday = %holiday.name,
                    kind = ?holiday.kind,
                    "skipping holiday date"
                );
                continue;
            }
            for period in timetable::periods_for(conn, key, date)? {
                let elapsed =
                    date < today || (date == today && period.end_time <= now.time());
                if !elapsed {
                    continue;
                }
                if store::slot_has_record(conn, key, date, period.number)? {
                    continue;
                }
                let priority = Priority::classify((today - date).num_days());
                upsert_entry(conn, key, date, &period.subject_name, period.number, priority, now)?;
                scanned += 1;
            }
        }
        let Some(next) = date.succ_opt() else { break };
        date = next;
    }

    tracing::info!(
        from = %window_start,
        to = %end,
        classes = keys.len(),
        gaps = scanned,
        "missed-section scan finished"
    );
    open_entries_in_window(conn, window_start, end)
}

fn upsert_entry(
    conn: &Connection,
    key: &ClassKey,
    date: NaiveDate,
    subject_name: &str,
    period_no: u32,
    priority: Priority,
    now: NaiveDateTime,
) -> Result<(), EngineError> {
    conn.execute(
        "INSERT INTO missed_sections(
            course_type, year, stream, section, date, period_no,
            subject_name, day_of_week, detected_at, priority, is_completed)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
         ON CONFLICT(course_type, year, stream, section, date, period_no)
         DO UPDATE SET priority = excluded.priority
         WHERE missed_sections.is_completed = 0",
        (
            &key.course_type,
            key.year,
            &key.stream,
            &key.section,
            date.format(DATE_FMT).to_string(),
            period_no,
            subject_name,
            date.format("%A").to_string(),
            now.format(STAMP_FMT).to_string(),
            priority.as_str(),
        ),
    )?;
    Ok(())
}

/// Completion hook for the commit path: a backfill commit for the
/// exact slot retires its open entry.
pub fn complete_entry(
    conn: &Connection,
    key: &ClassKey,
    date: NaiveDate,
    period_no: u32,
    now: NaiveDateTime,
) -> Result<bool, EngineError> {
    let changed = conn.execute(
        "UPDATE missed_sections SET is_completed = 1, completed_at = ?
         WHERE course_type = ? AND year = ? AND stream = ? AND section = ?
           AND date = ? AND period_no = ? AND is_completed = 0",
        (
            now.format(STAMP_FMT).to_string(),
            &key.course_type,
            key.year,
            &key.stream,
            &key.section,
            date.format(DATE_FMT).to_string(),
            period_no,
        ),
    )?;
    Ok(changed > 0)
}

const ENTRY_COLUMNS: &str = "course_type, year, stream, section, date, period_no,
            subject_name, day_of_week, detected_at, priority, is_completed, completed_at";

// Most urgent first, then oldest.
const URGENCY_ORDER: &str = "CASE priority
            WHEN 'overdue' THEN 0 WHEN 'urgent' THEN 1 ELSE 2 END, date, period_no";

struct RawEntry {
    key: ClassKey,
    date: String,
    period_no: u32,
    subject_name: String,
    day_of_week: String,
    detected_at: String,
    priority: String,
    is_completed: bool,
    completed_at: Option<String>,
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        key: ClassKey {
            course_type: row.get(0)?,
            year: row.get(1)?,
            stream: row.get(2)?,
            section: row.get(3)?,
        },
        date: row.get(4)?,
        period_no: row.get(5)?,
        subject_name: row.get(6)?,
        day_of_week: row.get(7)?,
        detected_at: row.get(8)?,
        priority: row.get(9)?,
        is_completed: row.get::<_, i64>(10)? != 0,
        completed_at: row.get(11)?,
    })
}

fn decode_entry(raw: RawEntry) -> Result<MissedSectionEntry, EngineError> {
    let (Some(date), Some(detected_at), Some(priority)) = (
        parse_date(&raw.date),
        parse_stamp(&raw.detected_at),
        Priority::parse(&raw.priority),
    ) else {
        return Err(EngineError::Validation(
            "stored missed-section entry is malformed".to_string(),
        ));
    };
    Ok(MissedSectionEntry {
        class_key: raw.key,
        date,
        period_no: raw.period_no,
        subject_name: raw.subject_name,
        day_of_week: raw.day_of_week,
        detected_at,
        priority,
        is_completed: raw.is_completed,
        completed_at: raw.completed_at.as_deref().and_then(parse_stamp),
    })
}

fn open_entries_in_window(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<MissedSectionEntry>, EngineError> {
    let sql = format!(
        "SELECT {} FROM missed_sections
         WHERE is_completed = 0 AND date >= ? AND date <= ?
         ORDER BY {}",
        ENTRY_COLUMNS, URGENCY_ORDER
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            (from.format(DATE_FMT).to_string(), to.format(DATE_FMT).to_string()),
            entry_from_row,
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    rows.into_iter().map(decode_entry).collect()
}

/// Read-only view over the worklist.
pub fn worklist(
    conn: &Connection,
    filter: &WorklistFilter,
) -> Result<Vec<MissedSectionEntry>, EngineError> {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<String> = Vec::new();
    if !filter.include_completed {
        clauses.push("is_completed = 0".to_string());
    }
    if let Some(priority) = filter.priority {
        clauses.push("priority = ?".to_string());
        params.push(priority.as_str().to_string());
    }
    if let Some(course_type) = &filter.course_type {
        clauses.push("course_type = ?".to_string());
        params.push(course_type.clone());
    }
    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT {} FROM missed_sections {} ORDER BY {}",
        ENTRY_COLUMNS, where_clause, URGENCY_ORDER
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), entry_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    rows.into_iter().map(decode_entry).collect()
}
