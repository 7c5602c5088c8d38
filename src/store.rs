use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::error::EngineError;
use crate::model::{
    parse_date, parse_stamp, AttendanceMark, AttendanceRecord, ClassKey, DATE_FMT, STAMP_FMT,
};

/// Narrow contract for the durable remote store. The commit path and
/// reconciliation talk to the remote only through this seam, which is
/// what lets tests drive them against a failing remote.
pub trait RemoteStore {
    fn upsert(&mut self, record: &AttendanceRecord) -> Result<(), String>;
    fn query(
        &self,
        key: &ClassKey,
        date: NaiveDate,
        period_no: Option<u32>,
    ) -> Result<Vec<AttendanceRecord>, String>;
}

/// The workspace-backed durable store.
pub struct SqliteRemote<'a> {
    pub conn: &'a Connection,
}

impl RemoteStore for SqliteRemote<'_> {
    fn upsert(&mut self, record: &AttendanceRecord) -> Result<(), String> {
        self.conn
            .execute(
                "INSERT INTO attendance_records(
                    student_id, course_type, year, stream, section,
                    date, period_no, mark, recorded_at, audit_note)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(student_id, course_type, year, stream, section, date, period_no)
                 DO UPDATE SET
                   mark = excluded.mark,
                   recorded_at = excluded.recorded_at,
                   audit_note = excluded.audit_note",
                (
                    &record.student_id,
                    &record.class_key.course_type,
                    record.class_key.year,
                    &record.class_key.stream,
                    &record.class_key.section,
                    record.date.format(DATE_FMT).to_string(),
                    record.period_no,
                    record.mark.as_str(),
                    record.recorded_at.format(STAMP_FMT).to_string(),
                    &record.audit_note,
                ),
            )
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn query(
        &self,
        key: &ClassKey,
        date: NaiveDate,
        period_no: Option<u32>,
    ) -> Result<Vec<AttendanceRecord>, String> {
        query_table(self.conn, "attendance_records", key, date, period_no)
            .map_err(|e| e.to_string())
    }
}

struct RawRecord {
    student_id: String,
    key: ClassKey,
    date: String,
    period_no: u32,
    mark: String,
    recorded_at: String,
    audit_note: Option<String>,
}

fn raw_from_row(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        student_id: row.get(0)?,
        key: ClassKey {
            course_type: row.get(1)?,
            year: row.get(2)?,
            stream: row.get(3)?,
            section: row.get(4)?,
        },
        date: row.get(5)?,
        period_no: row.get(6)?,
        mark: row.get(7)?,
        recorded_at: row.get(8)?,
        audit_note: row.get(9)?,
    })
}

fn decode(raw: RawRecord) -> Result<AttendanceRecord, EngineError> {
    let (Some(date), Some(mark), Some(recorded_at)) = (
        parse_date(&raw.date),
        AttendanceMark::parse(&raw.mark),
        parse_stamp(&raw.recorded_at),
    ) else {
        return Err(EngineError::Validation(format!(
            "stored record for student {} is malformed",
            raw.student_id
        )));
    };
    Ok(AttendanceRecord {
        student_id: raw.student_id,
        class_key: raw.key,
        date,
        period_no: raw.period_no,
        mark,
        recorded_at,
        audit_note: raw.audit_note,
    })
}

const RECORD_COLUMNS: &str = "student_id, course_type, year, stream, section,
                date, period_no, mark, recorded_at, audit_note";

fn query_table(
    conn: &Connection,
    table: &str,
    key: &ClassKey,
    date: NaiveDate,
    period_no: Option<u32>,
) -> Result<Vec<AttendanceRecord>, EngineError> {
    let day = date.format(DATE_FMT).to_string();
    let raw_rows = match period_no {
        Some(p) => {
            let sql = format!(
                "SELECT {} FROM {}
                 WHERE course_type = ? AND year = ? AND stream = ? AND section = ?
                   AND date = ? AND period_no = ?
                 ORDER BY student_id",
                RECORD_COLUMNS, table
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(
                (
                    &key.course_type,
                    key.year,
                    &key.stream,
                    &key.section,
                    &day,
                    p,
                ),
                raw_from_row,
            )
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())?
        }
        None => {
            let sql = format!(
                "SELECT {} FROM {}
                 WHERE course_type = ? AND year = ? AND stream = ? AND section = ?
                   AND date = ?
                 ORDER BY period_no, student_id",
                RECORD_COLUMNS, table
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(
                (&key.course_type, key.year, &key.stream, &key.section, &day),
                raw_from_row,
            )
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())?
        }
    };
    raw_rows.into_iter().map(decode).collect()
}

/// Mirror a record into the local cache. `pending` rows have not been
/// confirmed by the remote store and are replayed by reconciliation.
pub fn cache_put(
    conn: &Connection,
    record: &AttendanceRecord,
    pending: bool,
) -> Result<(), EngineError> {
    conn.execute(
        "INSERT INTO attendance_cache(
            student_id, course_type, year, stream, section,
            date, period_no, mark, recorded_at, audit_note, pending)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, course_type, year, stream, section, date, period_no)
         DO UPDATE SET
           mark = excluded.mark,
           recorded_at = excluded.recorded_at,
           audit_note = excluded.audit_note,
           pending = excluded.pending",
        (
            &record.student_id,
            &record.class_key.course_type,
            record.class_key.year,
            &record.class_key.stream,
            &record.class_key.section,
            record.date.format(DATE_FMT).to_string(),
            record.period_no,
            record.mark.as_str(),
            record.recorded_at.format(STAMP_FMT).to_string(),
            &record.audit_note,
            pending as i64,
        ),
    )?;
    Ok(())
}

pub fn cache_query(
    conn: &Connection,
    key: &ClassKey,
    date: NaiveDate,
    period_no: Option<u32>,
) -> Result<Vec<AttendanceRecord>, EngineError> {
    query_table(conn, "attendance_cache", key, date, period_no)
}

pub fn pending_count(conn: &Connection) -> Result<i64, EngineError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM attendance_cache WHERE pending = 1",
        [],
        |r| r.get(0),
    )?;
    Ok(n)
}

/// Read-side of the gateway: trust the remote when reachable, fall
/// back to the local cache only when offline.
pub fn query_attendance(
    conn: &Connection,
    online: bool,
    key: &ClassKey,
    date: NaiveDate,
    period_no: Option<u32>,
) -> Result<Vec<AttendanceRecord>, EngineError> {
    if online {
        query_table(conn, "attendance_records", key, date, period_no)
    } else {
        cache_query(conn, key, date, period_no)
    }
}

/// Whether any committed record exists for the slot, in either the
/// remote store or the cache. Used by missed-section detection, where
/// a pending offline capture still counts as "attended".
pub fn slot_has_record(
    conn: &Connection,
    key: &ClassKey,
    date: NaiveDate,
    period_no: u32,
) -> Result<bool, EngineError> {
    let day = date.format(DATE_FMT).to_string();
    for table in ["attendance_records", "attendance_cache"] {
        let sql = format!(
            "SELECT 1 FROM {}
             WHERE course_type = ? AND year = ? AND stream = ? AND section = ?
               AND date = ? AND period_no = ? LIMIT 1",
            table
        );
        let hit: Option<i64> = conn
            .query_row(
                &sql,
                (
                    &key.course_type,
                    key.year,
                    &key.stream,
                    &key.section,
                    &day,
                    period_no,
                ),
                |r| r.get(0),
            )
            .optional()?;
        if hit.is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub replayed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Replay pending cache rows into the remote store. A remote row with
/// a newer `recorded_at` wins and the stale pending row is retired
/// without overwriting it.
pub fn reconcile(
    conn: &Connection,
    remote: &mut dyn RemoteStore,
) -> Result<ReconcileSummary, EngineError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM attendance_cache WHERE pending = 1 ORDER BY recorded_at",
        RECORD_COLUMNS
    ))?;
    let raw_rows = stmt
        .query_map([], raw_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    let pending: Vec<AttendanceRecord> = raw_rows
        .into_iter()
        .map(decode)
        .collect::<Result<_, _>>()?;

    let mut summary = ReconcileSummary::default();
    for rec in pending {
        let newer_remote = remote
            .query(&rec.class_key, rec.date, Some(rec.period_no))
            .map_err(|e| EngineError::SignalUnavailable(format!("remote store: {}", e)))?
            .into_iter()
            .find(|r| r.student_id == rec.student_id)
            .map(|r| r.recorded_at > rec.recorded_at)
            .unwrap_or(false);

        if newer_remote {
            mark_synced(conn, &rec)?;
            summary.skipped += 1;
            continue;
        }
        match remote.upsert(&rec) {
            Ok(()) => {
                mark_synced(conn, &rec)?;
                summary.replayed += 1;
            }
            Err(e) => {
                tracing::warn!(student = %rec.student_id, error = %e, "reconcile replay failed");
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

fn mark_synced(conn: &Connection, rec: &AttendanceRecord) -> Result<(), EngineError> {
    conn.execute(
        "UPDATE attendance_cache SET pending = 0
         WHERE student_id = ? AND course_type = ? AND year = ? AND stream = ? AND section = ?
           AND date = ? AND period_no = ?",
        (
            &rec.student_id,
            &rec.class_key.course_type,
            rec.class_key.year,
            &rec.class_key.stream,
            &rec.class_key.section,
            rec.date.format(DATE_FMT).to_string(),
            rec.period_no,
        ),
    )?;
    Ok(())
}
