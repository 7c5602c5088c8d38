use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{Connection, OptionalExtension};

use crate::error::EngineError;
use crate::model::{parse_stamp, ClassKey, DATE_FMT, STAMP_FMT};

/// Time-boxed finalization of one slot. A slot is locked iff a row
/// exists with `now < unlocks_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockState {
    pub locked_at: NaiveDateTime,
    pub unlocks_at: NaiveDateTime,
}

impl LockState {
    pub fn is_active(&self, now: NaiveDateTime) -> bool {
        now < self.unlocks_at
    }

    pub fn remaining_minutes(&self, now: NaiveDateTime) -> i64 {
        (self.unlocks_at - now).num_minutes().max(0)
    }
}

/// Locked until the local midnight that follows the commit, not a
/// rolling 24 hours. The slot reopens exactly when the calendar day
/// does.
pub fn unlocks_at_for(locked_at: NaiveDateTime) -> NaiveDateTime {
    let next_day = locked_at.date().succ_opt().unwrap_or(locked_at.date());
    next_day.and_time(NaiveTime::MIN)
}

/// History edits are the audited override path for revisiting past
/// dates; same-day edits after lock stay refused.
pub fn can_edit_from_history(date: NaiveDate, today: NaiveDate) -> bool {
    date < today
}

pub fn lock_state(
    conn: &Connection,
    key: &ClassKey,
    date: NaiveDate,
    period_no: u32,
) -> Result<Option<LockState>, EngineError> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT locked_at, unlocks_at FROM attendance_locks
             WHERE course_type = ? AND year = ? AND stream = ? AND section = ?
               AND date = ? AND period_no = ?",
            (
                &key.course_type,
                key.year,
                &key.stream,
                &key.section,
                date.format(DATE_FMT).to_string(),
                period_no,
            ),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    let Some((locked_raw, unlocks_raw)) = row else {
        return Ok(None);
    };
    let (Some(locked_at), Some(unlocks_at)) = (parse_stamp(&locked_raw), parse_stamp(&unlocks_raw))
    else {
        // Unreadable lock row: fail closed as locked until the row is
        // repaired, never as unlocked.
        return Err(EngineError::SignalUnavailable(format!(
            "lock state for {} {} period {} is unreadable",
            key.label(),
            date,
            period_no
        )));
    };
    Ok(Some(LockState {
        locked_at,
        unlocks_at,
    }))
}

pub fn is_locked(
    conn: &Connection,
    key: &ClassKey,
    date: NaiveDate,
    period_no: u32,
    now: NaiveDateTime,
) -> Result<bool, EngineError> {
    Ok(lock_state(conn, key, date, period_no)?
        .map(|s| s.is_active(now))
        .unwrap_or(false))
}

pub fn time_remaining_minutes(
    conn: &Connection,
    key: &ClassKey,
    date: NaiveDate,
    period_no: u32,
    now: NaiveDateTime,
) -> Result<Option<i64>, EngineError> {
    Ok(lock_state(conn, key, date, period_no)?
        .filter(|s| s.is_active(now))
        .map(|s| s.remaining_minutes(now)))
}

/// Idempotent: re-locking an already-locked slot keeps the original
/// window. Returns the effective unlock time.
pub fn lock_slot(
    conn: &Connection,
    key: &ClassKey,
    date: NaiveDate,
    period_no: u32,
    now: NaiveDateTime,
) -> Result<NaiveDateTime, EngineError> {
    let unlocks_at = unlocks_at_for(now);
    conn.execute(
        "INSERT INTO attendance_locks(
            course_type, year, stream, section, date, period_no, locked_at, unlocks_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(course_type, year, stream, section, date, period_no) DO NOTHING",
        (
            &key.course_type,
            key.year,
            &key.stream,
            &key.section,
            date.format(DATE_FMT).to_string(),
            period_no,
            now.format(STAMP_FMT).to_string(),
            unlocks_at.format(STAMP_FMT).to_string(),
        ),
    )?;
    // Re-read so a racing locker's window is reported, not ours.
    match lock_state(conn, key, date, period_no)? {
        Some(state) => Ok(state.unlocks_at),
        None => Ok(unlocks_at),
    }
}

/// Expired lock rows for a re-opened slot are superseded on the next
/// successful commit: the fresh commit takes a fresh window.
pub fn relock_slot(
    conn: &Connection,
    key: &ClassKey,
    date: NaiveDate,
    period_no: u32,
    now: NaiveDateTime,
) -> Result<NaiveDateTime, EngineError> {
    let existing = lock_state(conn, key, date, period_no)?;
    if let Some(state) = existing {
        if state.is_active(now) {
            return Ok(state.unlocks_at);
        }
        conn.execute(
            "DELETE FROM attendance_locks
             WHERE course_type = ? AND year = ? AND stream = ? AND section = ?
               AND date = ? AND period_no = ?",
            (
                &key.course_type,
                key.year,
                &key.stream,
                &key.section,
                date.format(DATE_FMT).to_string(),
                period_no,
            ),
        )?;
    }
    lock_slot(conn, key, date, period_no, now)
}
