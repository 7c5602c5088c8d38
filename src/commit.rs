use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;

use crate::error::EngineError;
use crate::model::{AttendanceMark, AttendanceRecord, ClassKey};
use crate::store::RemoteStore;
use crate::{detect, lock, resolve, roster, signals, store, timetable};

pub const LEAVE_CORRECTION_NOTE: &str = "auto-corrected to on_leave (approved leave)";

#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub class_key: ClassKey,
    pub date: NaiveDate,
    pub period_no: u32,
    pub marks: BTreeMap<String, AttendanceMark>,
    /// Audited override note; only valid for dates before today and
    /// bypasses the lock gate.
    pub history_note: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CommitSummary {
    /// Confirmed by the remote store.
    pub persisted: usize,
    /// Deliberately captured offline, awaiting reconciliation.
    pub pending: usize,
    /// Remote refused; captured as pending instead.
    pub failed: usize,
    /// Students whose submitted mark was coerced to OnLeave.
    pub coerced: Vec<String>,
    pub locked_until: Option<NaiveDateTime>,
    pub completed_missed: bool,
}

/// The single commit path: signal gates, lock gate, leave coercion,
/// persistence through the gateway, lock, missed-entry completion.
/// Every caller - same-day marking, offline capture, history backfill -
/// goes through here.
pub fn commit_slot(
    conn: &Connection,
    remote: &mut dyn RemoteStore,
    online: bool,
    req: &CommitRequest,
    now: NaiveDateTime,
) -> Result<CommitSummary, EngineError> {
    if req.marks.is_empty() {
        return Err(EngineError::Validation("no marks submitted".to_string()));
    }

    let scheduled = timetable::periods_for(conn, &req.class_key, req.date)?;
    if !scheduled.iter().any(|p| p.number == req.period_no) {
        return Err(EngineError::Validation(format!(
            "period {} is not scheduled for {} on {}",
            req.period_no,
            req.class_key.label(),
            req.date
        )));
    }

    let slot_signals = signals::load_slot_signals(conn, &req.class_key, req.date, req.period_no)?;
    if let Some(block) = resolve::slot_block(&slot_signals) {
        return Err(block);
    }

    let history_edit = req.history_note.is_some();
    if history_edit && !lock::can_edit_from_history(req.date, now.date()) {
        return Err(EngineError::Validation(
            "history edits are only allowed for past dates".to_string(),
        ));
    }

    let students = roster::class_students(conn, &req.class_key, false)?;
    let mut records = Vec::with_capacity(req.marks.len());
    let mut coerced = Vec::new();
    for (student_id, submitted) in &req.marks {
        if !students.iter().any(|s| &s.id == student_id) {
            return Err(EngineError::Validation(format!(
                "student {} is not an active member of {}",
                student_id,
                req.class_key.label()
            )));
        }

        let on_leave = slot_signals.leaves.contains_key(student_id);
        let (mark, mut note) = if on_leave {
            // A batch never fails because one student is on leave; the
            // submitted value is coerced and the correction audited.
            if *submitted != AttendanceMark::OnLeave {
                coerced.push(student_id.clone());
                (AttendanceMark::OnLeave, Some(LEAVE_CORRECTION_NOTE.to_string()))
            } else {
                (AttendanceMark::OnLeave, None)
            }
        } else {
            if !submitted.user_settable() {
                return Err(EngineError::Validation(format!(
                    "mark {} is derived from signals and cannot be submitted for student {}",
                    submitted.as_str(),
                    student_id
                )));
            }
            (*submitted, None)
        };
        if let Some(history_note) = &req.history_note {
            note = Some(match note {
                Some(existing) => format!("{}; history edit: {}", existing, history_note),
                None => format!("history edit: {}", history_note),
            });
        }

        records.push(AttendanceRecord {
            student_id: student_id.clone(),
            class_key: req.class_key.clone(),
            date: req.date,
            period_no: req.period_no,
            mark,
            recorded_at: now,
            audit_note: note,
        });
    }

    // Gate, persist and lock inside one transaction so a racing commit
    // observes the winner's lock row, and an aborted commit leaves no
    // partial lock behind.
    let tx = conn.unchecked_transaction()?;
    if !history_edit && lock::is_locked(conn, &req.class_key, req.date, req.period_no, now)? {
        let remaining = lock::time_remaining_minutes(conn, &req.class_key, req.date, req.period_no, now)?
            .unwrap_or(0);
        return Err(EngineError::BlockedByLock {
            remaining_minutes: remaining,
        });
    }

    let mut summary = CommitSummary {
        coerced,
        ..CommitSummary::default()
    };
    for record in &records {
        if online {
            match remote.upsert(record) {
                Ok(()) => {
                    store::cache_put(conn, record, false)?;
                    summary.persisted += 1;
                }
                Err(e) => {
                    tracing::warn!(student = %record.student_id, error = %e,
                        "remote upsert failed; captured as pending");
                    store::cache_put(conn, record, true)?;
                    summary.failed += 1;
                }
            }
        } else {
            store::cache_put(conn, record, true)?;
            summary.pending += 1;
        }
    }

    if online && summary.persisted == 0 {
        // Total remote failure: keep the captured cache rows, take no
        // lock, and report it as such.
        tx.commit()?;
        return Err(EngineError::PersistenceTotal);
    }

    let locked_until = lock::relock_slot(conn, &req.class_key, req.date, req.period_no, now)?;
    summary.locked_until = Some(locked_until);
    summary.completed_missed =
        detect::complete_entry(conn, &req.class_key, req.date, req.period_no, now)?;
    tx.commit()?;

    if summary.failed > 0 {
        return Err(EngineError::PersistencePartial {
            success: summary.persisted,
            failure: summary.failed,
        });
    }

    tracing::info!(
        class = %req.class_key.label(),
        date = %req.date,
        period = req.period_no,
        persisted = summary.persisted,
        pending = summary.pending,
        "attendance committed"
    );
    Ok(summary)
}
