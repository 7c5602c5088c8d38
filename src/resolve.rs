use std::collections::{BTreeMap, HashMap};

use crate::error::EngineError;
use crate::model::{AttendanceMark, Student};
use crate::signals::SlotSignals;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    Holiday,
    Emergency,
    Leave,
    Record,
    Default,
}

impl StatusSource {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusSource::Holiday => "holiday",
            StatusSource::Emergency => "emergency",
            StatusSource::Leave => "leave",
            StatusSource::Record => "record",
            StatusSource::Default => "default",
        }
    }
}

/// Authoritative per-student status for one slot. `reason` is set for
/// blocked sources so the caller can explain *why* editing is refused.
#[derive(Debug, Clone)]
pub struct ResolvedStatus {
    pub mark: AttendanceMark,
    pub source: StatusSource,
    pub reason: Option<String>,
}

impl ResolvedStatus {
    /// Only resolved values that came from a committed record or the
    /// Present baseline may be edited; signal-derived values may not.
    pub fn editable(&self) -> bool {
        matches!(self.source, StatusSource::Record | StatusSource::Default)
    }
}

/// Slot-level rejection shared by resolution display and the commit
/// gate: holiday outranks emergency, both outrank everything else.
pub fn slot_block(signals: &SlotSignals) -> Option<EngineError> {
    if let Some(h) = &signals.holiday {
        return Some(EngineError::BlockedByHoliday {
            name: h.name.clone(),
        });
    }
    if let Some(e) = &signals.emergency {
        return Some(EngineError::BlockedByEmergency {
            reason: e.reason.clone(),
        });
    }
    None
}

/// Pure precedence merge: holiday > emergency > approved leave >
/// committed record > default Present. Never writes anything.
pub fn resolve_slot(
    signals: &SlotSignals,
    records: &HashMap<String, AttendanceMark>,
    students: &[Student],
) -> BTreeMap<String, ResolvedStatus> {
    let mut out = BTreeMap::new();
    for student in students {
        out.insert(student.id.clone(), resolve_student(signals, records, &student.id));
    }
    out
}

fn resolve_student(
    signals: &SlotSignals,
    records: &HashMap<String, AttendanceMark>,
    student_id: &str,
) -> ResolvedStatus {
    if let Some(h) = &signals.holiday {
        return ResolvedStatus {
            mark: AttendanceMark::Holiday,
            source: StatusSource::Holiday,
            reason: Some(h.name.clone()),
        };
    }
    if let Some(e) = &signals.emergency {
        return ResolvedStatus {
            mark: AttendanceMark::Emergency,
            source: StatusSource::Emergency,
            reason: Some(e.reason.clone()),
        };
    }
    if let Some(reason) = signals.leaves.get(student_id) {
        // Leave wins over a conflicting committed mark; the record is
        // corrected on the next commit, not here.
        return ResolvedStatus {
            mark: AttendanceMark::OnLeave,
            source: StatusSource::Leave,
            reason: Some(reason.clone()),
        };
    }
    if let Some(mark) = records.get(student_id) {
        return ResolvedStatus {
            mark: *mark,
            source: StatusSource::Record,
            reason: None,
        };
    }
    ResolvedStatus {
        mark: AttendanceMark::Present,
        source: StatusSource::Default,
        reason: None,
    }
}
