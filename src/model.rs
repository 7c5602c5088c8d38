use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::EngineError;

/// Closed set of attendance marks. Free-form status strings from the
/// wire are rejected at the boundary; only `Present`/`Absent` may be
/// submitted by a caller, the rest are derived from signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceMark {
    Present,
    Absent,
    OnLeave,
    Emergency,
    Holiday,
}

impl AttendanceMark {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceMark::Present => "present",
            AttendanceMark::Absent => "absent",
            AttendanceMark::OnLeave => "on_leave",
            AttendanceMark::Emergency => "emergency",
            AttendanceMark::Holiday => "holiday",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Some(AttendanceMark::Present),
            "absent" => Some(AttendanceMark::Absent),
            "on_leave" => Some(AttendanceMark::OnLeave),
            "emergency" => Some(AttendanceMark::Emergency),
            "holiday" => Some(AttendanceMark::Holiday),
            _ => None,
        }
    }

    /// Marks a caller may submit directly. The others are derived.
    pub fn user_settable(self) -> bool {
        matches!(self, AttendanceMark::Present | AttendanceMark::Absent)
    }
}

struct CourseDef {
    code: &'static str,
    max_year: u32,
    streams: &'static [&'static str],
    sectioned_streams: &'static [&'static str],
}

// Course catalog. `pu` runs streams, and only commerce splits into
// sections; `degree` is streamless.
const COURSES: &[CourseDef] = &[
    CourseDef {
        code: "pu",
        max_year: 2,
        streams: &["science", "commerce", "arts"],
        sectioned_streams: &["commerce"],
    },
    CourseDef {
        code: "degree",
        max_year: 3,
        streams: &[],
        sectioned_streams: &[],
    },
];

fn course_def(course_type: &str) -> Option<&'static CourseDef> {
    COURSES.iter().find(|c| c.code == course_type)
}

pub fn known_course_types() -> Vec<&'static str> {
    COURSES.iter().map(|c| c.code).collect()
}

/// Structural identity of a teaching group. `stream` and `section`
/// are empty strings where the catalog says they do not apply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassKey {
    pub course_type: String,
    pub year: u32,
    pub stream: String,
    pub section: String,
}

impl ClassKey {
    pub fn new(
        course_type: &str,
        year: u32,
        stream: &str,
        section: &str,
    ) -> Result<Self, EngineError> {
        let course_type = course_type.trim().to_ascii_lowercase();
        let stream = stream.trim().to_ascii_lowercase();
        let section = section.trim().to_string();

        let Some(def) = course_def(&course_type) else {
            return Err(EngineError::Validation(format!(
                "unknown course type: {}",
                course_type
            )));
        };
        if year == 0 || year > def.max_year {
            return Err(EngineError::Validation(format!(
                "year {} is out of range for {} (1..={})",
                year, def.code, def.max_year
            )));
        }
        if def.streams.is_empty() {
            if !stream.is_empty() {
                return Err(EngineError::Validation(format!(
                    "course {} does not have streams",
                    def.code
                )));
            }
        } else if stream.is_empty() {
            return Err(EngineError::Validation(format!(
                "course {} requires a stream (one of: {})",
                def.code,
                def.streams.join(", ")
            )));
        } else if !def.streams.contains(&stream.as_str()) {
            return Err(EngineError::Validation(format!(
                "unknown stream {} for course {}",
                stream, def.code
            )));
        }
        if !section.is_empty() && !def.sectioned_streams.contains(&stream.as_str()) {
            let shown = if stream.is_empty() {
                "(none)"
            } else {
                stream.as_str()
            };
            return Err(EngineError::Validation(format!(
                "stream {} does not have sections",
                shown
            )));
        }

        Ok(ClassKey {
            course_type,
            year,
            stream,
            section,
        })
    }

    /// Display form, e.g. `pu-1-commerce-A` or `degree-2`.
    pub fn label(&self) -> String {
        let mut out = format!("{}-{}", self.course_type, self.year);
        if !self.stream.is_empty() {
            out.push('-');
            out.push_str(&self.stream);
        }
        if !self.section.is_empty() {
            out.push('-');
            out.push_str(&self.section);
        }
        out
    }
}

/// One scheduled teaching period. Produced by the timetable resolver,
/// never mutated by the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    pub number: u32,
    pub subject_code: String,
    pub subject_name: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub roll_no: i64,
    pub active: bool,
    pub sort_order: i64,
}

/// One committed mark for a (student, slot) natural key.
#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub student_id: String,
    pub class_key: ClassKey,
    pub date: NaiveDate,
    pub period_no: u32,
    pub mark: AttendanceMark,
    pub recorded_at: NaiveDateTime,
    pub audit_note: Option<String>,
}

pub const DATE_FMT: &str = "%Y-%m-%d";
pub const TIME_FMT: &str = "%H:%M";
pub const STAMP_FMT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FMT).ok()
}

pub fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), TIME_FMT).ok()
}

pub fn parse_stamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), STAMP_FMT).ok()
}
