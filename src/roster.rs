use rusqlite::Connection;

use crate::error::EngineError;
use crate::model::{ClassKey, Student};

/// Students enrolled in a class, roster order. Inactive students are
/// excluded unless asked for; they take no part in resolution.
pub fn class_students(
    conn: &Connection,
    key: &ClassKey,
    include_inactive: bool,
) -> Result<Vec<Student>, EngineError> {
    let sql = if include_inactive {
        "SELECT id, name, roll_no, active, sort_order FROM students
         WHERE course_type = ? AND year = ? AND stream = ? AND section = ?
         ORDER BY sort_order, roll_no"
    } else {
        "SELECT id, name, roll_no, active, sort_order FROM students
         WHERE course_type = ? AND year = ? AND stream = ? AND section = ? AND active = 1
         ORDER BY sort_order, roll_no"
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(
            (&key.course_type, key.year, &key.stream, &key.section),
            |r| {
                Ok(Student {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    roll_no: r.get(2)?,
                    active: r.get::<_, i64>(3)? != 0,
                    sort_order: r.get(4)?,
                })
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rows)
}
