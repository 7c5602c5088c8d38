use chrono::{Datelike, NaiveDate, Weekday};
use rusqlite::Connection;

use crate::error::EngineError;
use crate::model::{parse_time, ClassKey, Period, TIME_FMT};

fn weekday_no(weekday: Weekday) -> u32 {
    weekday.number_from_monday()
}

/// Scheduled periods for (class key, date), ordered by period number.
/// A weekday with no configured rows is a non-teaching day.
pub fn periods_for(
    conn: &Connection,
    key: &ClassKey,
    date: NaiveDate,
) -> Result<Vec<Period>, EngineError> {
    periods_for_weekday(conn, key, date.weekday())
}

pub fn periods_for_weekday(
    conn: &Connection,
    key: &ClassKey,
    weekday: Weekday,
) -> Result<Vec<Period>, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT period_no, subject_code, subject_name, start_time, end_time
         FROM timetable_periods
         WHERE course_type = ? AND year = ? AND stream = ? AND section = ? AND weekday = ?
         ORDER BY period_no",
    )?;
    let rows = stmt
        .query_map(
            (
                &key.course_type,
                key.year,
                &key.stream,
                &key.section,
                weekday_no(weekday),
            ),
            |r| {
                Ok((
                    r.get::<_, u32>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                ))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let mut periods = Vec::with_capacity(rows.len());
    for (number, subject_code, subject_name, start_raw, end_raw) in rows {
        let (Some(start_time), Some(end_time)) = (parse_time(&start_raw), parse_time(&end_raw))
        else {
            return Err(EngineError::Validation(format!(
                "stored period {} for {} has an invalid time window",
                number,
                key.label()
            )));
        };
        periods.push(Period {
            number,
            subject_code,
            subject_name,
            start_time,
            end_time,
        });
    }
    Ok(periods)
}

/// Replace the configured schedule for one weekday of a class key.
/// Period numbers must be contiguous from 1 and each window must be
/// non-empty.
pub fn replace_day(
    conn: &Connection,
    key: &ClassKey,
    weekday: Weekday,
    periods: &[Period],
) -> Result<(), EngineError> {
    for (i, p) in periods.iter().enumerate() {
        let expected = (i + 1) as u32;
        if p.number != expected {
            return Err(EngineError::Validation(format!(
                "period numbers must be contiguous from 1 (got {} at position {})",
                p.number, expected
            )));
        }
        if p.start_time >= p.end_time {
            return Err(EngineError::Validation(format!(
                "period {} start time must be before end time",
                p.number
            )));
        }
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM timetable_periods
         WHERE course_type = ? AND year = ? AND stream = ? AND section = ? AND weekday = ?",
        (
            &key.course_type,
            key.year,
            &key.stream,
            &key.section,
            weekday_no(weekday),
        ),
    )?;
    for p in periods {
        tx.execute(
            "INSERT INTO timetable_periods(
                course_type, year, stream, section, weekday,
                period_no, subject_code, subject_name, start_time, end_time)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &key.course_type,
                key.year,
                &key.stream,
                &key.section,
                weekday_no(weekday),
                p.number,
                &p.subject_code,
                &p.subject_name,
                p.start_time.format(TIME_FMT).to_string(),
                p.end_time.format(TIME_FMT).to_string(),
            ),
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Class keys that currently have active students. Drives the
/// institution-wide detection scan.
pub fn class_keys_with_students(conn: &Connection) -> Result<Vec<ClassKey>, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT course_type, year, stream, section
         FROM students WHERE active = 1
         ORDER BY course_type, year, stream, section",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(ClassKey {
                course_type: r.get(0)?,
                year: r.get(1)?,
                stream: r.get(2)?,
                section: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rows)
}
