use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_attendanced");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn attendanced");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
}

fn class_key() -> serde_json::Value {
    json!({ "courseType": "pu", "year": 1, "stream": "commerce", "section": "A" })
}

fn row_for<'a>(prepared: &'a serde_json::Value, student_id: &str) -> &'a serde_json::Value {
    prepared
        .get("rows")
        .and_then(|v| v.as_array())
        .expect("rows")
        .iter()
        .find(|r| r.get("studentId").and_then(|v| v.as_str()) == Some(student_id))
        .expect("student row")
}

struct Harness {
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    _child: Child,
    next_id: u32,
}

impl Harness {
    fn call_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        request_ok(
            &mut self.stdin,
            &mut self.reader,
            &self.next_id.to_string(),
            method,
            params,
        )
    }

    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        request(
            &mut self.stdin,
            &mut self.reader,
            &self.next_id.to_string(),
            method,
            params,
        )
    }
}

// Fixed June 2025 week: 2025-06-09 is a Monday, 2025-06-15 a Sunday.
fn setup() -> (Harness, Vec<String>) {
    let workspace = temp_dir("attendanced-precedence");
    let (child, stdin, reader) = spawn_sidecar();
    let mut h = Harness {
        stdin,
        reader,
        _child: child,
        next_id: 0,
    };

    h.call_ok(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    h.call_ok("settings.setWeeklyHoliday", json!({ "weekday": "Sun" }));

    let created = h.call_ok(
        "students.upsert",
        json!({
            "classKey": class_key(),
            "students": [
                { "name": "Asha Rao", "rollNo": 1 },
                { "name": "Vikram Shetty", "rollNo": 2 },
                { "name": "Meera Iyer", "rollNo": 3 }
            ]
        }),
    );
    let ids: Vec<String> = created
        .get("studentIds")
        .and_then(|v| v.as_array())
        .expect("studentIds")
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect();

    let periods = json!([
        { "number": 1, "subjectCode": "ACC", "subjectName": "Accountancy",
          "startTime": "09:00", "endTime": "10:00" },
        { "number": 2, "subjectCode": "ECO", "subjectName": "Economics",
          "startTime": "10:00", "endTime": "11:00" }
    ]);
    for weekday in ["Mon", "Tue", "Sun"] {
        h.call_ok(
            "timetable.setDay",
            json!({ "classKey": class_key(), "weekday": weekday, "periods": periods.clone() }),
        );
    }
    (h, ids)
}

#[test]
fn declared_holiday_resolves_holiday_for_all_and_blocks_commit() {
    let (mut h, ids) = setup();
    h.call_ok(
        "holidays.declare",
        json!({ "date": "2025-06-10", "name": "Eid", "affectedCourseTypes": "all" }),
    );

    let prepared = h.call_ok(
        "attendance.prepare",
        json!({ "classKey": class_key(), "date": "2025-06-10", "period": 1 }),
    );
    assert_eq!(prepared.get("blocked").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        prepared.get("blockCode").and_then(|v| v.as_str()),
        Some("blocked_by_holiday")
    );
    for id in &ids {
        let row = row_for(&prepared, id);
        assert_eq!(row.get("mark").and_then(|v| v.as_str()), Some("holiday"));
        assert_eq!(row.get("editable").and_then(|v| v.as_bool()), Some(false));
        assert_eq!(row.get("reason").and_then(|v| v.as_str()), Some("Eid"));
    }

    let resp = h.call(
        "attendance.commit",
        json!({
            "classKey": class_key(),
            "date": "2025-06-10",
            "period": 1,
            "marks": { ids[0].as_str(): "present" }
        }),
    );
    assert_eq!(error_code(&resp), "blocked_by_holiday");
    let message = resp["error"]["message"].as_str().expect("message");
    assert!(message.contains("Eid"), "reason must name the holiday: {}", message);
}

#[test]
fn holiday_not_affecting_course_type_does_not_block() {
    let (mut h, _ids) = setup();
    h.call_ok(
        "holidays.declare",
        json!({ "date": "2025-06-10", "name": "Degree Convocation",
                "affectedCourseTypes": ["degree"] }),
    );

    let prepared = h.call_ok(
        "attendance.prepare",
        json!({ "classKey": class_key(), "date": "2025-06-10", "period": 1 }),
    );
    assert_eq!(prepared.get("blocked").and_then(|v| v.as_bool()), Some(false));
}

#[test]
fn weekly_holiday_blocks_like_a_declared_one() {
    let (mut h, _ids) = setup();
    let prepared = h.call_ok(
        "attendance.prepare",
        json!({ "classKey": class_key(), "date": "2025-06-15", "period": 1 }),
    );
    assert_eq!(prepared.get("blocked").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        prepared.get("blockCode").and_then(|v| v.as_str()),
        Some("blocked_by_holiday")
    );
}

#[test]
fn leave_overrides_a_previously_committed_absent() {
    let (mut h, ids) = setup();

    // Mark s2 absent on the 9th, then approve leave covering it.
    h.call_ok(
        "attendance.commit",
        json!({
            "classKey": class_key(),
            "date": "2025-06-09",
            "period": 1,
            "marks": { ids[0].as_str(): "present", ids[1].as_str(): "absent" }
        }),
    );
    h.call_ok(
        "leaves.approve",
        json!({
            "studentId": ids[1],
            "fromDate": "2025-06-08",
            "toDate": "2025-06-11",
            "reason": "medical"
        }),
    );

    let prepared = h.call_ok(
        "attendance.prepare",
        json!({ "classKey": class_key(), "date": "2025-06-09", "period": 1 }),
    );
    let s2 = row_for(&prepared, &ids[1]);
    assert_eq!(s2.get("mark").and_then(|v| v.as_str()), Some("on_leave"));
    assert_eq!(s2.get("source").and_then(|v| v.as_str()), Some("leave"));
    assert_eq!(s2.get("editable").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(s2.get("reason").and_then(|v| v.as_str()), Some("medical"));

    // The committed record itself is untouched; the peer keeps theirs.
    let s1 = row_for(&prepared, &ids[0]);
    assert_eq!(s1.get("mark").and_then(|v| v.as_str()), Some("present"));
    assert_eq!(s1.get("source").and_then(|v| v.as_str()), Some("record"));

    // Outside the leave range the stored mark shows through again.
    let prepared = h.call_ok(
        "attendance.prepare",
        json!({ "classKey": class_key(), "date": "2025-06-16", "period": 1 }),
    );
    let s2 = row_for(&prepared, &ids[1]);
    assert_eq!(s2.get("mark").and_then(|v| v.as_str()), Some("present"));
    assert_eq!(s2.get("source").and_then(|v| v.as_str()), Some("default"));
}

#[test]
fn emergency_blocks_only_its_affected_periods() {
    let (mut h, ids) = setup();
    h.call_ok(
        "emergency.declare",
        json!({
            "classKey": class_key(),
            "date": "2025-06-16",
            "periods": [1],
            "reason": "heavy rain"
        }),
    );

    let prepared = h.call_ok(
        "attendance.prepare",
        json!({ "classKey": class_key(), "date": "2025-06-16", "period": 1 }),
    );
    assert_eq!(prepared.get("blocked").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        prepared.get("blockCode").and_then(|v| v.as_str()),
        Some("blocked_by_emergency")
    );
    let row = row_for(&prepared, &ids[0]);
    assert_eq!(row.get("mark").and_then(|v| v.as_str()), Some("emergency"));
    assert_eq!(row.get("reason").and_then(|v| v.as_str()), Some("heavy rain"));

    let resp = h.call(
        "attendance.commit",
        json!({
            "classKey": class_key(),
            "date": "2025-06-16",
            "period": 1,
            "marks": { ids[0].as_str(): "present" }
        }),
    );
    assert_eq!(error_code(&resp), "blocked_by_emergency");

    // Period 2 is outside the declared set.
    let prepared = h.call_ok(
        "attendance.prepare",
        json!({ "classKey": class_key(), "date": "2025-06-16", "period": 2 }),
    );
    assert_eq!(prepared.get("blocked").and_then(|v| v.as_bool()), Some(false));
}

#[test]
fn unscheduled_period_is_refused() {
    let (mut h, _ids) = setup();
    let resp = h.call(
        "attendance.prepare",
        json!({ "classKey": class_key(), "date": "2025-06-09", "period": 7 }),
    );
    assert_eq!(error_code(&resp), "bad_params");
}
