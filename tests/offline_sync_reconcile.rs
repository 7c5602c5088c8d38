use chrono::{Datelike, Local, Weekday};
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

fn safe_weekly_holiday(avoid: &[Weekday]) -> String {
    let mut day = Weekday::Mon;
    for _ in 0..7 {
        if !avoid.contains(&day) {
            return day.to_string();
        }
        day = day.succ();
    }
    Weekday::Mon.to_string()
}

fn setup(prefix: &str) -> (Harness, Vec<String>, String) {
    let workspace = temp_dir(prefix);
    let (child, stdin, reader) = spawn_sidecar();
    let mut h = Harness {
        stdin,
        reader,
        _child: child,
        next_id: 0,
    };

    let today = Local::now().date_naive();
    h.call_ok(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    h.call_ok(
        "settings.setWeeklyHoliday",
        json!({ "weekday": safe_weekly_holiday(&[today.weekday()]) }),
    );

    let created = h.call_ok(
        "students.upsert",
        json!({
            "classKey": class_key(),
            "students": [
                { "name": "Asha Rao", "rollNo": 1 },
                { "name": "Vikram Shetty", "rollNo": 2 }
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

    h.call_ok(
        "timetable.setDay",
        json!({
            "classKey": class_key(),
            "weekday": today.weekday().to_string(),
            "periods": [
                { "number": 1, "subjectCode": "ACC", "subjectName": "Accountancy",
                  "startTime": "09:00", "endTime": "10:00" }
            ]
        }),
    );
    (h, ids, today.to_string())
}

#[test]
fn offline_commit_is_captured_and_reconciled_once_back_online() {
    let (mut h, ids, today) = setup("attendanced-offline");

    h.call_ok("sync.setOnline", json!({ "online": false }));

    let committed = h.call_ok(
        "attendance.commit",
        json!({
            "classKey": class_key(),
            "date": today,
            "period": 1,
            "marks": { ids[0].as_str(): "present", ids[1].as_str(): "absent" }
        }),
    );
    assert_eq!(
        committed.get("persistedCount").and_then(|v| v.as_u64()),
        Some(0)
    );
    assert_eq!(
        committed.get("pendingCount").and_then(|v| v.as_u64()),
        Some(2)
    );
    assert!(committed.get("lockedUntil").and_then(|v| v.as_str()).is_some());

    // The offline capture locks the slot like any other commit.
    let status = h.call_ok(
        "attendance.lockStatus",
        json!({ "classKey": class_key(), "date": today, "period": 1 }),
    );
    assert_eq!(status.get("locked").and_then(|v| v.as_bool()), Some(true));

    let sync = h.call_ok("sync.status", json!({}));
    assert_eq!(sync.get("online").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(sync.get("pendingCount").and_then(|v| v.as_u64()), Some(2));

    // Offline reads serve the cached marks.
    let prepared = h.call_ok(
        "attendance.prepare",
        json!({ "classKey": class_key(), "date": today, "period": 1 }),
    );
    let row = prepared
        .get("rows")
        .and_then(|v| v.as_array())
        .expect("rows")
        .iter()
        .find(|r| r.get("studentId").and_then(|v| v.as_str()) == Some(ids[1].as_str()))
        .cloned()
        .expect("row");
    assert_eq!(row.get("mark").and_then(|v| v.as_str()), Some("absent"));
    assert_eq!(row.get("source").and_then(|v| v.as_str()), Some("record"));

    // Reconciliation needs connectivity.
    let resp = h.call("sync.reconcile", json!({}));
    assert_eq!(error_code(&resp), "offline");

    h.call_ok("sync.setOnline", json!({ "online": true }));
    let replayed = h.call_ok("sync.reconcile", json!({}));
    assert_eq!(replayed.get("replayed").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(replayed.get("failed").and_then(|v| v.as_u64()), Some(0));

    let sync = h.call_ok("sync.status", json!({}));
    assert_eq!(sync.get("pendingCount").and_then(|v| v.as_u64()), Some(0));

    // The remote store now serves the same marks: round trip intact.
    let prepared = h.call_ok(
        "attendance.prepare",
        json!({ "classKey": class_key(), "date": today, "period": 1 }),
    );
    let rows = prepared.get("rows").and_then(|v| v.as_array()).expect("rows");
    assert_eq!(rows.len(), 2);
    for (id, mark) in [(ids[0].as_str(), "present"), (ids[1].as_str(), "absent")] {
        let row = rows
            .iter()
            .find(|r| r.get("studentId").and_then(|v| v.as_str()) == Some(id))
            .expect("row");
        assert_eq!(row.get("mark").and_then(|v| v.as_str()), Some(mark));
        assert_eq!(row.get("source").and_then(|v| v.as_str()), Some("record"));
    }

    // A second reconcile run finds nothing left to do.
    let again = h.call_ok("sync.reconcile", json!({}));
    assert_eq!(again.get("replayed").and_then(|v| v.as_u64()), Some(0));
}

#[test]
fn lock_state_survives_connectivity_flaps() {
    let (mut h, ids, today) = setup("attendanced-lock-flap");

    let committed = h.call_ok(
        "attendance.commit",
        json!({
            "classKey": class_key(),
            "date": today,
            "period": 1,
            "marks": { ids[0].as_str(): "present" }
        }),
    );
    assert_eq!(
        committed.get("persistedCount").and_then(|v| v.as_u64()),
        Some(1)
    );

    // Going offline must never regress a locked slot to unlocked.
    h.call_ok("sync.setOnline", json!({ "online": false }));
    let status = h.call_ok(
        "attendance.lockStatus",
        json!({ "classKey": class_key(), "date": today, "period": 1 }),
    );
    assert_eq!(status.get("locked").and_then(|v| v.as_bool()), Some(true));

    let resp = h.call(
        "attendance.commit",
        json!({
            "classKey": class_key(),
            "date": today,
            "period": 1,
            "marks": { ids[1].as_str(): "absent" }
        }),
    );
    assert_eq!(error_code(&resp), "blocked_by_lock");
}
