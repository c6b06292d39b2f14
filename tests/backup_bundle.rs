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

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_resultd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn resultd");
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
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
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

#[test]
fn exported_bundle_restores_into_a_fresh_workspace() {
    let source = temp_dir("resultd-backup-src");
    let target = temp_dir("resultd-backup-dst");
    let bundle = source.join("snapshot.zip");

    let (mut child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws1",
        "workspace.select",
        json!({ "path": source.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "sem",
        "semesters.create",
        json!({ "name": "5th", "session": "2019-20", "department": "CSE", "semesterNo": 5 }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "exp",
        "backup.export",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(
        exported.get("bundleFormat").and_then(|v| v.as_str()),
        Some("resultd-workspace-v1")
    );
    assert!(exported
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .map(|s| s.len() == 64)
        .unwrap_or(false));
    assert!(bundle.exists());

    // Restore into an empty workspace.
    request_ok(
        &mut stdin,
        &mut reader,
        "ws2",
        "workspace.select",
        json!({ "path": target.to_string_lossy() }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "l1", "semesters.list", json!({}));
    assert_eq!(
        listed
            .get("semesters")
            .and_then(|v| v.as_array())
            .map(Vec::len),
        Some(0)
    );

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "imp",
        "backup.import",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(
        imported
            .get("bundleFormatDetected")
            .and_then(|v| v.as_str()),
        Some("resultd-workspace-v1")
    );

    let listed = request_ok(&mut stdin, &mut reader, "l2", "semesters.list", json!({}));
    let semesters = listed
        .get("semesters")
        .and_then(|v| v.as_array())
        .expect("semesters");
    assert_eq!(semesters.len(), 1);
    assert_eq!(
        semesters[0].get("name").and_then(|v| v.as_str()),
        Some("5th")
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn corrupt_bundle_is_rejected_and_daemon_stays_usable() {
    let workspace = temp_dir("resultd-backup-corrupt");
    let bogus = workspace.join("bogus.zip");
    std::fs::write(&bogus, b"this is not a zip archive").expect("write bogus file");

    let (mut child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "sem",
        "semesters.create",
        json!({ "name": "5th", "session": "2019-20", "department": "CSE", "semesterNo": 5 }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "imp",
        "backup.import",
        json!({ "inPath": bogus.to_string_lossy() }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("import_failed")
    );

    // The previous database is reopened after a failed import.
    let listed = request_ok(&mut stdin, &mut reader, "l", "semesters.list", json!({}));
    assert_eq!(
        listed
            .get("semesters")
            .and_then(|v| v.as_array())
            .map(Vec::len),
        Some(1)
    );

    drop(stdin);
    let _ = child.wait();
}
