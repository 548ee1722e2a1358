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
    let exe = env!("CARGO_BIN_EXE_mockexamd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn mockexamd");
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
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false), "expected error: {}", value);
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn drafts_skip_unchanged_writes_and_respect_limits() {
    let workspace = temp_dir("mockexamd-drafts");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let before = request(
        &mut stdin,
        &mut reader,
        "0",
        "drafts.load",
        json!({ "draftKey": "new-exam" }),
    );
    assert_eq!(error_code(&before), "no_workspace");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let form = json!({ "title": "Autumn Mock", "subject": "physics", "durationMinutes": 90 });
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "drafts.save",
        json!({ "draftKey": "new-exam", "form": form }),
    );
    assert_eq!(first["saved"], true);
    let hash = first["contentHash"].as_str().expect("hash").to_string();
    assert_eq!(hash.len(), 64);

    let again = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "drafts.save",
        json!({ "draftKey": "new-exam", "form": form }),
    );
    assert_eq!(again["saved"], false);
    assert_eq!(again["reason"], "unchanged");

    let loaded = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "drafts.load",
        json!({ "draftKey": "new-exam" }),
    );
    assert_eq!(loaded["draft"]["form"], form);
    assert_eq!(loaded["draft"]["contentHash"], hash.as_str());

    let not_object = request(
        &mut stdin,
        &mut reader,
        "5",
        "drafts.save",
        json!({ "draftKey": "new-exam", "form": "title=x" }),
    );
    assert_eq!(error_code(&not_object), "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "setup.update",
        json!({ "section": "drafts", "patch": { "maxBytes": 1024 } }),
    );
    let big = request(
        &mut stdin,
        &mut reader,
        "7",
        "drafts.save",
        json!({ "draftKey": "new-exam", "form": { "notes": "x".repeat(2000) } }),
    );
    assert_eq!(error_code(&big), "bad_params");
    assert_eq!(big["error"]["details"]["maxBytes"], 1024);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "setup.update",
        json!({ "section": "drafts", "patch": { "enabled": false } }),
    );
    let disabled = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "drafts.save",
        json!({ "draftKey": "new-exam", "form": { "title": "Changed" } }),
    );
    assert_eq!(disabled["saved"], false);
    assert_eq!(disabled["reason"], "disabled");

    let cleared = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "drafts.clear",
        json!({ "draftKey": "new-exam" }),
    );
    assert_eq!(cleared["cleared"], true);
    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "drafts.load",
        json!({ "draftKey": "new-exam" }),
    );
    assert!(empty["draft"].is_null());
}
