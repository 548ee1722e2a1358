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

fn advance(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    session_id: &str,
    stage: &str,
    fields: serde_json::Value,
) {
    let _ = request_ok(
        stdin,
        reader,
        &format!("{}-select", stage),
        "wizard.selectStage",
        json!({ "sessionId": session_id, "stage": stage }),
    );
    for (key, value) in fields.as_object().expect("fields") {
        let _ = request_ok(
            stdin,
            reader,
            &format!("{}-{}", stage, key),
            "wizard.setField",
            json!({ "sessionId": session_id, "key": key, "value": value }),
        );
    }
    let _ = request_ok(
        stdin,
        reader,
        &format!("{}-submit", stage),
        "wizard.submit",
        json!({ "sessionId": session_id }),
    );
}

fn entry_ids(result: &serde_json::Value) -> Vec<String> {
    result["wizard"]["questions"]["entries"]
        .as_array()
        .expect("entries")
        .iter()
        .map(|e| {
            e.get("questionId")
                .and_then(|v| v.as_str())
                .or_else(|| e["customQuestion"]["prompt"].as_str())
                .unwrap_or("")
                .to_string()
        })
        .collect()
}

fn sequences(result: &serde_json::Value) -> Vec<u64> {
    result["wizard"]["questions"]["entries"]
        .as_array()
        .expect("entries")
        .iter()
        .map(|e| e["sequence"].as_u64().unwrap_or(0))
        .collect()
}

#[test]
fn materials_stage_builds_and_persists_question_selection() {
    let workspace = temp_dir("mockexamd-wizard-questions");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let exam = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "exams.create",
        json!({ "title": "Forces Mock", "subject": "physics" }),
    );
    let exam_id = exam["examId"].as_str().expect("examId").to_string();

    let q1 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "questionBank.create",
        json!({ "subject": "physics", "prompt": "State Newton's first law", "defaultMarks": 4 }),
    );
    let q1 = q1["questionId"].as_str().expect("q1").to_string();
    let q2 = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "questionBank.create",
        json!({ "subject": "physics", "prompt": "Define momentum" }),
    );
    let q2 = q2["questionId"].as_str().expect("q2").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "questionBank.create",
        json!({ "subject": "chemistry", "prompt": "Balance the equation" }),
    );
    let bad_type = request(
        &mut stdin,
        &mut reader,
        "6",
        "questionBank.create",
        json!({ "prompt": "Essay", "questionType": "essay_plus" }),
    );
    assert_eq!(error_code(&bad_type), "bad_params");

    let opened = request_ok(&mut stdin, &mut reader, "7", "wizard.open", json!({ "examId": exam_id }));
    let sid = opened["sessionId"].as_str().expect("sessionId").to_string();
    assert_eq!(opened["wizard"]["questionBank"].as_array().map(|a| a.len()), Some(2));

    advance(&mut stdin, &mut reader, &sid, "planned", json!({
        "proposedWindowStart": "2026-11-02",
        "papersAssigned": true
    }));
    advance(&mut stdin, &mut reader, &sid, "scheduled", json!({
        "examStartsAt": "2026-11-20T09:00",
        "venue": "Sports Hall",
        "venueBooked": true
    }));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "wizard.selectStage",
        json!({ "sessionId": sid, "stage": "materials_ready" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "wizard.questions.addBank",
        json!({ "sessionId": sid, "questionId": q1 }),
    );
    let dup = request(
        &mut stdin,
        &mut reader,
        "10",
        "wizard.questions.addBank",
        json!({ "sessionId": sid, "questionId": q1 }),
    );
    assert_eq!(error_code(&dup), "duplicate_question");

    let with_custom = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "wizard.questions.addCustom",
        json!({ "sessionId": sid, "question": { "prompt": "Sketch a velocity-time graph" } }),
    );
    assert_eq!(with_custom["wizard"]["questions"]["entries"][1]["marks"], 1.0);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "wizard.questions.addBank",
        json!({ "sessionId": sid, "questionId": q2 }),
    );
    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "wizard.questions.moveUp",
        json!({ "sessionId": sid, "index": 2 }),
    );
    assert_eq!(
        entry_ids(&moved),
        vec![q1.clone(), q2.clone(), "Sketch a velocity-time graph".to_string()]
    );
    assert_eq!(sequences(&moved), vec![1, 2, 3]);
    assert_eq!(moved["wizard"]["questions"]["entries"][1]["marks"], 1.0);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "wizard.questions.setMarks",
        json!({ "sessionId": sid, "index": 0, "marks": 5 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "wizard.questions.setOptional",
        json!({ "sessionId": sid, "index": 2, "isOptional": true }),
    );

    let invalid = request(&mut stdin, &mut reader, "16", "wizard.submit", json!({ "sessionId": sid }));
    assert_eq!(error_code(&invalid), "validation_failed");
    let errors = &invalid["error"]["details"]["errors"];
    assert_eq!(errors["instructions"], "Add instructions for at least one audience");
    assert!(errors.get("papersPrinted").is_some());
    assert!(errors.get("questionSelections").is_none());

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "wizard.instructions.update",
        json!({ "sessionId": sid, "index": 0, "instructions": "No calculators in section A" }),
    );
    for (i, key) in ["papersPrinted", "markSchemeReady"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("18-{}", i),
            "wizard.setField",
            json!({ "sessionId": sid, "key": key, "value": true }),
        );
    }

    let submitted = request_ok(&mut stdin, &mut reader, "19", "wizard.submit", json!({ "sessionId": sid }));
    let data = &submitted["payload"]["stageData"];
    let selections = data["questionSelections"]["selections"].as_array().expect("selections");
    assert_eq!(selections.len(), 3);
    assert_eq!(selections[0]["marks"], 5.0);
    assert_eq!(selections[2]["isOptional"], true);
    assert_eq!(data["instructions"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(data["instructions"][0]["audience"], "students");

    // Reloaded from the database: persisted ids, same order.
    assert_eq!(submitted["wizard"]["currentStage"], "materials_ready");
    assert_eq!(
        entry_ids(&submitted),
        vec![q1.clone(), q2.clone(), "Sketch a velocity-time graph".to_string()]
    );
    let first_id = submitted["wizard"]["questions"]["entries"][0]["id"]
        .as_str()
        .expect("persisted id")
        .to_string();
    let audiences: Vec<&str> = submitted["wizard"]["instructions"]["entries"]
        .as_array()
        .expect("instructions")
        .iter()
        .filter_map(|e| e["audience"].as_str())
        .collect();
    assert_eq!(audiences, vec!["students", "invigilators", "markers"]);

    let removed = request_ok(
        &mut stdin,
        &mut reader,
        "20",
        "wizard.questions.remove",
        json!({ "sessionId": sid, "index": 0 }),
    );
    assert_eq!(removed["wizard"]["questions"]["removedIds"], json!([first_id]));
    assert_eq!(sequences(&removed), vec![1, 2]);
    assert_eq!(removed["wizard"]["questions"]["selectedBankIds"], json!([q2]));

    let reselected = request_ok(
        &mut stdin,
        &mut reader,
        "21",
        "wizard.questions.selectBank",
        json!({ "sessionId": sid, "questionIds": [q1] }),
    );
    assert_eq!(
        entry_ids(&reselected),
        vec!["Sketch a velocity-time graph".to_string(), q1.clone()]
    );
    assert_eq!(sequences(&reselected), vec![1, 2]);
}
