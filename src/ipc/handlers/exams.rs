use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_opt_string, repo_err, required_str};
use crate::ipc::types::{AppState, Request};
use crate::lifecycle::stage::Stage;
use crate::repository::SqliteRepository;
use serde_json::json;

fn handle_exams_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v.trim(),
        Err(e) => return e,
    };
    if title.is_empty() {
        return err(&req.id, "bad_params", "title must not be empty", None);
    }
    let subject = match parse_opt_string(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match SqliteRepository::new(conn).create_exam(title, subject.as_deref()) {
        Ok(exam) => {
            tracing::info!(exam_id = %exam.id, "exam created");
            ok(&req.id, json!({ "examId": exam.id, "exam": exam }))
        }
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "exams" })),
        ),
    }
}

fn handle_exams_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "exams": [] }));
    };
    let status = match req.params.get("status").and_then(|v| v.as_str()) {
        Some(raw) => match Stage::parse(raw) {
            Some(s) => Some(s),
            None => return err(&req.id, "bad_params", format!("unknown stage: {}", raw), None),
        },
        None => None,
    };
    match SqliteRepository::new(conn).list_exams(status) {
        Ok(exams) => ok(&req.id, json!({ "exams": exams })),
        Err(e) => repo_err(req, e),
    }
}

fn handle_exams_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match SqliteRepository::new(conn).get_exam(exam_id) {
        Ok(exam) => ok(&req.id, json!({ "exam": exam })),
        Err(e) => repo_err(req, e),
    }
}

fn handle_exams_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match SqliteRepository::new(conn).status_history(exam_id) {
        Ok(history) => ok(&req.id, json!({ "history": history })),
        Err(e) => repo_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exams.create" => Some(handle_exams_create(state, req)),
        "exams.list" => Some(handle_exams_list(state, req)),
        "exams.get" => Some(handle_exams_get(state, req)),
        "exams.history" => Some(handle_exams_history(state, req)),
        _ => None,
    }
}
