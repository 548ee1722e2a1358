use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_opt_f64, parse_opt_string, repo_err, required_str};
use crate::ipc::types::{AppState, Request};
use crate::repository::SqliteRepository;
use serde_json::json;

const QUESTION_TYPES: &[&str] = &["short_answer", "long_answer", "multiple_choice", "true_false"];

fn handle_question_bank_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let prompt = match required_str(req, "prompt") {
        Ok(v) => v.trim(),
        Err(e) => return e,
    };
    if prompt.is_empty() {
        return err(&req.id, "bad_params", "prompt must not be empty", None);
    }
    let subject = match parse_opt_string(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let question_type = match parse_opt_string(req, "questionType") {
        Ok(v) => v.unwrap_or_else(|| "short_answer".to_string()),
        Err(e) => return e,
    };
    if !QUESTION_TYPES.contains(&question_type.as_str()) {
        return err(
            &req.id,
            "bad_params",
            format!("questionType must be one of: {}", QUESTION_TYPES.join(", ")),
            None,
        );
    }
    let default_marks = match parse_opt_f64(req, "defaultMarks") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match SqliteRepository::new(conn).create_bank_item(
        subject.as_deref(),
        prompt,
        &question_type,
        default_marks,
    ) {
        Ok(item) => ok(&req.id, json!({ "questionId": item.id, "question": item })),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "question_bank" })),
        ),
    }
}

fn handle_question_bank_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "questions": [] }));
    };
    let subject = match parse_opt_string(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match SqliteRepository::new(conn).list_bank(subject.as_deref()) {
        Ok(questions) => ok(&req.id, json!({ "questions": questions })),
        Err(e) => repo_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "questionBank.create" => Some(handle_question_bank_create(state, req)),
        "questionBank.list" => Some(handle_question_bank_list(state, req)),
        _ => None,
    }
}
