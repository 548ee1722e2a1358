use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::wizard_settings;
use crate::ipc::helpers::{parse_bool, parse_opt_f64, repo_err, required_str, required_usize};
use crate::ipc::types::{AppState, Request};
use crate::lifecycle::form::FieldValue;
use crate::lifecycle::instructions::{Audience, InstructionPatch};
use crate::lifecycle::questions::CustomQuestion;
use crate::lifecycle::stage::Stage;
use crate::lifecycle::wizard::{self, LoadState, Notice, SubmitOutcome, WizardAction, WizardState};
use crate::repository::SqliteRepository;
use serde_json::{json, Value};
use uuid::Uuid;

const BUILD_FAILED_MESSAGE: &str = "Unable to prepare the stage update. Reload the wizard and try again.";

fn session_view(session_id: &str, w: &WizardState) -> Value {
    json!({
        "sessionId": session_id,
        "wizard": w,
        "allowedStages": w.allowed_stages(),
        "moveKind": w.move_kind(),
        "settings": w.settings(),
    })
}

fn notice_err(req: &Request, notice: &Notice) -> Value {
    err(&req.id, notice.code(), notice.message(), None)
}

fn load_failed(req: &Request, session_id: &str, w: &WizardState) -> Option<Value> {
    match w.load_state() {
        LoadState::Failed(message) => Some(err(
            &req.id,
            "context_load_failed",
            format!("Unable to load exam details: {}", message),
            Some(json!({ "sessionId": session_id })),
        )),
        _ => None,
    }
}

fn parse_stage(req: &Request, key: &str) -> Result<Stage, Value> {
    let raw = required_str(req, key)?;
    Stage::parse(raw).ok_or_else(|| err(&req.id, "bad_params", format!("unknown stage: {}", raw), None))
}

fn parse_question(req: &Request, default_marks: f64) -> Result<CustomQuestion, Value> {
    let Some(raw) = req.params.get("question").filter(|v| v.is_object()) else {
        return Err(err(&req.id, "bad_params", "question must be an object", None));
    };
    let mut question: CustomQuestion = serde_json::from_value(raw.clone())
        .map_err(|e| err(&req.id, "bad_params", format!("invalid question: {}", e), None))?;
    if raw.get("marks").map(Value::is_null).unwrap_or(true) {
        question.marks = default_marks;
    }
    if !question.marks.is_finite() || question.marks < 0.0 {
        return Err(err(&req.id, "bad_params", "marks must be a non-negative number", None));
    }
    Ok(question)
}

/// Parses the action for a session-scoped mutation. Runs against the
/// current session so defaults can come from its settings.
fn parse_action(req: &Request, w: &WizardState) -> Result<WizardAction, Value> {
    let action = match req.method.as_str() {
        "wizard.selectStage" => WizardAction::SelectStage(parse_stage(req, "stage")?),
        "wizard.setField" => {
            let stage = match req.params.get("stage") {
                Some(_) => parse_stage(req, "stage")?,
                None => w.target_stage(),
            };
            let key = required_str(req, "key")?.to_string();
            let value = req
                .params
                .get("value")
                .and_then(FieldValue::from_json)
                .ok_or_else(|| {
                    err(
                        &req.id,
                        "bad_params",
                        "value must be a string, number, boolean or null",
                        None,
                    )
                })?;
            WizardAction::SetField { stage, key, value }
        }
        "wizard.instructions.add" => WizardAction::AddInstruction,
        "wizard.instructions.update" => {
            let index = required_usize(req, "index")?;
            let audience = match req.params.get("audience").and_then(|v| v.as_str()) {
                Some(raw) => Some(Audience::parse(raw).ok_or_else(|| {
                    err(&req.id, "bad_params", format!("unknown audience: {}", raw), None)
                })?),
                None => None,
            };
            let instructions = req
                .params
                .get("instructions")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            WizardAction::UpdateInstruction {
                index,
                patch: InstructionPatch {
                    audience,
                    instructions,
                },
            }
        }
        "wizard.instructions.remove" => WizardAction::RemoveInstruction(required_usize(req, "index")?),
        "wizard.questions.selectBank" => {
            let Some(ids) = req.params.get("questionIds").and_then(|v| v.as_array()) else {
                return Err(err(&req.id, "bad_params", "questionIds must be an array", None));
            };
            let ids = ids
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| err(&req.id, "bad_params", "questionIds must be strings", None))?;
            WizardAction::SelectBankQuestions(ids)
        }
        "wizard.questions.addBank" => {
            WizardAction::AddBankQuestion(required_str(req, "questionId")?.to_string())
        }
        "wizard.questions.addCustom" => {
            WizardAction::AddCustomQuestion(parse_question(req, w.settings().default_custom_marks)?)
        }
        "wizard.questions.editCustom" => WizardAction::EditCustomQuestion {
            index: required_usize(req, "index")?,
            question: parse_question(req, w.settings().default_custom_marks)?,
        },
        "wizard.questions.remove" => WizardAction::RemoveQuestion(required_usize(req, "index")?),
        "wizard.questions.reorder" => WizardAction::ReorderQuestion {
            from: required_usize(req, "from")?,
            to: required_usize(req, "to")?,
        },
        "wizard.questions.moveUp" => WizardAction::MoveQuestionUp(required_usize(req, "index")?),
        "wizard.questions.moveDown" => WizardAction::MoveQuestionDown(required_usize(req, "index")?),
        "wizard.questions.setOptional" => WizardAction::SetQuestionOptional {
            index: required_usize(req, "index")?,
            is_optional: parse_bool(req, "isOptional")?,
        },
        "wizard.questions.setMarks" => {
            let marks = parse_opt_f64(req, "marks")?
                .ok_or_else(|| err(&req.id, "bad_params", "missing marks", None))?;
            WizardAction::SetQuestionMarks {
                index: required_usize(req, "index")?,
                marks,
            }
        }
        other => {
            return Err(err(
                &req.id,
                "not_implemented",
                format!("unknown method: {}", other),
                None,
            ))
        }
    };
    Ok(action)
}

fn handle_wizard_open(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let settings = match wizard_settings(conn) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let repo = SqliteRepository::new(conn);
    let exam = match repo.get_exam(exam_id) {
        Ok(exam) => exam,
        Err(e) => return repo_err(req, e),
    };

    let w = wizard::open(&repo, exam_id, exam.status, settings);
    let session_id = Uuid::new_v4().to_string();
    tracing::info!(session_id = %session_id, exam_id, stage = %exam.status, "wizard opened");
    let resp = match load_failed(req, &session_id, &w) {
        Some(e) => e,
        None => ok(&req.id, session_view(&session_id, &w)),
    };
    state.sessions.insert(session_id, w);
    resp
}

fn handle_wizard_reload(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v.to_string(),
        Err(e) => return e,
    };
    let Some(w) = state.sessions.remove(&session_id) else {
        return err(&req.id, "unknown_session", "wizard session not found", None);
    };
    let w = wizard::reload(&SqliteRepository::new(conn), w);
    let resp = match load_failed(req, &session_id, &w) {
        Some(e) => e,
        None => ok(&req.id, session_view(&session_id, &w)),
    };
    state.sessions.insert(session_id, w);
    resp
}

fn handle_wizard_state(state: &mut AppState, req: &Request) -> Value {
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match state.sessions.get(session_id) {
        Some(w) => ok(&req.id, session_view(session_id, w)),
        None => err(&req.id, "unknown_session", "wizard session not found", None),
    }
}

fn handle_wizard_action(state: &mut AppState, req: &Request) -> Value {
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v.to_string(),
        Err(e) => return e,
    };
    let Some(w) = state.sessions.remove(&session_id) else {
        return err(&req.id, "unknown_session", "wizard session not found", None);
    };
    let action = match parse_action(req, &w) {
        Ok(a) => a,
        Err(e) => {
            state.sessions.insert(session_id, w);
            return e;
        }
    };
    let (w, notice) = wizard::reduce(w, action);
    let resp = match notice {
        Some(n) => {
            tracing::debug!(session_id = %session_id, code = n.code(), "wizard action rejected");
            notice_err(req, &n)
        }
        None => ok(&req.id, session_view(&session_id, &w)),
    };
    state.sessions.insert(session_id, w);
    resp
}

fn handle_wizard_validate(state: &mut AppState, req: &Request) -> Value {
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v.to_string(),
        Err(e) => return e,
    };
    let Some(w) = state.sessions.remove(&session_id) else {
        return err(&req.id, "unknown_session", "wizard session not found", None);
    };
    if !w.is_ready() {
        let resp = load_failed(req, &session_id, &w)
            .unwrap_or_else(|| notice_err(req, &Notice::ContextUnavailable));
        state.sessions.insert(session_id, w);
        return resp;
    }
    let (w, outcome) = w.validate();
    state.sessions.insert(session_id, w);
    ok(&req.id, json!(outcome))
}

fn handle_wizard_preview(state: &mut AppState, req: &Request) -> Value {
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(w) = state.sessions.get(session_id) else {
        return err(&req.id, "unknown_session", "wizard session not found", None);
    };
    match w.build_payload() {
        Ok(payload) => ok(&req.id, json!({ "payload": payload })),
        Err(e) => {
            tracing::error!(session_id, exam_id = w.exam_id(), error = %e, "payload preview failed");
            err(&req.id, "payload_build_failed", BUILD_FAILED_MESSAGE, None)
        }
    }
}

fn handle_wizard_submit(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v.to_string(),
        Err(e) => return e,
    };
    let Some(w) = state.sessions.remove(&session_id) else {
        return err(&req.id, "unknown_session", "wizard session not found", None);
    };

    let mut repo = SqliteRepository::new(conn);
    let (w, outcome) = wizard::submit(&mut repo, w);
    let resp = match outcome {
        SubmitOutcome::Submitted(payload) => {
            let mut view = session_view(&session_id, &w);
            view["payload"] = json!(payload);
            ok(&req.id, view)
        }
        SubmitOutcome::Rejected(notice) => match load_failed(req, &session_id, &w) {
            Some(e) => e,
            None => notice_err(req, &notice),
        },
        SubmitOutcome::Invalid(validation) => err(
            &req.id,
            "validation_failed",
            "Complete the required fields before changing the exam status.",
            Some(json!({ "errors": validation.errors })),
        ),
        SubmitOutcome::BuildFailed(_) => {
            err(&req.id, "payload_build_failed", BUILD_FAILED_MESSAGE, None)
        }
        SubmitOutcome::Failed(failure) => err(
            &req.id,
            "submission_failed",
            failure.message.clone(),
            Some(json!({ "kind": failure.kind, "raw": failure.raw })),
        ),
    };
    state.sessions.insert(session_id, w);
    resp
}

fn handle_wizard_close(state: &mut AppState, req: &Request) -> Value {
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let closed = state.sessions.remove(session_id).is_some();
    ok(&req.id, json!({ "closed": closed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "wizard.open" => Some(handle_wizard_open(state, req)),
        "wizard.reload" => Some(handle_wizard_reload(state, req)),
        "wizard.state" => Some(handle_wizard_state(state, req)),
        "wizard.validate" => Some(handle_wizard_validate(state, req)),
        "wizard.preview" => Some(handle_wizard_preview(state, req)),
        "wizard.submit" => Some(handle_wizard_submit(state, req)),
        "wizard.close" => Some(handle_wizard_close(state, req)),
        "wizard.selectStage"
        | "wizard.setField"
        | "wizard.instructions.add"
        | "wizard.instructions.update"
        | "wizard.instructions.remove"
        | "wizard.questions.selectBank"
        | "wizard.questions.addBank"
        | "wizard.questions.addCustom"
        | "wizard.questions.editCustom"
        | "wizard.questions.remove"
        | "wizard.questions.reorder"
        | "wizard.questions.moveUp"
        | "wizard.questions.moveDown"
        | "wizard.questions.setOptional"
        | "wizard.questions.setMarks" => Some(handle_wizard_action(state, req)),
        _ => None,
    }
}
