use crate::ipc::error::{err, ok};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request};
use crate::lifecycle::policy::{allowed_stages, allowed_transitions, is_terminal};
use crate::lifecycle::stage::{Stage, STAGE_DEFINITIONS};
use serde_json::json;

fn handle_lifecycle_stages(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let stages: Vec<serde_json::Value> = STAGE_DEFINITIONS
        .iter()
        .map(|def| {
            let mut v = json!(def);
            v["rank"] = json!(def.rank());
            v["transitions"] = json!(allowed_transitions(def.stage));
            v["terminal"] = json!(is_terminal(def.stage));
            v
        })
        .collect();
    ok(&req.id, json!({ "stages": stages }))
}

fn handle_lifecycle_allowed(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let raw = match required_str(req, "stage") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(stage) = Stage::parse(raw) else {
        return err(&req.id, "bad_params", format!("unknown stage: {}", raw), None);
    };
    ok(
        &req.id,
        json!({
            "stage": stage,
            "allowed": allowed_stages(stage),
            "terminal": is_terminal(stage)
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "lifecycle.stages" => Some(handle_lifecycle_stages(state, req)),
        "lifecycle.allowed" => Some(handle_lifecycle_allowed(state, req)),
        _ => None,
    }
}
