use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::repository::RepoError;
use rusqlite::Connection;
use serde_json::{json, Value};

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str<'a>(req: &'a Request, key: &str) -> Result<&'a str, Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn required_usize(req: &Request, key: &str) -> Result<usize, Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a non-negative integer", key),
                None,
            )
        })
}

/// Absent or null yields `None`; blank strings are treated as absent.
pub fn parse_opt_string(req: &Request, key: &str) -> Result<Option<String>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let t = s.trim();
            Ok(if t.is_empty() { None } else { Some(t.to_string()) })
        }
        Some(_) => Err(err(
            &req.id,
            "bad_params",
            format!("{} must be a string", key),
            None,
        )),
    }
}

pub fn parse_opt_f64(req: &Request, key: &str) -> Result<Option<f64>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(Some)
            .ok_or_else(|| {
                err(
                    &req.id,
                    "bad_params",
                    format!("{} must be a non-negative number", key),
                    None,
                )
            }),
    }
}

pub fn parse_bool(req: &Request, key: &str) -> Result<bool, Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be boolean", key), None))
}

pub fn repo_err(req: &Request, e: RepoError) -> Value {
    match e {
        RepoError::ExamNotFound(_) => err(&req.id, "not_found", e.to_string(), None),
        RepoError::TransitionRejected { .. } => {
            err(&req.id, "transition_not_allowed", e.to_string(), None)
        }
        RepoError::StatusConflict { expected, actual } => err(
            &req.id,
            "status_conflict",
            e.to_string(),
            Some(json!({ "expected": expected, "actual": actual })),
        ),
        _ => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::stage::Stage;

    fn req() -> Request {
        Request {
            id: "7".into(),
            method: "wizard.open".into(),
            params: json!({}),
        }
    }

    #[test]
    fn stale_status_gets_its_own_code() {
        let v = repo_err(
            &req(),
            RepoError::StatusConflict {
                expected: Stage::Draft,
                actual: Stage::Planned,
            },
        );
        assert_eq!(v["error"]["code"], "status_conflict");
        assert_eq!(v["error"]["details"]["expected"], "draft");
        assert_eq!(v["error"]["details"]["actual"], "planned");
    }

    #[test]
    fn backend_errors_stay_storage_failures() {
        let v = repo_err(&req(), RepoError::Backend("disk I/O error".into()));
        assert_eq!(v["error"]["code"], "db_query_failed");
        let v = repo_err(&req(), RepoError::ExamNotFound("x".into()));
        assert_eq!(v["error"]["code"], "not_found");
    }
}
