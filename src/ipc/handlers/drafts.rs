use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::draft_settings;
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use sha2::{Digest, Sha256};

fn content_hash(form_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(form_json.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn handle_drafts_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let draft_key = match required_str(req, "draftKey") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(form) = req.params.get("form").filter(|v| v.is_object()) else {
        return err(&req.id, "bad_params", "form must be an object", None);
    };
    let settings = match draft_settings(conn) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !settings.enabled {
        return ok(&req.id, json!({ "saved": false, "reason": "disabled" }));
    }

    let form_json = match serde_json::to_string(form) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };
    if form_json.len() > settings.max_bytes {
        return err(
            &req.id,
            "bad_params",
            format!("draft exceeds {} bytes", settings.max_bytes),
            Some(json!({ "size": form_json.len(), "maxBytes": settings.max_bytes })),
        );
    }
    let hash = content_hash(&form_json);

    let existing: Option<String> = match conn
        .query_row(
            "SELECT content_hash FROM exam_drafts WHERE draft_key = ?",
            [draft_key],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if existing.as_deref() == Some(hash.as_str()) {
        return ok(
            &req.id,
            json!({ "saved": false, "reason": "unchanged", "contentHash": hash }),
        );
    }

    let saved_at = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO exam_drafts(draft_key, form_json, content_hash, saved_at) VALUES(?, ?, ?, ?)
         ON CONFLICT(draft_key) DO UPDATE SET
           form_json = excluded.form_json,
           content_hash = excluded.content_hash,
           saved_at = excluded.saved_at",
        (draft_key, &form_json, &hash, &saved_at),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "exam_drafts" })),
        );
    }
    tracing::debug!(draft_key, bytes = form_json.len(), "draft saved");
    ok(
        &req.id,
        json!({ "saved": true, "contentHash": hash, "savedAt": saved_at }),
    )
}

fn handle_drafts_load(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let draft_key = match required_str(req, "draftKey") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let row: Option<(String, String, String)> = match conn
        .query_row(
            "SELECT form_json, content_hash, saved_at FROM exam_drafts WHERE draft_key = ?",
            [draft_key],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((form_json, hash, saved_at)) = row else {
        return ok(&req.id, json!({ "draft": null }));
    };
    match serde_json::from_str::<serde_json::Value>(&form_json) {
        Ok(form) => ok(
            &req.id,
            json!({
                "draft": {
                    "form": form,
                    "contentHash": hash,
                    "savedAt": saved_at
                }
            }),
        ),
        Err(e) => {
            tracing::warn!(draft_key, error = %e, "stored draft is not valid JSON");
            ok(&req.id, json!({ "draft": null }))
        }
    }
}

fn handle_drafts_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let draft_key = match required_str(req, "draftKey") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match conn.execute("DELETE FROM exam_drafts WHERE draft_key = ?", [draft_key]) {
        Ok(n) => ok(&req.id, json!({ "cleared": n > 0 })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "drafts.save" => Some(handle_drafts_save(state, req)),
        "drafts.load" => Some(handle_drafts_load(state, req)),
        "drafts.clear" => Some(handle_drafts_clear(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_hex() {
        let a = content_hash("{\"title\":\"Mock\"}");
        assert_eq!(a.len(), 64);
        assert_eq!(a, content_hash("{\"title\":\"Mock\"}"));
        assert_ne!(a, content_hash("{\"title\":\"Mock 2\"}"));
    }
}
