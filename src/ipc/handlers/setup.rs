use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::lifecycle::wizard::WizardSettings;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Wizard,
    Drafts,
}

impl SetupSection {
    const ALL: [SetupSection; 2] = [SetupSection::Wizard, SetupSection::Drafts];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "wizard" => Some(Self::Wizard),
            "drafts" => Some(Self::Drafts),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Wizard => "wizard",
            Self::Drafts => "drafts",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Wizard => "setup.wizard",
            Self::Drafts => "setup.drafts",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Wizard => {
            let d = WizardSettings::default();
            json!({
                "autosaveDelayMs": d.autosave_delay_ms,
                "defaultCustomMarks": d.default_custom_marks,
                "fallbackBankMarks": d.fallback_bank_marks,
                "requireNotesOnBackward": d.require_notes_on_backward
            })
        }
        SetupSection::Drafts => {
            let d = DraftSettings::default();
            json!({
                "enabled": d.enabled,
                "maxBytes": d.max_bytes
            })
        }
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v
        .as_f64()
        .ok_or_else(|| format!("{} must be a number", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Wizard => match k.as_str() {
                "autosaveDelayMs" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 500, 60_000)?));
                }
                "defaultCustomMarks" | "fallbackBankMarks" => {
                    obj.insert(k.clone(), Value::from(parse_f64_range(v, k, 0.0, 100.0)?));
                }
                "requireNotesOnBackward" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown wizard field: {}", k)),
            },
            SetupSection::Drafts => match k.as_str() {
                "enabled" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "maxBytes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1024, 1_048_576)?));
                }
                _ => return Err(format!("unknown drafts field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values should not block the wizard.
            if let Err(e) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.name(), error = %e, "ignoring invalid saved setting");
            }
        }
    }
    Ok(current)
}

/// Wizard behaviour for new sessions, with defaults for anything unset.
pub fn wizard_settings(conn: &rusqlite::Connection) -> anyhow::Result<WizardSettings> {
    let v = load_section(conn, SetupSection::Wizard)?;
    let d = WizardSettings::default();
    Ok(WizardSettings {
        autosave_delay_ms: v["autosaveDelayMs"].as_i64().unwrap_or(d.autosave_delay_ms),
        default_custom_marks: v["defaultCustomMarks"]
            .as_f64()
            .unwrap_or(d.default_custom_marks),
        fallback_bank_marks: v["fallbackBankMarks"]
            .as_f64()
            .unwrap_or(d.fallback_bank_marks),
        require_notes_on_backward: v["requireNotesOnBackward"]
            .as_bool()
            .unwrap_or(d.require_notes_on_backward),
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DraftSettings {
    pub enabled: bool,
    pub max_bytes: usize,
}

impl Default for DraftSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_bytes: 262_144,
        }
    }
}

pub fn draft_settings(conn: &rusqlite::Connection) -> anyhow::Result<DraftSettings> {
    let v = load_section(conn, SetupSection::Drafts)?;
    let d = DraftSettings::default();
    Ok(DraftSettings {
        enabled: v["enabled"].as_bool().unwrap_or(d.enabled),
        max_bytes: v["maxBytes"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(d.max_bytes),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.name(), "setup section updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
