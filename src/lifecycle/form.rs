use super::instructions::InstructionSetEditor;
use super::questions::{QuestionSelectionEditor, SourceType};
use super::stage::{self, FieldDef, FieldKind, Stage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const INSTRUCTIONS_ERROR_KEY: &str = "instructions";
pub const QUESTIONS_ERROR_KEY: &str = "questionSelections";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Null,
}

impl FieldValue {
    pub fn from_json(v: &serde_json::Value) -> Option<Self> {
        match v {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(Self::Number),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Text(s) => !s.is_empty(),
            Self::Null => false,
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            Self::Text(s) => s.trim().is_empty(),
            Self::Null => true,
            Self::Bool(_) | Self::Number(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl FieldKind {
    fn is_satisfied(self, value: Option<&FieldValue>) -> bool {
        match self {
            FieldKind::Checkbox => value.map(FieldValue::is_truthy).unwrap_or(false),
            FieldKind::Text
            | FieldKind::Textarea
            | FieldKind::Date
            | FieldKind::Datetime
            | FieldKind::Number => value.map(|v| !v.is_blank()).unwrap_or(false),
        }
    }

    fn missing_message(self, field: &FieldDef) -> String {
        match self {
            FieldKind::Checkbox => format!("Please confirm: {}", field.label),
            _ => format!("{} is required", field.label),
        }
    }
}

pub type FieldMap = BTreeMap<String, FieldValue>;

/// Field values per stage. Values survive switching the active stage, so an
/// earlier stage can be revisited without losing later entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageFormState {
    values: BTreeMap<Stage, FieldMap>,
    errors: BTreeMap<String, String>,
}

impl StageFormState {
    pub fn seed(&mut self, stage: Stage, values: FieldMap) {
        self.values.insert(stage, values);
    }

    pub fn set_field(&mut self, stage: Stage, key: &str, value: FieldValue) {
        self.values
            .entry(stage)
            .or_default()
            .insert(key.to_string(), value);
        self.errors.remove(key);
    }

    pub fn fields(&self, stage: Stage) -> Option<&FieldMap> {
        self.values.get(&stage)
    }

    pub fn value(&self, stage: Stage, key: &str) -> Option<&FieldValue> {
        self.values.get(&stage).and_then(|m| m.get(key))
    }

    #[cfg(test)]
    pub(crate) fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    /// Carries entries from `previous` back in for every stage except
    /// `persisted`, whose values were just reloaded from storage.
    pub fn keep_unsaved(&mut self, previous: StageFormState, persisted: Stage) {
        for (stage, values) in previous.values {
            if stage == persisted {
                continue;
            }
            self.values.entry(stage).or_default().extend(values);
        }
    }

    pub fn set_errors(&mut self, errors: BTreeMap<String, String>) {
        self.errors = errors;
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: BTreeMap<String, String>,
}

impl ValidationOutcome {
    fn from_errors(errors: BTreeMap<String, String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Checks that the stage checklist is filled in. Local and synchronous; it
/// says nothing about whether the move itself is legal.
pub fn validate_stage(
    stage: Stage,
    form: &StageFormState,
    instructions: &InstructionSetEditor,
    questions: &QuestionSelectionEditor,
) -> ValidationOutcome {
    let mut errors = BTreeMap::new();
    let Some(def) = stage::definition(stage) else {
        return ValidationOutcome::from_errors(errors);
    };

    for field in def.required_fields() {
        if !field.kind.is_satisfied(form.value(stage, field.key)) {
            errors.insert(field.key.to_string(), field.kind.missing_message(field));
        }
    }

    if def.show_instructions_setup && !instructions.has_any_text() {
        errors.insert(
            INSTRUCTIONS_ERROR_KEY.to_string(),
            "Add instructions for at least one audience".to_string(),
        );
    }

    if def.show_question_selection {
        for (idx, q) in questions.entries().iter().enumerate() {
            if q.source_type == SourceType::Custom && !q.is_valid() {
                errors.insert(
                    format!("{}.{}", QUESTIONS_ERROR_KEY, idx),
                    format!("Question {} needs a prompt", idx + 1),
                );
            }
        }
        if questions.valid_count() == 0 {
            errors.insert(
                QUESTIONS_ERROR_KEY.to_string(),
                "Select at least one question".to_string(),
            );
        }
    }

    ValidationOutcome::from_errors(errors)
}
