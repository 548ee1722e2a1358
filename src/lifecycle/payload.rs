use super::context::ExamSummary;
use super::error::PayloadError;
use super::form::{FieldMap, StageFormState};
use super::instructions::{InstructionRecord, InstructionSetEditor};
use super::policy::classify_move;
use super::questions::{CustomQuestion, QuestionSelectionEditor, SourceType};
use super::stage::{self, Stage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionUpsert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_question: Option<CustomQuestion>,
    pub marks: f64,
    pub sequence: u32,
    pub is_optional: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSelectionBundle {
    pub selections: Vec<SelectionUpsert>,
    pub removed_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageData {
    pub form_data: FieldMap,
    pub notes: Option<String>,
    /// `None` means update the stage record without changing completion.
    pub completed: Option<bool>,
    pub instructions: Vec<InstructionRecord>,
    pub removed_instruction_ids: Vec<String>,
    pub question_selections: QuestionSelectionBundle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionPayload {
    pub exam_id: String,
    pub current_stage: Stage,
    pub target_stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub stage_data: StageData,
}

pub struct PayloadInput<'a> {
    pub exam: Option<&'a ExamSummary>,
    pub current_stage: Stage,
    pub target_stage: Stage,
    pub form: &'a StageFormState,
    pub instructions: &'a InstructionSetEditor,
    pub questions: &'a QuestionSelectionEditor,
}

fn trimmed_or_none(s: Option<&str>) -> Option<String> {
    s.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Assembles the request for a proposed stage change. Pure: reads its inputs
/// and returns a fresh snapshot.
pub fn build(input: PayloadInput<'_>) -> Result<TransitionPayload, PayloadError> {
    let exam = input.exam.ok_or(PayloadError::MissingExamContext)?;
    let target = input.target_stage;
    let def = stage::definition(target).ok_or(PayloadError::MissingStageDefinition(target))?;

    let mut form_data = input.form.fields(target).cloned().unwrap_or_default();
    let notes = match def.notes_field_key {
        Some(key) => {
            let raw = form_data.remove(key);
            trimmed_or_none(raw.as_ref().and_then(|v| v.as_text()))
        }
        None => None,
    };

    let completed = classify_move(input.current_stage, target).completion_signal();

    let instructions: Vec<InstructionRecord> = input
        .instructions
        .entries()
        .iter()
        .filter(|i| i.has_text())
        .map(|i| InstructionRecord {
            id: i.id.clone(),
            audience: i.audience,
            instructions: i.instructions.trim().to_string(),
        })
        .collect();
    let mut removed_instruction_ids: Vec<String> = input.instructions.removed_ids().to_vec();
    for cleared in input.instructions.entries().iter().filter(|i| !i.has_text()) {
        if let Some(id) = &cleared.id {
            if !removed_instruction_ids.contains(id) {
                removed_instruction_ids.push(id.clone());
            }
        }
    }

    let selections: Vec<SelectionUpsert> = input
        .questions
        .entries()
        .iter()
        .filter(|q| q.is_valid())
        .enumerate()
        .map(|(idx, q)| match q.source_type {
            SourceType::Bank => SelectionUpsert {
                id: q.id.clone(),
                source_type: SourceType::Bank,
                question_id: q.question_id.clone(),
                custom_question: None,
                marks: q.marks,
                sequence: idx as u32 + 1,
                is_optional: q.is_optional,
            },
            SourceType::Custom => SelectionUpsert {
                id: q.id.clone(),
                source_type: SourceType::Custom,
                question_id: None,
                custom_question: q.custom_question.clone(),
                marks: q.marks,
                sequence: idx as u32 + 1,
                is_optional: q.is_optional,
            },
        })
        .collect();

    let reason = if target == Stage::Cancelled {
        notes.clone()
    } else {
        None
    };

    Ok(TransitionPayload {
        exam_id: exam.id.clone(),
        current_stage: input.current_stage,
        target_stage: target,
        reason,
        stage_data: StageData {
            form_data,
            notes,
            completed,
            instructions,
            removed_instruction_ids,
            question_selections: QuestionSelectionBundle {
                selections,
                removed_ids: input.questions.removed_ids().to_vec(),
            },
        },
    })
}
