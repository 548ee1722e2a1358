use super::form::FieldMap;
use super::instructions::InstructionRecord;
use super::questions::{QuestionBankItem, QuestionSelectionRecord};
use super::stage::Stage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSummary {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub status: Stage,
}

/// Checklist state for one (exam, stage) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageProgress {
    pub stage: Stage,
    #[serde(default)]
    pub form_data: FieldMap,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<String>,
}

/// Everything the wizard needs when it opens for an exam.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardContext {
    pub exam: ExamSummary,
    pub stage_progress: Vec<StageProgress>,
    pub instructions: Vec<InstructionRecord>,
    pub question_bank: Vec<QuestionBankItem>,
    pub question_selections: Vec<QuestionSelectionRecord>,
}
