use super::{RepoError, WizardRepository};
use crate::lifecycle::context::{ExamSummary, StageProgress, WizardContext};
use crate::lifecycle::instructions::InstructionRecord;
use crate::lifecycle::payload::TransitionPayload;
use crate::lifecycle::policy::check_transition;
use crate::lifecycle::questions::{QuestionBankItem, QuestionSelectionRecord};
use crate::lifecycle::stage::Stage;
use std::collections::HashMap;

/// Test double with the same acceptance rules as the SQLite backend.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    exams: HashMap<String, ExamSummary>,
    progress: HashMap<String, Vec<StageProgress>>,
    instructions: HashMap<String, Vec<InstructionRecord>>,
    selections: HashMap<String, Vec<QuestionSelectionRecord>>,
    bank: Vec<QuestionBankItem>,
    submissions: Vec<TransitionPayload>,
    fail_next: Option<String>,
    next_id: u64,
}

impl InMemoryRepository {
    pub fn insert_exam(&mut self, exam: ExamSummary) {
        self.exams.insert(exam.id.clone(), exam);
    }

    pub fn insert_bank_item(&mut self, item: QuestionBankItem) {
        self.bank.push(item);
    }

    pub fn insert_progress(&mut self, exam_id: &str, progress: StageProgress) {
        self.progress
            .entry(exam_id.to_string())
            .or_default()
            .push(progress);
    }

    pub fn fail_next_submit(&mut self, message: &str) {
        self.fail_next = Some(message.to_string());
    }

    pub fn exam_status(&self, exam_id: &str) -> Option<Stage> {
        self.exams.get(exam_id).map(|e| e.status)
    }

    pub fn submissions(&self) -> &[TransitionPayload] {
        &self.submissions
    }

    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }
}

impl WizardRepository for InMemoryRepository {
    fn load_wizard_context(&self, exam_id: &str) -> Result<WizardContext, RepoError> {
        let exam = self
            .exams
            .get(exam_id)
            .cloned()
            .ok_or_else(|| RepoError::ExamNotFound(exam_id.to_string()))?;
        let question_bank = self
            .bank
            .iter()
            .filter(|b| b.subject.is_none() || b.subject == exam.subject)
            .cloned()
            .collect();
        Ok(WizardContext {
            stage_progress: self.progress.get(exam_id).cloned().unwrap_or_default(),
            instructions: self.instructions.get(exam_id).cloned().unwrap_or_default(),
            question_selections: self.selections.get(exam_id).cloned().unwrap_or_default(),
            question_bank,
            exam,
        })
    }

    fn submit_transition(&mut self, payload: &TransitionPayload) -> Result<(), RepoError> {
        if let Some(message) = self.fail_next.take() {
            return Err(RepoError::Rejected(message));
        }
        let actual = self
            .exam_status(&payload.exam_id)
            .ok_or_else(|| RepoError::ExamNotFound(payload.exam_id.clone()))?;
        if actual != payload.current_stage {
            return Err(RepoError::StatusConflict {
                expected: payload.current_stage,
                actual,
            });
        }
        check_transition(payload.current_stage, payload.target_stage).map_err(|_| {
            RepoError::TransitionRejected {
                from: payload.current_stage,
                to: payload.target_stage,
            }
        })?;

        let data = &payload.stage_data;
        let exam_id = payload.exam_id.clone();

        let progress = self.progress.entry(exam_id.clone()).or_default();
        match progress.iter_mut().find(|p| p.stage == payload.target_stage) {
            Some(p) => {
                p.form_data = data.form_data.clone();
                p.notes = data.notes.clone();
                if let Some(done) = data.completed {
                    p.completed = done;
                }
            }
            None => progress.push(StageProgress {
                stage: payload.target_stage,
                form_data: data.form_data.clone(),
                notes: data.notes.clone(),
                completed: data.completed.unwrap_or(false),
                completed_at: None,
            }),
        }

        let mut rows = self.instructions.remove(&exam_id).unwrap_or_default();
        rows.retain(|r| {
            r.id.as_ref()
                .map(|id| !data.removed_instruction_ids.contains(id))
                .unwrap_or(true)
        });
        for upsert in &data.instructions {
            match upsert
                .id
                .as_ref()
                .and_then(|id| rows.iter_mut().find(|r| r.id.as_ref() == Some(id)))
            {
                Some(row) => *row = upsert.clone(),
                None => {
                    let mut row = upsert.clone();
                    row.id = Some(self.fresh_id("ins"));
                    rows.push(row);
                }
            }
        }
        self.instructions.insert(exam_id.clone(), rows);

        let mut selections = Vec::new();
        for s in &data.question_selections.selections {
            selections.push(QuestionSelectionRecord {
                id: Some(s.id.clone().unwrap_or_else(|| self.fresh_id("sel"))),
                source_type: s.source_type,
                question_id: s.question_id.clone(),
                custom_question: s.custom_question.clone(),
                marks: s.marks,
                sequence: s.sequence,
                is_optional: s.is_optional,
            });
        }
        self.selections.insert(exam_id.clone(), selections);

        if let Some(exam) = self.exams.get_mut(&exam_id) {
            exam.status = payload.target_stage;
        }
        self.submissions.push(payload.clone());
        Ok(())
    }
}
