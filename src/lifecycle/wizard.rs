use super::context::{ExamSummary, WizardContext};
use super::error::{PayloadError, SubmissionFailure};
use super::form::{validate_stage, FieldMap, FieldValue, StageFormState, ValidationOutcome};
use super::instructions::{InstructionPatch, InstructionSetEditor};
use super::payload::{self, PayloadInput, TransitionPayload};
use super::policy::{allowed_stages, check_transition, classify_move, MoveKind};
use super::questions::{CustomQuestion, QuestionBankItem, QuestionSelectionEditor, SelectionNotice};
use super::stage::{self, Stage};
use crate::repository::WizardRepository;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardSettings {
    pub autosave_delay_ms: i64,
    pub default_custom_marks: f64,
    pub fallback_bank_marks: f64,
    pub require_notes_on_backward: bool,
}

impl Default for WizardSettings {
    fn default() -> Self {
        Self {
            autosave_delay_ms: 2000,
            default_custom_marks: 1.0,
            fallback_bank_marks: 1.0,
            require_notes_on_backward: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "message")]
pub enum LoadState {
    Loading,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    ContextUnavailable,
    StageNotAllowed { from: Stage, to: Stage },
    UnknownField { stage: Stage, key: String },
    Selection(SelectionNotice),
    SubmitInFlight,
}

impl Notice {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ContextUnavailable => "context_unavailable",
            Self::StageNotAllowed { .. } => "transition_not_allowed",
            Self::UnknownField { .. } => "unknown_field",
            Self::Selection(SelectionNotice::DuplicateBankQuestion { .. }) => "duplicate_question",
            Self::Selection(SelectionNotice::UnknownBankQuestion { .. }) => "not_found",
            Self::SubmitInFlight => "submit_in_flight",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::ContextUnavailable => "exam details are not loaded; reload the wizard".into(),
            Self::StageNotAllowed { from, to } => {
                format!("cannot move from {} to {}", from, to)
            }
            Self::UnknownField { stage, key } => {
                format!("{} has no field named {}", stage, key)
            }
            Self::Selection(n) => n.message(),
            Self::SubmitInFlight => "a submission is already in progress".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WizardAction {
    ContextLoaded(Box<WizardContext>),
    ContextFailed(String),
    SelectStage(Stage),
    SetField {
        stage: Stage,
        key: String,
        value: FieldValue,
    },
    AddInstruction,
    UpdateInstruction {
        index: usize,
        patch: InstructionPatch,
    },
    RemoveInstruction(usize),
    SelectBankQuestions(Vec<String>),
    AddBankQuestion(String),
    AddCustomQuestion(CustomQuestion),
    EditCustomQuestion {
        index: usize,
        question: CustomQuestion,
    },
    RemoveQuestion(usize),
    ReorderQuestion {
        from: usize,
        to: usize,
    },
    MoveQuestionUp(usize),
    MoveQuestionDown(usize),
    SetQuestionOptional {
        index: usize,
        is_optional: bool,
    },
    SetQuestionMarks {
        index: usize,
        marks: f64,
    },
    SubmitStarted,
    SubmitSucceeded,
    SubmitFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardState {
    exam_id: String,
    load: LoadState,
    exam: Option<ExamSummary>,
    current_stage: Stage,
    target_stage: Stage,
    form: StageFormState,
    instructions: InstructionSetEditor,
    questions: QuestionSelectionEditor,
    question_bank: Vec<QuestionBankItem>,
    submitting: bool,
    #[serde(skip)]
    settings: WizardSettings,
}

impl WizardState {
    pub fn new(exam_id: &str, current_stage: Stage, settings: WizardSettings) -> Self {
        Self {
            exam_id: exam_id.to_string(),
            load: LoadState::Loading,
            exam: None,
            current_stage,
            target_stage: current_stage,
            form: StageFormState::default(),
            instructions: InstructionSetEditor::default(),
            questions: QuestionSelectionEditor::from_persisted(Vec::new(), settings.fallback_bank_marks),
            question_bank: Vec::new(),
            submitting: false,
            settings,
        }
    }

    pub fn exam_id(&self) -> &str {
        &self.exam_id
    }

    pub fn load_state(&self) -> &LoadState {
        &self.load
    }

    pub fn is_ready(&self) -> bool {
        self.load == LoadState::Ready
    }

    #[cfg(test)]
    pub(crate) fn current_stage(&self) -> Stage {
        self.current_stage
    }

    pub fn target_stage(&self) -> Stage {
        self.target_stage
    }

    #[cfg(test)]
    pub(crate) fn form(&self) -> &StageFormState {
        &self.form
    }

    #[cfg(test)]
    pub(crate) fn questions(&self) -> &QuestionSelectionEditor {
        &self.questions
    }

    #[cfg(test)]
    pub(crate) fn is_submitting(&self) -> bool {
        self.submitting
    }

    pub fn settings(&self) -> &WizardSettings {
        &self.settings
    }

    pub fn allowed_stages(&self) -> BTreeSet<Stage> {
        allowed_stages(self.current_stage)
    }

    pub fn move_kind(&self) -> MoveKind {
        classify_move(self.current_stage, self.target_stage)
    }

    fn load_context(&mut self, ctx: WizardContext) {
        self.current_stage = ctx.exam.status;
        self.target_stage = ctx.exam.status;

        let mut form = StageFormState::default();
        for progress in ctx.stage_progress {
            let mut values: FieldMap = progress.form_data;
            if let (Some(def), Some(notes)) = (stage::definition(progress.stage), progress.notes) {
                if let Some(key) = def.notes_field_key {
                    values.insert(key.to_string(), FieldValue::Text(notes));
                }
            }
            form.seed(progress.stage, values);
        }
        self.form = form;

        self.instructions = InstructionSetEditor::from_persisted(ctx.instructions);
        self.questions = QuestionSelectionEditor::from_persisted(
            ctx.question_selections,
            self.settings.fallback_bank_marks,
        );
        self.question_bank = ctx.question_bank;
        self.exam = Some(ctx.exam);
        self.submitting = false;
        self.load = LoadState::Ready;
    }

    /// Validates the target stage checklist and records the errors on the
    /// state so the caller can render them inline.
    pub fn validate(mut self) -> (Self, ValidationOutcome) {
        let mut outcome = validate_stage(
            self.target_stage,
            &self.form,
            &self.instructions,
            &self.questions,
        );
        if self.settings.require_notes_on_backward && self.move_kind() == MoveKind::Backward {
            if let Some(def) = stage::definition(self.target_stage) {
                if let Some(key) = def.notes_field_key {
                    let has_notes = self
                        .form
                        .value(self.target_stage, key)
                        .and_then(FieldValue::as_text)
                        .map(|s| !s.trim().is_empty())
                        .unwrap_or(false);
                    if !has_notes {
                        outcome
                            .errors
                            .insert(key.to_string(), "Explain why the exam is moving back".into());
                        outcome.valid = false;
                    }
                }
            }
        }
        self.form.set_errors(outcome.errors.clone());
        (self, outcome)
    }

    pub fn build_payload(&self) -> Result<TransitionPayload, PayloadError> {
        let exam = if self.is_ready() { self.exam.as_ref() } else { None };
        payload::build(PayloadInput {
            exam,
            current_stage: self.current_stage,
            target_stage: self.target_stage,
            form: &self.form,
            instructions: &self.instructions,
            questions: &self.questions,
        })
    }
}

/// Applies one action. Rejected actions return the state unchanged along
/// with a notice for the user.
pub fn reduce(mut state: WizardState, action: WizardAction) -> (WizardState, Option<Notice>) {
    let action = match action {
        WizardAction::ContextLoaded(ctx) => {
            state.load_context(*ctx);
            return (state, None);
        }
        WizardAction::ContextFailed(message) => {
            state.load = LoadState::Failed(message);
            state.submitting = false;
            return (state, None);
        }
        other => other,
    };
    if !state.is_ready() {
        return (state, Some(Notice::ContextUnavailable));
    }

    match action {
        WizardAction::SelectStage(target) => {
            if let Err(e) = check_transition(state.current_stage, target) {
                warn!(exam_id = %state.exam_id, error = %e, "stage selection rejected");
                let notice = Notice::StageNotAllowed {
                    from: state.current_stage,
                    to: target,
                };
                return (state, Some(notice));
            }
            state.target_stage = target;
            state.form.clear_errors();
        }
        WizardAction::SetField { stage, key, value } => {
            let known = stage::definition(stage)
                .map(|d| d.field(&key).is_some())
                .unwrap_or(false);
            if !known {
                return (state, Some(Notice::UnknownField { stage, key }));
            }
            state.form.set_field(stage, &key, value);
        }
        WizardAction::AddInstruction => state.instructions.add(),
        WizardAction::UpdateInstruction { index, patch } => state.instructions.update(index, patch),
        WizardAction::RemoveInstruction(index) => state.instructions.remove(index),
        WizardAction::SelectBankQuestions(ids) => {
            state.questions.select_bank_questions(&ids, &state.question_bank)
        }
        WizardAction::AddBankQuestion(id) => {
            if let Err(notice) = state.questions.add_bank_question(&id, &state.question_bank) {
                return (state, Some(Notice::Selection(notice)));
            }
        }
        WizardAction::AddCustomQuestion(question) => state.questions.add_custom(question),
        WizardAction::EditCustomQuestion { index, question } => {
            state.questions.edit_custom(index, question)
        }
        WizardAction::RemoveQuestion(index) => state.questions.remove(index),
        WizardAction::ReorderQuestion { from, to } => state.questions.reorder(from, to),
        WizardAction::MoveQuestionUp(index) => state.questions.move_up(index),
        WizardAction::MoveQuestionDown(index) => state.questions.move_down(index),
        WizardAction::SetQuestionOptional { index, is_optional } => {
            state.questions.set_optional(index, is_optional)
        }
        WizardAction::SetQuestionMarks { index, marks } => state.questions.set_marks(index, marks),
        WizardAction::SubmitStarted => {
            if state.submitting {
                return (state, Some(Notice::SubmitInFlight));
            }
            state.submitting = true;
        }
        WizardAction::SubmitSucceeded => {
            state.submitting = false;
            state.current_stage = state.target_stage;
            if let Some(exam) = state.exam.as_mut() {
                exam.status = state.target_stage;
            }
            state.form.clear_errors();
        }
        WizardAction::SubmitFailed => state.submitting = false,
        WizardAction::ContextLoaded(_) | WizardAction::ContextFailed(_) => {}
    }
    (state, None)
}

pub fn open(
    repo: &dyn WizardRepository,
    exam_id: &str,
    current_stage: Stage,
    settings: WizardSettings,
) -> WizardState {
    reload(repo, WizardState::new(exam_id, current_stage, settings))
}

pub fn reload(repo: &dyn WizardRepository, state: WizardState) -> WizardState {
    let action = match repo.load_wizard_context(&state.exam_id) {
        Ok(ctx) => WizardAction::ContextLoaded(Box::new(ctx)),
        Err(e) => {
            warn!(exam_id = %state.exam_id, error = %e, "wizard context load failed");
            WizardAction::ContextFailed(e.to_string())
        }
    };
    reduce(state, action).0
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Submitted(TransitionPayload),
    Rejected(Notice),
    Invalid(ValidationOutcome),
    BuildFailed(PayloadError),
    Failed(SubmissionFailure),
}

/// Runs the full submit sequence: validate, build, send, then refresh the
/// context so the wizard reflects the persisted stage.
pub fn submit(repo: &mut dyn WizardRepository, state: WizardState) -> (WizardState, SubmitOutcome) {
    if !state.is_ready() {
        return (state, SubmitOutcome::Rejected(Notice::ContextUnavailable));
    }
    if state.submitting {
        return (state, SubmitOutcome::Rejected(Notice::SubmitInFlight));
    }

    let (state, validation) = state.validate();
    if !validation.valid {
        return (state, SubmitOutcome::Invalid(validation));
    }

    let payload = match state.build_payload() {
        Ok(p) => p,
        Err(e) => {
            error!(
                exam_id = %state.exam_id,
                current = %state.current_stage,
                target = %state.target_stage,
                error = %e,
                "unable to build transition payload"
            );
            return (state, SubmitOutcome::BuildFailed(e));
        }
    };

    let (state, notice) = reduce(state, WizardAction::SubmitStarted);
    if let Some(n) = notice {
        return (state, SubmitOutcome::Rejected(n));
    }

    match repo.submit_transition(&payload) {
        Ok(()) => {
            info!(
                exam_id = %payload.exam_id,
                from = %payload.current_stage,
                to = %payload.target_stage,
                "exam stage transition submitted"
            );
            let unsaved = state.form.clone();
            let (state, _) = reduce(state, WizardAction::SubmitSucceeded);
            let mut state = reload(&*repo, state);
            if state.is_ready() {
                state.form.keep_unsaved(unsaved, payload.target_stage);
            }
            (state, SubmitOutcome::Submitted(payload))
        }
        Err(e) => {
            let failure = SubmissionFailure::classify(&e.to_string());
            warn!(
                exam_id = %payload.exam_id,
                kind = ?failure.kind,
                error = %e,
                "exam stage transition rejected"
            );
            let (state, _) = reduce(state, WizardAction::SubmitFailed);
            (state, SubmitOutcome::Failed(failure))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::error::SubmissionFailureKind;
    use crate::lifecycle::questions::SourceType;
    use crate::repository::memory::InMemoryRepository;

    fn repo_with_exam(status: Stage) -> InMemoryRepository {
        let mut repo = InMemoryRepository::default();
        repo.insert_exam(ExamSummary {
            id: "exam-1".into(),
            title: "Spring Physics Mock".into(),
            subject: Some("physics".into()),
            status,
        });
        repo.insert_bank_item(QuestionBankItem {
            id: "q1".into(),
            prompt: "State Newton's second law".into(),
            question_type: "short_answer".into(),
            default_marks: Some(2.0),
            subject: Some("physics".into()),
        });
        repo
    }

    fn open_ready(repo: &InMemoryRepository, status: Stage) -> WizardState {
        let state = open(repo, "exam-1", status, WizardSettings::default());
        assert!(state.is_ready(), "load state: {:?}", state.load_state());
        state
    }

    fn apply(state: WizardState, action: WizardAction) -> WizardState {
        let (state, notice) = reduce(state, action);
        assert_eq!(notice, None);
        state
    }

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.into())
    }

    #[test]
    fn stage_selection_follows_policy() {
        let repo = repo_with_exam(Stage::Draft);
        let state = open_ready(&repo, Stage::Draft);
        let (state, notice) = reduce(state, WizardAction::SelectStage(Stage::Grading));
        assert_eq!(
            notice,
            Some(Notice::StageNotAllowed {
                from: Stage::Draft,
                to: Stage::Grading
            })
        );
        assert_eq!(state.target_stage(), Stage::Draft);
        let state = apply(state, WizardAction::SelectStage(Stage::Planned));
        assert_eq!(state.target_stage(), Stage::Planned);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let repo = repo_with_exam(Stage::Draft);
        let state = open_ready(&repo, Stage::Draft);
        let (state, notice) = reduce(
            state,
            WizardAction::SetField {
                stage: Stage::Draft,
                key: "colour".into(),
                value: text("blue"),
            },
        );
        assert_eq!(notice.map(|n| n.code()), Some("unknown_field"));
        assert!(state.form().fields(Stage::Draft).is_none());
    }

    #[test]
    fn edits_are_blocked_until_context_loads() {
        let state = WizardState::new("exam-1", Stage::Draft, WizardSettings::default());
        let (state, notice) = reduce(state, WizardAction::AddInstruction);
        assert_eq!(notice, Some(Notice::ContextUnavailable));
        let (state, notice) = reduce(state, WizardAction::ContextFailed("timeout".into()));
        assert_eq!(notice, None);
        assert_eq!(state.load_state(), &LoadState::Failed("timeout".into()));
        assert_eq!(state.build_payload(), Err(PayloadError::MissingExamContext));
    }

    #[test]
    fn submit_forward_marks_stage_completed_and_refreshes() {
        let mut repo = repo_with_exam(Stage::Draft);
        let state = open_ready(&repo, Stage::Draft);
        let state = apply(state, WizardAction::SelectStage(Stage::Planned));
        let state = apply(
            state,
            WizardAction::SetField {
                stage: Stage::Planned,
                key: "proposedWindowStart".into(),
                value: text("2026-11-02"),
            },
        );
        let state = apply(
            state,
            WizardAction::SetField {
                stage: Stage::Planned,
                key: "papersAssigned".into(),
                value: FieldValue::Bool(true),
            },
        );

        let (state, outcome) = submit(&mut repo, state);
        let SubmitOutcome::Submitted(payload) = outcome else {
            panic!("expected submission, got {:?}", outcome);
        };
        assert_eq!(payload.stage_data.completed, Some(true));
        assert_eq!(state.current_stage(), Stage::Planned);
        assert!(!state.is_submitting());
        assert_eq!(repo.exam_status("exam-1"), Some(Stage::Planned));
        assert_eq!(repo.submissions().len(), 1);
    }

    #[test]
    fn entries_for_other_stages_survive_submit() {
        let mut repo = repo_with_exam(Stage::Draft);
        let state = open_ready(&repo, Stage::Draft);
        let state = apply(
            state,
            WizardAction::SetField {
                stage: Stage::Scheduled,
                key: "venue".into(),
                value: text("Main hall"),
            },
        );
        let state = apply(state, WizardAction::SelectStage(Stage::Planned));
        let state = apply(
            state,
            WizardAction::SetField {
                stage: Stage::Planned,
                key: "proposedWindowStart".into(),
                value: text("2026-11-02"),
            },
        );
        let state = apply(
            state,
            WizardAction::SetField {
                stage: Stage::Planned,
                key: "papersAssigned".into(),
                value: FieldValue::Bool(true),
            },
        );

        let (state, outcome) = submit(&mut repo, state);
        assert!(matches!(outcome, SubmitOutcome::Submitted(_)), "{:?}", outcome);
        assert_eq!(state.current_stage(), Stage::Planned);
        assert_eq!(
            state.form().value(Stage::Scheduled, "venue"),
            Some(&text("Main hall"))
        );
        assert_eq!(
            state.form().value(Stage::Planned, "papersAssigned"),
            Some(&FieldValue::Bool(true))
        );
    }

    #[test]
    fn submit_with_missing_fields_never_reaches_repository() {
        let mut repo = repo_with_exam(Stage::Scheduled);
        let state = open_ready(&repo, Stage::Scheduled);
        let state = apply(state, WizardAction::SelectStage(Stage::Cancelled));
        let (state, outcome) = submit(&mut repo, state);
        let SubmitOutcome::Invalid(validation) = outcome else {
            panic!("expected validation failure");
        };
        assert!(validation.errors.contains_key("cancellationReason"));
        assert!(state.form().errors().contains_key("cancellationReason"));
        assert!(repo.submissions().is_empty());

        let state = apply(
            state,
            WizardAction::SetField {
                stage: Stage::Cancelled,
                key: "cancellationReason".into(),
                value: text("Venue unavailable"),
            },
        );
        assert!(state.form().errors().is_empty());
        let (_, outcome) = submit(&mut repo, state);
        let SubmitOutcome::Submitted(payload) = outcome else {
            panic!("expected submission");
        };
        assert_eq!(payload.reason.as_deref(), Some("Venue unavailable"));
    }

    #[test]
    fn backend_rejection_is_classified_and_wizard_stays_usable() {
        let mut repo = repo_with_exam(Stage::Draft);
        repo.fail_next_submit("new row violates row-level security policy for table exams");
        let state = open_ready(&repo, Stage::Draft);
        let state = apply(state, WizardAction::SelectStage(Stage::Planned));
        let state = apply(
            state,
            WizardAction::SetField {
                stage: Stage::Planned,
                key: "proposedWindowStart".into(),
                value: text("2026-11-02"),
            },
        );
        let state = apply(
            state,
            WizardAction::SetField {
                stage: Stage::Planned,
                key: "papersAssigned".into(),
                value: FieldValue::Bool(true),
            },
        );
        let (state, outcome) = submit(&mut repo, state);
        let SubmitOutcome::Failed(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, SubmissionFailureKind::Permission);
        assert!(!state.is_submitting());
        assert_eq!(state.current_stage(), Stage::Draft);

        let (_, outcome) = submit(&mut repo, state);
        assert!(matches!(outcome, SubmitOutcome::Submitted(_)));
    }

    #[test]
    fn second_submit_while_in_flight_is_rejected() {
        let repo = repo_with_exam(Stage::Draft);
        let state = open_ready(&repo, Stage::Draft);
        let state = apply(state, WizardAction::SubmitStarted);
        let (state, notice) = reduce(state, WizardAction::SubmitStarted);
        assert_eq!(notice, Some(Notice::SubmitInFlight));
        let mut repo = repo;
        let (_, outcome) = submit(&mut repo, state);
        assert_eq!(outcome, SubmitOutcome::Rejected(Notice::SubmitInFlight));
    }

    #[test]
    fn duplicate_bank_question_leaves_single_entry() {
        let repo = repo_with_exam(Stage::Scheduled);
        let state = open_ready(&repo, Stage::Scheduled);
        let state = apply(state, WizardAction::AddBankQuestion("q1".into()));
        let (state, notice) = reduce(state, WizardAction::AddBankQuestion("q1".into()));
        assert_eq!(notice.map(|n| n.code()), Some("duplicate_question"));
        let q1: Vec<_> = state
            .questions()
            .entries()
            .iter()
            .filter(|q| q.source_type == SourceType::Bank && q.question_id.as_deref() == Some("q1"))
            .collect();
        assert_eq!(q1.len(), 1);
    }

    #[test]
    fn persisted_notes_are_restored_into_the_form() {
        let mut repo = repo_with_exam(Stage::Planned);
        repo.insert_progress(
            "exam-1",
            crate::lifecycle::context::StageProgress {
                stage: Stage::Draft,
                form_data: FieldMap::from([("detailsConfirmed".to_string(), FieldValue::Bool(true))]),
                notes: Some("Agreed with HoD".into()),
                completed: true,
                completed_at: None,
            },
        );
        let state = open_ready(&repo, Stage::Planned);
        assert_eq!(
            state.form().value(Stage::Draft, "draftNotes"),
            Some(&text("Agreed with HoD"))
        );
        assert_eq!(
            state.form().value(Stage::Draft, "detailsConfirmed"),
            Some(&FieldValue::Bool(true))
        );
    }

    #[test]
    fn backward_move_can_require_notes() {
        let mut repo = repo_with_exam(Stage::Grading);
        let settings = WizardSettings {
            require_notes_on_backward: true,
            ..WizardSettings::default()
        };
        let state = open(&repo, "exam-1", Stage::Grading, settings);
        let state = apply(state, WizardAction::SelectStage(Stage::InProgress));
        let state = apply(
            state,
            WizardAction::SetField {
                stage: Stage::InProgress,
                key: "invigilatorsBriefed".into(),
                value: FieldValue::Bool(true),
            },
        );
        let state = apply(
            state,
            WizardAction::SetField {
                stage: Stage::InProgress,
                key: "startedAt".into(),
                value: text("2026-11-02T09:00"),
            },
        );
        let (state, outcome) = submit(&mut repo, state);
        let SubmitOutcome::Invalid(v) = outcome else {
            panic!("expected notes to be required");
        };
        assert!(v.errors.contains_key("progressNotes"));

        let state = apply(
            state,
            WizardAction::SetField {
                stage: Stage::InProgress,
                key: "progressNotes".into(),
                value: text("Second sitting for absentees"),
            },
        );
        let (_, outcome) = submit(&mut repo, state);
        let SubmitOutcome::Submitted(payload) = outcome else {
            panic!("expected submission");
        };
        assert_eq!(payload.stage_data.completed, Some(false));
    }
}
