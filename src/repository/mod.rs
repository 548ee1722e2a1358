#[cfg(test)]
pub mod memory;
mod sqlite;

use crate::lifecycle::context::WizardContext;
use crate::lifecycle::payload::TransitionPayload;
use crate::lifecycle::stage::Stage;

pub use sqlite::SqliteRepository;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("exam not found: {0}")]
    ExamNotFound(String),

    /// The exam moved on since the wizard loaded it.
    #[error("exam status changed since the wizard opened (expected {expected}, found {actual})")]
    StatusConflict { expected: Stage, actual: Stage },

    #[error("lifecycle does not allow {from} -> {to}")]
    TransitionRejected { from: Stage, to: Stage },

    /// Message passed through verbatim from the backend.
    #[error("{0}")]
    Rejected(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for RepoError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            // Constraint failures mean the data was refused, not that storage broke.
            rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation => {
                RepoError::Rejected(e.to_string())
            }
            _ => RepoError::Backend(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(e: serde_json::Error) -> Self {
        RepoError::Backend(e.to_string())
    }
}

/// Persistence boundary of the lifecycle wizard.
pub trait WizardRepository {
    /// Exam, stage progress, instructions, question bank and current
    /// question selections for one exam.
    fn load_wizard_context(&self, exam_id: &str) -> Result<WizardContext, RepoError>;

    /// Applies a transition atomically: either everything in the payload is
    /// persisted or nothing is.
    fn submit_transition(&mut self, payload: &TransitionPayload) -> Result<(), RepoError>;
}
