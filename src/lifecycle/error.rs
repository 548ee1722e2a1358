use super::stage::Stage;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("transition {from} -> {to} is not allowed")]
    NotAllowed { from: Stage, to: Stage },
}

/// Internal invariant violations while assembling a transition payload.
/// These indicate a programming defect, not user-correctable input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("exam context is not loaded")]
    MissingExamContext,
    #[error("no stage definition for {0}")]
    MissingStageDefinition(Stage),
}

/// Backend submission failure bucketed by message content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionFailureKind {
    Permission,
    Network,
    Validation,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionFailure {
    pub kind: SubmissionFailureKind,
    pub message: String,
    pub raw: String,
}

const GENERIC_SUBMIT_MESSAGE: &str = "Failed to update exam status. Please try again.";

impl SubmissionFailure {
    pub fn classify(raw: &str) -> Self {
        let lower = raw.to_ascii_lowercase();
        let (kind, message) = if lower.contains("permission") || lower.contains("policy") {
            (
                SubmissionFailureKind::Permission,
                "You do not have permission to change this exam's status.".to_string(),
            )
        } else if lower.contains("network")
            || lower.contains("connection")
            || lower.contains("pgrst301")
        {
            (
                SubmissionFailureKind::Network,
                "Could not reach the server. Check your connection and try again.".to_string(),
            )
        } else if lower.contains("validation") {
            (
                SubmissionFailureKind::Validation,
                "The server rejected the stage data. Review the required fields.".to_string(),
            )
        } else if raw.trim().is_empty() {
            (SubmissionFailureKind::Other, GENERIC_SUBMIT_MESSAGE.to_string())
        } else {
            (SubmissionFailureKind::Other, raw.trim().to_string())
        };
        Self {
            kind,
            message,
            raw: raw.to_string(),
        }
    }
}
