use super::error::TransitionError;
use super::stage::Stage;
use serde::Serialize;
use std::collections::BTreeSet;

/// Outgoing edges per stage, excluding the implicit self edge.
pub fn allowed_transitions(current: Stage) -> &'static [Stage] {
    use Stage::*;
    match current {
        Draft => &[Planned, Cancelled],
        Planned => &[Draft, Scheduled, Cancelled],
        Scheduled => &[Planned, MaterialsReady, InProgress, Cancelled],
        MaterialsReady => &[Scheduled, InProgress, Cancelled],
        InProgress => &[Grading, Cancelled],
        Grading => &[InProgress, Moderation, AnalyticsReleased, Cancelled],
        Moderation => &[Grading, AnalyticsReleased, Cancelled],
        AnalyticsReleased => &[Moderation, Completed, Cancelled],
        Completed | Cancelled => &[],
    }
}

pub fn allowed_stages(current: Stage) -> BTreeSet<Stage> {
    let mut out: BTreeSet<Stage> = allowed_transitions(current).iter().copied().collect();
    out.insert(current);
    out
}

pub fn is_terminal(stage: Stage) -> bool {
    allowed_transitions(stage).is_empty()
}

pub fn check_transition(current: Stage, target: Stage) -> Result<(), TransitionError> {
    if current == target || allowed_transitions(current).contains(&target) {
        Ok(())
    } else {
        Err(TransitionError::NotAllowed {
            from: current,
            to: target,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveKind {
    Forward,
    Lateral,
    Backward,
}

impl MoveKind {
    /// `Some(true)` marks the stage bundle completed, `Some(false)` reopens
    /// it, `None` updates it without touching completion.
    pub fn completion_signal(self) -> Option<bool> {
        match self {
            Self::Forward => Some(true),
            Self::Lateral => None,
            Self::Backward => Some(false),
        }
    }
}

pub fn classify_move(current: Stage, target: Stage) -> MoveKind {
    match target.rank().cmp(&current.rank()) {
        std::cmp::Ordering::Greater => MoveKind::Forward,
        std::cmp::Ordering::Equal => MoveKind::Lateral,
        std::cmp::Ordering::Less => MoveKind::Backward,
    }
}
