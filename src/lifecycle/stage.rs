use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Draft,
    Planned,
    Scheduled,
    MaterialsReady,
    InProgress,
    Grading,
    Moderation,
    AnalyticsReleased,
    Completed,
    Cancelled,
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::Draft,
        Stage::Planned,
        Stage::Scheduled,
        Stage::MaterialsReady,
        Stage::InProgress,
        Stage::Grading,
        Stage::Moderation,
        Stage::AnalyticsReleased,
        Stage::Completed,
        Stage::Cancelled,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "planned" => Some(Self::Planned),
            "scheduled" => Some(Self::Scheduled),
            "materials_ready" => Some(Self::MaterialsReady),
            "in_progress" => Some(Self::InProgress),
            "grading" => Some(Self::Grading),
            "moderation" => Some(Self::Moderation),
            "analytics_released" => Some(Self::AnalyticsReleased),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Planned => "planned",
            Self::Scheduled => "scheduled",
            Self::MaterialsReady => "materials_ready",
            Self::InProgress => "in_progress",
            Self::Grading => "grading",
            Self::Moderation => "moderation",
            Self::AnalyticsReleased => "analytics_released",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Fixed ordering rank. Only used to classify a move as forward,
    /// backward or lateral; `cancelled` sits after everything else.
    pub fn rank(self) -> u8 {
        match self {
            Self::Draft => 1,
            Self::Planned => 2,
            Self::Scheduled => 3,
            Self::MaterialsReady => 4,
            Self::InProgress => 5,
            Self::Grading => 6,
            Self::Moderation => 7,
            Self::AnalyticsReleased => 8,
            Self::Completed => 9,
            Self::Cancelled => 10,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Checkbox,
    Text,
    Textarea,
    Date,
    Datetime,
    Number,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub key: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

const fn required(key: &'static str, label: &'static str, kind: FieldKind) -> FieldDef {
    FieldDef {
        key,
        label,
        kind,
        required: true,
    }
}

const fn optional(key: &'static str, label: &'static str, kind: FieldKind) -> FieldDef {
    FieldDef {
        key,
        label,
        kind,
        required: false,
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageDefinition {
    pub stage: Stage,
    pub label: &'static str,
    pub description: &'static str,
    pub fields: &'static [FieldDef],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes_field_key: Option<&'static str>,
    pub show_instructions_setup: bool,
    pub show_question_selection: bool,
}

impl StageDefinition {
    pub fn rank(&self) -> u8 {
        self.stage.rank()
    }

    pub fn field(&self, key: &str) -> Option<&'static FieldDef> {
        self.fields.iter().find(|f| f.key == key)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &'static FieldDef> {
        self.fields.iter().filter(|f| f.required)
    }
}

use FieldKind::{Checkbox, Date, Datetime, Number, Text, Textarea};

pub static STAGE_DEFINITIONS: [StageDefinition; 10] = [
    StageDefinition {
        stage: Stage::Draft,
        label: "Draft",
        description: "Exam details are being drafted.",
        fields: &[
            required("detailsConfirmed", "Title, subject and year group confirmed", Checkbox),
            optional("draftNotes", "Notes", Textarea),
        ],
        notes_field_key: Some("draftNotes"),
        show_instructions_setup: false,
        show_question_selection: false,
    },
    StageDefinition {
        stage: Stage::Planned,
        label: "Planned",
        description: "Exam window and papers agreed.",
        fields: &[
            required("proposedWindowStart", "Proposed window start", Date),
            required("papersAssigned", "Papers assigned to setters", Checkbox),
            optional("planningNotes", "Notes", Textarea),
        ],
        notes_field_key: Some("planningNotes"),
        show_instructions_setup: false,
        show_question_selection: false,
    },
    StageDefinition {
        stage: Stage::Scheduled,
        label: "Scheduled",
        description: "Sitting booked with a venue and start time.",
        fields: &[
            required("examStartsAt", "Exam start", Datetime),
            required("venue", "Venue", Text),
            required("venueBooked", "Venue booking confirmed", Checkbox),
            optional("schedulingNotes", "Notes", Textarea),
        ],
        notes_field_key: Some("schedulingNotes"),
        show_instructions_setup: false,
        show_question_selection: false,
    },
    StageDefinition {
        stage: Stage::MaterialsReady,
        label: "Materials ready",
        description: "Papers, instructions and question selection finalised.",
        fields: &[
            required("papersPrinted", "Papers printed", Checkbox),
            required("markSchemeReady", "Mark scheme ready", Checkbox),
            optional("materialsNotes", "Notes", Textarea),
        ],
        notes_field_key: Some("materialsNotes"),
        show_instructions_setup: true,
        show_question_selection: true,
    },
    StageDefinition {
        stage: Stage::InProgress,
        label: "In progress",
        description: "The sitting is under way.",
        fields: &[
            required("invigilatorsBriefed", "Invigilators briefed", Checkbox),
            required("startedAt", "Started at", Datetime),
            optional("progressNotes", "Notes", Textarea),
        ],
        notes_field_key: Some("progressNotes"),
        show_instructions_setup: false,
        show_question_selection: false,
    },
    StageDefinition {
        stage: Stage::Grading,
        label: "Grading",
        description: "Scripts are with markers.",
        fields: &[
            required("markersAssigned", "Markers assigned", Checkbox),
            required("gradingDeadline", "Grading deadline", Date),
            optional("gradingNotes", "Notes", Textarea),
        ],
        notes_field_key: Some("gradingNotes"),
        show_instructions_setup: false,
        show_question_selection: false,
    },
    StageDefinition {
        stage: Stage::Moderation,
        label: "Moderation",
        description: "A sample of marked scripts is moderated.",
        fields: &[
            required("moderatorName", "Moderator", Text),
            required("sampleSize", "Sample size", Number),
            optional("moderationNotes", "Notes", Textarea),
        ],
        notes_field_key: Some("moderationNotes"),
        show_instructions_setup: false,
        show_question_selection: false,
    },
    StageDefinition {
        stage: Stage::AnalyticsReleased,
        label: "Analytics released",
        description: "Results analytics shared with staff.",
        fields: &[
            required("analyticsReviewed", "Analytics reviewed", Checkbox),
            required("releasedOn", "Released on", Date),
            optional("releaseNotes", "Notes", Textarea),
        ],
        notes_field_key: Some("releaseNotes"),
        show_instructions_setup: false,
        show_question_selection: false,
    },
    StageDefinition {
        stage: Stage::Completed,
        label: "Completed",
        description: "Exam closed and results archived.",
        fields: &[
            required("resultsArchived", "Results archived", Checkbox),
            optional("completionNotes", "Notes", Textarea),
        ],
        notes_field_key: Some("completionNotes"),
        show_instructions_setup: false,
        show_question_selection: false,
    },
    StageDefinition {
        stage: Stage::Cancelled,
        label: "Cancelled",
        description: "Exam will not go ahead.",
        fields: &[required("cancellationReason", "Reason for cancellation", Textarea)],
        notes_field_key: Some("cancellationReason"),
        show_instructions_setup: false,
        show_question_selection: false,
    },
];

pub fn definition(stage: Stage) -> Option<&'static StageDefinition> {
    STAGE_DEFINITIONS.iter().find(|d| d.stage == stage)
}
