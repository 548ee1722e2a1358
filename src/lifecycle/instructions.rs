use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Students,
    Markers,
    Invigilators,
    Teachers,
    Other,
}

impl Audience {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "students" => Some(Self::Students),
            "markers" => Some(Self::Markers),
            "invigilators" => Some(Self::Invigilators),
            "teachers" => Some(Self::Teachers),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Students => "students",
            Self::Markers => "markers",
            Self::Invigilators => "invigilators",
            Self::Teachers => "teachers",
            Self::Other => "other",
        }
    }
}

/// Audiences the editor always offers, in display priority order.
pub const DEFAULT_AUDIENCES: [Audience; 3] =
    [Audience::Students, Audience::Invigilators, Audience::Markers];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub audience: Audience,
    #[serde(default)]
    pub instructions: String,
}

impl InstructionRecord {
    pub fn blank(audience: Audience) -> Self {
        Self {
            id: None,
            audience,
            instructions: String::new(),
        }
    }

    pub fn has_text(&self) -> bool {
        !self.instructions.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstructionPatch {
    pub audience: Option<Audience>,
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionSetEditor {
    entries: Vec<InstructionRecord>,
    removed_ids: Vec<String>,
}

impl Default for InstructionSetEditor {
    fn default() -> Self {
        Self::from_persisted(Vec::new())
    }
}

impl InstructionSetEditor {
    /// Seeds the editor from saved rows: default audiences first in priority
    /// order, then everything else in its original order. Missing defaults get
    /// a blank slot.
    pub fn from_persisted(records: Vec<InstructionRecord>) -> Self {
        let mut remaining: Vec<Option<InstructionRecord>> = records.into_iter().map(Some).collect();
        let mut entries = Vec::with_capacity(remaining.len() + DEFAULT_AUDIENCES.len());

        for audience in DEFAULT_AUDIENCES {
            let pos = remaining
                .iter()
                .position(|r| r.as_ref().map(|r| r.audience) == Some(audience));
            match pos.and_then(|i| remaining[i].take()) {
                Some(rec) => entries.push(rec),
                None => entries.push(InstructionRecord::blank(audience)),
            }
        }
        entries.extend(remaining.into_iter().flatten());

        Self {
            entries,
            removed_ids: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[InstructionRecord] {
        &self.entries
    }

    pub fn removed_ids(&self) -> &[String] {
        &self.removed_ids
    }

    pub fn add(&mut self) {
        self.entries.push(InstructionRecord::blank(Audience::Other));
    }

    pub fn update(&mut self, index: usize, patch: InstructionPatch) {
        let Some(entry) = self.entries.get_mut(index) else {
            return;
        };
        if let Some(audience) = patch.audience {
            entry.audience = audience;
        }
        if let Some(text) = patch.instructions {
            entry.instructions = text;
        }
    }

    pub fn remove(&mut self, index: usize) {
        if index >= self.entries.len() {
            return;
        }
        let removed = self.entries.remove(index);
        if let Some(id) = removed.id {
            if !self.removed_ids.contains(&id) {
                self.removed_ids.push(id);
            }
        }
        if self.entries.is_empty() {
            self.entries.push(InstructionRecord::blank(Audience::Students));
        }
    }

    pub fn has_any_text(&self) -> bool {
        self.entries.iter().any(InstructionRecord::has_text)
    }
}
