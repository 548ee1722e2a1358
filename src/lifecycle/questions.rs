use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Bank,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomQuestion {
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "default_question_type")]
    pub question_type: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub marks: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_key: Option<String>,
}

fn default_question_type() -> String {
    "short_answer".to_string()
}

impl CustomQuestion {
    pub fn has_prompt(&self) -> bool {
        !self.prompt.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionBankItem {
    pub id: String,
    pub prompt: String,
    pub question_type: String,
    pub default_marks: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSelectionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_question: Option<CustomQuestion>,
    pub marks: f64,
    pub sequence: u32,
    #[serde(default)]
    pub is_optional: bool,
}

impl QuestionSelectionRecord {
    /// A bank entry needs a question id; a custom entry needs a prompt.
    pub fn is_valid(&self) -> bool {
        match self.source_type {
            SourceType::Bank => self
                .question_id
                .as_deref()
                .map(|id| !id.trim().is_empty())
                .unwrap_or(false),
            SourceType::Custom => self
                .custom_question
                .as_ref()
                .map(CustomQuestion::has_prompt)
                .unwrap_or(false),
        }
    }

    fn bank_id(&self) -> Option<&str> {
        match self.source_type {
            SourceType::Bank => self.question_id.as_deref(),
            SourceType::Custom => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SelectionNotice {
    DuplicateBankQuestion { question_id: String },
    UnknownBankQuestion { question_id: String },
}

impl SelectionNotice {
    pub fn message(&self) -> String {
        match self {
            Self::DuplicateBankQuestion { question_id } => {
                format!("question {} is already part of this exam", question_id)
            }
            Self::UnknownBankQuestion { question_id } => {
                format!("question {} is not in the question bank", question_id)
            }
        }
    }
}

/// Sorts by current sequence (stable) and renumbers `1..=N`.
pub fn normalize_sequences(mut list: Vec<QuestionSelectionRecord>) -> Vec<QuestionSelectionRecord> {
    list.sort_by_key(|q| q.sequence);
    for (idx, q) in list.iter_mut().enumerate() {
        q.sequence = idx as u32 + 1;
    }
    list
}

fn renumber_in_place(list: &mut [QuestionSelectionRecord]) {
    for (idx, q) in list.iter_mut().enumerate() {
        q.sequence = idx as u32 + 1;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSelectionEditor {
    entries: Vec<QuestionSelectionRecord>,
    removed_ids: Vec<String>,
    selected_bank_ids: BTreeSet<String>,
    #[serde(skip)]
    fallback_marks: f64,
}

impl Default for QuestionSelectionEditor {
    fn default() -> Self {
        Self::from_persisted(Vec::new(), 1.0)
    }
}

impl QuestionSelectionEditor {
    pub fn from_persisted(records: Vec<QuestionSelectionRecord>, fallback_marks: f64) -> Self {
        let entries = normalize_sequences(records);
        let mut editor = Self {
            entries,
            removed_ids: Vec::new(),
            selected_bank_ids: BTreeSet::new(),
            fallback_marks,
        };
        editor.refresh_bank_ids();
        editor
    }

    pub fn entries(&self) -> &[QuestionSelectionRecord] {
        &self.entries
    }

    pub fn removed_ids(&self) -> &[String] {
        &self.removed_ids
    }

    #[cfg(test)]
    pub(crate) fn selected_bank_ids(&self) -> &BTreeSet<String> {
        &self.selected_bank_ids
    }

    pub fn valid_count(&self) -> usize {
        self.entries.iter().filter(|q| q.is_valid()).count()
    }

    fn refresh_bank_ids(&mut self) {
        self.selected_bank_ids = self
            .entries
            .iter()
            .filter_map(|q| q.bank_id().map(str::to_string))
            .collect();
    }

    fn record_removed(&mut self, removed: QuestionSelectionRecord) {
        if let Some(id) = removed.id {
            if !self.removed_ids.contains(&id) {
                self.removed_ids.push(id);
            }
        }
    }

    fn next_sequence(&self) -> u32 {
        self.entries.iter().map(|q| q.sequence).max().unwrap_or(0) + 1
    }

    fn bank_entry(&self, item: &QuestionBankItem, sequence: u32) -> QuestionSelectionRecord {
        QuestionSelectionRecord {
            id: None,
            source_type: SourceType::Bank,
            question_id: Some(item.id.clone()),
            custom_question: None,
            marks: item.default_marks.unwrap_or(self.fallback_marks),
            sequence,
            is_optional: false,
        }
    }

    /// Replaces the set of bank-sourced entries with `ids`. Entries no longer
    /// selected are dropped, new ones are appended in the order given.
    pub fn select_bank_questions(&mut self, ids: &[String], bank: &[QuestionBankItem]) {
        let wanted: BTreeSet<&str> = ids.iter().map(String::as_str).collect();

        let (keep, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|q| q.bank_id().map(|id| wanted.contains(id)).unwrap_or(true));
        self.entries = keep;
        for q in dropped {
            self.record_removed(q);
        }

        let base = self.next_sequence();
        let mut offset = 0;
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for id in ids {
            if !seen.insert(id.as_str())
                || self.entries.iter().any(|q| q.bank_id() == Some(id.as_str()))
            {
                continue;
            }
            let Some(item) = bank.iter().find(|b| &b.id == id) else {
                continue;
            };
            let entry = self.bank_entry(item, base + offset);
            self.entries.push(entry);
            offset += 1;
        }

        self.entries = normalize_sequences(std::mem::take(&mut self.entries));
        self.refresh_bank_ids();
    }

    pub fn add_bank_question(
        &mut self,
        question_id: &str,
        bank: &[QuestionBankItem],
    ) -> Result<(), SelectionNotice> {
        if self.selected_bank_ids.contains(question_id) {
            return Err(SelectionNotice::DuplicateBankQuestion {
                question_id: question_id.to_string(),
            });
        }
        let Some(item) = bank.iter().find(|b| b.id == question_id) else {
            return Err(SelectionNotice::UnknownBankQuestion {
                question_id: question_id.to_string(),
            });
        };
        let entry = self.bank_entry(item, self.next_sequence());
        self.entries.push(entry);
        self.entries = normalize_sequences(std::mem::take(&mut self.entries));
        self.refresh_bank_ids();
        Ok(())
    }

    pub fn add_custom(&mut self, question: CustomQuestion) {
        let entry = QuestionSelectionRecord {
            id: None,
            source_type: SourceType::Custom,
            question_id: None,
            marks: question.marks,
            custom_question: Some(question),
            sequence: self.next_sequence(),
            is_optional: false,
        };
        self.entries.push(entry);
        self.entries = normalize_sequences(std::mem::take(&mut self.entries));
    }

    /// Overwrites the entry at `index` with a custom question, keeping its
    /// persisted id, position and optional flag.
    pub fn edit_custom(&mut self, index: usize, question: CustomQuestion) {
        let Some(entry) = self.entries.get_mut(index) else {
            return;
        };
        entry.source_type = SourceType::Custom;
        entry.question_id = None;
        entry.marks = question.marks;
        entry.custom_question = Some(question);
        self.refresh_bank_ids();
    }

    pub fn remove(&mut self, index: usize) {
        if index >= self.entries.len() {
            return;
        }
        let removed = self.entries.remove(index);
        self.record_removed(removed);
        renumber_in_place(&mut self.entries);
        self.refresh_bank_ids();
    }

    pub fn reorder(&mut self, from: usize, to: usize) {
        let len = self.entries.len();
        if from >= len || to >= len || from == to {
            return;
        }
        let moved = self.entries.remove(from);
        self.entries.insert(to, moved);
        renumber_in_place(&mut self.entries);
    }

    pub fn move_up(&mut self, index: usize) {
        if index > 0 {
            self.reorder(index, index - 1);
        }
    }

    pub fn move_down(&mut self, index: usize) {
        self.reorder(index, index + 1);
    }

    pub fn set_optional(&mut self, index: usize, is_optional: bool) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.is_optional = is_optional;
        }
    }

    pub fn set_marks(&mut self, index: usize, marks: f64) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.marks = marks;
            if let Some(custom) = entry.custom_question.as_mut() {
                custom.marks = marks;
            }
        }
    }
}
