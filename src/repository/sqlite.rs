use super::{RepoError, WizardRepository};
use crate::lifecycle::context::{ExamSummary, StageProgress, WizardContext};
use crate::lifecycle::form::FieldMap;
use crate::lifecycle::instructions::{Audience, InstructionRecord};
use crate::lifecycle::payload::TransitionPayload;
use crate::lifecycle::policy::check_transition;
use crate::lifecycle::questions::{
    CustomQuestion, QuestionBankItem, QuestionSelectionRecord, SourceType,
};
use crate::lifecycle::stage::Stage;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn parse_stage(raw: &str) -> Result<Stage, RepoError> {
    Stage::parse(raw).ok_or_else(|| RepoError::Backend(format!("unknown stage in database: {}", raw)))
}

fn source_type_str(t: SourceType) -> &'static str {
    match t {
        SourceType::Bank => "bank",
        SourceType::Custom => "custom",
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryRow {
    pub id: String,
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub reason: Option<String>,
    pub completed: Option<bool>,
    pub changed_at: String,
}

/// SQLite-backed repository over the workspace database.
pub struct SqliteRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn create_exam(&self, title: &str, subject: Option<&str>) -> Result<ExamSummary, RepoError> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO exams(id, title, subject, status, created_at) VALUES(?, ?, ?, ?, ?)",
            params![id, title, subject, Stage::Draft.as_str(), now_ts()],
        )?;
        Ok(ExamSummary {
            id,
            title: title.to_string(),
            subject: subject.map(str::to_string),
            status: Stage::Draft,
        })
    }

    pub fn get_exam(&self, exam_id: &str) -> Result<ExamSummary, RepoError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, title, subject, status FROM exams WHERE id = ?",
                [exam_id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, Option<String>>(2)?,
                        r.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, title, subject, status)) = row else {
            return Err(RepoError::ExamNotFound(exam_id.to_string()));
        };
        Ok(ExamSummary {
            id,
            title,
            subject,
            status: parse_stage(&status)?,
        })
    }

    pub fn list_exams(&self, status: Option<Stage>) -> Result<Vec<ExamSummary>, RepoError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, subject, status FROM exams
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map([status.map(Stage::as_str)], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, title, subject, status)| {
                Ok(ExamSummary {
                    id,
                    title,
                    subject,
                    status: parse_stage(&status)?,
                })
            })
            .collect()
    }

    pub fn status_history(&self, exam_id: &str) -> Result<Vec<StatusHistoryRow>, RepoError> {
        self.get_exam(exam_id)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, from_stage, to_stage, reason, completed, changed_at
             FROM exam_status_history WHERE exam_id = ? ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([exam_id], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get::<_, Option<bool>>(4)?,
                    r.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, from, to, reason, completed, changed_at)| {
                Ok(StatusHistoryRow {
                    id,
                    from_stage: parse_stage(&from)?,
                    to_stage: parse_stage(&to)?,
                    reason,
                    completed,
                    changed_at,
                })
            })
            .collect()
    }

    pub fn create_bank_item(
        &self,
        subject: Option<&str>,
        prompt: &str,
        question_type: &str,
        default_marks: Option<f64>,
    ) -> Result<QuestionBankItem, RepoError> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO question_bank(id, subject, prompt, question_type, default_marks, created_at)
             VALUES(?, ?, ?, ?, ?, ?)",
            params![id, subject, prompt, question_type, default_marks, now_ts()],
        )?;
        Ok(QuestionBankItem {
            id,
            prompt: prompt.to_string(),
            question_type: question_type.to_string(),
            default_marks,
            subject: subject.map(str::to_string),
        })
    }

    /// Bank items for a subject plus the subject-less ones. `None` lists all.
    pub fn list_bank(&self, subject: Option<&str>) -> Result<Vec<QuestionBankItem>, RepoError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, subject, prompt, question_type, default_marks FROM question_bank
             WHERE ?1 IS NULL OR subject IS NULL OR subject = ?1
             ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map([subject], |r| {
                Ok(QuestionBankItem {
                    id: r.get(0)?,
                    subject: r.get(1)?,
                    prompt: r.get(2)?,
                    question_type: r.get(3)?,
                    default_marks: r.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn stage_progress(&self, exam_id: &str) -> Result<Vec<StageProgress>, RepoError> {
        let mut stmt = self.conn.prepare(
            "SELECT stage, form_data, notes, completed, completed_at
             FROM exam_stage_requirements WHERE exam_id = ? ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([exam_id], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, bool>(3)?,
                    r.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = Vec::with_capacity(rows.len());
        for (stage, form_data, notes, completed, completed_at) in rows {
            let form_data: FieldMap = serde_json::from_str(&form_data)?;
            out.push(StageProgress {
                stage: parse_stage(&stage)?,
                form_data,
                notes,
                completed,
                completed_at,
            });
        }
        Ok(out)
    }

    fn instructions(&self, exam_id: &str) -> Result<Vec<InstructionRecord>, RepoError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, audience, instructions FROM exam_instructions
             WHERE exam_id = ? ORDER BY sort_order, id",
        )?;
        let rows = stmt
            .query_map([exam_id], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .map(|(id, audience, instructions)| InstructionRecord {
                id: Some(id),
                audience: Audience::parse(&audience).unwrap_or(Audience::Other),
                instructions,
            })
            .collect())
    }

    fn selections(&self, exam_id: &str) -> Result<Vec<QuestionSelectionRecord>, RepoError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, source_type, question_id, custom_question, marks, sequence, is_optional
             FROM exam_question_selections WHERE exam_id = ? ORDER BY sequence, id",
        )?;
        let rows = stmt
            .query_map([exam_id], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get::<_, f64>(4)?,
                    r.get::<_, i64>(5)?,
                    r.get::<_, bool>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = Vec::with_capacity(rows.len());
        for (id, source, question_id, custom, marks, sequence, is_optional) in rows {
            let source_type = if source == "custom" {
                SourceType::Custom
            } else {
                SourceType::Bank
            };
            let custom_question: Option<CustomQuestion> = match custom {
                Some(raw) => Some(serde_json::from_str(&raw)?),
                None => None,
            };
            out.push(QuestionSelectionRecord {
                id: Some(id),
                source_type,
                question_id,
                custom_question,
                marks,
                sequence: sequence.max(0) as u32,
                is_optional,
            });
        }
        Ok(out)
    }
}

impl WizardRepository for SqliteRepository<'_> {
    fn load_wizard_context(&self, exam_id: &str) -> Result<WizardContext, RepoError> {
        let exam = self.get_exam(exam_id)?;
        Ok(WizardContext {
            stage_progress: self.stage_progress(exam_id)?,
            instructions: self.instructions(exam_id)?,
            question_bank: self.list_bank(exam.subject.as_deref())?,
            question_selections: self.selections(exam_id)?,
            exam,
        })
    }

    fn submit_transition(&mut self, payload: &TransitionPayload) -> Result<(), RepoError> {
        let tx = self.conn.unchecked_transaction()?;
        let exam_id = payload.exam_id.as_str();
        let from = payload.current_stage;
        let to = payload.target_stage;
        let ts = now_ts();

        let actual: Option<String> = tx
            .query_row("SELECT status FROM exams WHERE id = ?", [exam_id], |r| r.get(0))
            .optional()?;
        let Some(actual) = actual else {
            return Err(RepoError::ExamNotFound(exam_id.to_string()));
        };
        let actual = parse_stage(&actual)?;
        if actual != from {
            return Err(RepoError::StatusConflict {
                expected: from,
                actual,
            });
        }
        check_transition(from, to).map_err(|_| RepoError::TransitionRejected { from, to })?;

        let data = &payload.stage_data;
        let form_json = serde_json::to_string(&data.form_data)?;
        let existing: Option<bool> = tx
            .query_row(
                "SELECT completed FROM exam_stage_requirements WHERE exam_id = ? AND stage = ?",
                [exam_id, to.as_str()],
                |r| r.get(0),
            )
            .optional()?;
        match existing {
            Some(_) => {
                tx.execute(
                    "UPDATE exam_stage_requirements
                     SET form_data = ?, notes = ?, updated_at = ?,
                         completed = COALESCE(?, completed),
                         completed_at = CASE
                             WHEN ? IS NULL THEN completed_at
                             WHEN ? THEN ?
                             ELSE NULL
                         END
                     WHERE exam_id = ? AND stage = ?",
                    params![
                        form_json,
                        data.notes,
                        ts,
                        data.completed,
                        data.completed,
                        data.completed,
                        ts,
                        exam_id,
                        to.as_str()
                    ],
                )?;
            }
            None => {
                let completed = data.completed.unwrap_or(false);
                tx.execute(
                    "INSERT INTO exam_stage_requirements(
                        exam_id, stage, form_data, notes, completed, completed_at, updated_at
                     ) VALUES(?, ?, ?, ?, ?, ?, ?)",
                    params![
                        exam_id,
                        to.as_str(),
                        form_json,
                        data.notes,
                        completed,
                        if completed { Some(ts.as_str()) } else { None },
                        ts
                    ],
                )?;
            }
        }

        for id in &data.removed_instruction_ids {
            tx.execute(
                "DELETE FROM exam_instructions WHERE id = ? AND exam_id = ?",
                [id.as_str(), exam_id],
            )?;
        }
        for (idx, ins) in data.instructions.iter().enumerate() {
            let updated = match &ins.id {
                Some(id) => tx.execute(
                    "UPDATE exam_instructions SET audience = ?, instructions = ?, sort_order = ?, updated_at = ?
                     WHERE id = ? AND exam_id = ?",
                    params![ins.audience.as_str(), ins.instructions, idx as i64, ts, id, exam_id],
                )?,
                None => 0,
            };
            if updated == 0 {
                tx.execute(
                    "INSERT INTO exam_instructions(id, exam_id, audience, instructions, sort_order, updated_at)
                     VALUES(?, ?, ?, ?, ?, ?)",
                    params![
                        Uuid::new_v4().to_string(),
                        exam_id,
                        ins.audience.as_str(),
                        ins.instructions,
                        idx as i64,
                        ts
                    ],
                )?;
            }
        }

        // The submitted bundle is the full selection list; rows it leaves out
        // (explicitly removed or filtered as incomplete) are dropped.
        let bundle = &data.question_selections;
        tx.execute(
            "DELETE FROM exam_question_selections WHERE exam_id = ?",
            [exam_id],
        )?;
        for sel in &bundle.selections {
            let custom_json = match &sel.custom_question {
                Some(q) => Some(serde_json::to_string(q)?),
                None => None,
            };
            let id = sel
                .id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            tx.execute(
                "INSERT INTO exam_question_selections(
                    id, exam_id, source_type, question_id, custom_question, marks, sequence, is_optional
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    exam_id,
                    source_type_str(sel.source_type),
                    sel.question_id,
                    custom_json,
                    sel.marks,
                    sel.sequence as i64,
                    sel.is_optional
                ],
            )?;
        }

        tx.execute(
            "UPDATE exams SET status = ?, updated_at = ? WHERE id = ?",
            params![to.as_str(), ts, exam_id],
        )?;
        tx.execute(
            "INSERT INTO exam_status_history(id, exam_id, from_stage, to_stage, reason, completed, changed_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            params![
                Uuid::new_v4().to_string(),
                exam_id,
                from.as_str(),
                to.as_str(),
                payload.reason,
                data.completed,
                ts
            ],
        )?;
        tx.commit()?;
        debug!(exam_id, from = %from, to = %to, "transition persisted");
        Ok(())
    }
}
