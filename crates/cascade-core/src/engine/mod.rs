//! Stage transition engine: validates and applies stage changes, derives
//! terminal status, and appends immutable transition records.
//!
//! All three operations fail closed: an invalid identifier or stage raises
//! a typed error and performs no partial write. Each call is one
//! transaction covering the item row update and the transition append.

use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::db::Database;
use crate::error::CoreError;
use crate::models::cascade::Cascade;
use crate::models::work::WorkItem;
use crate::store::cascade_store::CascadeStore;
use crate::store::work_store::{insert_transition, row_to_work, work_columns};

#[derive(Clone)]
pub struct TransitionEngine {
    db: Database,
    cascades: CascadeStore,
}

impl TransitionEngine {
    pub fn new(db: Database, cascades: CascadeStore) -> Self {
        Self { db, cascades }
    }

    /// Move a work item to the next stage of its cascade.
    pub async fn advance(
        &self,
        id: &str,
        transitioned_by: &str,
        new_content: Option<String>,
    ) -> Result<WorkItem, CoreError> {
        let (item, cascade) = self.resolve(id).await?;
        let next = cascade
            .next_stage(&item.stage)
            .ok_or_else(|| CoreError::AlreadyTerminal(item.id.clone()))?
            .to_string();
        self.apply(id, &cascade, &next, transitioned_by, new_content, None, None)
            .await
    }

    /// Move a work item to an explicit stage of its cascade.
    pub async fn set_stage(
        &self,
        id: &str,
        new_stage: &str,
        transitioned_by: &str,
        new_content: Option<String>,
    ) -> Result<WorkItem, CoreError> {
        let (_, cascade) = self.resolve(id).await?;
        if !cascade.has_stage(new_stage) {
            return Err(CoreError::InvalidStage {
                cascade: cascade.name.clone(),
                stage: new_stage.to_string(),
            });
        }
        self.apply(id, &cascade, new_stage, transitioned_by, new_content, None, None)
            .await
    }

    /// Force a work item directly to its cascade's terminal stage,
    /// merging any supplied references non-destructively.
    pub async fn done(
        &self,
        id: &str,
        pr_number: Option<i64>,
        output_doc_id: Option<String>,
    ) -> Result<WorkItem, CoreError> {
        let (_, cascade) = self.resolve(id).await?;
        let terminal = cascade.terminal_stage().to_string();
        self.apply(id, &cascade, &terminal, "done", None, pr_number, output_doc_id)
            .await
    }

    async fn resolve(&self, id: &str) -> Result<(WorkItem, Cascade), CoreError> {
        let key = id.to_string();
        let item = self
            .db
            .with_conn_async(move |conn| {
                conn.query_row(
                    &format!("SELECT {} FROM work_items WHERE id = ?1", work_columns()),
                    rusqlite::params![key],
                    row_to_work,
                )
                .optional()
            })
            .await?
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        let cascade = self.cascades.get(&item.cascade).await?;
        Ok((item, cascade))
    }

    /// Apply a validated stage change atomically. The prior stage is read
    /// inside the transaction so the appended transition always chains off
    /// the stage the item actually had.
    #[allow(clippy::too_many_arguments)]
    async fn apply(
        &self,
        id: &str,
        cascade: &Cascade,
        new_stage: &str,
        transitioned_by: &str,
        new_content: Option<String>,
        pr_number: Option<i64>,
        output_doc_id: Option<String>,
    ) -> Result<WorkItem, CoreError> {
        let key = id.to_string();
        let to_stage = new_stage.to_string();
        let by = transitioned_by.to_string();
        let is_terminal = cascade.is_terminal(new_stage);
        let is_heavy = cascade.stage(new_stage).map(|s| s.heavy).unwrap_or(false);
        let now = Utc::now();

        let updated = self
            .db
            .with_tx_async(move |conn| {
                let mut item = conn
                    .query_row(
                        &format!("SELECT {} FROM work_items WHERE id = ?1", work_columns()),
                        rusqlite::params![key],
                        row_to_work,
                    )
                    .optional()
                    .map_err(|e| CoreError::Database(e.to_string()))?
                    .ok_or_else(|| CoreError::NotFound(key.clone()))?;

                let from_stage = item.stage.clone();
                item.stage = to_stage.clone();
                if let Some(content) = &new_content {
                    item.content = content.clone();
                }
                if let Some(pr) = pr_number {
                    item.pr_number = Some(pr);
                }
                if let Some(doc) = &output_doc_id {
                    item.output_doc_id = Some(doc.clone());
                }
                item.updated_at = now;
                if is_heavy && item.started_at.is_none() {
                    item.started_at = Some(now);
                }
                if is_terminal {
                    item.completed_at = Some(now);
                    item.claimed_by = None;
                    item.claimed_at = None;
                }

                conn.execute(
                    "UPDATE work_items SET stage=?2, content=?3, pr_number=?4, output_doc_id=?5, \
                     claimed_by=?6, claimed_at=?7, updated_at=?8, started_at=?9, completed_at=?10 \
                     WHERE id=?1",
                    rusqlite::params![
                        item.id,
                        item.stage,
                        item.content,
                        item.pr_number,
                        item.output_doc_id,
                        item.claimed_by,
                        item.claimed_at.map(|t| t.timestamp_millis()),
                        item.updated_at.timestamp_millis(),
                        item.started_at.map(|t| t.timestamp_millis()),
                        item.completed_at.map(|t| t.timestamp_millis()),
                    ],
                )
                .map_err(|e| CoreError::Database(e.to_string()))?;

                insert_transition(
                    conn,
                    &item.id,
                    Some(&from_stage),
                    &to_stage,
                    &by,
                    new_content.as_deref(),
                    now,
                )?;
                Ok(item)
            })
            .await?;

        tracing::info!(
            id = %updated.id,
            stage = %updated.stage,
            by = %transitioned_by,
            terminal = is_terminal,
            "stage transition applied"
        );
        Ok(updated)
    }
}
