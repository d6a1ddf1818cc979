//! Claim manager: exclusive, manually-released ownership of a work item
//! during processing.
//!
//! The claim is the one place correctness depends on atomicity: two patrols
//! may poll the same ready item, and both must not win. `claim` is a single
//! conditional UPDATE checked by affected-row count, never read-then-write.
//! Claims do not expire on their own; `release_expired` is an opt-in
//! reclaim path for claims orphaned by crashed workers.

use chrono::{Duration as ChronoDuration, Utc};
use rusqlite::OptionalExtension;
use std::time::Duration;

use crate::db::Database;
use crate::error::CoreError;
use crate::models::work::WorkItem;
use crate::store::work_store::{row_to_work, work_columns};

#[derive(Clone)]
pub struct ClaimManager {
    db: Database,
}

impl ClaimManager {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Claim a work item for `owner`.
    ///
    /// Fails with `AlreadyClaimed` if a different owner holds the claim.
    /// Re-claiming with the same owner succeeds and refreshes `claimed_at`.
    pub async fn claim(&self, id: &str, owner: &str) -> Result<WorkItem, CoreError> {
        let (key, who) = (id.to_string(), owner.to_string());
        let now = Utc::now();
        self.db
            .with_conn_async(move |conn| {
                let n = conn.execute(
                    "UPDATE work_items SET claimed_by = ?2, claimed_at = ?3 \
                     WHERE id = ?1 AND (claimed_by IS NULL OR claimed_by = ?2)",
                    rusqlite::params![key, who, now.timestamp_millis()],
                )?;
                if n == 1 {
                    let item = conn.query_row(
                        &format!("SELECT {} FROM work_items WHERE id = ?1", work_columns()),
                        rusqlite::params![key],
                        row_to_work,
                    )?;
                    return Ok(Ok(item));
                }
                // Zero rows: either the item is missing or someone else
                // holds the claim. Distinguish for the caller.
                let holder: Option<Option<String>> = conn
                    .query_row(
                        "SELECT claimed_by FROM work_items WHERE id = ?1",
                        rusqlite::params![key],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(match holder {
                    None => Err(CoreError::NotFound(key.clone())),
                    Some(current) => Err(CoreError::AlreadyClaimed {
                        id: key.clone(),
                        owner: current.unwrap_or_default(),
                    }),
                })
            })
            .await?
    }

    /// Unconditionally clear the claim on a work item.
    ///
    /// Release is always permitted regardless of the current holder; the
    /// design trusts callers to release only their own claims.
    pub async fn release(&self, id: &str) -> Result<WorkItem, CoreError> {
        let key = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let n = conn.execute(
                    "UPDATE work_items SET claimed_by = NULL, claimed_at = NULL WHERE id = ?1",
                    rusqlite::params![key],
                )?;
                if n == 0 {
                    return Ok(Err(CoreError::NotFound(key.clone())));
                }
                let item = conn.query_row(
                    &format!("SELECT {} FROM work_items WHERE id = ?1", work_columns()),
                    rusqlite::params![key],
                    row_to_work,
                )?;
                Ok(Ok(item))
            })
            .await?
    }

    /// Reclaim claims older than `ttl`, returning the affected item ids.
    ///
    /// Opt-in: nothing calls this unless a patrol is configured with a
    /// claim TTL. A reclaimed item goes back into the `ready` pool.
    pub async fn release_expired(&self, ttl: Duration) -> Result<Vec<String>, CoreError> {
        let cutoff = Utc::now()
            - ChronoDuration::milliseconds(ttl.as_millis().min(i64::MAX as u128) as i64);
        let cutoff_ms = cutoff.timestamp_millis();
        let reclaimed = self
            .db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id FROM work_items WHERE claimed_by IS NOT NULL AND claimed_at <= ?1",
                )?;
                let ids = stmt
                    .query_map(rusqlite::params![cutoff_ms], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                for id in &ids {
                    conn.execute(
                        "UPDATE work_items SET claimed_by = NULL, claimed_at = NULL \
                         WHERE id = ?1 AND claimed_at <= ?2",
                        rusqlite::params![id, cutoff_ms],
                    )?;
                }
                Ok(ids)
            })
            .await?;
        for id in &reclaimed {
            tracing::warn!(id = %id, "reclaimed expired claim");
        }
        Ok(reclaimed)
    }
}
