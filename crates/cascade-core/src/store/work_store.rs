//! Work item store: CRUD, dependency edges, transition history, and the
//! readiness query the patrol runner polls.
//!
//! Readiness and blocked-set computation load the cascade table inside the
//! same connection closure as the item query, so one lock acquisition sees
//! a consistent view of items and pipeline definitions.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::db::Database;
use crate::error::CoreError;
use crate::models::work::{
    generate_work_id, CreateWorkInput, DepType, UpdateWorkInput, WorkDep, WorkItem, WorkTransition,
};
use crate::store::cascade_store::CascadeStore;

pub const DEFAULT_LIST_LIMIT: usize = 50;

const WORK_COLUMNS: &str = "id, title, content, cascade, stage, priority, item_type, parent_id, \
     project, pr_number, output_doc_id, claimed_by, claimed_at, created_at, updated_at, \
     started_at, completed_at";

/// Filter for `list` and `ready`.
#[derive(Debug, Clone)]
pub struct ListWorkFilter {
    pub cascade: Option<String>,
    pub stage: Option<String>,
    pub project: Option<String>,
    pub include_done: bool,
    pub limit: usize,
}

impl Default for ListWorkFilter {
    fn default() -> Self {
        Self {
            cascade: None,
            stage: None,
            project: None,
            include_done: false,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

#[derive(Clone)]
pub struct WorkStore {
    db: Database,
    cascades: CascadeStore,
}

impl WorkStore {
    pub fn new(db: Database, cascades: CascadeStore) -> Self {
        Self { db, cascades }
    }

    /// Create a work item in its cascade's first stage (or an explicit
    /// valid stage), writing the initial transition and one `blocks` edge
    /// per `depends_on` entry in a single transaction.
    pub async fn add(&self, input: CreateWorkInput) -> Result<WorkItem, CoreError> {
        let cascade = self.cascades.get(&input.cascade).await?;
        let stage = match input.stage {
            Some(s) => {
                if !cascade.has_stage(&s) {
                    return Err(CoreError::InvalidStage {
                        cascade: cascade.name.clone(),
                        stage: s,
                    });
                }
                s
            }
            None => cascade.first_stage().to_string(),
        };

        let now = Utc::now();
        // An item created directly in the terminal stage is born complete.
        let completed_at = if cascade.is_terminal(&stage) {
            Some(now)
        } else {
            None
        };
        let item = WorkItem {
            id: generate_work_id(&input.title, now),
            title: input.title,
            content: input.content.unwrap_or_default(),
            cascade: cascade.name.clone(),
            stage,
            priority: input.priority,
            item_type: input.item_type,
            parent_id: input.parent_id,
            project: input.project,
            pr_number: None,
            output_doc_id: None,
            claimed_by: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at,
            is_blocked: false,
            blocked_by: Vec::new(),
        };

        let created_by = input.created_by.unwrap_or_else(|| "created".to_string());
        let depends_on = input.depends_on;
        let mut row = item.clone();
        let stored = self
            .db
            .with_tx_async(move |conn| {
                // Same-title items created in the same millisecond would
                // collide; disambiguate with a numeric suffix.
                let base_id = row.id.clone();
                let mut n = 1;
                while id_exists(conn, &row.id)? {
                    n += 1;
                    row.id = format!("{}-{}", base_id, n);
                }

                conn.execute(
                    "INSERT INTO work_items (id, title, content, cascade, stage, priority, \
                     item_type, parent_id, project, created_at, updated_at, completed_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    rusqlite::params![
                        row.id,
                        row.title,
                        row.content,
                        row.cascade,
                        row.stage,
                        row.priority,
                        row.item_type,
                        row.parent_id,
                        row.project,
                        row.created_at.timestamp_millis(),
                        row.updated_at.timestamp_millis(),
                        row.completed_at.map(|t| t.timestamp_millis()),
                    ],
                )
                .map_err(db_err)?;

                insert_transition(conn, &row.id, None, &row.stage, &created_by, None, now)?;

                for target in &depends_on {
                    upsert_dep(conn, &row.id, target, DepType::Blocks, now)?;
                }
                Ok(row)
            })
            .await?;

        tracing::info!(id = %stored.id, cascade = %stored.cascade, stage = %stored.stage, "work item created");
        Ok(stored)
    }

    /// Fetch one work item with its derived blocking fields.
    pub async fn get(&self, id: &str) -> Result<Option<WorkItem>, CoreError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let item = conn
                    .query_row(
                        &format!("SELECT {} FROM work_items WHERE id = ?1", WORK_COLUMNS),
                        rusqlite::params![id],
                        row_to_work,
                    )
                    .optional()?;
                match item {
                    None => Ok(None),
                    Some(mut item) => {
                        let terminals = terminal_stages(conn)?;
                        item.blocked_by = blocking_ids(conn, &item.id, &terminals)?;
                        item.is_blocked = !item.blocked_by.is_empty();
                        Ok(Some(item))
                    }
                }
            })
            .await
    }

    /// List work items ordered by `(priority ASC, created_at ASC)`.
    /// Terminal-stage items are excluded unless `include_done`.
    pub async fn list(&self, filter: ListWorkFilter) -> Result<Vec<WorkItem>, CoreError> {
        self.query(filter, false).await
    }

    /// Like `list`, but additionally excludes claimed items and items with
    /// an unresolved `blocks` edge. This is the patrol poll query; it never
    /// returns an item whose processing would violate the blocking
    /// invariant.
    pub async fn ready(&self, filter: ListWorkFilter) -> Result<Vec<WorkItem>, CoreError> {
        self.query(filter, true).await
    }

    async fn query(&self, filter: ListWorkFilter, ready_only: bool) -> Result<Vec<WorkItem>, CoreError> {
        self.db
            .with_conn_async(move |conn| {
                let terminals = terminal_stages(conn)?;

                let mut sql = format!("SELECT {} FROM work_items WHERE 1=1", WORK_COLUMNS);
                let mut params: Vec<String> = Vec::new();
                if let Some(cascade) = &filter.cascade {
                    sql.push_str(&format!(" AND cascade = ?{}", params.len() + 1));
                    params.push(cascade.clone());
                }
                if let Some(stage) = &filter.stage {
                    sql.push_str(&format!(" AND stage = ?{}", params.len() + 1));
                    params.push(stage.clone());
                }
                if let Some(project) = &filter.project {
                    sql.push_str(&format!(" AND project = ?{}", params.len() + 1));
                    params.push(project.clone());
                }
                if ready_only {
                    sql.push_str(" AND claimed_by IS NULL");
                }
                // rowid breaks created_at ties in insertion order (FIFO).
                sql.push_str(" ORDER BY priority ASC, created_at ASC, rowid ASC");

                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(params.iter()), row_to_work)?
                    .collect::<Result<Vec<_>, _>>()?;

                let include_done = filter.include_done && !ready_only;
                let mut out = Vec::new();
                for mut item in rows {
                    let terminal = terminals.get(&item.cascade);
                    let is_done = terminal.map(|t| t == &item.stage).unwrap_or(false);
                    if is_done && !include_done {
                        continue;
                    }
                    item.blocked_by = blocking_ids(conn, &item.id, &terminals)?;
                    item.is_blocked = !item.blocked_by.is_empty();
                    if ready_only && item.is_blocked {
                        continue;
                    }
                    out.push(item);
                    if out.len() >= filter.limit {
                        break;
                    }
                }
                Ok(out)
            })
            .await
    }

    /// Upsert a dependency edge. At most one edge per `(work_id, depends_on)`
    /// pair; a repeat insert overwrites the edge type.
    pub async fn add_dependency(
        &self,
        work_id: &str,
        depends_on: &str,
        dep_type: DepType,
    ) -> Result<WorkDep, CoreError> {
        let (work_id, depends_on) = (work_id.to_string(), depends_on.to_string());
        let now = Utc::now();
        self.db
            .with_tx_async(move |conn| {
                if !id_exists(conn, &work_id)? {
                    return Err(CoreError::NotFound(work_id));
                }
                if !id_exists(conn, &depends_on)? {
                    return Err(CoreError::NotFound(depends_on));
                }
                upsert_dep(conn, &work_id, &depends_on, dep_type, now)?;
                Ok(WorkDep {
                    work_id,
                    depends_on,
                    dep_type,
                    created_at: now,
                })
            })
            .await
    }

    pub async fn remove_dependency(&self, work_id: &str, depends_on: &str) -> Result<bool, CoreError> {
        let (work_id, depends_on) = (work_id.to_string(), depends_on.to_string());
        self.db
            .with_conn_async(move |conn| {
                let n = conn.execute(
                    "DELETE FROM work_deps WHERE work_id = ?1 AND depends_on = ?2",
                    rusqlite::params![work_id, depends_on],
                )?;
                Ok(n > 0)
            })
            .await
    }

    /// Edges going out of `id` (what it depends on).
    pub async fn get_dependencies(&self, id: &str) -> Result<Vec<WorkDep>, CoreError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                dep_query(
                    conn,
                    "SELECT work_id, depends_on, dep_type, created_at FROM work_deps \
                     WHERE work_id = ?1 ORDER BY created_at ASC",
                    &id,
                )
            })
            .await
    }

    /// Edges pointing at `id` (who depends on it).
    pub async fn get_dependents(&self, id: &str) -> Result<Vec<WorkDep>, CoreError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                dep_query(
                    conn,
                    "SELECT work_id, depends_on, dep_type, created_at FROM work_deps \
                     WHERE depends_on = ?1 ORDER BY created_at ASC",
                    &id,
                )
            })
            .await
    }

    /// Patch mutable fields; `None` fields are left unchanged. Always bumps
    /// `updated_at`.
    pub async fn update(&self, id: &str, input: UpdateWorkInput) -> Result<WorkItem, CoreError> {
        let key = id.to_string();
        let now = Utc::now();
        self.db
            .with_tx_async(move |conn| {
                let mut item = conn
                    .query_row(
                        &format!("SELECT {} FROM work_items WHERE id = ?1", WORK_COLUMNS),
                        rusqlite::params![key],
                        row_to_work,
                    )
                    .optional()
                    .map_err(db_err)?
                    .ok_or_else(|| CoreError::NotFound(key.clone()))?;

                if let Some(v) = input.title {
                    item.title = v;
                }
                if let Some(v) = input.content {
                    item.content = v;
                }
                if let Some(v) = input.priority {
                    item.priority = v;
                }
                if let Some(v) = input.item_type {
                    item.item_type = v;
                }
                if let Some(v) = input.project {
                    item.project = Some(v);
                }
                if let Some(v) = input.pr_number {
                    item.pr_number = Some(v);
                }
                if let Some(v) = input.output_doc_id {
                    item.output_doc_id = Some(v);
                }
                item.updated_at = now;

                conn.execute(
                    "UPDATE work_items SET title=?2, content=?3, priority=?4, item_type=?5, \
                     project=?6, pr_number=?7, output_doc_id=?8, updated_at=?9 WHERE id=?1",
                    rusqlite::params![
                        item.id,
                        item.title,
                        item.content,
                        item.priority,
                        item.item_type,
                        item.project,
                        item.pr_number,
                        item.output_doc_id,
                        item.updated_at.timestamp_millis(),
                    ],
                )
                .map_err(db_err)?;
                Ok(item)
            })
            .await
    }

    /// Delete a work item and its dependency edges in both directions.
    /// Transition history is retained.
    pub async fn delete(&self, id: &str) -> Result<bool, CoreError> {
        let key = id.to_string();
        let deleted = self
            .db
            .with_tx_async(move |conn| {
                conn.execute(
                    "DELETE FROM work_deps WHERE work_id = ?1 OR depends_on = ?1",
                    rusqlite::params![key],
                )
                .map_err(db_err)?;
                let n = conn
                    .execute("DELETE FROM work_items WHERE id = ?1", rusqlite::params![key])
                    .map_err(db_err)?;
                Ok(n > 0)
            })
            .await?;
        if deleted {
            tracing::info!(id = %id, "work item deleted");
        }
        Ok(deleted)
    }

    /// Full ordered transition history for a work item.
    pub async fn get_transitions(&self, id: &str) -> Result<Vec<WorkTransition>, CoreError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, work_id, from_stage, to_stage, transitioned_by, content_snapshot, \
                     created_at FROM work_transitions WHERE work_id = ?1 ORDER BY id ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![id], |row| {
                        Ok(WorkTransition {
                            id: row.get(0)?,
                            work_id: row.get(1)?,
                            from_stage: row.get(2)?,
                            to_stage: row.get(3)?,
                            transitioned_by: row.get(4)?,
                            content_snapshot: row.get(5)?,
                            created_at: to_datetime(row.get(6)?),
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }
}

// ─── Row helpers shared with the transition engine and claim manager ──────

pub(crate) fn row_to_work(row: &rusqlite::Row<'_>) -> Result<WorkItem, rusqlite::Error> {
    let to_dt = |ms: Option<i64>| ms.and_then(|v| Utc.timestamp_millis_opt(v).single());
    Ok(WorkItem {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        cascade: row.get(3)?,
        stage: row.get(4)?,
        priority: row.get(5)?,
        item_type: row.get(6)?,
        parent_id: row.get(7)?,
        project: row.get(8)?,
        pr_number: row.get(9)?,
        output_doc_id: row.get(10)?,
        claimed_by: row.get(11)?,
        claimed_at: to_dt(row.get(12)?),
        created_at: to_datetime(row.get(13)?),
        updated_at: to_datetime(row.get(14)?),
        started_at: to_dt(row.get(15)?),
        completed_at: to_dt(row.get(16)?),
        is_blocked: false,
        blocked_by: Vec::new(),
    })
}

pub(crate) fn work_columns() -> &'static str {
    WORK_COLUMNS
}

fn to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn db_err(e: rusqlite::Error) -> CoreError {
    CoreError::Database(e.to_string())
}

fn id_exists(conn: &Connection, id: &str) -> Result<bool, CoreError> {
    conn.query_row(
        "SELECT 1 FROM work_items WHERE id = ?1",
        rusqlite::params![id],
        |_| Ok(()),
    )
    .optional()
    .map(|o| o.is_some())
    .map_err(db_err)
}

pub(crate) fn insert_transition(
    conn: &Connection,
    work_id: &str,
    from_stage: Option<&str>,
    to_stage: &str,
    transitioned_by: &str,
    content_snapshot: Option<&str>,
    at: DateTime<Utc>,
) -> Result<(), CoreError> {
    conn.execute(
        "INSERT INTO work_transitions (work_id, from_stage, to_stage, transitioned_by, \
         content_snapshot, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            work_id,
            from_stage,
            to_stage,
            transitioned_by,
            content_snapshot,
            at.timestamp_millis()
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn upsert_dep(
    conn: &Connection,
    work_id: &str,
    depends_on: &str,
    dep_type: DepType,
    at: DateTime<Utc>,
) -> Result<(), CoreError> {
    conn.execute(
        "INSERT INTO work_deps (work_id, depends_on, dep_type, created_at) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(work_id, depends_on) DO UPDATE SET dep_type = excluded.dep_type",
        rusqlite::params![work_id, depends_on, dep_type.as_str(), at.timestamp_millis()],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Map of cascade name to terminal stage name.
fn terminal_stages(conn: &Connection) -> Result<HashMap<String, String>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT name, stages FROM cascades")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut map = HashMap::new();
    for (name, stages_json) in rows {
        let stages: Vec<crate::models::cascade::Stage> =
            serde_json::from_str(&stages_json).unwrap_or_default();
        if let Some(last) = stages.last() {
            map.insert(name, last.name.clone());
        }
    }
    Ok(map)
}

/// Ids of `blocks` targets of `id` that have not reached their cascade's
/// terminal stage. Dangling edges (target deleted) do not block.
fn blocking_ids(
    conn: &Connection,
    id: &str,
    terminals: &HashMap<String, String>,
) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT w.id, w.stage, w.cascade FROM work_deps d \
         JOIN work_items w ON w.id = d.depends_on \
         WHERE d.work_id = ?1 AND d.dep_type = 'blocks'",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut blocked_by = Vec::new();
    for (dep_id, stage, cascade) in rows {
        let done = terminals.get(&cascade).map(|t| t == &stage).unwrap_or(false);
        if !done {
            blocked_by.push(dep_id);
        }
    }
    Ok(blocked_by)
}

fn dep_query(conn: &Connection, sql: &str, id: &str) -> Result<Vec<WorkDep>, rusqlite::Error> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(rusqlite::params![id], |row| {
            Ok(WorkDep {
                work_id: row.get(0)?,
                depends_on: row.get(1)?,
                dep_type: DepType::parse(&row.get::<_, String>(2)?).unwrap_or(DepType::Related),
                created_at: to_datetime(row.get(3)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
