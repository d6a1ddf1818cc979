//! Cascade registry: read-mostly pipeline definitions with a TTL cache.
//!
//! Cascade definitions are consulted on nearly every work-item operation
//! (next-stage and terminal checks) but change rarely, so reads are served
//! from a whole-table in-memory cache with a fixed TTL. Any write
//! invalidates the cache. The cache is owned by the store instance, not
//! process-global.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};

use crate::db::Database;
use crate::error::CoreError;
use crate::models::cascade::{Cascade, CreateCascadeInput, Stage};

/// Default cache TTL for cascade definitions.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Cascade>,
    loaded_at: Option<Instant>,
}

#[derive(Clone)]
pub struct CascadeStore {
    db: Database,
    cache: Arc<Mutex<CacheState>>,
    ttl: Duration,
}

impl CascadeStore {
    pub fn new(db: Database) -> Self {
        Self::with_ttl(db, DEFAULT_CACHE_TTL)
    }

    /// Create a store with an explicit cache TTL (tests use short TTLs).
    pub fn with_ttl(db: Database, ttl: Duration) -> Self {
        Self {
            db,
            cache: Arc::new(Mutex::new(CacheState::default())),
            ttl,
        }
    }

    /// Drop the cached definitions; the next read reloads from the store.
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.entries.clear();
            cache.loaded_at = None;
        }
    }

    /// Look up a cascade by name.
    pub async fn get(&self, name: &str) -> Result<Cascade, CoreError> {
        self.snapshot()
            .await?
            .remove(name)
            .ok_or_else(|| CoreError::UnknownCascade(name.to_string()))
    }

    /// All cascades, ordered by name.
    pub async fn list(&self) -> Result<Vec<Cascade>, CoreError> {
        let map = self.snapshot().await?;
        let mut all: Vec<Cascade> = map.into_values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    /// Create a new cascade definition.
    pub async fn create(&self, input: CreateCascadeInput) -> Result<Cascade, CoreError> {
        if input.stages.is_empty() {
            return Err(CoreError::InvalidCascade(format!(
                "cascade '{}' must have at least one stage",
                input.name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for stage in &input.stages {
            if !seen.insert(stage.name.as_str()) {
                return Err(CoreError::InvalidCascade(format!(
                    "cascade '{}' has duplicate stage '{}'",
                    input.name, stage.name
                )));
            }
        }

        let now = Utc::now();
        let cascade = Cascade {
            name: input.name,
            description: input.description,
            stages: input.stages,
            created_at: now,
            updated_at: now,
        };

        let row = cascade.clone();
        let stages_json = serde_json::to_string(&row.stages)
            .map_err(|e| CoreError::Database(format!("Failed to encode stages: {}", e)))?;
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO cascades (name, description, stages, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        row.name,
                        row.description,
                        stages_json,
                        row.created_at.timestamp_millis(),
                        row.updated_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| match e {
                CoreError::Database(msg) if msg.contains("UNIQUE constraint failed") => {
                    CoreError::DuplicateCascade(cascade.name.clone())
                }
                other => other,
            })?;

        self.invalidate();
        tracing::info!(cascade = %cascade.name, stages = cascade.stages.len(), "cascade created");
        Ok(cascade)
    }

    /// Delete a cascade definition. Returns false if it did not exist.
    pub async fn delete(&self, name: &str) -> Result<bool, CoreError> {
        let key = name.to_string();
        let deleted = self
            .db
            .with_conn_async(move |conn| {
                let n = conn.execute("DELETE FROM cascades WHERE name = ?1", rusqlite::params![key])?;
                Ok(n > 0)
            })
            .await?;
        self.invalidate();
        Ok(deleted)
    }

    /// A fresh copy of the full cascade map, via the cache when warm.
    async fn snapshot(&self) -> Result<HashMap<String, Cascade>, CoreError> {
        {
            let cache = self
                .cache
                .lock()
                .map_err(|e| CoreError::Database(format!("Cache lock poisoned: {}", e)))?;
            if let Some(at) = cache.loaded_at {
                if at.elapsed() < self.ttl {
                    return Ok(cache.entries.clone());
                }
            }
        }

        let entries = load_all(&self.db).await?;
        let mut cache = self
            .cache
            .lock()
            .map_err(|e| CoreError::Database(format!("Cache lock poisoned: {}", e)))?;
        cache.entries = entries.clone();
        cache.loaded_at = Some(Instant::now());
        Ok(entries)
    }
}

async fn load_all(db: &Database) -> Result<HashMap<String, Cascade>, CoreError> {
    db.with_conn_async(|conn| {
        let mut stmt = conn
            .prepare("SELECT name, description, stages, created_at, updated_at FROM cascades")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut map = HashMap::new();
        for (name, description, stages_json, created, updated) in rows {
            let stages: Vec<Stage> = serde_json::from_str(&stages_json).unwrap_or_default();
            let to_dt = |ms: i64| Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now);
            map.insert(
                name.clone(),
                Cascade {
                    name,
                    description,
                    stages,
                    created_at: to_dt(created),
                    updated_at: to_dt(updated),
                },
            );
        }
        Ok(map)
    })
    .await
}
