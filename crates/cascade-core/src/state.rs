//! Shared application state bundling the database and stores.

use std::sync::Arc;

use crate::db::Database;
use crate::engine::TransitionEngine;
use crate::store::{CascadeStore, ClaimManager, WorkStore};

/// Shared state accessible by every command/handler.
pub struct AppStateInner {
    pub db: Database,
    pub cascade_store: CascadeStore,
    pub work_store: WorkStore,
    pub claims: ClaimManager,
    pub engine: TransitionEngine,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    pub fn new(db: Database) -> Self {
        let cascade_store = CascadeStore::new(db.clone());
        Self {
            work_store: WorkStore::new(db.clone(), cascade_store.clone()),
            claims: ClaimManager::new(db.clone()),
            engine: TransitionEngine::new(db.clone(), cascade_store.clone()),
            cascade_store,
            db,
        }
    }
}
