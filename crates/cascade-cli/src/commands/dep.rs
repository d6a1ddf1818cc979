//! `cascade dep` — dependency edge commands.

use cascade_core::error::CoreError;
use cascade_core::models::work::DepType;
use cascade_core::state::AppState;

use super::print_model;

pub async fn add(
    state: &AppState,
    work_id: &str,
    depends_on: &str,
    dep_type: &str,
) -> Result<(), CoreError> {
    let dep_type = DepType::parse(dep_type).ok_or_else(|| {
        CoreError::InvalidCascade(format!(
            "unknown dependency type '{}' (expected blocks, related, or discovered-from)",
            dep_type
        ))
    })?;
    let dep = state.work_store.add_dependency(work_id, depends_on, dep_type).await?;
    print_model(&dep);
    Ok(())
}

pub async fn remove(state: &AppState, work_id: &str, depends_on: &str) -> Result<(), CoreError> {
    let removed = state.work_store.remove_dependency(work_id, depends_on).await?;
    print_model(&serde_json::json!({ "removed": removed }));
    Ok(())
}

pub async fn list(state: &AppState, id: &str) -> Result<(), CoreError> {
    let dependencies = state.work_store.get_dependencies(id).await?;
    let dependents = state.work_store.get_dependents(id).await?;
    print_model(&serde_json::json!({
        "dependencies": dependencies,
        "dependents": dependents,
    }));
    Ok(())
}
