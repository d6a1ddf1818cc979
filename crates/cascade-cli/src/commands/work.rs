//! `cascade work` — work item commands.

use cascade_core::error::CoreError;
use cascade_core::models::work::{CreateWorkInput, UpdateWorkInput};
use cascade_core::state::AppState;
use cascade_core::store::ListWorkFilter;

use super::print_model;

#[allow(clippy::too_many_arguments)]
pub async fn add(
    state: &AppState,
    title: &str,
    cascade: &str,
    stage: Option<String>,
    content: Option<String>,
    priority: i64,
    item_type: String,
    parent_id: Option<String>,
    depends_on: Vec<String>,
    project: Option<String>,
    created_by: Option<String>,
) -> Result<(), CoreError> {
    let item = state
        .work_store
        .add(CreateWorkInput {
            title: title.to_string(),
            cascade: cascade.to_string(),
            stage,
            content,
            priority,
            item_type,
            parent_id,
            depends_on,
            project,
            created_by,
        })
        .await?;
    print_model(&item);
    Ok(())
}

pub async fn get(state: &AppState, id: &str) -> Result<(), CoreError> {
    let item = state
        .work_store
        .get(id)
        .await?
        .ok_or_else(|| CoreError::NotFound(id.to_string()))?;
    print_model(&item);
    Ok(())
}

pub async fn list(state: &AppState, filter: ListWorkFilter) -> Result<(), CoreError> {
    let items = state.work_store.list(filter).await?;
    print_model(&items);
    Ok(())
}

pub async fn ready(state: &AppState, filter: ListWorkFilter) -> Result<(), CoreError> {
    let items = state.work_store.ready(filter).await?;
    print_model(&items);
    Ok(())
}

pub async fn advance(
    state: &AppState,
    id: &str,
    by: &str,
    content: Option<String>,
) -> Result<(), CoreError> {
    let item = state.engine.advance(id, by, content).await?;
    print_model(&item);
    Ok(())
}

pub async fn set_stage(
    state: &AppState,
    id: &str,
    stage: &str,
    by: &str,
    content: Option<String>,
) -> Result<(), CoreError> {
    let item = state.engine.set_stage(id, stage, by, content).await?;
    print_model(&item);
    Ok(())
}

pub async fn claim(state: &AppState, id: &str, owner: &str) -> Result<(), CoreError> {
    let item = state.claims.claim(id, owner).await?;
    print_model(&item);
    Ok(())
}

pub async fn release(state: &AppState, id: &str) -> Result<(), CoreError> {
    let item = state.claims.release(id).await?;
    print_model(&item);
    Ok(())
}

pub async fn done(
    state: &AppState,
    id: &str,
    pr_number: Option<i64>,
    output_doc_id: Option<String>,
) -> Result<(), CoreError> {
    let item = state.engine.done(id, pr_number, output_doc_id).await?;
    print_model(&item);
    Ok(())
}

pub async fn update(state: &AppState, id: &str, input: UpdateWorkInput) -> Result<(), CoreError> {
    let item = state.work_store.update(id, input).await?;
    print_model(&item);
    Ok(())
}

pub async fn delete(state: &AppState, id: &str) -> Result<(), CoreError> {
    let deleted = state.work_store.delete(id).await?;
    print_model(&serde_json::json!({ "deleted": deleted }));
    Ok(())
}

pub async fn history(state: &AppState, id: &str) -> Result<(), CoreError> {
    let transitions = state.work_store.get_transitions(id).await?;
    print_model(&transitions);
    Ok(())
}
