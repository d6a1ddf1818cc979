//! `cascade cascade` — pipeline definition commands.

use cascade_core::error::CoreError;
use cascade_core::models::cascade::{CreateCascadeInput, Stage};
use cascade_core::state::AppState;

use super::print_model;

/// Build stage definitions from the CLI's flat flags: an ordered stage
/// list, `stage=text` processor assignments, and heavy-stage names.
pub fn build_stages(
    stages: &[String],
    processors: &[(String, String)],
    heavy: &[String],
) -> Result<Vec<Stage>, CoreError> {
    let mut out = Vec::with_capacity(stages.len());
    for name in stages {
        let mut stage = Stage::new(name.clone());
        if let Some((_, text)) = processors.iter().find(|(s, _)| s == name) {
            stage.processor = Some(text.clone());
        }
        if heavy.contains(name) {
            stage.heavy = true;
        }
        out.push(stage);
    }
    for (name, _) in processors {
        if !stages.contains(name) {
            return Err(CoreError::InvalidCascade(format!(
                "processor assigned to unknown stage '{}'",
                name
            )));
        }
    }
    for name in heavy {
        if !stages.contains(name) {
            return Err(CoreError::InvalidCascade(format!(
                "heavy flag on unknown stage '{}'",
                name
            )));
        }
    }
    Ok(out)
}

pub async fn create(
    state: &AppState,
    name: &str,
    stages: Vec<Stage>,
    description: String,
) -> Result<(), CoreError> {
    let cascade = state
        .cascade_store
        .create(CreateCascadeInput {
            name: name.to_string(),
            stages,
            description,
        })
        .await?;
    print_model(&cascade);
    Ok(())
}

pub async fn list(state: &AppState) -> Result<(), CoreError> {
    let cascades = state.cascade_store.list().await?;
    print_model(&cascades);
    Ok(())
}

pub async fn show(state: &AppState, name: &str) -> Result<(), CoreError> {
    let cascade = state.cascade_store.get(name).await?;
    print_model(&cascade);
    Ok(())
}

pub async fn delete(state: &AppState, name: &str) -> Result<(), CoreError> {
    let deleted = state.cascade_store.delete(name).await?;
    print_model(&serde_json::json!({ "deleted": deleted }));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_stages_assignments() {
        let stages = vec!["idea".to_string(), "implementing".to_string()];
        let processors = vec![("implementing".to_string(), "Build it.".to_string())];
        let heavy = vec!["implementing".to_string()];

        let built = build_stages(&stages, &processors, &heavy).unwrap();
        assert_eq!(built.len(), 2);
        assert!(built[0].processor.is_none());
        assert!(!built[0].heavy);
        assert_eq!(built[1].processor.as_deref(), Some("Build it."));
        assert!(built[1].heavy);
    }

    #[test]
    fn test_build_stages_rejects_unknown_names() {
        let stages = vec!["idea".to_string()];
        assert!(build_stages(
            &stages,
            &[("missing".to_string(), "x".to_string())],
            &[]
        )
        .is_err());
        assert!(build_stages(&stages, &[], &["missing".to_string()]).is_err());
    }
}
