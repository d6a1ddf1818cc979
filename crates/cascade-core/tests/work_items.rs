//! Integration tests for the work item store, transition engine, and claim
//! manager, exercising the same code paths as the CLI against in-memory
//! SQLite databases for isolation.

use std::sync::Arc;
use std::time::Duration;

use cascade_core::error::CoreError;
use cascade_core::models::cascade::{CreateCascadeInput, Stage};
use cascade_core::models::work::{CreateWorkInput, DepType, UpdateWorkInput};
use cascade_core::state::{AppState, AppStateInner};
use cascade_core::store::ListWorkFilter;
use cascade_core::Database;

async fn test_state() -> AppState {
    let db = Database::open_in_memory().expect("Failed to open in-memory database");
    let state: AppState = Arc::new(AppStateInner::new(db));
    state
        .cascade_store
        .create(CreateCascadeInput {
            name: "default".to_string(),
            stages: vec![
                Stage::new("idea"),
                Stage::new("planned"),
                Stage::new("implementing").heavy(),
                Stage::new("done"),
            ],
            description: "default pipeline".to_string(),
        })
        .await
        .expect("Failed to create default cascade");
    state
}

fn work(title: &str) -> CreateWorkInput {
    CreateWorkInput {
        title: title.to_string(),
        cascade: "default".to_string(),
        stage: None,
        content: None,
        priority: 3,
        item_type: "task".to_string(),
        parent_id: None,
        depends_on: Vec::new(),
        project: None,
        created_by: None,
    }
}

#[tokio::test]
async fn test_add_defaults_to_first_stage() {
    let state = test_state().await;
    let item = state.work_store.add(work("x")).await.unwrap();
    assert_eq!(item.stage, "idea");
    assert_eq!(item.priority, 3);
    assert_eq!(item.item_type, "task");
    assert!(item.claimed_by.is_none());
    assert!(item.completed_at.is_none());

    let transitions = state.work_store.get_transitions(&item.id).await.unwrap();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].from_stage, None);
    assert_eq!(transitions[0].to_stage, "idea");
}

#[tokio::test]
async fn test_add_rejects_unknown_cascade_and_stage() {
    let state = test_state().await;

    let mut input = work("x");
    input.cascade = "missing".to_string();
    assert!(matches!(
        state.work_store.add(input).await,
        Err(CoreError::UnknownCascade(_))
    ));

    let mut input = work("y");
    input.stage = Some("nonexistent".to_string());
    assert!(matches!(
        state.work_store.add(input).await,
        Err(CoreError::InvalidStage { .. })
    ));
}

#[tokio::test]
async fn test_add_at_terminal_stage_is_born_complete() {
    let state = test_state().await;
    let mut input = work("x");
    input.stage = Some("done".to_string());
    let item = state.work_store.add(input).await.unwrap();

    assert_eq!(item.stage, "done");
    assert!(item.completed_at.is_some());
    assert!(item.claimed_by.is_none());

    let fetched = state.work_store.get(&item.id).await.unwrap().unwrap();
    assert!(fetched.completed_at.is_some());

    // Terminal from birth: hidden from the default list, visible with
    // include_done.
    assert!(state.work_store.list(ListWorkFilter::default()).await.unwrap().is_empty());
    let all = state
        .work_store
        .list(ListWorkFilter {
            include_done: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn test_advance_walks_all_stages_then_fails_terminal() {
    let state = test_state().await;
    let item = state.work_store.add(work("x")).await.unwrap();

    let mut stages = vec![item.stage.clone()];
    for _ in 0..3 {
        let item = state.engine.advance(&item.id, "tester", None).await.unwrap();
        stages.push(item.stage.clone());
    }
    assert_eq!(stages, vec!["idea", "planned", "implementing", "done"]);

    let err = state.engine.advance(&item.id, "tester", None).await.unwrap_err();
    assert!(matches!(err, CoreError::AlreadyTerminal(_)));
}

#[tokio::test]
async fn test_transition_history_is_a_chain() {
    let state = test_state().await;
    let item = state.work_store.add(work("x")).await.unwrap();

    state.engine.advance(&item.id, "a", None).await.unwrap();
    state
        .engine
        .set_stage(&item.id, "implementing", "b", Some("new content".to_string()))
        .await
        .unwrap();
    state.engine.done(&item.id, None, None).await.unwrap();

    let transitions = state.work_store.get_transitions(&item.id).await.unwrap();
    assert_eq!(transitions.len(), 4);
    assert_eq!(transitions[0].from_stage, None);
    for pair in transitions.windows(2) {
        assert_eq!(pair[1].from_stage.as_deref(), Some(pair[0].to_stage.as_str()));
    }
    assert_eq!(transitions[2].content_snapshot.as_deref(), Some("new content"));
    assert_eq!(transitions[3].transitioned_by, "done");
}

#[tokio::test]
async fn test_set_stage_rejects_foreign_stage() {
    let state = test_state().await;
    let item = state.work_store.add(work("x")).await.unwrap();

    let err = state
        .engine
        .set_stage(&item.id, "reviewing", "tester", None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidStage { .. }));

    // Failed closed: no partial write.
    let unchanged = state.work_store.get(&item.id).await.unwrap().unwrap();
    assert_eq!(unchanged.stage, "idea");
    assert_eq!(
        state.work_store.get_transitions(&item.id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_done_terminal_invariant() {
    let state = test_state().await;
    let item = state.work_store.add(work("x")).await.unwrap();
    state.claims.claim(&item.id, "w1").await.unwrap();

    let done = state.engine.done(&item.id, Some(42), None).await.unwrap();
    assert_eq!(done.stage, "done");
    assert!(done.completed_at.is_some());
    assert!(done.claimed_by.is_none());
    assert!(done.claimed_at.is_none());
    assert_eq!(done.pr_number, Some(42));

    // Non-destructive merge: a later done without args keeps the PR.
    let again = state.engine.done(&item.id, None, Some("doc-1".to_string())).await.unwrap();
    assert_eq!(again.pr_number, Some(42));
    assert_eq!(again.output_doc_id.as_deref(), Some("doc-1"));
}

#[tokio::test]
async fn test_started_at_set_on_first_heavy_stage() {
    let state = test_state().await;
    let item = state.work_store.add(work("x")).await.unwrap();
    assert!(item.started_at.is_none());

    let item = state.engine.advance(&item.id, "t", None).await.unwrap();
    assert!(item.started_at.is_none()); // planned is not heavy

    let item = state.engine.advance(&item.id, "t", None).await.unwrap();
    let first_started = item.started_at.expect("implementing is heavy");

    // Revisiting a heavy stage must not reset the marker.
    state.engine.set_stage(&item.id, "planned", "t", None).await.unwrap();
    let item = state
        .engine
        .set_stage(&item.id, "implementing", "t", None)
        .await
        .unwrap();
    assert_eq!(item.started_at, Some(first_started));
}

#[tokio::test]
async fn test_claim_mutual_exclusion_and_idempotency() {
    let state = test_state().await;
    let item = state.work_store.add(work("x")).await.unwrap();

    let claimed = state.claims.claim(&item.id, "w1").await.unwrap();
    assert_eq!(claimed.claimed_by.as_deref(), Some("w1"));

    let err = state.claims.claim(&item.id, "w2").await.unwrap_err();
    match err {
        CoreError::AlreadyClaimed { owner, .. } => assert_eq!(owner, "w1"),
        other => panic!("expected AlreadyClaimed, got {:?}", other),
    }

    // Same owner re-claims fine.
    let again = state.claims.claim(&item.id, "w1").await.unwrap();
    assert_eq!(again.claimed_by.as_deref(), Some("w1"));

    let released = state.claims.release(&item.id).await.unwrap();
    assert!(released.claimed_by.is_none());

    // Now anyone can claim.
    state.claims.claim(&item.id, "w2").await.unwrap();
}

#[tokio::test]
async fn test_claim_unknown_item() {
    let state = test_state().await;
    assert!(matches!(
        state.claims.claim("missing", "w1").await,
        Err(CoreError::NotFound(_))
    ));
    assert!(matches!(
        state.claims.release("missing").await,
        Err(CoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_release_expired_reclaims_stale_claims() {
    let state = test_state().await;
    let item = state.work_store.add(work("x")).await.unwrap();
    state.claims.claim(&item.id, "crashed-worker").await.unwrap();

    assert!(state
        .work_store
        .ready(ListWorkFilter::default())
        .await
        .unwrap()
        .is_empty());

    let reclaimed = state.claims.release_expired(Duration::ZERO).await.unwrap();
    assert_eq!(reclaimed, vec![item.id.clone()]);

    let ready = state.work_store.ready(ListWorkFilter::default()).await.unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].id, item.id);
}

#[tokio::test]
async fn test_priority_ordering_with_fifo_tie_break() {
    let state = test_state().await;
    let mut a = work("a");
    a.priority = 0;
    let mut b = work("b");
    b.priority = 2;
    let mut c = work("c");
    c.priority = 0;

    let a = state.work_store.add(a).await.unwrap();
    let b = state.work_store.add(b).await.unwrap();
    let c = state.work_store.add(c).await.unwrap();

    let listed = state.work_store.list(ListWorkFilter::default()).await.unwrap();
    let ids: Vec<&str> = listed.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec![a.id.as_str(), c.id.as_str(), b.id.as_str()]);
}

#[tokio::test]
async fn test_list_excludes_done_unless_requested() {
    let state = test_state().await;
    let open = state.work_store.add(work("open")).await.unwrap();
    let finished = state.work_store.add(work("finished")).await.unwrap();
    state.engine.done(&finished.id, None, None).await.unwrap();

    let listed = state.work_store.list(ListWorkFilter::default()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, open.id);

    let all = state
        .work_store
        .list(ListWorkFilter {
            include_done: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_ready_excludes_claimed() {
    let state = test_state().await;
    let item = state.work_store.add(work("x")).await.unwrap();

    assert_eq!(state.work_store.ready(ListWorkFilter::default()).await.unwrap().len(), 1);

    state.claims.claim(&item.id, "w1").await.unwrap();
    assert!(state
        .work_store
        .ready(ListWorkFilter::default())
        .await
        .unwrap()
        .is_empty());

    state.claims.release(&item.id).await.unwrap();
    assert_eq!(state.work_store.ready(ListWorkFilter::default()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_ready_excludes_blocked_until_dependency_done() {
    let state = test_state().await;
    let e = state.work_store.add(work("e")).await.unwrap();
    let mut d = work("d");
    d.depends_on = vec![e.id.clone()];
    let d = state.work_store.add(d).await.unwrap();

    let fetched = state.work_store.get(&d.id).await.unwrap().unwrap();
    assert!(fetched.is_blocked);
    assert_eq!(fetched.blocked_by, vec![e.id.clone()]);

    let ready_ids: Vec<String> = state
        .work_store
        .ready(ListWorkFilter::default())
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert!(ready_ids.contains(&e.id));
    assert!(!ready_ids.contains(&d.id));

    state.engine.done(&e.id, None, None).await.unwrap();

    let ready_ids: Vec<String> = state
        .work_store
        .ready(ListWorkFilter::default())
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert!(ready_ids.contains(&d.id));
}

#[tokio::test]
async fn test_diamond_dependency_needs_both_arms() {
    let state = test_state().await;
    let b = state.work_store.add(work("b")).await.unwrap();
    let c = state.work_store.add(work("c")).await.unwrap();
    let mut d = work("d");
    d.depends_on = vec![b.id.clone(), c.id.clone()];
    let d = state.work_store.add(d).await.unwrap();

    state.engine.done(&b.id, None, None).await.unwrap();
    let fetched = state.work_store.get(&d.id).await.unwrap().unwrap();
    assert!(fetched.is_blocked);
    assert_eq!(fetched.blocked_by, vec![c.id.clone()]);

    state.engine.done(&c.id, None, None).await.unwrap();
    let fetched = state.work_store.get(&d.id).await.unwrap().unwrap();
    assert!(!fetched.is_blocked);

    let ready_ids: Vec<String> = state
        .work_store
        .ready(ListWorkFilter::default())
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert!(ready_ids.contains(&d.id));
}

#[tokio::test]
async fn test_only_blocks_edges_affect_readiness() {
    let state = test_state().await;
    let other = state.work_store.add(work("other")).await.unwrap();
    let item = state.work_store.add(work("item")).await.unwrap();
    state
        .work_store
        .add_dependency(&item.id, &other.id, DepType::Related)
        .await
        .unwrap();

    let fetched = state.work_store.get(&item.id).await.unwrap().unwrap();
    assert!(!fetched.is_blocked);

    // Upgrading the edge to blocks changes readiness (upsert semantics).
    state
        .work_store
        .add_dependency(&item.id, &other.id, DepType::Blocks)
        .await
        .unwrap();
    let fetched = state.work_store.get(&item.id).await.unwrap().unwrap();
    assert!(fetched.is_blocked);

    let deps = state.work_store.get_dependencies(&item.id).await.unwrap();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].dep_type, DepType::Blocks);

    let dependents = state.work_store.get_dependents(&other.id).await.unwrap();
    assert_eq!(dependents.len(), 1);
    assert_eq!(dependents[0].work_id, item.id);
}

#[tokio::test]
async fn test_update_patches_fields_and_bumps_updated_at() {
    let state = test_state().await;
    let item = state.work_store.add(work("x")).await.unwrap();

    let updated = state
        .work_store
        .update(
            &item.id,
            UpdateWorkInput {
                title: Some("renamed".to_string()),
                priority: Some(0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.title, "renamed");
    assert_eq!(updated.priority, 0);
    assert_eq!(updated.content, item.content);
    assert!(updated.updated_at >= item.updated_at);

    assert!(matches!(
        state.work_store.update("missing", UpdateWorkInput::default()).await,
        Err(CoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_removes_edges_keeps_history() {
    let state = test_state().await;
    let a = state.work_store.add(work("a")).await.unwrap();
    let mut b = work("b");
    b.depends_on = vec![a.id.clone()];
    let b = state.work_store.add(b).await.unwrap();

    assert!(state.work_store.delete(&a.id).await.unwrap());
    assert!(!state.work_store.delete(&a.id).await.unwrap());
    assert!(state.work_store.get(&a.id).await.unwrap().is_none());

    // The dangling edge is gone; b is no longer blocked.
    assert!(state.work_store.get_dependencies(&b.id).await.unwrap().is_empty());
    let fetched = state.work_store.get(&b.id).await.unwrap().unwrap();
    assert!(!fetched.is_blocked);

    // History outlives the item.
    assert_eq!(state.work_store.get_transitions(&a.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_stage_membership_holds_under_all_operations() {
    let state = test_state().await;
    let item = state.work_store.add(work("x")).await.unwrap();
    let cascade = state.cascade_store.get("default").await.unwrap();

    assert!(cascade.has_stage(&item.stage));
    let item = state.engine.advance(&item.id, "t", None).await.unwrap();
    assert!(cascade.has_stage(&item.stage));
    let item = state.engine.set_stage(&item.id, "idea", "t", None).await.unwrap();
    assert!(cascade.has_stage(&item.stage));
    let item = state.engine.done(&item.id, None, None).await.unwrap();
    assert!(cascade.has_stage(&item.stage));
}
