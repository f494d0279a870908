use super::*;
use crate::services::persistence::load_snapshot;
use crate::state::test_helpers;

fn cleanup(state: &AppState) {
    let path = state.snapshots.path();
    if path.exists() {
        std::fs::remove_file(path).unwrap();
    }
}

#[tokio::test]
async fn upsert_inserts_and_flushes() {
    let state = test_helpers::test_app_state();

    upsert(&state, test_helpers::image_object("x1")).await.unwrap();

    let board = snapshot(&state).await;
    assert_eq!(board.len(), 1);
    assert_eq!(board["x1"], test_helpers::image_object("x1"));

    let on_disk = load_snapshot(state.snapshots.path());
    assert_eq!(on_disk, board);

    cleanup(&state);
}

#[tokio::test]
async fn upsert_replaces_existing_object() {
    let state = test_helpers::test_app_state();

    upsert(&state, test_helpers::text_object("t1", "before")).await.unwrap();
    upsert(&state, test_helpers::text_object("t1", "after")).await.unwrap();

    let board = snapshot(&state).await;
    assert_eq!(board.len(), 1);
    let SceneObject::Text(text) = &board["t1"] else {
        panic!("expected text variant");
    };
    assert_eq!(text.text, "after");
    assert_eq!(load_snapshot(state.snapshots.path()), board);

    cleanup(&state);
}

#[tokio::test]
async fn upsert_rejects_variant_change() {
    let state = test_helpers::test_app_state();

    upsert(&state, test_helpers::image_object("shared")).await.unwrap();
    let err = upsert(&state, test_helpers::path_object("shared")).await.unwrap_err();

    assert!(matches!(err, SceneError::VariantChanged { existing: "image", incoming: "svg", .. }));
    assert_eq!(snapshot(&state).await["shared"].kind(), "image");

    cleanup(&state);
}

#[tokio::test]
async fn upsert_rejects_empty_id() {
    let state = test_helpers::test_app_state();

    let err = upsert(&state, test_helpers::image_object("")).await.unwrap_err();

    assert!(matches!(err, SceneError::EmptyId));
    assert_eq!(object_count(&state).await, 0);
    assert!(!state.snapshots.path().exists());
}

#[tokio::test]
async fn snapshot_reflects_every_mutation() {
    let state = test_helpers::test_app_state();

    for i in 0..5 {
        upsert(&state, test_helpers::image_object(&format!("img-{i}"))).await.unwrap();
    }
    upsert(&state, test_helpers::text_object("img-9", "late")).await.unwrap();

    let board = snapshot(&state).await;
    assert_eq!(board.len(), 6);
    assert_eq!(state.hub.read().await.scene_version, 6);
    assert_eq!(load_snapshot(state.snapshots.path()), board);

    cleanup(&state);
}

#[tokio::test]
async fn failed_flush_keeps_memory_authoritative() {
    let mut config = test_helpers::test_config();
    config.snapshot_path = std::env::temp_dir()
        .join(format!("boardrelay-missing-{}", uuid::Uuid::new_v4()))
        .join("board.json");
    let state = AppState::new(config, HashMap::new());

    upsert(&state, test_helpers::image_object("x1")).await.unwrap();

    assert_eq!(object_count(&state).await, 1);
    assert!(!state.snapshots.path().exists());
}

#[tokio::test]
async fn restart_recovers_identical_store() {
    let state = test_helpers::test_app_state();
    upsert(&state, test_helpers::image_object("x1")).await.unwrap();
    upsert(&state, test_helpers::text_object("t1", "hp 12/20")).await.unwrap();
    upsert(&state, test_helpers::path_object("p1")).await.unwrap();

    let restarted = AppState::new(
        (*state.config).clone(),
        load_snapshot(state.snapshots.path()),
    );

    assert_eq!(snapshot(&restarted).await, snapshot(&state).await);

    cleanup(&state);
}
