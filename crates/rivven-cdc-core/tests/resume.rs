//! Stopping and resuming captures from checkpoints

mod harness;

use harness::*;
use pretty_assertions::assert_eq;
use rivven_cdc_core::common::{ChunkSplitter, TableMetadata};
use rivven_cdc_core::{
    CaptureCheckpoint, CaptureEvent, CapturePhase, CheckpointStore, FileCheckpointStore, LogPosition,
    MemoryCheckpointStore, QueryExecutor,
};
use std::sync::Arc;

#[tokio::test]
async fn test_resume_skips_done_chunks() {
    init_test_logging();
    let db = seeded_db(1..=40);
    let config = test_config().chunk_size(10).parallelism(2).build().unwrap();

    // Chunk 0 ([-inf, 11)) was emitted by an earlier run at position 40
    let metadata = TableMetadata::from_description(db.describe_table(&users()).await.unwrap())
        .unwrap();
    let plan = ChunkSplitter::new(&config)
        .plan(&metadata, &*db)
        .await
        .unwrap();
    assert_eq!(plan.len(), 4);
    let mut checkpoint = CaptureCheckpoint::new(plan);
    checkpoint.mark_done(0, LogPosition::new(40)).unwrap();
    let mut model = table_model(&db, &users()).await;
    for id in 11..=40 {
        model.remove(&metadata.decode_row(&user(id, &format!("user-{}", id))).unwrap());
    }

    // Writes while nothing was running
    db.update(&users(), &user(5, "user-5"), user(5, "changed")).unwrap();
    db.update(&users(), &user(15, "user-15"), user(15, "changed")).unwrap();
    db.delete(&users(), &user(25, "user-25")).unwrap();

    let mut capture = scheduler(&db, config).resume(checkpoint).await.unwrap();
    let (snapshot, start) = read_snapshot(&mut capture).await;
    assert_eq!(start, LogPosition::new(40));
    assert!(snapshot.ids().iter().all(|id| *id > 10), "chunk 0 emitted again");
    assert_eq!(snapshot.len(), 29);

    db.close_log();
    let streaming = read_to_end(&mut capture).await;
    // Only the chunk 0 write is above chunk 0's fence and not yet in a snapshot
    assert_eq!(streaming.notation(), vec!["-U[5, user-5]", "+U[5, changed]"]);

    model.apply_all(&snapshot);
    model.apply_all(&streaming);
    assert_eq!(model, table_model(&db, &users()).await);
}

#[tokio::test]
async fn test_stop_mid_capture_then_resume_is_exactly_once() {
    let db = seeded_db(1..=60);
    let store = Arc::new(MemoryCheckpointStore::new());
    let config = test_config().chunk_size(10).parallelism(1).build().unwrap();

    let mut first = scheduler(&db, config.clone())
        .with_checkpoint_store(store.clone())
        .start(&users())
        .await
        .unwrap();
    let mut first_events = Vec::new();
    if let Some(CaptureEvent::Change(event)) = next_event(&mut first).await {
        first_events.push(event);
    }
    let checkpoint = first.stop().await.unwrap();
    assert_eq!(checkpoint.phase, CapturePhase::Stopped);
    first_events.extend(read_to_end(&mut first).await);

    let stored = store.load(&users()).await.unwrap().expect("checkpoint saved");
    assert_eq!(stored.capture_id, checkpoint.capture_id);
    assert_eq!(stored.done_chunk_ids(), checkpoint.done_chunk_ids());

    db.update(&users(), &user(2, "user-2"), user(2, "between-runs")).unwrap();
    db.delete(&users(), &user(59, "user-59")).unwrap();

    let mut second = scheduler(&db, config)
        .with_checkpoint_store(store.clone())
        .resume(stored)
        .await
        .unwrap();
    tokio::time::timeout(EVENT_TIMEOUT, second.wait_snapshot_complete())
        .await
        .expect("snapshot did not complete")
        .unwrap();
    db.insert(&users(), user(61, "after-resume")).unwrap();
    db.close_log();
    let second_events = read_to_end(&mut second).await;

    let mut model = TableModel::default();
    model.apply_all(&first_events);
    model.apply_all(&second_events);
    assert_eq!(model, table_model(&db, &users()).await);

    let saved = store.load(&users()).await.unwrap().unwrap();
    assert!(saved.all_done());
    assert!(saved.snapshot_completed_at.is_some());
    assert_eq!(saved.phase, CapturePhase::Stopped);
}

#[tokio::test]
async fn test_resume_in_streaming_continues_after_last_emitted() {
    let db = seeded_db(1..=3);
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileCheckpointStore::new(dir.path()).await.unwrap());
    let config = test_config().build().unwrap();

    let mut first = scheduler(&db, config.clone())
        .with_checkpoint_store(store.clone())
        .start(&users())
        .await
        .unwrap();
    read_snapshot(&mut first).await;
    db.insert(&users(), user(4, "d")).unwrap();
    assert_eq!(read_changes(&mut first, 1).await.notation(), vec!["+I[4, d]"]);
    let checkpoint = first.stop().await.unwrap();
    assert_eq!(checkpoint.last_emitted_position, Some(LogPosition::new(4)));

    db.insert(&users(), user(5, "e")).unwrap();
    db.update(&users(), &user(1, "user-1"), user(1, "a")).unwrap();

    let stored = store.load(&users()).await.unwrap().unwrap();
    assert_eq!(stored.last_emitted_position, Some(LogPosition::new(4)));
    let mut second = scheduler(&db, config)
        .with_checkpoint_store(store.clone())
        .resume(stored)
        .await
        .unwrap();
    assert_eq!(second.phase(), CapturePhase::Streaming);
    assert_eq!(
        second.wait_snapshot_complete().await.unwrap(),
        LogPosition::new(3)
    );

    db.close_log();
    let events = read_to_end(&mut second).await;
    assert_eq!(
        events.notation(),
        vec!["+I[5, e]", "-U[1, user-1]", "+U[1, a]"]
    );
    second.join().await.unwrap();

    let saved = store.load(&users()).await.unwrap().unwrap();
    assert_eq!(saved.last_emitted_position, Some(LogPosition::new(6)));

    store.delete(&users()).await.unwrap();
    assert!(store.load(&users()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_checkpoint_json_round_trip_resumes() {
    let db = seeded_db(1..=25);
    let config = test_config().chunk_size(10).build().unwrap();
    let mut capture = scheduler(&db, config.clone()).start(&users()).await.unwrap();
    read_snapshot(&mut capture).await;
    let checkpoint = capture.stop().await.unwrap();

    let json = serde_json::to_string(&checkpoint).unwrap();
    let restored: CaptureCheckpoint = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, checkpoint);
    assert_eq!(restored.plan.len(), checkpoint.plan.len());

    db.update(&users(), &user(20, "user-20"), user(20, "x")).unwrap();
    let mut resumed = scheduler(&db, config).resume(restored).await.unwrap();
    assert_eq!(
        read_changes(&mut resumed, 2).await.notation(),
        vec!["-U[20, user-20]", "+U[20, x]"]
    );
}
