//! End-to-end pipeline runs against mock model providers: one clutch image
//! in, consolidated clutch metadata out.

use std::sync::Arc;
use std::time::Duration;

use hl_core::config::Config;
use hl_daemon::Daemon;
use hl_model::{MockChatModel, MockImageModel, ModelTurn};
use hl_pipeline::PipelineEvent;
use hl_store::RecordStore;

fn single_worker_config() -> Config {
    let mut config = Config::default();
    // One worker per stage keeps the scripted mock turn order deterministic.
    config.daemon.analysis_workers = 1;
    config.daemon.illustration_workers = 1;
    config
}

fn egg_input(color: &str) -> serde_json::Value {
    serde_json::json!({
        "color": color,
        "shape": "oval",
        "size": "large",
        "shellTexture": "smooth",
        "shellIntegrity": "intact",
        "hardness": "hard",
        "spotsMarkings": "none",
        "bloomCondition": "present",
        "cleanliness": "clean",
        "visibleDefects": [],
        "overallGrade": "A",
        "notes": ""
    })
}

fn analysis_input(hatch: f64, breed: &str) -> serde_json::Value {
    serde_json::json!({
        "possibleHenBreeds": [breed],
        "predictedChickBreed": breed,
        "breedConfidence": "high",
        "hatchLikelihood": hatch,
        "chickenAppearance": {
            "plumageColor": "white",
            "combType": "single",
            "bodyType": "slender",
            "featherPattern": "solid",
            "legColor": "yellow"
        },
        "notes": "scripted"
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn two_eggs_one_viable_consolidates_once() {
    // Intake finds two eggs; analysis scores them 85 and 30. Only the first
    // clears the illustration threshold, but both reach terminal outcomes,
    // so the clutch still consolidates.
    let chat = MockChatModel::new()
        .with_turn(ModelTurn::tool_use("t1", "store_egg_data", egg_input("brown")))
        .with_turn(ModelTurn::tool_use("t2", "store_egg_data", egg_input("white")))
        .with_turn(ModelTurn::end_turn("Two eggs identified."))
        .with_turn(ModelTurn::tool_use(
            "t3",
            "save_egg_analysis",
            analysis_input(85.0, "Leghorn"),
        ))
        .with_turn(ModelTurn::end_turn("done"))
        .with_turn(ModelTurn::tool_use(
            "t4",
            "save_egg_analysis",
            analysis_input(30.0, "Sussex"),
        ))
        .with_turn(ModelTurn::end_turn("done"));

    let daemon = Daemon::new(
        single_worker_config(),
        Arc::new(chat),
        Arc::new(MockImageModel::new()),
    );
    let events = daemon.event_bus().subscribe();

    let outcome = daemon
        .ingest(vec![0xff, 0xd8], "uploads/clutch.jpg")
        .await
        .unwrap();
    assert_eq!(outcome.eggs_detected, 2);

    daemon.spawn_workers();
    assert!(
        daemon
            .wait_for_consolidation(outcome.clutch_id, Duration::from_secs(5))
            .await,
        "clutch never consolidated"
    );

    let meta = daemon
        .store()
        .get_clutch_meta(outcome.clutch_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(meta.egg_count, Some(2));
    assert_eq!(meta.total_egg_count, Some(2));
    assert_eq!(meta.viable_egg_count, Some(1));
    assert_eq!(
        meta.chicken_image_key.as_deref(),
        Some(format!("clutches/{}/chickens.png", outcome.clutch_id).as_str())
    );

    // Exactly one egg was illustrated.
    let rows = daemon.store().query_clutch(outcome.clutch_id).await.unwrap();
    let eggs: Vec<_> = rows.iter().filter_map(|r| r.as_egg()).collect();
    assert_eq!(eggs.len(), 2);
    let illustrated: Vec<_> = eggs.iter().filter(|e| e.has_chick_image()).collect();
    assert_eq!(illustrated.len(), 1);
    assert_eq!(illustrated[0].hatch_likelihood, Some(85.0));

    // One chick image plus the composite.
    assert_eq!(daemon.blobs().object_count(), 2);

    // Both eggs completed; consolidation fired exactly once.
    let published: Vec<PipelineEvent> = events.drain().collect();
    let completed = published
        .iter()
        .filter(|e| matches!(e, PipelineEvent::EggProcessingCompleted { .. }))
        .count();
    let consolidations = published
        .iter()
        .filter(|e| matches!(e, PipelineEvent::ConsolidateFindings { .. }))
        .count();
    assert_eq!(completed, 2);
    assert_eq!(consolidations, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn no_viable_eggs_consolidates_without_composite() {
    let chat = MockChatModel::new()
        .with_turn(ModelTurn::tool_use("t1", "store_egg_data", egg_input("olive")))
        .with_turn(ModelTurn::end_turn("One egg identified."))
        .with_turn(ModelTurn::tool_use(
            "t2",
            "save_egg_analysis",
            analysis_input(20.0, "Unknown"),
        ))
        .with_turn(ModelTurn::end_turn("done"));

    let images = Arc::new(MockImageModel::new());
    let daemon = Daemon::new(single_worker_config(), Arc::new(chat), images.clone());

    let outcome = daemon.ingest(vec![0xff], "uploads/clutch.png").await.unwrap();
    daemon.spawn_workers();
    assert!(
        daemon
            .wait_for_consolidation(outcome.clutch_id, Duration::from_secs(5))
            .await
    );

    let meta = daemon
        .store()
        .get_clutch_meta(outcome.clutch_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(meta.total_egg_count, Some(1));
    assert_eq!(meta.viable_egg_count, Some(0));
    assert_eq!(meta.chicken_image_key, None);

    // No chick image and no composite were ever rendered.
    assert_eq!(images.call_count(), 0);
    assert_eq!(daemon.blobs().object_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn clutch_with_no_eggs_still_consolidates() {
    // No completion events will ever arrive for an empty clutch, so the
    // expected-count stamp at the end of intake has to trigger consolidation.
    let chat = MockChatModel::new().with_turn(ModelTurn::end_turn("No eggs visible."));

    let daemon = Daemon::new(
        single_worker_config(),
        Arc::new(chat),
        Arc::new(MockImageModel::new()),
    );
    let events = daemon.event_bus().subscribe();

    let outcome = daemon.ingest(vec![0xff], "uploads/empty.jpg").await.unwrap();
    assert_eq!(outcome.eggs_detected, 0);
    assert!(outcome.consolidation_ready);

    daemon.spawn_workers();
    assert!(
        daemon
            .wait_for_consolidation(outcome.clutch_id, Duration::from_secs(5))
            .await,
        "empty clutch never consolidated"
    );

    let meta = daemon
        .store()
        .get_clutch_meta(outcome.clutch_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(meta.total_egg_count, Some(0));
    assert_eq!(meta.viable_egg_count, Some(0));
    assert_eq!(meta.chicken_image_key, None);

    let consolidations = events
        .drain()
        .filter(|e| matches!(e, PipelineEvent::ConsolidateFindings { .. }))
        .count();
    assert_eq!(consolidations, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn redelivered_completion_event_does_not_reconsolidate() {
    let chat = MockChatModel::new()
        .with_turn(ModelTurn::tool_use("t1", "store_egg_data", egg_input("blue")))
        .with_turn(ModelTurn::end_turn("One egg identified."))
        .with_turn(ModelTurn::tool_use(
            "t2",
            "save_egg_analysis",
            analysis_input(90.0, "Araucana"),
        ))
        .with_turn(ModelTurn::end_turn("done"));

    let daemon = Daemon::new(
        single_worker_config(),
        Arc::new(chat),
        Arc::new(MockImageModel::new()),
    );
    let events = daemon.event_bus().subscribe();

    let outcome = daemon.ingest(vec![0xff], "uploads/clutch.jpg").await.unwrap();
    daemon.spawn_workers();
    assert!(
        daemon
            .wait_for_consolidation(outcome.clutch_id, Duration::from_secs(5))
            .await
    );

    let rows = daemon.store().query_clutch(outcome.clutch_id).await.unwrap();
    let egg_id = rows.iter().filter_map(|r| r.as_egg()).next().unwrap().id;

    // Redeliver the completion event after the barrier already crossed.
    daemon.event_bus().publish(PipelineEvent::EggProcessingCompleted {
        clutch_id: outcome.clutch_id,
        egg_id,
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let consolidations = events
        .drain()
        .filter(|e| matches!(e, PipelineEvent::ConsolidateFindings { .. }))
        .count();
    assert_eq!(consolidations, 1);

    let meta = daemon
        .store()
        .get_clutch_meta(outcome.clutch_id)
        .await
        .unwrap()
        .unwrap();
    // The duplicate is absorbed by the completed-egg set.
    assert_eq!(meta.processing_complete, 1);
}
