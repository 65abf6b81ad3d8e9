use std::sync::{Arc, Mutex};
use std::time::Duration;

use hl_agents::{IntakeOutcome, LoopError, ViabilityAgent, VisionIntakeAgent};
use hl_core::config::Config;
use hl_core::types::EggRecord;
use hl_model::{ChatConfig, ChatModel, ImageModel};
use hl_pipeline::{
    CompletionTracker, Consolidator, EventBus, IllustrationGenerator, InsertPropagator,
    PipelineEvent, UpdatePropagator,
};
use hl_store::{
    ChangeFeed, ChangeRecord, MemoryBlobStore, MemoryRecordStore, RecordStore, TaskQueue,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::shutdown::ShutdownSignal;

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// The single-process pipeline runtime.
///
/// Owns every shared resource (record store, blob store, change feed, task
/// queues, event bus) and the stage components, all constructed once and
/// injected explicitly. The change-feed and event-bus subscriptions are taken
/// at construction time so nothing published between construction and
/// `spawn_workers` is lost.
pub struct Daemon {
    config: Config,
    store: Arc<MemoryRecordStore>,
    blobs: Arc<MemoryBlobStore>,
    bus: EventBus,
    shutdown: ShutdownSignal,

    intake: VisionIntakeAgent,
    viability: Arc<ViabilityAgent>,
    illustrator: Arc<IllustrationGenerator>,
    tracker: Arc<CompletionTracker>,
    consolidator: Arc<Consolidator>,

    analyze_queue: TaskQueue<EggRecord>,
    illustrate_queue: TaskQueue<EggRecord>,

    // Taken by spawn_workers; None afterwards.
    feed_rx: Mutex<Option<flume::Receiver<ChangeRecord>>>,
    bus_rx: Mutex<Option<flume::Receiver<PipelineEvent>>>,
}

impl Daemon {
    pub fn new(
        config: Config,
        chat_model: Arc<dyn ChatModel>,
        image_model: Arc<dyn ImageModel>,
    ) -> Self {
        let feed = ChangeFeed::new();
        let feed_rx = feed.subscribe();
        let store = Arc::new(MemoryRecordStore::new(feed));
        let blobs = Arc::new(MemoryBlobStore::new(&config.storage.bucket));
        let bus = EventBus::new();
        let bus_rx = bus.subscribe();

        let chat_config = ChatConfig {
            model: config.model.chat_model.clone(),
            max_tokens: config.model.max_tokens,
            temperature: config.model.temperature,
            system_prompt: None,
        };

        let record_store: Arc<dyn RecordStore> = store.clone();

        let intake = VisionIntakeAgent::new(
            chat_model.clone(),
            record_store.clone(),
            chat_config.clone(),
            &config.agent,
        );
        let viability = Arc::new(ViabilityAgent::new(
            chat_model,
            record_store.clone(),
            chat_config,
            &config.agent,
        ));
        let illustrator = Arc::new(IllustrationGenerator::new(
            image_model.clone(),
            record_store.clone(),
            blobs.clone(),
            bus.clone(),
            config.model.image_model.clone(),
        ));
        let tracker = Arc::new(CompletionTracker::new(record_store.clone(), bus.clone()));
        let consolidator = Arc::new(Consolidator::new(
            record_store,
            blobs.clone(),
            image_model,
            config.model.image_model.clone(),
        ));

        let analyze_queue = TaskQueue::new(config.storage.analyze_queue.as_str());
        let illustrate_queue = TaskQueue::new(config.storage.illustrate_queue.as_str());

        Self {
            config,
            store,
            blobs,
            bus,
            shutdown: ShutdownSignal::new(),
            intake,
            viability,
            illustrator,
            tracker,
            consolidator,
            analyze_queue,
            illustrate_queue,
            feed_rx: Mutex::new(Some(feed_rx)),
            bus_rx: Mutex::new(Some(bus_rx)),
        }
    }

    pub fn store(&self) -> &Arc<MemoryRecordStore> {
        &self.store
    }

    pub fn blobs(&self) -> &Arc<MemoryBlobStore> {
        &self.blobs
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Ingest one clutch image through the vision intake agent.
    ///
    /// When the expected-count stamp itself crossed the fan-in barrier (all
    /// eggs completed before the stamp, or a zero-egg clutch), no completion
    /// event is coming to trigger consolidation, so it is kicked off here.
    pub async fn ingest(
        &self,
        image_bytes: Vec<u8>,
        image_key: &str,
    ) -> Result<IntakeOutcome, LoopError> {
        let outcome = self.intake.ingest(image_bytes, image_key).await?;
        if outcome.consolidation_ready {
            info!(clutch_id = %outcome.clutch_id, "all eggs already processed, consolidation triggered");
            self.bus.publish(PipelineEvent::ConsolidateFindings {
                clutch_id: outcome.clutch_id,
            });
        }
        Ok(outcome)
    }

    /// Spawn the propagator pump, the stage workers, and the event pump.
    ///
    /// Idempotent: the subscriptions are consumed on the first call and later
    /// calls do nothing.
    pub fn spawn_workers(&self) {
        if let Some(feed_rx) = self.feed_rx.lock().expect("feed_rx lock poisoned").take() {
            self.spawn_feed_pump(feed_rx);
        }
        if let Some(bus_rx) = self.bus_rx.lock().expect("bus_rx lock poisoned").take() {
            self.spawn_event_pump(bus_rx);

            for worker in 0..self.config.daemon.analysis_workers {
                self.spawn_analysis_worker(worker);
            }
            for worker in 0..self.config.daemon.illustration_workers {
                self.spawn_illustration_worker(worker);
            }
        }
    }

    /// Run until the shutdown signal fires.
    pub async fn run(&self) {
        self.spawn_workers();
        info!(
            analysis_workers = self.config.daemon.analysis_workers,
            illustration_workers = self.config.daemon.illustration_workers,
            "daemon running"
        );
        self.shutdown.wait().await;
        info!("daemon stopped");
    }

    /// Poll until the clutch has a consolidation timestamp, or time out.
    pub async fn wait_for_consolidation(&self, clutch_id: Uuid, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.store.get_clutch_meta(clutch_id).await {
                Ok(Some(meta)) if meta.is_consolidated() => return true,
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    // ------------------------------------------------------------------
    // Worker loops
    // ------------------------------------------------------------------

    fn spawn_feed_pump(&self, feed_rx: flume::Receiver<ChangeRecord>) {
        let insert = InsertPropagator::new(self.analyze_queue.clone());
        let update = UpdatePropagator::new(self.illustrate_queue.clone());
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            loop {
                tokio::select! {
                    change = feed_rx.recv_async() => {
                        let Ok(change) = change else { break };
                        let batch = [change];
                        if let Err(e) = insert.handle_batch(&batch) {
                            error!(error = %e, "insert propagation failed");
                        }
                        if let Err(e) = update.handle_batch(&batch) {
                            error!(error = %e, "update propagation failed");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            info!("feed pump stopped");
        });
    }

    fn spawn_analysis_worker(&self, worker: u32) {
        let queue = self.analyze_queue.clone();
        let viability = self.viability.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            loop {
                tokio::select! {
                    egg = queue.recv() => {
                        let Some(egg) = egg else { break };
                        if let Err(e) = viability.analyze(&egg).await {
                            warn!(
                                worker,
                                clutch_id = %egg.clutch_id,
                                egg_id = %egg.id,
                                error = %e,
                                "analysis failed, re-enqueueing"
                            );
                            let _ = queue.send(egg);
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            info!(worker, "analysis worker stopped");
        });
    }

    fn spawn_illustration_worker(&self, worker: u32) {
        let queue = self.illustrate_queue.clone();
        let illustrator = self.illustrator.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            loop {
                tokio::select! {
                    egg = queue.recv() => {
                        let Some(egg) = egg else { break };
                        if let Err(e) = illustrator.process(&egg).await {
                            warn!(
                                worker,
                                clutch_id = %egg.clutch_id,
                                egg_id = %egg.id,
                                error = %e,
                                "illustration failed, re-enqueueing"
                            );
                            let _ = queue.send(egg);
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            info!(worker, "illustration worker stopped");
        });
    }

    /// One sequential consumer for both event topics, so a clutch's final
    /// completion is always recorded before its consolidation runs.
    fn spawn_event_pump(&self, bus_rx: flume::Receiver<PipelineEvent>) {
        let tracker = self.tracker.clone();
        let consolidator = self.consolidator.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            loop {
                tokio::select! {
                    event = bus_rx.recv_async() => {
                        let Ok(event) = event else { break };
                        match event {
                            PipelineEvent::EggProcessingCompleted { clutch_id, egg_id } => {
                                if let Err(e) = tracker.handle(clutch_id, egg_id).await {
                                    error!(
                                        clutch_id = %clutch_id,
                                        egg_id = %egg_id,
                                        error = %e,
                                        "completion tracking failed"
                                    );
                                }
                            }
                            PipelineEvent::ConsolidateFindings { clutch_id } => {
                                match consolidator.consolidate(clutch_id).await {
                                    Ok(summary) => info!(
                                        clutch_id = %clutch_id,
                                        total = summary.total_egg_count,
                                        viable = summary.viable_egg_count,
                                        composite = summary.chicken_image_key.is_some(),
                                        "clutch consolidated"
                                    ),
                                    Err(e) => error!(
                                        clutch_id = %clutch_id,
                                        error = %e,
                                        "consolidation failed"
                                    ),
                                }
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            info!("event pump stopped");
        });
    }
}
