//! # Pipeline Bootstrap
//!
//! Wires the tracking store, stage queues, actors, runners and control plane into one
//! `PipelineSystem`, and runs its consumer and checkup loops.
//!
//! ## Backends
//!
//! - With `database.url` set, documents are tracked in PostgreSQL; otherwise in memory.
//! - `queues.backend = "pgmq"` puts the stage queues in PostgreSQL; `memory` keeps them
//!   in process.
//!
//! Bootstrap fails when a configured review workflow is not provisioned in the review
//! service.

use super::actor_runner::ActorRunner;
use super::await_runner::AwaitRunner;
use super::begin::BeginRunner;
use super::checkup::CheckupPolicy;
use super::consumer::StageConsumer;
use super::manager::ControlPlaneManager;
use super::review_bridge::HumanReviewBridge;
use super::trigger::IntakeTrigger;
use crate::actors::{default_actors, ActorServices, StageActor};
use crate::config::{ConfigurationError, PipelineConfig, QueueBackend};
use crate::error::Result;
use crate::messaging::{InMemoryWorkQueue, PgmqWorkQueue, QueueRegistry, WorkQueue};
use crate::services::{
    HumanReviewService, InferenceService, ObjectStore, ReviewWorkflowRegistry,
};
use crate::state_machine::Stage;
use crate::tracking::{InMemoryTrackingStore, PostgresTrackingStore, TrackingError, TrackingStore};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// External collaborators handed to bootstrap
#[derive(Debug, Clone)]
pub struct ExternalServices {
    pub object_store: Arc<dyn ObjectStore>,
    pub inference: Arc<dyn InferenceService>,
    pub review: Arc<dyn HumanReviewService>,
}

/// Storage and queue backends plus the stage actors
#[derive(Debug, Clone)]
pub struct PipelineComponents {
    pub store: Arc<dyn TrackingStore>,
    pub queues: Arc<QueueRegistry>,
    pub actors: Vec<Arc<dyn StageActor>>,
}

impl PipelineComponents {
    /// In-process store and queues
    pub fn in_memory(config: &PipelineConfig) -> Self {
        let queues = QueueRegistry::build(&config.pipeline.prefix, |name| {
            Arc::new(InMemoryWorkQueue::new(name)) as Arc<dyn WorkQueue>
        });
        Self {
            store: Arc::new(InMemoryTrackingStore::new()),
            queues: Arc::new(queues),
            actors: default_actors(),
        }
    }

    /// Backends selected by the configuration
    pub async fn from_config(config: &PipelineConfig) -> Result<Self> {
        let Some(url) = config.database.url.as_deref() else {
            if config.queues.backend == QueueBackend::Pgmq {
                return Err(ConfigurationError::missing_required("database.url").into());
            }
            return Ok(Self::in_memory(config));
        };

        let pool = connect(config, url).await?;
        let store = PostgresTrackingStore::new(pool.clone());
        store.ensure_schema().await?;

        let queues = match config.queues.backend {
            QueueBackend::Memory => QueueRegistry::build(&config.pipeline.prefix, |name| {
                Arc::new(InMemoryWorkQueue::new(name)) as Arc<dyn WorkQueue>
            }),
            QueueBackend::Pgmq => pgmq_queues(&config.pipeline.prefix, &pool).await?,
        };

        Ok(Self {
            store: Arc::new(store),
            queues: Arc::new(queues),
            actors: default_actors(),
        })
    }
}

/// Connection pool sized from the database section
pub async fn connect(config: &PipelineConfig, url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .connect(url)
        .await
        .map_err(TrackingError::from)?;
    info!(
        max_connections = config.database.max_connections,
        "🔌 BOOTSTRAP: Database pool ready"
    );
    Ok(pool)
}

/// pgmq-backed stage queues, created if missing
pub async fn pgmq_queues(prefix: &str, pool: &PgPool) -> Result<QueueRegistry> {
    let mut created = Vec::new();
    let registry = QueueRegistry::build(prefix, |name| {
        let queue = Arc::new(PgmqWorkQueue::new(pool.clone(), name));
        created.push(Arc::clone(&queue));
        queue as Arc<dyn WorkQueue>
    });
    for queue in created {
        queue.ensure_created().await?;
    }
    Ok(registry)
}

/// The assembled pipeline
#[derive(Debug)]
pub struct PipelineSystem {
    config: Arc<PipelineConfig>,
    store: Arc<dyn TrackingStore>,
    queues: Arc<QueueRegistry>,
    manager: Arc<ControlPlaneManager>,
    bridge: HumanReviewBridge,
    trigger: IntakeTrigger,
    consumers: Vec<Arc<StageConsumer>>,
}

impl PipelineSystem {
    pub async fn bootstrap(
        config: PipelineConfig,
        components: PipelineComponents,
        services: ExternalServices,
    ) -> Result<Self> {
        info!("🚀 BOOTSTRAP: Starting document pipeline bootstrap");
        config.validate()?;
        verify_review_workflows(&config, services.review.as_ref()).await?;

        let PipelineComponents {
            store,
            queues,
            actors,
        } = components;

        let begin = BeginRunner::new(Arc::clone(&store), Arc::clone(&queues));
        let policy = CheckupPolicy::from_config(&config.checkup, &config.review);
        let manager = Arc::new(ControlPlaneManager::new(Arc::clone(&store), begin, policy));

        let actor_services = Arc::new(ActorServices::new(
            &config,
            services.object_store,
            services.inference,
            services.review,
        ));
        let actor_runner = Arc::new(ActorRunner::new(
            Arc::clone(&store),
            Arc::clone(&queues),
            actors,
            actor_services,
        ));
        let await_runner = Arc::new(AwaitRunner::new(Arc::clone(&store), Arc::clone(&manager)));

        let mut consumers = Vec::new();
        for (stage, queue) in queues.stages() {
            if !actor_runner.has_actor(stage) {
                warn!(stage = %stage, "⚠️ BOOTSTRAP: No actor registered for stage");
            }
            consumers.push(Arc::new(StageConsumer::new(
                stage,
                Arc::clone(queue),
                Arc::clone(&actor_runner),
                Arc::clone(&await_runner),
                &config.queues,
            )));
        }

        let bridge = HumanReviewBridge::new(
            ReviewWorkflowRegistry::from_config(&config.review),
            Arc::clone(&queues),
        );
        let trigger = IntakeTrigger::new(Arc::clone(&manager), &config.store);

        info!(
            prefix = %config.pipeline.prefix,
            stages = consumers.len(),
            "✅ BOOTSTRAP: Document pipeline ready"
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            queues,
            manager,
            bridge,
            trigger,
            consumers,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TrackingStore> {
        &self.store
    }

    pub fn queues(&self) -> &Arc<QueueRegistry> {
        &self.queues
    }

    pub fn manager(&self) -> &Arc<ControlPlaneManager> {
        &self.manager
    }

    pub fn bridge(&self) -> &HumanReviewBridge {
        &self.bridge
    }

    pub fn trigger(&self) -> &IntakeTrigger {
        &self.trigger
    }

    pub fn consumers(&self) -> &[Arc<StageConsumer>] {
        &self.consumers
    }

    pub fn consumer(&self, stage: Stage) -> Option<&Arc<StageConsumer>> {
        self.consumers.iter().find(|consumer| consumer.stage() == stage)
    }

    /// Spawn one consumer loop per stage, plus the checkup loop when enabled
    pub fn start(&self) -> PipelineHandle {
        let (shutdown, receiver) = watch::channel(false);
        let mut tasks = Vec::new();

        for consumer in &self.consumers {
            let consumer = Arc::clone(consumer);
            let receiver = receiver.clone();
            tasks.push(tokio::spawn(async move { consumer.run(receiver).await }));
        }

        if self.config.checkup.enabled {
            let manager = Arc::clone(&self.manager);
            let interval = self.config.checkup.interval();
            tasks.push(tokio::spawn(run_checkup_loop(manager, interval, receiver)));
        }

        info!(tasks = tasks.len(), "🚀 Document pipeline started");
        PipelineHandle { shutdown, tasks }
    }
}

/// Run checkup every `interval` until shutdown
pub async fn run_checkup_loop(
    manager: Arc<ControlPlaneManager>,
    interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    while !*shutdown.borrow() {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = manager.checkup().await {
                    error!(error = %e, "Checkup sweep failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

async fn verify_review_workflows(
    config: &PipelineConfig,
    review: &dyn HumanReviewService,
) -> Result<()> {
    for workflow in &config.review.workflows {
        if !review.workflow_exists(&workflow.workflow_id).await? {
            error!(
                team = %workflow.team,
                workflow_id = %workflow.workflow_id,
                "❌ BOOTSTRAP: Review workflow is not provisioned"
            );
            return Err(ConfigurationError::WorkflowNotProvisioned {
                team: workflow.team.clone(),
                workflow_id: workflow.workflow_id.clone(),
            }
            .into());
        }
    }
    Ok(())
}

/// Running pipeline loops
#[derive(Debug)]
pub struct PipelineHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|task| !task.is_finished())
    }

    /// Signal every loop to stop and wait for them
    pub async fn shutdown(self) {
        if self.shutdown.send(true).is_err() {
            warn!("Pipeline loops already stopped");
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Pipeline loop panicked");
            }
        }
        info!("🛑 Document pipeline stopped");
    }
}
