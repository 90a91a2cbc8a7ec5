//! Wires configuration into a running monitor: registry, bus, rule state,
//! interval tracker, delivery queue and retention worker.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::alerts::{AlertRuleEvaluator, DeliveryQueue};
use crate::bus::{BusError, ObservationBus, PublishSummary};
use crate::config::{ConfigError, MonitorConfig};
use crate::model::Report;
use crate::registry::{BuildSummary, ConfigurationError, PublisherContext, Registry};
use crate::tracker::{
    InMemoryRepository, IntervalRepository, RetentionWorker, StatusIntervalTracker,
};

pub struct MonitorEngine {
    config: MonitorConfig,
    registry: Registry,
    bus: ObservationBus,
    evaluator: Arc<AlertRuleEvaluator>,
    tracker: Arc<StatusIntervalTracker>,
    queue: Arc<DeliveryQueue>,
    retention: Arc<RetentionWorker>,
    build: BuildSummary,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl MonitorEngine {
    /// Engine with the default probers and notifiers and an in-memory store
    pub fn from_config(config: MonitorConfig) -> Result<Self, EngineError> {
        Self::with_parts(config, Registry::with_defaults(), Arc::new(InMemoryRepository::new()))
    }

    pub fn with_parts(
        mut config: MonitorConfig,
        registry: Registry,
        repository: Arc<dyn IntervalRepository>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let bus = ObservationBus::with_max_subscribers(config.max_subscribers);
        let evaluator = Arc::new(AlertRuleEvaluator::new());
        let queue = Arc::new(DeliveryQueue::new(
            config.delivery.queue_capacity,
            config.delivery.max_in_flight,
            config.delivery.timeout,
        ));

        let mut tracker = StatusIntervalTracker::new(Arc::clone(&repository))
            .with_stale_threshold(config.stale_threshold);
        if let Some(instance) = &config.instance_name {
            tracker = tracker.with_instance_name(instance.clone());
        }
        let tracker = Arc::new(tracker);

        // intervals are recorded before any publisher sees the report
        bus.subscribe(tracker.clone())?;

        let context = PublisherContext {
            bus: bus.clone(),
            evaluator: Arc::clone(&evaluator),
            queue: Arc::clone(&queue),
        };
        let build = registry.build(&config.checks, &config.transports, &context)?;

        let retention = Arc::new(RetentionWorker::new(
            repository,
            config.retention,
            config.retention_sweep_interval,
        ));

        tracing::info!(
            monitors = build.monitors,
            publishers = build.publishers,
            rejected = build.rejected,
            "Monitor engine ready"
        );

        Ok(Self {
            config,
            registry,
            bus,
            evaluator,
            tracker,
            queue,
            retention,
            build,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Start the delivery and retention workers
    pub fn start_workers(&self) {
        let mut workers = self.workers.lock();
        if let Some(handle) = Arc::clone(&self.queue).start() {
            workers.push(handle);
        }
        if !self.retention.is_running() {
            workers.push(Arc::clone(&self.retention).start());
        }
    }

    /// Signal workers to stop and wait for them
    pub async fn stop(&self) {
        self.queue.stop();
        self.retention.stop();

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task failed");
            }
        }
    }

    /// Hand a completed report to every observer
    pub fn publish(&self, report: &Report) -> PublishSummary {
        self.bus.publish(report)
    }

    /// Run every live prober once, concurrently, and publish the result
    pub async fn run_probes(&self) -> (Report, PublishSummary) {
        let monitors = self.registry.monitors();
        let observations = futures::future::join_all(monitors.iter().map(|m| m.run())).await;

        let report = Report::from_observations(Utc::now(), observations);
        tracing::debug!(
            checks = report.entries.len(),
            status = %report.status,
            "Probe round complete"
        );

        let summary = self.publish(&report);
        (report, summary)
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn bus(&self) -> &ObservationBus {
        &self.bus
    }

    pub fn evaluator(&self) -> &AlertRuleEvaluator {
        &self.evaluator
    }

    pub fn tracker(&self) -> &StatusIntervalTracker {
        &self.tracker
    }

    pub fn build_summary(&self) -> BuildSummary {
        self.build
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Cannot subscribe tracker: {0}")]
    Subscribe(#[from] BusError),
}
