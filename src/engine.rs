//! # Engine Root
//!
//! [`Courier`] is the single owner wiring every subsystem together: one
//! adapter, one delivery tracker, one retry scheduler, one dead letter
//! router, one breaker registry, one saga orchestrator, one metrics
//! sink. Components receive their collaborators explicitly at
//! construction; there are no ambient globals to swap or reset.

use crate::config::CourierConfig;
use crate::consumer::{spawn_subscription_worker, ConsumerContext};
use crate::dead_letter::{DeadLetterEntry, DeadLetterRouter};
use crate::delivery::DeliveryTracker;
use crate::error::Result;
use crate::messaging::envelope::MessageEnvelope;
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::resilience::{CircuitBreaker, CircuitBreakerRegistry};
use crate::retry::RetryScheduler;
use crate::saga::definition::SagaDefinitionRegistry;
use crate::saga::instance::SagaInstance;
use crate::saga::orchestrator::SagaOrchestrator;
use crate::transport::{MessageHandler, TransportAdapter};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// The engine facade. Construct once at startup with a validated
/// configuration and a transport adapter, then hand out references.
pub struct Courier {
    adapter: Arc<dyn TransportAdapter>,
    config: CourierConfig,
    tracker: Arc<DeliveryTracker>,
    scheduler: Arc<RetryScheduler>,
    dead_letters: Arc<DeadLetterRouter>,
    breakers: CircuitBreakerRegistry,
    orchestrator: SagaOrchestrator,
    metrics: Arc<EngineMetrics>,
    shutdown: broadcast::Sender<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Courier {
    /// Wire the engine from a validated configuration. Spawns the
    /// delivery record eviction task immediately.
    pub fn new(adapter: Arc<dyn TransportAdapter>, config: CourierConfig) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(EngineMetrics::new());
        let tracker = Arc::new(DeliveryTracker::new(&config.delivery));
        let dead_letters = Arc::new(DeadLetterRouter::new(
            Arc::clone(&adapter),
            Arc::clone(&metrics),
        ));
        let (shutdown, _) = broadcast::channel(4);
        let scheduler = Arc::new(RetryScheduler::new(
            Arc::clone(&adapter),
            Arc::new(config.policy_set()),
            Arc::clone(&dead_letters),
            Arc::clone(&metrics),
            shutdown.clone(),
        ));
        let breakers = CircuitBreakerRegistry::new(config.circuit_breaker.clone(), Arc::clone(&metrics));
        let definitions = Arc::new(SagaDefinitionRegistry::new(config.sagas.clone())?);
        let orchestrator = SagaOrchestrator::new(
            Arc::clone(&adapter),
            Arc::clone(&tracker),
            Arc::clone(&metrics),
            definitions,
            shutdown.clone(),
        );

        let eviction = tracker.spawn_eviction_task(shutdown.subscribe());

        info!(
            sagas = config.sagas.len(),
            retry_policies = config.retry_policies.len(),
            "📬 Courier engine initialized"
        );
        Ok(Self {
            adapter,
            config,
            tracker,
            scheduler,
            dead_letters,
            breakers,
            orchestrator,
            metrics,
            shutdown,
            workers: Mutex::new(vec![eviction]),
        })
    }

    /// Publish an envelope through the configured adapter
    pub async fn publish(&self, envelope: &MessageEnvelope) -> Result<()> {
        self.adapter.publish(&envelope.subject, envelope).await
    }

    /// Attach a handler to a subject. Spawns the subscription worker;
    /// deliveries start flowing immediately.
    pub async fn subscribe(
        &self,
        subject: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        let subscription = self.adapter.subscribe(subject).await?;
        let context = ConsumerContext {
            adapter: Arc::clone(&self.adapter),
            tracker: Arc::clone(&self.tracker),
            scheduler: Arc::clone(&self.scheduler),
            dead_letters: Arc::clone(&self.dead_letters),
            metrics: Arc::clone(&self.metrics),
        };
        let worker = spawn_subscription_worker(
            subscription,
            handler,
            context,
            self.config.consumer.clone(),
            self.shutdown.clone(),
        );
        self.workers.lock().push(worker);
        Ok(())
    }

    /// Run a configured saga to its terminal state
    pub async fn start_saga(
        &self,
        definition_name: &str,
        initial_context: HashMap<String, String>,
    ) -> Result<SagaInstance> {
        self.orchestrator.execute(definition_name, initial_context).await
    }

    /// Shared circuit breaker for a downstream resource
    pub fn breaker(&self, resource: &str) -> Arc<CircuitBreaker> {
        self.breakers.breaker(resource)
    }

    /// Operator surface: list quarantined messages
    pub fn dead_letter_entries(&self) -> Vec<DeadLetterEntry> {
        self.dead_letters.entries()
    }

    /// Operator surface: replay one quarantined message with its attempt
    /// counter reset
    pub async fn requeue_dead_letter(&self, entry_id: &str) -> Result<()> {
        self.dead_letters.requeue(entry_id).await
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterRouter> {
        &self.dead_letters
    }

    pub fn tracker(&self) -> &Arc<DeliveryTracker> {
        &self.tracker
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Graceful shutdown: signal every worker, then drain the adapter
    /// until in-flight deliveries finish or the deadline elapses.
    pub async fn shutdown(&self, deadline: Duration) -> Result<()> {
        info!("📪 Courier engine shutting down");
        let _ = self.shutdown.send(());

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        let drain = async {
            for result in futures::future::join_all(workers).await {
                if let Err(err) = result {
                    warn!(error = %err, "Worker task ended abnormally during shutdown");
                }
            }
            // Flush scheduled republishes before the adapter stops
            // accepting them; a backed-off retry must not be stranded.
            self.scheduler.drain().await;
        };
        if tokio::time::timeout(deadline, drain).await.is_err() {
            warn!(deadline_ms = deadline.as_millis() as u64, "Shutdown deadline elapsed with workers still running");
        }

        self.adapter.close(deadline).await
    }
}
