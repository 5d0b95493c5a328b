//! Builder for PromotionReconciler
//!
//! Only the object store is mandatory. The engine defaults to a
//! [`LocalEngine`] over the configured step runners and credentials, and
//! events go to the log unless another sink is supplied.

use crate::config::ControllerConfig;
use crate::error::BuildError;
use crate::events::{EventSink, TracingEventSink};
use crate::reconciler::PromotionReconciler;
use crate::requeue::RequeueScheduler;
use relay_engine::{CredentialsDatabase, Engine, LocalEngine, StepRunnerRegistry};
use relay_store::ObjectStore;
use std::sync::Arc;

/// Builder for constructing a PromotionReconciler with its dependencies
#[derive(Default)]
pub struct PromotionReconcilerBuilder {
    store: Option<Arc<dyn ObjectStore>>,
    engine: Option<Arc<dyn Engine>>,
    step_runners: Option<Arc<StepRunnerRegistry>>,
    credentials: Option<Arc<dyn CredentialsDatabase>>,
    events: Option<Arc<dyn EventSink>>,
    config: Option<ControllerConfig>,
}

impl PromotionReconcilerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the object store
    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the engine that executes promotion steps
    pub fn with_engine(mut self, engine: Arc<dyn Engine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Set the step runners. Also consulted for default step timeouts when
    /// scheduling re-polls, so pass the same registry a custom engine uses.
    pub fn with_step_runners(mut self, registry: Arc<StepRunnerRegistry>) -> Self {
        self.step_runners = Some(registry);
        self
    }

    /// Set the credentials database handed to steps. Ignored when a custom
    /// engine is supplied.
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialsDatabase>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the event sink
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Set the controller configuration
    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the reconciler
    pub fn build(self) -> Result<PromotionReconciler, BuildError> {
        let store = self.store.ok_or(BuildError::Missing("store"))?;

        let registry = self
            .step_runners
            .unwrap_or_else(|| Arc::new(StepRunnerRegistry::with_builtins()));
        let credentials = self.credentials;
        let engine = self.engine.unwrap_or_else(|| {
            let engine = LocalEngine::new(registry.clone());
            Arc::new(match credentials {
                Some(credentials) => engine.with_credentials(credentials),
                None => engine,
            })
        });
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(TracingEventSink));
        let config = self.config.unwrap_or_default();

        let requeue = RequeueScheduler::new(registry, config.default_requeue_interval());

        Ok(PromotionReconciler::new(store, engine, events, requeue, config))
    }
}
