//! Fixtures and fake engines shared by the controller's unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_engine::{
    Engine, EngineError, LocalEngine, PromotionContext, PromotionResult, Step, StepRunnerRegistry,
};
use relay_store::{InMemoryObjectStore, ObjectStore};
use relay_types::annotations::ANNOTATION_KEY_REFRESH;
use relay_types::{
    Freight, FreightOrigin, FreightRequest, ObjectKey, ObjectMeta, Promotion, PromotionPhase,
    PromotionReference, PromotionSpec, PromotionStatus, PromotionStep, Stage, StageSpec, State,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use crate::builder::PromotionReconcilerBuilder;
use crate::config::ControllerConfig;
use crate::events::RecordingEventSink;
use crate::reconciler::PromotionReconciler;

pub const NAMESPACE: &str = "relay-demo";
pub const STAGE: &str = "prod";
pub const FREIGHT: &str = "f1";
pub const WAREHOUSE: &str = "main";

pub fn freight() -> Freight {
    Freight::new(
        ObjectMeta::new(NAMESPACE, FREIGHT),
        FreightOrigin::warehouse(WAREHOUSE),
    )
}

/// A Stage requesting Freight directly from the warehouse, with `promotion`
/// as its current Promotion.
pub fn stage_awaiting(promotion: &str) -> Stage {
    let mut stage = Stage::new(
        ObjectMeta::new(NAMESPACE, STAGE),
        StageSpec {
            requested_freight: vec![FreightRequest::direct(FreightOrigin::warehouse(WAREHOUSE))],
            verification: None,
        },
    );
    stage.status.current_promotion = Some(PromotionReference::named(promotion));
    stage
}

pub fn promotion(name: &str, steps: Vec<PromotionStep>) -> Promotion {
    Promotion::new(
        ObjectMeta::new(NAMESPACE, name),
        PromotionSpec {
            stage: STAGE.into(),
            freight: FREIGHT.into(),
            vars: vec![],
            steps,
        },
    )
}

pub fn result(phase: PromotionPhase, message: Option<&str>) -> PromotionResult {
    PromotionResult {
        status: phase,
        message: message.map(str::to_string),
        current_step: 0,
        step_execution_metadata: vec![],
        state: State::new(),
        health_checks: vec![],
    }
}

/// Counts invocations of the engine it wraps
pub struct CountingEngine {
    inner: Arc<dyn Engine>,
    calls: AtomicUsize,
}

impl CountingEngine {
    pub fn new(inner: Arc<dyn Engine>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Engine for CountingEngine {
    async fn promote(
        &self,
        ctx: &PromotionContext,
        steps: &[Step],
    ) -> relay_engine::Result<PromotionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.promote(ctx, steps).await
    }
}

/// Returns queued results in order and remembers the context it was given.
/// Once the script runs out it reports success.
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    script: Arc<Mutex<VecDeque<relay_engine::Result<PromotionResult>>>>,
    last_context: Arc<Mutex<Option<PromotionContext>>>,
}

impl ScriptedEngine {
    pub fn new(script: Vec<relay_engine::Result<PromotionResult>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            last_context: Arc::default(),
        }
    }

    pub fn last_context(&self) -> Option<PromotionContext> {
        self.last_context.lock().clone()
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn promote(
        &self,
        ctx: &PromotionContext,
        _steps: &[Step],
    ) -> relay_engine::Result<PromotionResult> {
        *self.last_context.lock() = Some(ctx.clone());
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(result(PromotionPhase::Succeeded, None)))
    }
}

pub struct PanickingEngine;

#[async_trait]
impl Engine for PanickingEngine {
    async fn promote(
        &self,
        _ctx: &PromotionContext,
        _steps: &[Step],
    ) -> relay_engine::Result<PromotionResult> {
        panic!("step runner blew up");
    }
}

/// Touches the Promotion during its first run so the controller's status
/// write lands on a stale version.
pub struct MutatingEngine {
    store: Arc<InMemoryObjectStore>,
    mutated: AtomicUsize,
}

impl MutatingEngine {
    pub fn new(store: Arc<InMemoryObjectStore>) -> Self {
        Self {
            store,
            mutated: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Engine for MutatingEngine {
    async fn promote(
        &self,
        ctx: &PromotionContext,
        _steps: &[Step],
    ) -> relay_engine::Result<PromotionResult> {
        if self.mutated.fetch_add(1, Ordering::SeqCst) == 0 {
            self.store
                .annotate_promotion(
                    &ObjectKey::new(&ctx.project, &ctx.promotion),
                    ANNOTATION_KEY_REFRESH,
                    "concurrent-edit",
                )
                .map_err(|e| EngineError::Internal(e.to_string()))?;
        }
        Ok(result(PromotionPhase::Succeeded, None))
    }
}

/// Deletes the Promotion while it runs, as a user removing it mid-flight
pub struct DeletingEngine {
    store: Arc<InMemoryObjectStore>,
}

impl DeletingEngine {
    pub fn new(store: Arc<InMemoryObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Engine for DeletingEngine {
    async fn promote(
        &self,
        ctx: &PromotionContext,
        _steps: &[Step],
    ) -> relay_engine::Result<PromotionResult> {
        self.store
            .delete_promotion(&ObjectKey::new(&ctx.project, &ctx.promotion))
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        Ok(result(PromotionPhase::Succeeded, None))
    }
}

/// A reconciler over an in-memory store with recorded events and a
/// temporary workspace root
pub struct Harness {
    pub store: Arc<InMemoryObjectStore>,
    pub events: Arc<RecordingEventSink>,
    pub engine: Arc<CountingEngine>,
    pub reconciler: PromotionReconciler,
    _workspace_root: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_engine(LocalEngine::new(Arc::new(StepRunnerRegistry::with_builtins())))
    }

    pub fn with_engine(engine: impl Engine + 'static) -> Self {
        Self::with_store_and_engine(Arc::new(InMemoryObjectStore::new()), engine)
    }

    pub fn with_store_and_engine(
        store: Arc<InMemoryObjectStore>,
        engine: impl Engine + 'static,
    ) -> Self {
        let workspace_root = tempfile::tempdir().unwrap();
        let events = Arc::new(RecordingEventSink::new());
        let engine = Arc::new(CountingEngine::new(Arc::new(engine)));
        let config = ControllerConfig {
            api_server_base_url: "https://relay.example.com".into(),
            workspace_root: workspace_root.path().to_path_buf(),
            ..Default::default()
        };
        let reconciler = PromotionReconcilerBuilder::new()
            .with_store(store.clone())
            .with_engine(engine.clone())
            .with_event_sink(events.clone())
            .with_config(config)
            .build()
            .unwrap();
        Self {
            store,
            events,
            engine,
            reconciler,
            _workspace_root: workspace_root,
        }
    }

    /// Stage awaiting `name`, the Freight, and the Promotion itself.
    pub fn seed(&self, name: &str, steps: Vec<PromotionStep>) {
        self.store.put_stage(stage_awaiting(name)).unwrap();
        self.seed_promotion_only(name, steps);
    }

    pub fn seed_with_annotations(
        &self,
        name: &str,
        steps: Vec<PromotionStep>,
        annotations: &[(&str, &str)],
    ) {
        self.store.put_stage(stage_awaiting(name)).unwrap();
        self.store.put_freight(freight()).unwrap();
        let mut p = promotion(name, steps);
        for (k, v) in annotations {
            p.metadata.annotations.insert(k.to_string(), v.to_string());
        }
        self.store.create_promotion(p).unwrap();
    }

    /// The Freight and the Promotion, leaving the Stage to the caller.
    pub fn seed_promotion_only(&self, name: &str, steps: Vec<PromotionStep>) {
        self.store.put_freight(freight()).unwrap();
        self.store.create_promotion(promotion(name, steps)).unwrap();
    }

    pub fn set_current_promotion(&self, name: Option<&str>) {
        let mut stage = stage_awaiting("");
        stage.status.current_promotion = name.map(PromotionReference::named);
        self.store.put_stage(stage).unwrap();
    }

    pub async fn promotion(&self, name: &str) -> Promotion {
        self.store
            .get_promotion(&ObjectKey::new(NAMESPACE, name))
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn set_status(&self, name: &str, status: PromotionStatus) {
        let current = self.promotion(name).await;
        self.store
            .update_promotion_status(
                &current.metadata.key(),
                current.metadata.resource_version,
                status,
            )
            .await
            .unwrap();
    }
}
