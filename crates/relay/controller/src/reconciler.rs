//! Promotion lifecycle reconciler
//!
//! Drives a Promotion from creation to a terminal phase. Each call to
//! [`PromotionReconciler::reconcile`] reads the current state from the store,
//! advances the Promotion as far as it can and persists the result with a
//! compare-and-swap write, so the same key may be reconciled any number of
//! times, including after a restart.
//!
//! A Promotion only executes while its Stage names it as the current
//! Promotion. Until then it stays Pending and the Stage watch re-enqueues it
//! once the Stage acknowledges it.

use chrono::Utc;
use futures::FutureExt;
use relay_engine::{Engine, PromotionContext, Step};
use relay_store::{ObjectStore, StoreError, MAX_MESSAGE_LENGTH};
use relay_types::annotations::{
    self, controller_actor, EVENT_ANNOTATION_ACTOR, EVENT_ANNOTATION_VERIFICATION_PENDING,
    EVENT_REASON_PROMOTION_ABORTED, EVENT_REASON_PROMOTION_ERRORED,
    EVENT_REASON_PROMOTION_FAILED, EVENT_REASON_PROMOTION_SUCCEEDED,
};
use relay_types::{
    AbortAction, AbortPromotionRequest, Freight, FreightReference, ObjectKey, Promotion,
    PromotionPhase, PromotionStatus, Stage,
};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::abort::{abort_actor, terminated_status};
use crate::config::ControllerConfig;
use crate::error::{PromoteError, ReconcileError, Result};
use crate::events::{promotion_annotations, EventSink, EventType};
use crate::freight_collection::build_freight_collection;
use crate::requeue::RequeueScheduler;
use crate::workspace::WorkspaceManager;

/// What the caller should do after a successful reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileOutcome {
    pub requeue_after: Option<Duration>,
}

impl ReconcileOutcome {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
        }
    }
}

/// Reconciles Promotions. Holds no state between reconciles.
pub struct PromotionReconciler {
    store: Arc<dyn ObjectStore>,
    engine: Arc<dyn Engine>,
    events: Arc<dyn EventSink>,
    workspaces: WorkspaceManager,
    requeue: RequeueScheduler,
    config: ControllerConfig,
}

impl PromotionReconciler {
    pub(crate) fn new(
        store: Arc<dyn ObjectStore>,
        engine: Arc<dyn Engine>,
        events: Arc<dyn EventSink>,
        requeue: RequeueScheduler,
        config: ControllerConfig,
    ) -> Self {
        Self {
            workspaces: WorkspaceManager::new(config.workspace_root.clone()),
            store,
            engine,
            events,
            requeue,
            config,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Advance the Promotion identified by `key`.
    ///
    /// Infrastructure failures are returned so the caller can retry with
    /// backoff. Problems with the Promotion itself end up in its status.
    #[instrument(skip(self, key), fields(promotion = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome> {
        let Some(mut promotion) = self.store.get_promotion(key).await? else {
            debug!("Promotion not found");
            return Ok(ReconcileOutcome::done());
        };
        if promotion.status.is_terminal() {
            return Ok(ReconcileOutcome::done());
        }

        let freight_key = ObjectKey::new(&key.namespace, &promotion.spec.freight);
        let freight = self.store.get_freight(&freight_key).await?;

        match annotations::abort_request(&promotion.metadata.annotations) {
            Ok(Some(request)) => match request.action {
                AbortAction::Terminate => {
                    self.terminate(&request, &promotion, freight.as_ref()).await?;
                    return Ok(ReconcileOutcome::done());
                }
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "ignoring malformed abort request"),
        }

        if promotion.status.phase.is_none() {
            let mut status = promotion.status.clone();
            status.phase = Some(PromotionPhase::Pending);
            self.write_status(&mut promotion, status).await?;
        }
        let initial_phase = promotion.status.phase;

        let stage_key = ObjectKey::new(&key.namespace, &promotion.spec.stage);
        let stage = self
            .store
            .get_stage(&stage_key)
            .await?
            .ok_or(ReconcileError::StageNotFound(stage_key))?;

        if stage.current_promotion_name() != Some(promotion.metadata.name.as_str()) {
            debug!(stage = %stage.metadata.name, "Stage is not awaiting Promotion");
            return Ok(ReconcileOutcome::done());
        }

        if promotion.status.phase != Some(PromotionPhase::Running) {
            let mut status = promotion.status.clone();
            status.phase = Some(PromotionPhase::Running);
            status.started_at = Some(Utc::now());
            self.write_status(&mut promotion, status).await?;
            info!("began promotion");
        } else {
            debug!("continuing promotion");
        }

        let promoted = AssertUnwindSafe(self.promote(&promotion, &stage, freight.as_ref()))
            .catch_unwind()
            .await;
        let mut new_status = match promoted {
            Ok(Ok(status)) => status,
            Ok(Err(err)) => {
                error!(error = %err, "error executing Promotion");
                errored(&promotion.status, err.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(%message, "Promotion panic");
                if let Err(e) = self.workspaces.release(&promotion.metadata.uid).await {
                    error!(error = %e, "could not remove working directory");
                }
                errored(&promotion.status, message)
            }
        };

        if new_status.is_terminal() {
            new_status.finished_at = Some(Utc::now());
            info!(phase = ?new_status.phase, "promotion finished");
        }
        if let Some(token) = annotations::refresh_token(&promotion.metadata.annotations) {
            new_status.last_handled_refresh = Some(token.to_string());
        }

        let persisted = match self.persist(&promotion, new_status).await {
            Ok(persisted) => persisted,
            Err(err) if err.is_retryable() => return Err(err.into()),
            Err(err) => {
                warn!(error = %err, "dropping Promotion status update that cannot succeed on retry");
                return Ok(ReconcileOutcome::done());
            }
        };

        if persisted.is_terminal() && persisted.phase != initial_phase {
            self.emit_terminal_event(&promotion, &stage, freight.as_ref(), &persisted);
        }

        if persisted.phase == Some(PromotionPhase::Running) {
            let mut view = promotion;
            view.status = persisted;
            let delay = self.requeue.next_delay(&view, Utc::now());
            debug!(?delay, "promotion still running");
            return Ok(ReconcileOutcome::requeue_after(delay));
        }
        Ok(ReconcileOutcome::done())
    }

    /// Run the Promotion's steps through the engine and return the status
    /// that results. The Promotion itself is not modified.
    #[instrument(skip_all, fields(stage = %stage.metadata.name, freight = %promotion.spec.freight))]
    pub async fn promote(
        &self,
        promotion: &Promotion,
        stage: &Stage,
        freight: Option<&Freight>,
    ) -> std::result::Result<PromotionStatus, PromoteError> {
        let namespace = &promotion.metadata.namespace;
        let freight = freight.ok_or_else(|| PromoteError::FreightNotFound {
            freight: promotion.spec.freight.clone(),
            namespace: namespace.clone(),
        })?;
        if !stage.is_freight_available(freight) {
            return Err(PromoteError::FreightNotAvailable {
                freight: promotion.spec.freight.clone(),
                stage: stage.metadata.name.clone(),
                namespace: namespace.clone(),
            });
        }

        let target = freight.reference();
        let collection = build_freight_collection(&target, stage);

        let mut status = promotion.status.clone();
        status.freight = Some(target.clone());
        status.freight_collection = Some(collection.clone());

        let steps = Step::from_promotion_steps(&promotion.spec.steps);

        let uid = &promotion.metadata.uid;
        let workspace = self
            .workspaces
            .acquire(uid)
            .await
            .map_err(|source| PromoteError::Workspace {
                path: self.workspaces.path_for(uid),
                source,
            })?;
        if workspace.is_fresh() {
            // Shared state survives; steps use it to discover their own
            // earlier runs.
            status.current_step = 0;
            status.step_execution_metadata.clear();
            status.health_checks.clear();
        }

        let ctx = PromotionContext {
            ui_base_url: self.config.api_server_base_url.clone(),
            workspace: workspace.path.clone(),
            project: namespace.clone(),
            stage: stage.metadata.name.clone(),
            promotion: promotion.metadata.name.clone(),
            freight_requests: stage.spec.requested_freight.clone(),
            freight: collection,
            target_freight: target.clone(),
            start_from_step: status.current_step,
            step_execution_metadata: status.step_execution_metadata.clone(),
            state: status.state.clone(),
            vars: promotion.spec.vars.clone(),
            actor: annotations::create_actor(&promotion.metadata.annotations),
        };

        match self.engine.promote(&ctx, &steps).await {
            Ok(result) => {
                status.phase = Some(result.status);
                status.message = result.message;
                status.current_step = result.current_step;
                status.step_execution_metadata = result.step_execution_metadata;
                status.state = result.state;
                status.health_checks.extend(result.health_checks);
            }
            Err(err) => {
                error!(error = %err, "engine error");
                status.phase = Some(PromotionPhase::Errored);
                status.message = Some(err.to_string());
            }
        }
        debug!(phase = ?status.phase, "promotion");

        if status.phase == Some(PromotionPhase::Succeeded) {
            self.reverify_if_repromoted(stage, &target).await;
        }

        if status.is_terminal() {
            if let Err(e) = self.workspaces.release(uid).await {
                error!(error = %e, path = ?workspace.path, "could not remove working directory");
            }
        }

        Ok(status)
    }

    /// Terminate a Promotion on request. Terminal Promotions are left alone.
    #[instrument(skip_all, fields(promotion = %promotion.metadata.name))]
    pub async fn terminate(
        &self,
        request: &AbortPromotionRequest,
        promotion: &Promotion,
        freight: Option<&Freight>,
    ) -> Result<()> {
        if promotion.status.is_terminal() {
            debug!(phase = ?promotion.status.phase, "can not terminate Promotion in terminal phase");
            return Ok(());
        }
        info!("terminating Promotion");

        // The abort is attributed to whoever asked for it, not to the
        // Promotion's creator.
        let actor = abort_actor(request, &self.config.name());
        let status = terminated_status(&promotion.status, &actor, Utc::now());

        self.store
            .update_promotion_status(
                &promotion.metadata.key(),
                promotion.metadata.resource_version,
                status.clone(),
            )
            .await?;

        if let Err(e) = self.workspaces.release(&promotion.metadata.uid).await {
            warn!(error = %e, "could not remove working directory");
        }

        let mut annotations = promotion_annotations(None, promotion, freight);
        annotations.insert(EVENT_ANNOTATION_ACTOR.to_string(), actor);
        self.events.emit_annotated(
            &promotion.metadata,
            annotations,
            EventType::Normal,
            EVENT_REASON_PROMOTION_ABORTED,
            status.message.as_deref().unwrap_or_default(),
        );
        Ok(())
    }

    async fn write_status(&self, promotion: &mut Promotion, status: PromotionStatus) -> Result<()> {
        let version = self
            .store
            .update_promotion_status(
                &promotion.metadata.key(),
                promotion.metadata.resource_version,
                status.clone(),
            )
            .await?;
        promotion.metadata.resource_version = version;
        promotion.status = status;
        Ok(())
    }

    /// Write the final status of this reconcile. A status the store rejects
    /// as invalid is replaced by an Errored status explaining why, so the
    /// Promotion cannot get stuck retrying the same bad write.
    async fn persist(
        &self,
        promotion: &Promotion,
        status: PromotionStatus,
    ) -> std::result::Result<PromotionStatus, StoreError> {
        let key = promotion.metadata.key();
        let version = promotion.metadata.resource_version;

        let err = match self
            .store
            .update_promotion_status(&key, version, status.clone())
            .await
        {
            Ok(_) => return Ok(status),
            Err(err) => err,
        };
        error!(error = %err, "error updating Promotion status");
        if !err.is_invalid() {
            return Err(err);
        }

        let mut fallback = errored(
            &promotion.status,
            format!("error updating status: {err}"),
        );
        fallback.finished_at = Some(Utc::now());
        fallback.last_handled_refresh = status.last_handled_refresh;
        self.store
            .update_promotion_status(&key, version, fallback.clone())
            .await
            .inspect_err(|e| error!(error = %e, "error marking Promotion as errored"))?;
        Ok(fallback)
    }

    async fn reverify_if_repromoted(&self, stage: &Stage, target: &FreightReference) {
        let Some(current) = stage.current_freight() else {
            return;
        };
        if current.verification_history.is_empty() || !current.contains_freight(&target.name) {
            return;
        }
        debug!(stage = %stage.metadata.name, "re-promotion of verified Freight, requesting re-verification");
        if let Err(e) = self
            .store
            .request_stage_reverification(&stage.metadata.key())
            .await
        {
            error!(error = %e, "error triggering re-verification");
        }
    }

    fn emit_terminal_event(
        &self,
        promotion: &Promotion,
        stage: &Stage,
        freight: Option<&Freight>,
        status: &PromotionStatus,
    ) {
        let Some(phase) = status.phase else {
            return;
        };
        // A step may end the Promotion as Aborted on its own; that is
        // announced here, while requested aborts are announced by terminate.
        let reason = match phase {
            PromotionPhase::Succeeded => EVENT_REASON_PROMOTION_SUCCEEDED,
            PromotionPhase::Failed => EVENT_REASON_PROMOTION_FAILED,
            PromotionPhase::Errored => EVENT_REASON_PROMOTION_ERRORED,
            PromotionPhase::Aborted => EVENT_REASON_PROMOTION_ABORTED,
            PromotionPhase::Pending | PromotionPhase::Running => return,
        };

        let mut message = format!("Promotion {phase}");
        if let Some(detail) = status.message.as_deref().filter(|m| !m.is_empty()) {
            message.push_str(": ");
            message.push_str(detail);
        }

        let actor = controller_actor(&self.config.name());
        let mut annotations = promotion_annotations(Some(&actor), promotion, freight);
        if phase == PromotionPhase::Succeeded {
            annotations.insert(
                EVENT_ANNOTATION_VERIFICATION_PENDING.to_string(),
                stage.spec.verification.is_some().to_string(),
            );
        }
        self.events.emit_annotated(
            &promotion.metadata,
            annotations,
            EventType::Normal,
            reason,
            &message,
        );
    }
}

/// `status` moved to Errored with `message`, cut to what the store accepts.
fn errored(status: &PromotionStatus, message: String) -> PromotionStatus {
    let mut errored = status.clone();
    errored.phase = Some(PromotionPhase::Errored);
    errored.message = Some(truncate(message, MAX_MESSAGE_LENGTH));
    errored
}

fn truncate(mut message: String, limit: usize) -> String {
    if message.len() > limit {
        let mut end = limit;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    message
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "promotion panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use relay_store::InMemoryObjectStore;
    use relay_types::annotations::{
        ANNOTATION_KEY_ABORT, ANNOTATION_KEY_CREATE_ACTOR, ANNOTATION_KEY_REFRESH,
        ANNOTATION_KEY_REVERIFY,
    };
    use relay_types::{
        FreightCollection, HealthCheckStep, PromotionStep, StepExecutionMetadata, StepStatus,
        VerificationInfo, VerificationSpec,
    };
    use serde_json::json;

    async fn phase(store: &InMemoryObjectStore, name: &str) -> Option<PromotionPhase> {
        store
            .get_promotion(&ObjectKey::new(NAMESPACE, name))
            .await
            .unwrap()
            .unwrap()
            .status
            .phase
    }

    #[tokio::test]
    async fn test_noop_promotion_end_to_end() {
        let h = Harness::new();
        h.seed("p1", vec![PromotionStep::uses("noop")]);
        let key = ObjectKey::new(NAMESPACE, "p1");
        let uid = h.promotion("p1").await.metadata.uid;

        let outcome = h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::done());

        let promotion = h.promotion("p1").await;
        assert_eq!(promotion.status.phase, Some(PromotionPhase::Succeeded));
        assert!(promotion.status.started_at.is_some());
        assert!(promotion.status.finished_at.is_some());
        assert_eq!(promotion.status.current_step, 1);
        assert_eq!(
            promotion.status.freight.as_ref().map(|f| f.name.as_str()),
            Some(FREIGHT)
        );
        assert_eq!(h.engine.calls(), 1);
        assert_eq!(h.events.reasons(), vec![EVENT_REASON_PROMOTION_SUCCEEDED]);
        assert_eq!(
            h.events.events()[0].annotations[EVENT_ANNOTATION_VERIFICATION_PENDING],
            "false"
        );
        assert!(!h.reconciler.workspaces().path_for(&uid).exists());

        // Duplicate trigger.
        let outcome = h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::done());
        assert_eq!(h.engine.calls(), 1);
        assert_eq!(h.events.len(), 1);
    }

    #[tokio::test]
    async fn test_phase_trajectory_is_monotonic() {
        let h = Harness::new();
        h.seed("p1", vec![PromotionStep::uses("noop")]);
        let mut watch = h.store.watch();

        h.reconciler
            .reconcile(&ObjectKey::new(NAMESPACE, "p1"))
            .await
            .unwrap();

        let mut phases = Vec::new();
        while let Ok(event) = watch.try_recv() {
            if let relay_store::WatchEvent::Promotion(change) = event {
                phases.push(change.new.status.phase);
            }
        }
        assert_eq!(
            phases,
            vec![
                Some(PromotionPhase::Pending),
                Some(PromotionPhase::Running),
                Some(PromotionPhase::Succeeded)
            ]
        );
    }

    #[tokio::test]
    async fn test_admission_gate() {
        let h = Harness::new();
        h.seed("p1", vec![PromotionStep::uses("noop")]);
        h.set_current_promotion(Some("someone-else"));
        let key = ObjectKey::new(NAMESPACE, "p1");

        for _ in 0..3 {
            let outcome = h.reconciler.reconcile(&key).await.unwrap();
            assert_eq!(outcome, ReconcileOutcome::done());
        }
        assert_eq!(phase(&h.store, "p1").await, Some(PromotionPhase::Pending));
        assert_eq!(h.engine.calls(), 0);
        assert!(h.events.is_empty());

        h.set_current_promotion(None);
        h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(phase(&h.store, "p1").await, Some(PromotionPhase::Pending));
        assert_eq!(h.engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_stage_is_retried() {
        let h = Harness::new();
        h.seed("p1", vec![PromotionStep::uses("noop")]);
        let mut promotion = h.promotion("p1").await;
        promotion.metadata.name = "p2".into();
        promotion.spec.stage = "missing".into();
        promotion.metadata.uid = Default::default();
        h.store.create_promotion(promotion).unwrap();

        let err = h
            .reconciler
            .reconcile(&ObjectKey::new(NAMESPACE, "p2"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::StageNotFound(_)));
        assert_eq!(phase(&h.store, "p2").await, Some(PromotionPhase::Pending));
    }

    #[tokio::test]
    async fn test_missing_promotion_is_noop() {
        let h = Harness::new();
        let outcome = h
            .reconciler
            .reconcile(&ObjectKey::new(NAMESPACE, "ghost"))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::done());
    }

    #[tokio::test]
    async fn test_missing_freight_errors_promotion() {
        let h = Harness::new();
        h.seed("p1", vec![PromotionStep::uses("noop")]);
        let mut promotion = h.promotion("p1").await;
        promotion.metadata.name = "p2".into();
        promotion.metadata.uid = Default::default();
        promotion.spec.freight = "does-not-exist".into();
        h.store.create_promotion(promotion).unwrap();
        h.set_current_promotion(Some("p2"));

        h.reconciler
            .reconcile(&ObjectKey::new(NAMESPACE, "p2"))
            .await
            .unwrap();

        let promotion = h.promotion("p2").await;
        assert_eq!(promotion.status.phase, Some(PromotionPhase::Errored));
        assert!(promotion.status.message.unwrap().contains("not found"));
        assert_eq!(h.engine.calls(), 0);
        assert_eq!(h.events.reasons(), vec![EVENT_REASON_PROMOTION_ERRORED]);
    }

    #[tokio::test]
    async fn test_unavailable_freight_errors_promotion() {
        let h = Harness::new();
        let mut stage = stage_awaiting("p1");
        stage.spec.requested_freight[0].sources.direct = false;
        stage.spec.requested_freight[0].sources.stages = vec!["test".into()];
        h.store.put_stage(stage).unwrap();
        h.seed_promotion_only("p1", vec![PromotionStep::uses("noop")]);

        h.reconciler
            .reconcile(&ObjectKey::new(NAMESPACE, "p1"))
            .await
            .unwrap();

        let promotion = h.promotion("p1").await;
        assert_eq!(promotion.status.phase, Some(PromotionPhase::Errored));
        assert!(promotion.status.message.unwrap().contains("not available"));
    }

    #[tokio::test]
    async fn test_failed_step() {
        let h = Harness::with_engine(ScriptedEngine::new(vec![Ok(result(
            PromotionPhase::Failed,
            Some("step \"deploy\" failed: boom"),
        ))]));
        h.seed("p1", vec![PromotionStep::uses("noop")]);

        h.reconciler
            .reconcile(&ObjectKey::new(NAMESPACE, "p1"))
            .await
            .unwrap();

        assert_eq!(phase(&h.store, "p1").await, Some(PromotionPhase::Failed));
        let events = h.events.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, EVENT_REASON_PROMOTION_FAILED);
        assert_eq!(events[0].message, "Promotion Failed: step \"deploy\" failed: boom");
    }

    #[tokio::test]
    async fn test_engine_error_errors_promotion() {
        let h = Harness::with_engine(ScriptedEngine::new(vec![Err(
            relay_engine::EngineError::Internal("exploded".into()),
        )]));
        h.seed("p1", vec![PromotionStep::uses("noop")]);

        h.reconciler
            .reconcile(&ObjectKey::new(NAMESPACE, "p1"))
            .await
            .unwrap();

        let promotion = h.promotion("p1").await;
        assert_eq!(promotion.status.phase, Some(PromotionPhase::Errored));
        assert_eq!(promotion.status.message.as_deref(), Some("engine error: exploded"));
    }

    #[tokio::test]
    async fn test_panic_becomes_errored() {
        let h = Harness::with_engine(PanickingEngine);
        h.seed("p1", vec![PromotionStep::uses("noop")]);
        let uid = h.promotion("p1").await.metadata.uid;

        let outcome = h
            .reconciler
            .reconcile(&ObjectKey::new(NAMESPACE, "p1"))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::done());

        let promotion = h.promotion("p1").await;
        assert_eq!(promotion.status.phase, Some(PromotionPhase::Errored));
        assert_eq!(promotion.status.message.as_deref(), Some("step runner blew up"));
        assert_eq!(h.events.reasons(), vec![EVENT_REASON_PROMOTION_ERRORED]);
        assert!(!h.reconciler.workspaces().path_for(&uid).exists());
    }

    #[tokio::test]
    async fn test_running_promotion_requeues() {
        let h = Harness::new();
        let mut wait = PromotionStep::uses("wait");
        wait.config = Some(json!({"duration": 3600}));
        h.seed("p1", vec![wait]);

        let outcome = h
            .reconciler
            .reconcile(&ObjectKey::new(NAMESPACE, "p1"))
            .await
            .unwrap();

        // The wait runner's one hour timeout is further out than the
        // default interval.
        assert_eq!(outcome.requeue_after, Some(Duration::from_secs(300)));
        let promotion = h.promotion("p1").await;
        assert_eq!(promotion.status.phase, Some(PromotionPhase::Running));
        assert_eq!(promotion.status.step_execution_metadata.len(), 1);
        assert!(h.events.is_empty());
        assert!(h
            .reconciler
            .workspaces()
            .path_for(&promotion.metadata.uid)
            .exists());
    }

    #[tokio::test]
    async fn test_fresh_workspace_restarts_from_first_step() {
        let engine = ScriptedEngine::new(vec![Ok(result(PromotionPhase::Running, None))]);
        let h = Harness::with_engine(engine.clone());
        h.seed("p1", vec![PromotionStep::uses("noop"), PromotionStep::uses("noop")]);
        h.set_status("p1", in_progress_status()).await;

        h.reconciler
            .reconcile(&ObjectKey::new(NAMESPACE, "p1"))
            .await
            .unwrap();

        let ctx = engine.last_context().unwrap();
        assert_eq!(ctx.start_from_step, 0);
        assert!(ctx.step_execution_metadata.is_empty());
        assert_eq!(ctx.state.get("clone"), Some(&json!({"commit": "abc"})));
        assert!(h.promotion("p1").await.status.health_checks.is_empty());
    }

    #[tokio::test]
    async fn test_existing_workspace_resumes() {
        let engine = ScriptedEngine::new(vec![Ok(result(PromotionPhase::Running, None))]);
        let h = Harness::with_engine(engine.clone());
        h.seed("p1", vec![PromotionStep::uses("noop"), PromotionStep::uses("noop")]);
        h.set_status("p1", in_progress_status()).await;
        let uid = h.promotion("p1").await.metadata.uid;
        h.reconciler.workspaces().acquire(&uid).await.unwrap();

        h.reconciler
            .reconcile(&ObjectKey::new(NAMESPACE, "p1"))
            .await
            .unwrap();

        let ctx = engine.last_context().unwrap();
        assert_eq!(ctx.start_from_step, 1);
        assert_eq!(ctx.step_execution_metadata.len(), 2);
        assert_eq!(h.promotion("p1").await.status.health_checks.len(), 1);
    }

    #[tokio::test]
    async fn test_engine_receives_promotion_context() {
        let engine = ScriptedEngine::new(vec![Ok(result(PromotionPhase::Succeeded, None))]);
        let h = Harness::with_engine(engine.clone());
        h.seed_with_annotations(
            "p1",
            vec![PromotionStep::uses("noop")],
            &[(ANNOTATION_KEY_CREATE_ACTOR, "email:alice@example.com")],
        );

        h.reconciler
            .reconcile(&ObjectKey::new(NAMESPACE, "p1"))
            .await
            .unwrap();

        let ctx = engine.last_context().unwrap();
        assert_eq!(ctx.project, NAMESPACE);
        assert_eq!(ctx.stage, STAGE);
        assert_eq!(ctx.promotion, "p1");
        assert_eq!(ctx.actor.as_deref(), Some("alice@example.com"));
        assert_eq!(ctx.target_freight.name, FREIGHT);
        assert_eq!(ctx.freight.len(), 1);
        assert_eq!(ctx.ui_base_url, "https://relay.example.com");
        assert!(ctx
            .workspace
            .starts_with(h.reconciler.workspaces().root()));
    }

    #[tokio::test]
    async fn test_abort_running_promotion() {
        let h = Harness::new();
        let mut wait = PromotionStep::uses("wait");
        wait.config = Some(json!({"duration": 3600}));
        h.seed("p1", vec![wait]);
        let key = ObjectKey::new(NAMESPACE, "p1");
        h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(phase(&h.store, "p1").await, Some(PromotionPhase::Running));

        h.store
            .annotate_promotion(
                &key,
                ANNOTATION_KEY_ABORT,
                &AbortPromotionRequest::terminate(Some("admin".into())).to_annotation_value(),
            )
            .unwrap();
        h.reconciler.reconcile(&key).await.unwrap();

        let promotion = h.promotion("p1").await;
        assert_eq!(promotion.status.phase, Some(PromotionPhase::Aborted));
        assert_eq!(
            promotion.status.message.as_deref(),
            Some("Promotion terminated by admin")
        );
        assert_eq!(
            promotion.status.step_execution_metadata[0].status,
            StepStatus::Aborted
        );
        assert!(promotion.status.finished_at.is_some());

        let events = h.events.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, EVENT_REASON_PROMOTION_ABORTED);
        assert_eq!(events[0].annotations[EVENT_ANNOTATION_ACTOR], "admin");

        // Handled once; the terminal phase stops any further processing.
        h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(h.events.len(), 1);
        assert_eq!(h.engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_abort_pending_promotion_without_actor() {
        let h = Harness::new();
        h.seed_with_annotations(
            "p1",
            vec![PromotionStep::uses("noop")],
            &[(
                ANNOTATION_KEY_ABORT,
                &AbortPromotionRequest::terminate(None).to_annotation_value(),
            )],
        );

        h.reconciler
            .reconcile(&ObjectKey::new(NAMESPACE, "p1"))
            .await
            .unwrap();

        let promotion = h.promotion("p1").await;
        assert_eq!(promotion.status.phase, Some(PromotionPhase::Aborted));
        assert_eq!(
            promotion.status.message.as_deref(),
            Some("Promotion terminated by controller:promotion-controller")
        );
        assert_eq!(h.engine.calls(), 0);
        assert_eq!(
            h.events.events()[0].annotations[EVENT_ANNOTATION_ACTOR],
            "controller:promotion-controller"
        );
    }

    #[tokio::test]
    async fn test_terminate_terminal_promotion_is_noop() {
        let h = Harness::new();
        h.seed("p1", vec![PromotionStep::uses("noop")]);
        h.reconciler
            .reconcile(&ObjectKey::new(NAMESPACE, "p1"))
            .await
            .unwrap();
        let before = h.promotion("p1").await;
        assert_eq!(before.status.phase, Some(PromotionPhase::Succeeded));

        h.reconciler
            .terminate(&AbortPromotionRequest::terminate(None), &before, None)
            .await
            .unwrap();

        let after = h.promotion("p1").await;
        assert_eq!(after.status, before.status);
        assert_eq!(after.metadata.resource_version, before.metadata.resource_version);
        assert_eq!(h.events.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_abort_is_ignored() {
        let h = Harness::new();
        h.seed_with_annotations(
            "p1",
            vec![PromotionStep::uses("noop")],
            &[(ANNOTATION_KEY_ABORT, "not json")],
        );

        h.reconciler
            .reconcile(&ObjectKey::new(NAMESPACE, "p1"))
            .await
            .unwrap();
        assert_eq!(phase(&h.store, "p1").await, Some(PromotionPhase::Succeeded));
    }

    #[tokio::test]
    async fn test_invalid_status_falls_back_to_errored() {
        let long = "x".repeat(MAX_MESSAGE_LENGTH + 10);
        let h = Harness::with_engine(ScriptedEngine::new(vec![Ok(result(
            PromotionPhase::Failed,
            Some(&long),
        ))]));
        h.seed("p1", vec![PromotionStep::uses("noop")]);

        h.reconciler
            .reconcile(&ObjectKey::new(NAMESPACE, "p1"))
            .await
            .unwrap();

        let promotion = h.promotion("p1").await;
        assert_eq!(promotion.status.phase, Some(PromotionPhase::Errored));
        let message = promotion.status.message.unwrap();
        assert!(message.starts_with("error updating status:"));
        assert!(message.len() <= MAX_MESSAGE_LENGTH);
        assert_eq!(h.events.reasons(), vec![EVENT_REASON_PROMOTION_ERRORED]);
    }

    #[tokio::test]
    async fn test_conflicting_write_is_retried_without_event() {
        let store = Arc::new(InMemoryObjectStore::new());
        let engine = MutatingEngine::new(store.clone());
        let h = Harness::with_store_and_engine(store, engine);
        h.seed("p1", vec![PromotionStep::uses("noop")]);
        let key = ObjectKey::new(NAMESPACE, "p1");

        let err = h.reconciler.reconcile(&key).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(phase(&h.store, "p1").await, Some(PromotionPhase::Running));
        assert!(h.events.is_empty());

        // The next attempt reads the newer version and completes.
        h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(phase(&h.store, "p1").await, Some(PromotionPhase::Succeeded));
        assert_eq!(h.events.len(), 1);
    }

    #[tokio::test]
    async fn test_step_abort_is_announced_by_controller() {
        let h = Harness::with_engine(ScriptedEngine::new(vec![Ok(result(
            PromotionPhase::Aborted,
            Some("step \"gate\" was aborted: change window closed"),
        ))]));
        h.seed("p1", vec![PromotionStep::uses("noop")]);

        h.reconciler
            .reconcile(&ObjectKey::new(NAMESPACE, "p1"))
            .await
            .unwrap();

        assert_eq!(phase(&h.store, "p1").await, Some(PromotionPhase::Aborted));
        let events = h.events.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, EVENT_REASON_PROMOTION_ABORTED);
        assert!(events[0].message.starts_with("Promotion Aborted: step"));
        assert_eq!(
            events[0].annotations[EVENT_ANNOTATION_ACTOR],
            "controller:promotion-controller"
        );
    }

    #[tokio::test]
    async fn test_promotion_deleted_mid_reconcile_is_dropped() {
        let store = Arc::new(InMemoryObjectStore::new());
        let engine = DeletingEngine::new(store.clone());
        let h = Harness::with_store_and_engine(store, engine);
        h.seed("p1", vec![PromotionStep::uses("noop")]);
        let key = ObjectKey::new(NAMESPACE, "p1");

        let outcome = h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::done());
        assert_eq!(h.engine.calls(), 1);
        assert!(h.store.get_promotion(&key).await.unwrap().is_none());
        assert!(h.events.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_is_returned() {
        let h = Harness::new();
        h.seed("p1", vec![PromotionStep::uses("noop")]);
        h.store.set_available(false);

        let err = h
            .reconciler
            .reconcile(&ObjectKey::new(NAMESPACE, "p1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Store(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_refresh_token_recorded() {
        let h = Harness::new();
        h.seed_with_annotations(
            "p1",
            vec![PromotionStep::uses("noop")],
            &[(ANNOTATION_KEY_REFRESH, "token-1")],
        );

        h.reconciler
            .reconcile(&ObjectKey::new(NAMESPACE, "p1"))
            .await
            .unwrap();
        assert_eq!(
            h.promotion("p1").await.status.last_handled_refresh.as_deref(),
            Some("token-1")
        );
    }

    #[tokio::test]
    async fn test_repromotion_of_verified_freight_requests_reverification() {
        let h = Harness::new();
        let mut stage = stage_awaiting("p1");
        stage.spec.verification = Some(VerificationSpec::default());
        let mut current = FreightCollection::new();
        current.update_or_push(freight().reference());
        current.verification_history.push(VerificationInfo {
            id: "v-1".into(),
            phase: "Successful".into(),
            started_at: None,
        });
        stage.status.freight_history.push(current);
        h.store.put_stage(stage).unwrap();
        h.seed_promotion_only("p1", vec![PromotionStep::uses("noop")]);

        h.reconciler
            .reconcile(&ObjectKey::new(NAMESPACE, "p1"))
            .await
            .unwrap();

        let stage = h
            .store
            .get_stage(&ObjectKey::new(NAMESPACE, STAGE))
            .await
            .unwrap()
            .unwrap();
        assert!(stage.metadata.annotations.contains_key(ANNOTATION_KEY_REVERIFY));
        assert_eq!(
            h.events.events()[0].annotations[EVENT_ANNOTATION_VERIFICATION_PENDING],
            "true"
        );
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let message = "é".repeat(10);
        let cut = truncate(message, 5);
        assert_eq!(cut, "éé");
    }

    fn in_progress_status() -> PromotionStatus {
        let mut state = relay_types::State::new();
        state.insert("clone".into(), json!({"commit": "abc"}));
        PromotionStatus {
            phase: Some(PromotionPhase::Running),
            current_step: 1,
            step_execution_metadata: vec![
                StepExecutionMetadata {
                    status: StepStatus::Succeeded,
                    ..StepExecutionMetadata::started("step-0", Utc::now())
                },
                StepExecutionMetadata::started("step-1", Utc::now()),
            ],
            state,
            health_checks: vec![HealthCheckStep {
                uses: "argocd-update".into(),
                config: None,
            }],
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }
}
