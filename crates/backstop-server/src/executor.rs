use crate::deploy::{DeployError, DeploymentApi};
use crate::store::{RollbackStateStore, StoreError};
use crate::telemetry::ControllerMetrics;
use crate::unix_millis;
use backstop_engine::ControllerConfig;
use backstop_model::{
    RollbackDecision, RollbackId, RollbackRecord, RollbackStatus, ServiceName, TriggeredBy,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Drives approved rollback decisions through the deployment API.
///
/// `execute` returns as soon as the attempt is admitted (or skipped); the
/// canary rollout itself runs on a detached task bounded by the configured
/// execution deadline. At most one rollout per service is in flight, held
/// by a one-permit semaphore whose permit travels with the task so every
/// exit path releases it.
pub struct RollbackExecutor {
    store: Arc<RollbackStateStore>,
    deploy: Arc<dyn DeploymentApi>,
    config: Arc<ControllerConfig>,
    metrics: Arc<ControllerMetrics>,
    inflight: Mutex<HashMap<ServiceName, Arc<Semaphore>>>,
    id_seed: AtomicU64,
}

impl RollbackExecutor {
    #[must_use]
    pub fn new(
        store: Arc<RollbackStateStore>,
        deploy: Arc<dyn DeploymentApi>,
        config: Arc<ControllerConfig>,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        Self {
            store,
            deploy,
            config,
            metrics,
            inflight: Mutex::new(HashMap::new()),
            id_seed: AtomicU64::new(1),
        }
    }

    async fn service_gate(&self, service: &ServiceName) -> Arc<Semaphore> {
        let mut gates = self.inflight.lock().await;
        Arc::clone(
            gates
                .entry(service.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(1))),
        )
    }

    /// Admits one rollback attempt. The returned record is `in_progress`
    /// when the rollout was started, or terminal `skipped` when another
    /// rollout for the service is already in flight.
    pub async fn execute(
        &self,
        service: ServiceName,
        decision: RollbackDecision,
        triggered_by: TriggeredBy,
    ) -> Result<RollbackRecord, StoreError> {
        if decision.target_revision.is_none() {
            return Err(StoreError(
                "refusing to execute a decision without a target revision".to_string(),
            ));
        }

        let rollback_id = RollbackId::from_seed(self.id_seed.fetch_add(1, Ordering::Relaxed));
        let mut record = RollbackRecord::new(
            rollback_id,
            service.clone(),
            unix_millis(),
            decision,
            triggered_by,
        );
        self.store.record(record.clone()).await?;
        info!(
            service = %record.service_name,
            rollback_id = %record.rollback_id,
            status = %record.status,
            "rollback admitted"
        );

        let gate = self.service_gate(&service).await;
        let permit = match gate.try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                record.status = RollbackStatus::Skipped;
                record.decision.reason = "rollback already in progress".to_string();
                record.completed_at_ms = Some(unix_millis());
                self.store.record(record.clone()).await?;
                self.metrics.observe_terminal(RollbackStatus::Skipped);
                warn!(
                    service = %record.service_name,
                    rollback_id = %record.rollback_id,
                    status = %record.status,
                    "rollback skipped: another rollout in flight"
                );
                return Ok(record);
            }
        };

        record.status = RollbackStatus::InProgress;
        self.store.record(record.clone()).await?;
        info!(
            service = %record.service_name,
            rollback_id = %record.rollback_id,
            status = %record.status,
            "rollback started"
        );

        let worker = RolloutWorker {
            store: Arc::clone(&self.store),
            deploy: Arc::clone(&self.deploy),
            config: Arc::clone(&self.config),
            metrics: Arc::clone(&self.metrics),
        };
        let task_record = record.clone();
        tokio::spawn(async move {
            worker.run_to_completion(task_record, permit).await;
        });
        Ok(record)
    }
}

/// Owns the clones a detached rollout task needs; lives exactly as long as
/// the task.
struct RolloutWorker {
    store: Arc<RollbackStateStore>,
    deploy: Arc<dyn DeploymentApi>,
    config: Arc<ControllerConfig>,
    metrics: Arc<ControllerMetrics>,
}

impl RolloutWorker {
    async fn run_to_completion(&self, mut record: RollbackRecord, permit: OwnedSemaphorePermit) {
        let outcome = timeout(self.config.execution_deadline, self.run_canary(&record)).await;
        let status = match outcome {
            Ok(Ok(())) => RollbackStatus::Succeeded,
            Ok(Err(e)) => {
                error!(
                    service = %record.service_name,
                    rollback_id = %record.rollback_id,
                    "rollback failed: {e}; operator intervention required"
                );
                RollbackStatus::Failed
            }
            Err(_) => {
                error!(
                    service = %record.service_name,
                    rollback_id = %record.rollback_id,
                    deadline_secs = self.config.execution_deadline.as_secs(),
                    "rollback deadline exceeded; operator intervention required"
                );
                RollbackStatus::Failed
            }
        };

        record.status = status;
        record.completed_at_ms = Some(unix_millis());
        if let Err(e) = self.store.record(record.clone()).await {
            error!(
                rollback_id = %record.rollback_id,
                "failed to persist terminal rollback state: {e}"
            );
        }
        // Reopen the gate only after the terminal state is visible, so no
        // moment exists with two in-progress records for one service.
        drop(permit);
        self.metrics.observe_terminal(status);
        info!(
            service = %record.service_name,
            rollback_id = %record.rollback_id,
            status = %record.status,
            "rollback complete"
        );
    }

    async fn run_canary(&self, record: &RollbackRecord) -> Result<(), DeployError> {
        let target = record
            .target_revision
            .as_ref()
            .ok_or_else(|| DeployError("record has no target revision".to_string()))?;
        for percent in &self.config.traffic_steps {
            self.deploy
                .shift_traffic(&record.service_name, target, *percent)
                .await?;
            info!(
                service = %record.service_name,
                rollback_id = %record.rollback_id,
                percent = *percent,
                "traffic shifted"
            );
            tokio::time::sleep(self.config.poll_interval).await;
            let healthy = self
                .deploy
                .verify_health(&record.service_name, target)
                .await?;
            if !healthy {
                return Err(DeployError(format!(
                    "health regression at {percent}% traffic"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::FakeDeploymentApi;
    use backstop_model::RevisionId;
    use std::time::Duration;

    fn fast_config() -> ControllerConfig {
        ControllerConfig {
            poll_interval: Duration::from_millis(1),
            execution_deadline: Duration::from_millis(250),
            ..ControllerConfig::default()
        }
    }

    fn setup(config: ControllerConfig) -> (Arc<RollbackExecutor>, Arc<RollbackStateStore>, Arc<FakeDeploymentApi>) {
        let store = Arc::new(RollbackStateStore::default());
        let deploy = Arc::new(FakeDeploymentApi::default());
        let executor = Arc::new(RollbackExecutor::new(
            Arc::clone(&store),
            Arc::clone(&deploy) as Arc<dyn DeploymentApi>,
            Arc::new(config),
            Arc::new(ControllerMetrics::default()),
        ));
        (executor, store, deploy)
    }

    fn svc() -> ServiceName {
        ServiceName::parse("checkout").unwrap()
    }

    fn approved() -> RollbackDecision {
        RollbackDecision::approved("test", 0.9, RevisionId::parse("stable-v3").unwrap())
    }

    /// The gate reopens an instant after the prior record turns terminal;
    /// retry admission until it does.
    async fn admit_until_started(
        executor: &Arc<RollbackExecutor>,
        triggered_by: TriggeredBy,
    ) -> RollbackRecord {
        for _ in 0..500 {
            let record = executor
                .execute(svc(), approved(), triggered_by.clone())
                .await
                .unwrap();
            if record.status == RollbackStatus::InProgress {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("rollback was never admitted");
    }

    async fn wait_terminal(store: &RollbackStateStore, id: &RollbackId) -> RollbackRecord {
        for _ in 0..500 {
            if let Some(record) = store.get(id).await {
                if record.is_terminal() {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("rollback {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn successful_rollout_walks_all_traffic_steps() {
        let (executor, store, deploy) = setup(fast_config());
        let record = executor
            .execute(svc(), approved(), TriggeredBy::Automated)
            .await
            .unwrap();
        assert_eq!(record.status, RollbackStatus::InProgress);

        let done = wait_terminal(&store, &record.rollback_id).await;
        assert_eq!(done.status, RollbackStatus::Succeeded);
        assert!(done.completed_at_ms.is_some());

        let shifts = deploy.shifts.lock().await;
        let percents: Vec<u8> = shifts.iter().map(|(_, _, p)| *p).collect();
        assert_eq!(percents, vec![25, 50, 100]);
    }

    #[tokio::test]
    async fn concurrent_attempt_for_same_service_is_skipped() {
        let (executor, store, deploy) = setup(fast_config());
        *deploy.shift_delay.lock().await = Duration::from_millis(50);

        let first = executor
            .execute(svc(), approved(), TriggeredBy::Automated)
            .await
            .unwrap();
        let second = executor
            .execute(svc(), approved(), TriggeredBy::Operator("alice".to_string()))
            .await
            .unwrap();

        assert_eq!(second.status, RollbackStatus::Skipped);
        assert_eq!(second.decision.reason, "rollback already in progress");
        assert!(second.completed_at_ms.is_some());

        let done = wait_terminal(&store, &first.rollback_id).await;
        assert_eq!(done.status, RollbackStatus::Succeeded);
    }

    #[tokio::test]
    async fn different_services_roll_back_concurrently() {
        let (executor, store, _deploy) = setup(fast_config());
        let a = executor
            .execute(svc(), approved(), TriggeredBy::Automated)
            .await
            .unwrap();
        let b = executor
            .execute(
                ServiceName::parse("billing").unwrap(),
                approved(),
                TriggeredBy::Automated,
            )
            .await
            .unwrap();
        assert_eq!(a.status, RollbackStatus::InProgress);
        assert_eq!(b.status, RollbackStatus::InProgress);
        assert_eq!(
            wait_terminal(&store, &a.rollback_id).await.status,
            RollbackStatus::Succeeded
        );
        assert_eq!(
            wait_terminal(&store, &b.rollback_id).await.status,
            RollbackStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn deploy_failure_marks_failed_and_reopens_gate() {
        let (executor, store, deploy) = setup(fast_config());
        *deploy.fail_shift.lock().await = Some("api unreachable".to_string());

        let record = executor
            .execute(svc(), approved(), TriggeredBy::Automated)
            .await
            .unwrap();
        let done = wait_terminal(&store, &record.rollback_id).await;
        assert_eq!(done.status, RollbackStatus::Failed);

        // No automatic retry; a fresh attempt must be admitted cleanly.
        *deploy.fail_shift.lock().await = None;
        let retry = admit_until_started(&executor, TriggeredBy::Operator("alice".to_string())).await;
        assert_eq!(
            wait_terminal(&store, &retry.rollback_id).await.status,
            RollbackStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn health_regression_mid_canary_fails_the_rollout() {
        let (executor, store, deploy) = setup(fast_config());
        *deploy.healthy_checks_before_regression.lock().await = Some(1);

        let record = executor
            .execute(svc(), approved(), TriggeredBy::Automated)
            .await
            .unwrap();
        let done = wait_terminal(&store, &record.rollback_id).await;
        assert_eq!(done.status, RollbackStatus::Failed);

        let shifts = deploy.shifts.lock().await;
        // The second health check fails, so the 100% step is never reached.
        assert_eq!(shifts.len(), 2);
    }

    #[tokio::test]
    async fn deadline_overrun_fails_and_releases_the_gate() {
        let config = ControllerConfig {
            poll_interval: Duration::from_millis(1),
            execution_deadline: Duration::from_millis(20),
            ..ControllerConfig::default()
        };
        let (executor, store, deploy) = setup(config);
        *deploy.shift_delay.lock().await = Duration::from_millis(100);

        let record = executor
            .execute(svc(), approved(), TriggeredBy::Automated)
            .await
            .unwrap();
        let done = wait_terminal(&store, &record.rollback_id).await;
        assert_eq!(done.status, RollbackStatus::Failed);

        *deploy.shift_delay.lock().await = Duration::from_millis(0);
        let next = admit_until_started(&executor, TriggeredBy::Automated).await;
        assert_eq!(next.status, RollbackStatus::InProgress);
    }

    #[tokio::test]
    async fn decision_without_target_is_refused() {
        let (executor, _store, _deploy) = setup(fast_config());
        let err = executor
            .execute(svc(), RollbackDecision::rejected("none", 0.0), TriggeredBy::Automated)
            .await
            .expect_err("no target must be refused");
        assert!(err.0.contains("target revision"));
    }
}
