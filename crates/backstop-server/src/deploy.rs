// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use backstop_model::{RevisionId, ServiceName};
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct DeployError(pub String);

impl std::fmt::Display for DeployError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for DeployError {}

/// Narrow contract over the external deployment platform. The executor
/// depends on nothing else about it.
#[async_trait]
pub trait DeploymentApi: Send + Sync {
    /// Current stable/serving revision, if the platform knows one.
    async fn serving_revision(
        &self,
        service: &ServiceName,
    ) -> Result<Option<RevisionId>, DeployError>;

    /// Directs `percent` of live traffic to `revision`.
    async fn shift_traffic(
        &self,
        service: &ServiceName,
        revision: &RevisionId,
        percent: u8,
    ) -> Result<(), DeployError>;

    /// Whether the revision is serving healthily at its current share.
    async fn verify_health(
        &self,
        service: &ServiceName,
        revision: &RevisionId,
    ) -> Result<bool, DeployError>;
}

/// JSON/HTTP client for the deployment platform's revision and traffic
/// endpoints. The platform remains the source of truth for what "stable"
/// means; this client only relays its answers.
pub struct HttpDeploymentApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpDeploymentApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DeployError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeployError(format!("deployment client init: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl DeploymentApi for HttpDeploymentApi {
    async fn serving_revision(
        &self,
        service: &ServiceName,
    ) -> Result<Option<RevisionId>, DeployError> {
        let url = format!("{}/services/{}/stable", self.base_url, service);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DeployError(format!("stable lookup: {e}")))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(DeployError(format!(
                "stable lookup returned {}",
                response.status()
            )));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DeployError(format!("stable lookup body: {e}")))?;
        match body.get("revision").and_then(|v| v.as_str()) {
            None => Ok(None),
            Some(raw) => RevisionId::parse(raw)
                .map(Some)
                .map_err(|e| DeployError(format!("stable revision: {e}"))),
        }
    }

    async fn shift_traffic(
        &self,
        service: &ServiceName,
        revision: &RevisionId,
        percent: u8,
    ) -> Result<(), DeployError> {
        let url = format!("{}/services/{}/traffic", self.base_url, service);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({"revision": revision, "percent": percent}))
            .send()
            .await
            .map_err(|e| DeployError(format!("traffic shift: {e}")))?;
        if !response.status().is_success() {
            return Err(DeployError(format!(
                "traffic shift returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn verify_health(
        &self,
        service: &ServiceName,
        revision: &RevisionId,
    ) -> Result<bool, DeployError> {
        let url = format!(
            "{}/services/{}/revisions/{}/health",
            self.base_url, service, revision
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DeployError(format!("health check: {e}")))?;
        if !response.status().is_success() {
            return Err(DeployError(format!(
                "health check returned {}",
                response.status()
            )));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DeployError(format!("health check body: {e}")))?;
        Ok(body.get("healthy").and_then(|v| v.as_bool()).unwrap_or(false))
    }
}

/// Scriptable in-memory deployment platform for tests.
pub struct FakeDeploymentApi {
    pub stable: Mutex<HashMap<ServiceName, RevisionId>>,
    /// `(service, revision, percent)` in call order.
    pub shifts: Mutex<Vec<(ServiceName, RevisionId, u8)>>,
    /// Shift calls fail once this is set.
    pub fail_shift: Mutex<Option<String>>,
    /// Health turns false after this many successful checks.
    pub healthy_checks_before_regression: Mutex<Option<u32>>,
    pub health_checks: AtomicU64,
    /// Artificial latency per shift call, for deadline tests.
    pub shift_delay: Mutex<Duration>,
}

impl Default for FakeDeploymentApi {
    fn default() -> Self {
        Self {
            stable: Mutex::new(HashMap::new()),
            shifts: Mutex::new(Vec::new()),
            fail_shift: Mutex::new(None),
            healthy_checks_before_regression: Mutex::new(None),
            health_checks: AtomicU64::new(0),
            shift_delay: Mutex::new(Duration::from_millis(0)),
        }
    }
}

impl FakeDeploymentApi {
    pub async fn set_stable(&self, service: &ServiceName, revision: &str) {
        let parsed = RevisionId::parse(revision).expect("fake revision");
        self.stable.lock().await.insert(service.clone(), parsed);
    }
}

#[async_trait]
impl DeploymentApi for FakeDeploymentApi {
    async fn serving_revision(
        &self,
        service: &ServiceName,
    ) -> Result<Option<RevisionId>, DeployError> {
        Ok(self.stable.lock().await.get(service).cloned())
    }

    async fn shift_traffic(
        &self,
        service: &ServiceName,
        revision: &RevisionId,
        percent: u8,
    ) -> Result<(), DeployError> {
        let delay = *self.shift_delay.lock().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.fail_shift.lock().await.clone() {
            return Err(DeployError(message));
        }
        self.shifts
            .lock()
            .await
            .push((service.clone(), revision.clone(), percent));
        Ok(())
    }

    async fn verify_health(
        &self,
        _service: &ServiceName,
        _revision: &RevisionId,
    ) -> Result<bool, DeployError> {
        let done = self
            .health_checks
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if let Some(limit) = *self.healthy_checks_before_regression.lock().await {
            return Ok(done < u64::from(limit));
        }
        Ok(true)
    }
}
