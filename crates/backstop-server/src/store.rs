use backstop_model::{RevisionId, RollbackId, RollbackRecord, ServiceName};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug)]
pub struct StoreError(pub String);

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for StoreError {}

#[derive(Default)]
struct ServiceLedger {
    /// Insertion order is the ordering contract; never reordered.
    records: Vec<RollbackRecord>,
    /// Last revision the deployment API reported as stable before a trigger.
    last_known_good: Option<RevisionId>,
}

/// Append-only ledger of rollback attempts, keyed by service.
///
/// Mutation is serialized per service through the inner mutexes; the outer
/// map lock is held only to resolve the entry, so services stay fully
/// concurrent with each other.
#[derive(Default)]
pub struct RollbackStateStore {
    services: RwLock<HashMap<ServiceName, Arc<Mutex<ServiceLedger>>>>,
    by_id: RwLock<HashMap<RollbackId, RollbackRecord>>,
}

impl RollbackStateStore {
    async fn ledger(&self, service: &ServiceName) -> Arc<Mutex<ServiceLedger>> {
        if let Some(existing) = self.services.read().await.get(service) {
            return Arc::clone(existing);
        }
        let mut map = self.services.write().await;
        Arc::clone(map.entry(service.clone()).or_default())
    }

    /// Inserts a new record or updates the existing one with the same
    /// `rollback_id`. A record that already reached a terminal status is
    /// immutable; attempting to move it again is a caller bug.
    pub async fn record(&self, record: RollbackRecord) -> Result<(), StoreError> {
        let ledger = self.ledger(&record.service_name).await;
        let mut ledger = ledger.lock().await;
        match ledger
            .records
            .iter_mut()
            .find(|r| r.rollback_id == record.rollback_id)
        {
            Some(existing) => {
                if existing.is_terminal() {
                    return Err(StoreError(format!(
                        "rollback {} already terminal ({})",
                        existing.rollback_id, existing.status
                    )));
                }
                *existing = record.clone();
            }
            None => ledger.records.push(record.clone()),
        }
        self.by_id
            .write()
            .await
            .insert(record.rollback_id.clone(), record);
        Ok(())
    }

    pub async fn get(&self, rollback_id: &RollbackId) -> Option<RollbackRecord> {
        self.by_id.read().await.get(rollback_id).cloned()
    }

    /// Records for the service within the trailing window, newest first.
    pub async fn recent(
        &self,
        service: &ServiceName,
        window: Duration,
        now_ms: u64,
    ) -> Vec<RollbackRecord> {
        let window_start = now_ms.saturating_sub(window.as_millis() as u64);
        let ledger = self.ledger(service).await;
        let ledger = ledger.lock().await;
        ledger
            .records
            .iter()
            .rev()
            .filter(|r| r.triggered_at_ms >= window_start)
            .cloned()
            .collect()
    }

    /// Full per-service history in insertion order; the decision engine
    /// applies its own windows.
    pub async fn service_history(&self, service: &ServiceName) -> Vec<RollbackRecord> {
        let ledger = self.ledger(service).await;
        let ledger = ledger.lock().await;
        ledger.records.clone()
    }

    pub async fn last_known_good(&self, service: &ServiceName) -> Option<RevisionId> {
        let ledger = self.ledger(service).await;
        let ledger = ledger.lock().await;
        ledger.last_known_good.clone()
    }

    /// Caches the stable revision reported by the deployment API. The
    /// external system stays the source of truth; this is only the last
    /// observation taken before a trigger.
    pub async fn observe_stable_revision(&self, service: &ServiceName, revision: RevisionId) {
        let ledger = self.ledger(service).await;
        let mut ledger = ledger.lock().await;
        ledger.last_known_good = Some(revision);
    }

    /// Every record across services; for the aggregate metrics endpoint.
    pub async fn all_records(&self) -> Vec<RollbackRecord> {
        let services: Vec<Arc<Mutex<ServiceLedger>>> =
            self.services.read().await.values().cloned().collect();
        let mut out = Vec::new();
        for ledger in services {
            out.extend(ledger.lock().await.records.iter().cloned());
        }
        out
    }
}
