use backstop_model::IncidentId;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Short-lived idempotency cache for webhook deliveries.
///
/// Monitoring systems deliver at-least-once; a redelivered incident id within
/// the TTL is acknowledged but produces no new work.
pub struct DedupCache {
    seen: Mutex<HashMap<IncidentId, Instant>>,
    ttl: Duration,
    capacity: usize,
}

impl DedupCache {
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            ttl,
            capacity,
        }
    }

    /// Records the incident id and reports whether it was already present
    /// (and unexpired). Expired entries are pruned on the way in.
    pub async fn observe(&self, incident: &IncidentId) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().await;
        seen.retain(|_, inserted| now.duration_since(*inserted) < self.ttl);
        if seen.contains_key(incident) {
            return true;
        }
        if seen.len() >= self.capacity {
            // Bound memory under incident-id floods; dropping the oldest
            // entry only widens the dedup hole for the oldest sender.
            if let Some(oldest) = seen
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(k, _)| k.clone())
            {
                seen.remove(&oldest);
            }
        }
        seen.insert(incident.clone(), now);
        false
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incident(n: u32) -> IncidentId {
        IncidentId::parse(&format!("inc-{n}")).unwrap()
    }

    #[tokio::test]
    async fn first_observation_is_unique_second_is_duplicate() {
        let cache = DedupCache::new(Duration::from_secs(300), 16);
        assert!(!cache.observe(&incident(1)).await);
        assert!(cache.observe(&incident(1)).await);
        assert!(!cache.observe(&incident(2)).await);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = DedupCache::new(Duration::from_millis(20), 16);
        assert!(!cache.observe(&incident(1)).await);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!cache.observe(&incident(1)).await, "expired entry readmits");
    }

    #[tokio::test]
    async fn capacity_is_bounded_under_flood() {
        let cache = DedupCache::new(Duration::from_secs(300), 8);
        for n in 0..100 {
            cache.observe(&incident(n)).await;
        }
        assert!(cache.len().await <= 8);
    }
}
