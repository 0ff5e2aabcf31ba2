// SPDX-License-Identifier: Apache-2.0

use backstop_model::RollbackStatus;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

const METRIC_SUBSYSTEM: &str = "backstop";
const METRIC_VERSION: &str = env!("CARGO_PKG_VERSION");
const LATENCY_SAMPLE_CAP: usize = 4096;

/// Controller-level counters: alert flow, decision outcomes, rollback
/// terminal states.
#[derive(Default)]
pub struct ControllerMetrics {
    pub alerts_received: AtomicU64,
    pub alerts_deduplicated: AtomicU64,
    pub alerts_rejected_auth: AtomicU64,
    pub alerts_malformed: AtomicU64,
    pub decisions_rollback: AtomicU64,
    pub decisions_no_rollback: AtomicU64,
    pub rollbacks_succeeded: AtomicU64,
    pub rollbacks_failed: AtomicU64,
    pub rollbacks_skipped: AtomicU64,
    pub decision_reasons: Mutex<BTreeMap<String, u64>>,
}

impl ControllerMetrics {
    pub async fn observe_decision(&self, should_rollback: bool, reason: &str) {
        if should_rollback {
            self.decisions_rollback.fetch_add(1, Ordering::Relaxed);
        } else {
            self.decisions_no_rollback.fetch_add(1, Ordering::Relaxed);
        }
        let mut reasons = self.decision_reasons.lock().await;
        *reasons.entry(reason.to_string()).or_insert(0) += 1;
    }

    pub fn observe_terminal(&self, status: RollbackStatus) {
        match status {
            RollbackStatus::Succeeded => self.rollbacks_succeeded.fetch_add(1, Ordering::Relaxed),
            RollbackStatus::Failed => self.rollbacks_failed.fetch_add(1, Ordering::Relaxed),
            RollbackStatus::Skipped => self.rollbacks_skipped.fetch_add(1, Ordering::Relaxed),
            RollbackStatus::Pending | RollbackStatus::InProgress => 0,
        };
    }
}

/// Per-route request counters and a bounded latency reservoir.
#[derive(Default)]
pub struct RequestMetrics {
    counts: Mutex<BTreeMap<(String, u16), u64>>,
    latencies_ns: Mutex<Vec<u64>>,
}

impl RequestMetrics {
    pub async fn observe_request(&self, route: &str, status: u16, elapsed: Duration) {
        {
            let mut counts = self.counts.lock().await;
            *counts.entry((route.to_string(), status)).or_insert(0) += 1;
        }
        let mut latencies = self.latencies_ns.lock().await;
        if latencies.len() >= LATENCY_SAMPLE_CAP {
            latencies.remove(0);
        }
        latencies.push(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX));
    }

    async fn snapshot(&self) -> (BTreeMap<(String, u16), u64>, Vec<u64>) {
        let counts = self.counts.lock().await.clone();
        let latencies = self.latencies_ns.lock().await.clone();
        (counts, latencies)
    }
}

fn percentile_ns(values: &[u64], pct: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut v = values.to_vec();
    v.sort_unstable();
    let idx = ((v.len() as f64 - 1.0) * pct).round() as usize;
    v[idx]
}

fn line(body: &mut String, name: &str, labels: &str, value: u64) {
    let sep = if labels.is_empty() { "" } else { "," };
    body.push_str(&format!(
        "{name}{{subsystem=\"{METRIC_SUBSYSTEM}\",version=\"{METRIC_VERSION}\"{sep}{labels}}} {value}\n",
    ));
}

/// Prometheus text exposition of controller and request metrics.
pub(crate) async fn render_metrics(
    controller: &ControllerMetrics,
    requests: &RequestMetrics,
) -> String {
    let mut body = String::new();
    line(
        &mut body,
        "backstop_alerts_received_total",
        "",
        controller.alerts_received.load(Ordering::Relaxed),
    );
    line(
        &mut body,
        "backstop_alerts_deduplicated_total",
        "",
        controller.alerts_deduplicated.load(Ordering::Relaxed),
    );
    line(
        &mut body,
        "backstop_alerts_rejected_total",
        "reason=\"auth\"",
        controller.alerts_rejected_auth.load(Ordering::Relaxed),
    );
    line(
        &mut body,
        "backstop_alerts_rejected_total",
        "reason=\"malformed\"",
        controller.alerts_malformed.load(Ordering::Relaxed),
    );
    line(
        &mut body,
        "backstop_decisions_total",
        "outcome=\"rollback\"",
        controller.decisions_rollback.load(Ordering::Relaxed),
    );
    line(
        &mut body,
        "backstop_decisions_total",
        "outcome=\"no_rollback\"",
        controller.decisions_no_rollback.load(Ordering::Relaxed),
    );
    for (reason, count) in controller.decision_reasons.lock().await.iter() {
        line(
            &mut body,
            "backstop_decision_reasons_total",
            &format!("reason=\"{}\"", reason.replace('"', "'")),
            *count,
        );
    }
    line(
        &mut body,
        "backstop_rollbacks_total",
        "status=\"succeeded\"",
        controller.rollbacks_succeeded.load(Ordering::Relaxed),
    );
    line(
        &mut body,
        "backstop_rollbacks_total",
        "status=\"failed\"",
        controller.rollbacks_failed.load(Ordering::Relaxed),
    );
    line(
        &mut body,
        "backstop_rollbacks_total",
        "status=\"skipped\"",
        controller.rollbacks_skipped.load(Ordering::Relaxed),
    );

    let (counts, latencies) = requests.snapshot().await;
    for ((route, status), count) in &counts {
        line(
            &mut body,
            "backstop_requests_total",
            &format!("route=\"{route}\",status=\"{status}\""),
            *count,
        );
    }
    for (label, pct) in [("p50", 0.50), ("p95", 0.95), ("p99", 0.99)] {
        line(
            &mut body,
            "backstop_request_latency_ns",
            &format!("quantile=\"{label}\""),
            percentile_ns(&latencies, pct),
        );
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_of_empty_is_zero() {
        assert_eq!(percentile_ns(&[], 0.95), 0);
    }

    #[test]
    fn percentile_picks_rounded_rank() {
        let values = [10, 20, 30, 40, 50];
        assert_eq!(percentile_ns(&values, 0.0), 10);
        assert_eq!(percentile_ns(&values, 0.5), 30);
        assert_eq!(percentile_ns(&values, 1.0), 50);
    }

    #[tokio::test]
    async fn rendered_metrics_carry_counter_values() {
        let controller = ControllerMetrics::default();
        controller.alerts_received.fetch_add(3, Ordering::Relaxed);
        controller.observe_decision(false, "below threshold").await;
        controller.observe_terminal(RollbackStatus::Failed);
        let requests = RequestMetrics::default();
        requests
            .observe_request("/healthz", 200, Duration::from_millis(1))
            .await;

        let body = render_metrics(&controller, &requests).await;
        assert!(body.contains("backstop_alerts_received_total"));
        assert!(body.contains("} 3\n"));
        assert!(body.contains("reason=\"below threshold\"} 1"));
        assert!(body.contains("status=\"failed\"} 1"));
        assert!(body.contains("route=\"/healthz\",status=\"200\"} 1"));
    }
}
