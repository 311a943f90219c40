use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub actions: BTreeMap<String, ActionMetrics>,
    pub total_duration_ms: f64,
    pub runs: u64,
    pub run_failures: u64,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct ActionMetrics {
    pub calls: u64,
    pub total_duration_ms: f64,
    pub max_duration_ms: f64,
}

impl MetricsSnapshot {
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        out.push_str("# TYPE slipway_action_calls_total counter\n");
        for (action, metrics) in &self.actions {
            out.push_str(&format!(
                "slipway_action_calls_total{{action=\"{action}\"}} {}\n",
                metrics.calls
            ));
        }
        out.push_str("# TYPE slipway_action_duration_ms_total counter\n");
        for (action, metrics) in &self.actions {
            out.push_str(&format!(
                "slipway_action_duration_ms_total{{action=\"{action}\"}} {}\n",
                metrics.total_duration_ms
            ));
        }
        out.push_str("# TYPE slipway_run_duration_ms gauge\n");
        out.push_str(&format!("slipway_run_duration_ms {}\n", self.total_duration_ms));
        out.push_str("# TYPE slipway_runs_total counter\n");
        out.push_str(&format!("slipway_runs_total {}\n", self.runs));
        out.push_str("# TYPE slipway_run_failures_total counter\n");
        out.push_str(&format!("slipway_run_failures_total {}\n", self.run_failures));
        out
    }
}

/// Per-run metrics: one timer per action dispatch plus run totals. Clones
/// share the same underlying snapshot.
#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsSnapshot::default())),
        }
    }

    pub fn start_action(&self, action_name: &str) -> ActionTimer {
        ActionTimer {
            action: action_name.to_string(),
            started_at: Instant::now(),
            collector: self.inner.clone(),
            recorded: false,
        }
    }

    pub fn start_run(&self) -> RunTimer {
        if let Ok(mut guard) = self.inner.lock() {
            guard.runs += 1;
        }
        RunTimer {
            started_at: Instant::now(),
            collector: self.inner.clone(),
        }
    }

    pub fn record_total_duration(&self, duration: Duration) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.total_duration_ms = duration.as_secs_f64() * 1_000.0;
        }
    }

    pub fn record_run_failure(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.run_failures += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn reset(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = MetricsSnapshot::default();
        }
    }
}

pub struct ActionTimer {
    action: String,
    started_at: Instant,
    collector: Arc<Mutex<MetricsSnapshot>>,
    recorded: bool,
}

impl ActionTimer {
    fn record(&mut self) {
        if self.recorded {
            return;
        }
        let duration = self.started_at.elapsed();
        if let Ok(mut guard) = self.collector.lock() {
            let metrics = guard.actions.entry(self.action.clone()).or_default();
            metrics.calls += 1;
            let duration_ms = duration.as_secs_f64() * 1_000.0;
            metrics.total_duration_ms += duration_ms;
            if duration_ms > metrics.max_duration_ms {
                metrics.max_duration_ms = duration_ms;
            }
        }
        debug!(
            action = self.action.as_str(),
            duration_ms = duration.as_secs_f64() * 1_000.0,
            "Action duration recorded"
        );
        self.recorded = true;
    }
}

impl Drop for ActionTimer {
    fn drop(&mut self) {
        self.record();
    }
}

pub struct RunTimer {
    started_at: Instant,
    collector: Arc<Mutex<MetricsSnapshot>>,
}

impl Drop for RunTimer {
    fn drop(&mut self) {
        let duration = self.started_at.elapsed();
        if let Ok(mut guard) = self.collector.lock() {
            guard.total_duration_ms = duration.as_secs_f64() * 1_000.0;
        }
    }
}

pub fn log_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        total_duration_ms = snapshot.total_duration_ms,
        runs = snapshot.runs,
        run_failures = snapshot.run_failures,
        "Run metrics"
    );
    for (action, metrics) in &snapshot.actions {
        info!(
            action = action.as_str(),
            calls = metrics.calls,
            total_duration_ms = metrics.total_duration_ms,
            max_duration_ms = metrics.max_duration_ms,
            "Action metrics"
        );
    }
}
