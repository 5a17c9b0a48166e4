//! Process-lifetime delivery counters
//!
//! One [`MetricsAggregator`] exists per side of the relay (producer and
//! consumer). Counters are lock-free atomics, monotonically increasing and
//! reset only when the process restarts. Snapshots read each field
//! independently, so a snapshot taken during concurrent updates may be
//! slightly skewed between fields; the numbers are observational only.
//!
//! When built with [`MetricsAggregator::with_registry`] the same counters are
//! mirrored into Prometheus so they can be scraped.

use chrono::{DateTime, TimeZone, Utc};
use prometheus::{IntCounter, Opts, Registry};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing::warn;

const NEVER: i64 = i64::MIN;

#[derive(Clone)]
struct PrometheusMirror {
    attempted: IntCounter,
    succeeded: IntCounter,
    failed: IntCounter,
    batches: IntCounter,
}

impl PrometheusMirror {
    fn register(component: &str, registry: &Registry) -> prometheus::Result<Self> {
        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let counter = IntCounter::with_opts(
                Opts::new(name, help).const_label("component", component.to_string()),
            )?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        Ok(Self {
            attempted: counter(
                "relay_messages_attempted_total",
                "Messages that reached a terminal outcome or were handed to the broker",
            )?,
            succeeded: counter(
                "relay_messages_succeeded_total",
                "Messages confirmed delivered (producer) or durably recorded as processed (consumer)",
            )?,
            failed: counter(
                "relay_messages_failed_total",
                "Messages rejected, undelivered or recorded as failed",
            )?,
            batches: counter("relay_batches_total", "Producer batches submitted")?,
        })
    }
}

/// Lock-free counters for one side of the relay
pub struct MetricsAggregator {
    component: String,
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    batches: AtomicU64,
    last_activity_ms: AtomicI64,
    started_at: DateTime<Utc>,
    mirror: Option<PrometheusMirror>,
}

impl MetricsAggregator {
    /// Counters without a Prometheus mirror (tests, embedded use)
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            attempted: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            last_activity_ms: AtomicI64::new(NEVER),
            started_at: Utc::now(),
            mirror: None,
        }
    }

    /// Counters mirrored into `registry` under a `component` label
    pub fn with_registry(
        component: impl Into<String>,
        registry: &Registry,
    ) -> prometheus::Result<Self> {
        let mut aggregator = Self::new(component);
        aggregator.mirror = Some(PrometheusMirror::register(&aggregator.component, registry)?);
        Ok(aggregator)
    }

    /// Same as [`with_registry`](Self::with_registry) but falls back to
    /// unmirrored counters if registration fails
    pub fn registered_or_plain(component: impl Into<String>, registry: &Registry) -> Self {
        let component = component.into();
        match Self::with_registry(component.clone(), registry) {
            Ok(aggregator) => aggregator,
            Err(e) => {
                warn!(component = %component, error = %e, "Failed to register delivery metrics");
                Self::new(component)
            }
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn record_attempt(&self) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
        if let Some(mirror) = &self.mirror {
            mirror.attempted.inc();
        }
        self.touch();
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        if let Some(mirror) = &self.mirror {
            mirror.succeeded.inc();
        }
        self.touch();
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if let Some(mirror) = &self.mirror {
            mirror.failed.inc();
        }
        self.touch();
    }

    pub fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        if let Some(mirror) = &self.mirror {
            mirror.batches.inc();
        }
        self.touch();
    }

    /// Update the last-activity timestamp without changing any counter
    pub fn touch(&self) {
        self.last_activity_ms
            .fetch_max(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let attempted = self.attempted.load(Ordering::Relaxed);
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let batches = self.batches.load(Ordering::Relaxed);

        let last_activity_time = match self.last_activity_ms.load(Ordering::Relaxed) {
            NEVER => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        };

        MetricsSnapshot {
            attempted,
            succeeded,
            failed,
            batches,
            success_rate: success_rate(succeeded, attempted),
            last_activity_time,
            uptime_seconds: (Utc::now() - self.started_at).num_seconds().max(0),
        }
    }
}

/// `succeeded / attempted * 100`, clamped to `[0, 100]`; 0 when nothing was attempted
pub fn success_rate(succeeded: u64, attempted: u64) -> f64 {
    if attempted == 0 {
        return 0.0;
    }
    (succeeded as f64 / attempted as f64 * 100.0).clamp(0.0, 100.0)
}

/// Point-in-time view of a [`MetricsAggregator`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub batches: u64,
    pub success_rate: f64,
    pub last_activity_time: Option<DateTime<Utc>>,
    pub uptime_seconds: i64,
}

impl MetricsSnapshot {
    pub fn avg_messages_per_second(&self) -> f64 {
        if self.uptime_seconds <= 0 {
            return 0.0;
        }
        self.attempted as f64 / self.uptime_seconds as f64
    }

    pub fn avg_batch_size(&self) -> f64 {
        if self.batches == 0 {
            return 0.0;
        }
        self.attempted as f64 / self.batches as f64
    }

    /// RFC 3339 timestamp of the last activity, or `"Never"`
    pub fn last_activity_display(&self) -> String {
        self.last_activity_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "Never".to_string())
    }
}
