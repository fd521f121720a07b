use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use opentelemetry::{
    KeyValue, global,
    metrics::{Gauge, Meter},
};

use crate::crd::TrackingKey;

/// Per tracking object in-sync gauge (1 in sync, 0 not). Shared by all
/// workers; updates are atomic per key.
#[derive(Clone)]
pub struct InSyncMetrics {
    values: Arc<DashMap<TrackingKey, AtomicI64>>,
    gauge: Gauge<i64>,
}

impl Default for InSyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl InSyncMetrics {
    pub fn new() -> Self {
        let meter: Meter = global::meter("faros-gto");
        let gauge = meter
            .i64_gauge("faros_gittrackobject_in_sync")
            .with_description(
                "Whether the child of a tracking object matches its desired state",
            )
            .build();
        Self {
            values: Arc::new(DashMap::new()),
            gauge,
        }
    }

    pub fn set_in_sync(&self, key: &TrackingKey, in_sync: bool) {
        let v = i64::from(in_sync);
        self.values
            .entry(key.clone())
            .or_insert_with(|| AtomicI64::new(v))
            .store(v, Ordering::Relaxed);
        self.gauge.record(v, &labels(key));
    }

    pub fn get(&self, key: &TrackingKey) -> Option<i64> {
        self.values.get(key).map(|v| v.load(Ordering::Relaxed))
    }

    /// Forget a deleted tracking object.
    pub fn remove(&self, key: &TrackingKey) {
        self.values.remove(key);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn reset(&self) {
        self.values.clear();
    }
}

fn labels(key: &TrackingKey) -> [KeyValue; 3] {
    [
        KeyValue::new("kind", key.kind.as_str()),
        KeyValue::new("namespace", key.namespace.clone().unwrap_or_default()),
        KeyValue::new("name", key.name.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_latest_value_per_key() {
        let m = InSyncMetrics::new();
        let k = TrackingKey::namespaced("default", "example");
        m.set_in_sync(&k, false);
        m.set_in_sync(&k, true);
        assert_eq!(m.get(&k), Some(1));
        assert_eq!(m.len(), 1);
        m.reset();
        assert!(m.is_empty());
    }

    #[test]
    fn concurrent_writers_do_not_lose_keys() {
        let m = InSyncMetrics::new();
        std::thread::scope(|s| {
            for i in 0..8 {
                let m = m.clone();
                s.spawn(move || {
                    let k = TrackingKey::cluster(&format!("cgto-{i}"));
                    m.set_in_sync(&k, i % 2 == 0);
                });
            }
        });
        assert_eq!(m.len(), 8);
        assert_eq!(m.get(&TrackingKey::cluster("cgto-1")), Some(0));
    }
}
