use std::time::Duration;

use envconfig::Envconfig;

use crate::controller::strategy::UpdateStrategy;

#[derive(Envconfig, Clone, Debug)]
pub struct GtoConfig {
    /// Namespace the controller is restricted to. Unset means all namespaces.
    /// Env: FAROS_NAMESPACE
    #[envconfig(from = "FAROS_NAMESPACE")]
    pub namespace: Option<String>,

    /// Strategy used when the desired document carries no (or an unknown)
    /// update-strategy annotation.
    #[envconfig(from = "FAROS_DEFAULT_UPDATE_STRATEGY", default = "default")]
    pub default_update_strategy: String,

    /// Set when the cluster runs without the garbage collector, so children
    /// of deleted tracking objects must be removed explicitly.
    #[envconfig(from = "FAROS_GC_DISABLED", default = "false")]
    pub gc_disabled: bool,

    #[envconfig(from = "FAROS_CONCURRENCY", default = "4")]
    pub concurrency: u16,

    /// Periodic resync after a successful (or terminally failed) reconcile.
    #[envconfig(from = "FAROS_RESYNC_SECS", default = "300")]
    pub resync_secs: u64,

    #[envconfig(nested)]
    pub backoff: BackoffConfig,

    /// Deadline applied to a single reconcile; cluster calls in flight are
    /// dropped when it elapses.
    #[envconfig(from = "FAROS_RECONCILE_TIMEOUT_SECS", default = "30")]
    pub reconcile_timeout_secs: u64,

    #[envconfig(nested)]
    pub deletion: DeletionConfig,

    /// Extend the built-in kind registry with every kind the API server
    /// advertises (needed for CRD-backed children).
    #[envconfig(from = "FAROS_DISCOVER_KINDS", default = "true")]
    pub discover_kinds: bool,

    /// Reporter name for events.
    #[envconfig(from = "FAROS_FIELD_MANAGER", default = "faros-gto")]
    pub field_manager: String,
}

#[derive(Envconfig, Clone, Debug)]
pub struct BackoffConfig {
    #[envconfig(from = "FAROS_BACKOFF_BASE_MS", default = "500")]
    pub base_ms: u64,
    #[envconfig(from = "FAROS_BACKOFF_MAX_SECS", default = "300")]
    pub max_secs: u64,
}

#[derive(Envconfig, Clone, Debug)]
pub struct DeletionConfig {
    /// How many times a recreate waits for the old child to disappear
    /// before handing back a deletion-pending requeue.
    #[envconfig(from = "FAROS_DELETE_POLL_ATTEMPTS", default = "5")]
    pub poll_attempts: u32,
    /// First poll delay; doubles on each attempt.
    #[envconfig(from = "FAROS_DELETE_POLL_MS", default = "200")]
    pub poll_ms: u64,
}

impl Default for GtoConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            default_update_strategy: "default".into(),
            gc_disabled: false,
            concurrency: 4,
            resync_secs: 300,
            backoff: BackoffConfig {
                base_ms: 500,
                max_secs: 300,
            },
            reconcile_timeout_secs: 30,
            deletion: DeletionConfig {
                poll_attempts: 5,
                poll_ms: 200,
            },
            discover_kinds: true,
            field_manager: "faros-gto".into(),
        }
    }
}

impl DeletionConfig {
    /// Requeue delay after a recreate had to give up waiting.
    pub fn requeue_after(&self) -> Duration {
        Duration::from_millis(
            self.poll_ms.saturating_mul(1u64 << self.poll_attempts.min(16)),
        )
    }
}

impl GtoConfig {
    /// Normalize values read from the environment: an empty namespace means
    /// "no restriction", and a zero worker count falls back to one.
    pub fn normalize(mut self) -> Self {
        if self
            .namespace
            .as_deref()
            .map(|ns| ns.trim().is_empty())
            .unwrap_or(false)
        {
            self.namespace = None;
        }
        if self.concurrency == 0 {
            self.concurrency = 1;
        }
        self
    }

    pub fn default_strategy(&self) -> UpdateStrategy {
        UpdateStrategy::parse(&self.default_update_strategy)
    }

    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    /// Whether objects in `ns` fall inside the namespace scope.
    pub fn in_scope(&self, ns: &str) -> bool {
        self.namespace.as_deref().map(|n| n == ns).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_namespace_means_unrestricted() {
        let cfg = GtoConfig {
            namespace: Some("  ".into()),
            ..Default::default()
        }
        .normalize();
        assert_eq!(cfg.namespace, None);
        assert!(cfg.in_scope("anything"));
    }

    #[test]
    fn namespace_scope_is_exact() {
        let cfg = GtoConfig {
            namespace: Some("default".into()),
            ..Default::default()
        };
        assert!(cfg.in_scope("default"));
        assert!(!cfg.in_scope("not-default"));
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        let cfg = GtoConfig {
            concurrency: 0,
            ..Default::default()
        }
        .normalize();
        assert_eq!(cfg.concurrency, 1);
    }

    #[test]
    fn default_strategy_parses_config_value() {
        let cfg = GtoConfig {
            default_update_strategy: "recreate".into(),
            ..Default::default()
        };
        assert_eq!(cfg.default_strategy(), UpdateStrategy::Recreate);
        let cfg = GtoConfig {
            default_update_strategy: "bogus".into(),
            ..Default::default()
        };
        assert_eq!(cfg.default_strategy(), UpdateStrategy::Default);
    }
}
