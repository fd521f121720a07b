pub mod backoff;
pub mod child;
pub mod events;
pub mod metrics;
pub mod reconcile;
pub mod recreate;
pub mod status;
pub mod strategy;

use std::fmt::Debug;
use std::sync::Arc;

use futures_util::StreamExt;
use kube::{
    Resource,
    api::Api,
    core::DynamicObject,
    runtime::{
        Controller,
        controller::{Action, Config as ControllerConfig},
        watcher::Config,
    },
};
use serde::de::DeserializeOwned;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterClient, ClusterError, KubeCluster};
use crate::config::GtoConfig;
use crate::crd::tracking::key_of;
use crate::crd::{ClusterGitTrackObject, GitTrackObject, TrackingKey, TrackingKind};
use crate::registry::KindRegistry;
use backoff::{RetryTracker, compute_backoff};
use events::EventRecorder;
use metrics::InSyncMetrics;
use reconcile::{ReconcileOutcome, reconcile_key};

/// Finalizer placed on tracking objects when the cluster has no garbage
/// collector, so their child can be removed explicitly.
pub const CHILD_CLEANUP_FINALIZER: &str = "faros.pusher.com/child-cleanup";

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("reconcile timed out after {0:?}")]
    Timeout(Duration),
}

pub struct ControllerContext<C> {
    pub client: Arc<C>,
    pub cfg: GtoConfig,
    pub registry: Arc<KindRegistry>,
    pub metrics: InSyncMetrics,
    pub recorder: EventRecorder,
    pub retries: RetryTracker,
}

impl<C: ClusterClient> ControllerContext<C> {
    pub fn new(
        client: Arc<C>,
        cfg: GtoConfig,
        registry: Arc<KindRegistry>,
        metrics: InSyncMetrics,
    ) -> Self {
        let recorder = EventRecorder::new(cfg.namespace.clone());
        Self {
            client,
            cfg,
            registry,
            metrics,
            recorder,
            retries: RetryTracker::new(),
        }
    }
}

/// Reconcile `key` under the configured deadline and translate the outcome
/// into the next requeue.
pub async fn reconcile<C>(
    key: TrackingKey,
    ctx: Arc<ControllerContext<C>>,
) -> Result<Action, ReconcileErr>
where
    C: ClusterClient,
{
    let deadline = ctx.cfg.reconcile_timeout();
    let outcome = tokio::time::timeout(deadline, reconcile_key(&ctx, &key))
        .await
        .map_err(|_| ReconcileErr::Timeout(deadline))??;
    ctx.retries.reset(&key);
    debug!(%key, ?outcome, "reconciled");
    Ok(match outcome {
        ReconcileOutcome::NotFound | ReconcileOutcome::Finalized => {
            Action::await_change()
        }
        ReconcileOutcome::DeletionPending => {
            Action::requeue(ctx.cfg.deletion.requeue_after())
        }
        ReconcileOutcome::Skipped
        | ReconcileOutcome::InSync { .. }
        | ReconcileOutcome::Failed(_) => Action::requeue(ctx.cfg.resync()),
    })
}

pub fn error_policy<C>(
    key: &TrackingKey,
    error: &ReconcileErr,
    ctx: &ControllerContext<C>,
) -> Action {
    let attempt = ctx.retries.increment(key);
    let delay = compute_backoff(attempt, &ctx.cfg.backoff);
    warn!(%key, %error, attempt, ?delay, "reconcile failed");
    Action::requeue(delay)
}

/// Build the registry and run one controller per tracking kind until either
/// stops.
pub async fn run_controllers(
    cluster: KubeCluster,
    cfg: GtoConfig,
) -> anyhow::Result<()> {
    let mut registry = KindRegistry::with_builtins();
    if cfg.discover_kinds {
        if let Err(e) = registry.discover(cluster.client().clone()).await {
            warn!(error = %e, "kind discovery failed, using built-in kinds only");
        }
    }
    let client = cluster.client().clone();
    let ctx = Arc::new(ControllerContext::new(
        Arc::new(cluster),
        cfg,
        Arc::new(registry),
        InSyncMetrics::new(),
    ));

    let (gto_api, cgto_api): (Api<GitTrackObject>, Api<ClusterGitTrackObject>) =
        match ctx.cfg.namespace.as_deref() {
            Some(ns) => (Api::namespaced(client.clone(), ns), Api::all(client.clone())),
            None => (Api::all(client.clone()), Api::all(client.clone())),
        };

    tokio::try_join!(
        run_tracking_controller(gto_api, TrackingKind::GitTrackObject, ctx.clone()),
        run_tracking_controller(
            cgto_api,
            TrackingKind::ClusterGitTrackObject,
            ctx.clone()
        ),
    )?;
    Ok(())
}

async fn run_tracking_controller<K>(
    api: Api<K>,
    kind: TrackingKind,
    ctx: Arc<ControllerContext<KubeCluster>>,
) -> anyhow::Result<()>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let client = ctx.client.client().clone();
    let mut controller = Controller::new(api, Config::default())
        .with_config(ControllerConfig::default().concurrency(ctx.cfg.concurrency));

    // Children of the built-in kinds are watched so external edits and
    // deletions trigger a reconcile of their owner.
    for info in ctx.registry.builtins() {
        if kind.is_namespaced() && !info.namespaced {
            continue;
        }
        let children: Api<DynamicObject> =
            match (info.namespaced, ctx.cfg.namespace.as_deref()) {
                (true, Some(ns)) => {
                    Api::namespaced_with(client.clone(), ns, &info.resource)
                }
                _ => Api::all_with(client.clone(), &info.resource),
            };
        controller =
            controller.owns_with(children, info.resource.clone(), Config::default());
    }

    info!(%kind, "starting controller");
    controller
        .shutdown_on_signal()
        .run(
            move |obj, ctx| reconcile(key_of(obj.as_ref(), kind), ctx),
            move |obj, err, ctx| error_policy(&key_of(obj.as_ref(), kind), err, ctx.as_ref()),
            ctx,
        )
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    debug!(object = %obj_ref, ?action, "reconciled")
                }
                Err(e) => error!(error = ?e, "reconcile error"),
            }
        })
        .await;
    info!(%kind, "controller stopped");
    Ok(())
}
