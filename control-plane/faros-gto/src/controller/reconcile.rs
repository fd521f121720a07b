use kube::ResourceExt;
use kube::core::DynamicObject;
use tracing::{debug, info, instrument, warn};

use super::child::{ChildError, DesiredChild, desired_child};
use super::events::{
    ACTION_CREATE, ACTION_DELETE, ACTION_UNMARSHAL, ACTION_UPDATE,
    REASON_CREATE_FAILED, REASON_CREATE_STARTED, REASON_CREATE_SUCCESSFUL,
    REASON_DELETE_FAILED, REASON_DELETE_STARTED, REASON_DELETE_SUCCESSFUL,
    REASON_UNMARSHAL_FAILED, REASON_UPDATE_FAILED, REASON_UPDATE_STARTED,
    REASON_UPDATE_SUCCESSFUL,
};
use super::recreate::{self, Destructive, Removal};
use super::status::set_condition;
use super::strategy::UpdateStrategy;
use super::{CHILD_CLEANUP_FINALIZER, ControllerContext, ReconcileErr};
use crate::apply;
use crate::cluster::{
    ClusterClient, ClusterError, OwnerKind, OwnerLookup, Propagation,
};
use crate::crd::tracking::GROUP;
use crate::crd::{
    ConditionReason, ConditionStatus, ConditionType, TrackingKey,
    TrackingObject,
};

/// How a single reconcile ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The tracking object no longer exists.
    NotFound,
    /// Outside this controller's authority; nothing was touched.
    Skipped,
    /// Child matches the desired document. `changed` is set when this
    /// reconcile had to write to it.
    InSync { changed: bool },
    /// Reported on the status; waits for the desired document to change.
    Failed(ConditionReason),
    /// The child is being deleted; retry shortly.
    DeletionPending,
    /// Cleanup of a deleted tracking object finished.
    Finalized,
}

/// Bring the child of the tracking object behind `key` in line with its
/// desired document.
#[instrument(skip_all, fields(kind = %key.kind, namespace = ?key.namespace, name = %key.name))]
pub async fn reconcile_key<C>(
    ctx: &ControllerContext<C>,
    key: &TrackingKey,
) -> Result<ReconcileOutcome, ReconcileErr>
where
    C: ClusterClient,
{
    let Some(obj) = ctx.client.get_tracking(key).await? else {
        debug!("tracking object gone");
        ctx.metrics.remove(key);
        return Ok(ReconcileOutcome::NotFound);
    };

    if let Some(ns) = key.namespace.as_deref() {
        if !ctx.cfg.in_scope(ns) {
            debug!("namespace outside controller scope");
            return Ok(ReconcileOutcome::Skipped);
        }
    }

    if obj.is_deleting() {
        if obj.has_finalizer(CHILD_CLEANUP_FINALIZER) {
            return finalize(ctx, &obj).await;
        }
        return Ok(ReconcileOutcome::Skipped);
    }

    if !owner_eligible(ctx, &obj).await? {
        debug!("owner missing or ineligible, skipping");
        return Ok(ReconcileOutcome::Skipped);
    }

    if ctx.cfg.gc_disabled && !obj.has_finalizer(CHILD_CLEANUP_FINALIZER) {
        let mut finalizers = obj.metadata.finalizers.clone().unwrap_or_default();
        finalizers.push(CHILD_CLEANUP_FINALIZER.to_string());
        ctx.client.set_tracking_finalizers(key, &finalizers).await?;
    }

    let desired = match desired_child(&obj, &ctx.registry) {
        Ok(d) => d,
        Err(ChildError::Unmarshal(msg)) => {
            warn!(error = %msg, "unable to decode desired document");
            ctx.recorder
                .warning(
                    ctx.client.as_ref(),
                    &obj,
                    REASON_UNMARSHAL_FAILED,
                    ACTION_UNMARSHAL,
                    format!("Unable to unmarshal data: {msg}"),
                )
                .await;
            let reason = ConditionReason::ErrorUnmarshallingData;
            report(ctx, &obj, ConditionStatus::False, reason, &msg).await?;
            return Ok(ReconcileOutcome::Failed(reason));
        }
        Err(ChildError::UnsupportedKind(e)) => {
            warn!(error = %e, "unsupported child kind");
            ctx.recorder
                .warning(
                    ctx.client.as_ref(),
                    &obj,
                    REASON_UPDATE_FAILED,
                    ACTION_UPDATE,
                    e.to_string(),
                )
                .await;
            let reason = ConditionReason::ErrorUnsupportedKind;
            report(ctx, &obj, ConditionStatus::False, reason, &e.to_string())
                .await?;
            return Ok(ReconcileOutcome::Failed(reason));
        }
    };

    if let Some(ns) = desired.target.namespace.as_deref() {
        if !ctx.cfg.in_scope(ns) {
            debug!(target = %desired.target, "child namespace outside controller scope");
            return Ok(ReconcileOutcome::Skipped);
        }
    }

    let live = match ctx.client.get_child(&desired.target).await {
        Ok(live) => live,
        Err(e) => {
            report(
                ctx,
                &obj,
                ConditionStatus::False,
                ConditionReason::ErrorGettingChild,
                &e.to_string(),
            )
            .await?;
            return Err(e.into());
        }
    };

    match live {
        None => create_child(ctx, &obj, desired).await,
        Some(live) if live.metadata.deletion_timestamp.is_some() => {
            deletion_pending(ctx, &obj, &desired).await
        }
        Some(live) => update_child(ctx, &obj, desired, live).await,
    }
}

/// The owner reference must point at a `GitTrack` or `ClusterGitTrack`
/// that exists with the referenced UID.
async fn owner_eligible<C>(
    ctx: &ControllerContext<C>,
    obj: &TrackingObject,
) -> Result<bool, ClusterError>
where
    C: ClusterClient,
{
    for r in obj.owner_references() {
        if r.api_version.split('/').next() != Some(GROUP) {
            continue;
        }
        let lookup = match r.kind.as_str() {
            "GitTrack" => {
                let ns = if obj.kind.is_namespaced() {
                    obj.namespace()
                } else {
                    ctx.cfg.namespace.as_deref()
                };
                let Some(ns) = ns else { continue };
                OwnerLookup {
                    kind: OwnerKind::GitTrack,
                    namespace: Some(ns.to_string()),
                    name: r.name.clone(),
                }
            }
            "ClusterGitTrack" => OwnerLookup {
                kind: OwnerKind::ClusterGitTrack,
                namespace: None,
                name: r.name.clone(),
            },
            _ => continue,
        };
        match ctx.client.get_owner_uid(&lookup).await? {
            Some(uid) if uid == r.uid => return Ok(true),
            Some(_) => debug!(owner = %r.name, "owner UID mismatch"),
            None => debug!(owner = %r.name, "owner not found"),
        }
    }
    Ok(false)
}

async fn create_child<C>(
    ctx: &ControllerContext<C>,
    obj: &TrackingObject,
    desired: DesiredChild,
) -> Result<ReconcileOutcome, ReconcileErr>
where
    C: ClusterClient,
{
    let DesiredChild {
        mut object, target, ..
    } = desired;
    let client = ctx.client.as_ref();
    ctx.recorder
        .normal(
            client,
            obj,
            REASON_CREATE_STARTED,
            ACTION_CREATE,
            format!("Creating child {target}"),
        )
        .await;
    apply::annotate_for_create(&mut object)?;
    match client.create_child(&target, &object).await {
        Ok(created) => {
            info!(%target, uid = ?created.metadata.uid, "created child");
            ctx.recorder
                .normal(
                    client,
                    obj,
                    REASON_CREATE_SUCCESSFUL,
                    ACTION_CREATE,
                    format!("Successfully created child {target}"),
                )
                .await;
            report(ctx, obj, ConditionStatus::True, ConditionReason::Success, "")
                .await?;
            Ok(ReconcileOutcome::InSync { changed: true })
        }
        Err(e) => {
            warn!(%target, error = %e, "failed to create child");
            ctx.recorder
                .warning(
                    client,
                    obj,
                    REASON_CREATE_FAILED,
                    ACTION_CREATE,
                    format!("Failed to create child {target}: {e}"),
                )
                .await;
            report(
                ctx,
                obj,
                ConditionStatus::False,
                ConditionReason::ErrorCreatingChild,
                &e.to_string(),
            )
            .await?;
            Err(e.into())
        }
    }
}

async fn update_child<C>(
    ctx: &ControllerContext<C>,
    obj: &TrackingObject,
    desired: DesiredChild,
    live: DynamicObject,
) -> Result<ReconcileOutcome, ReconcileErr>
where
    C: ClusterClient,
{
    let strategy =
        UpdateStrategy::resolve(&desired.object, ctx.cfg.default_strategy());
    let target = &desired.target;

    if strategy == UpdateStrategy::Never {
        debug!(%target, "update strategy is never, leaving child untouched");
        report(ctx, obj, ConditionStatus::True, ConditionReason::Success, "")
            .await?;
        return Ok(ReconcileOutcome::InSync { changed: false });
    }

    let plan = apply::plan(&desired.object, &live, &desired.immutable)?;
    if plan.is_noop() {
        debug!(%target, "child in sync");
        report(ctx, obj, ConditionStatus::True, ConditionReason::Success, "")
            .await?;
        return Ok(ReconcileOutcome::InSync { changed: false });
    }

    if strategy == UpdateStrategy::Recreate {
        if let Some(why) = recreate::detect(&plan) {
            return recreate_child(ctx, obj, desired, why).await;
        }
    }

    let client = ctx.client.as_ref();
    ctx.recorder
        .normal(
            client,
            obj,
            REASON_UPDATE_STARTED,
            ACTION_UPDATE,
            format!("Updating child {target}"),
        )
        .await;

    match apply::apply(client, target, live, &plan).await {
        Ok(outcome) => {
            info!(
                %target,
                changed = outcome.changed,
                resource_version = ?outcome.object.metadata.resource_version,
                "applied child"
            );
            ctx.recorder
                .normal(
                    client,
                    obj,
                    REASON_UPDATE_SUCCESSFUL,
                    ACTION_UPDATE,
                    format!("Successfully updated child {target}"),
                )
                .await;
            report(ctx, obj, ConditionStatus::True, ConditionReason::Success, "")
                .await?;
            Ok(ReconcileOutcome::InSync {
                changed: outcome.changed,
            })
        }
        Err(e) => match recreate::classify_rejection(&e) {
            Some(why) if strategy == UpdateStrategy::Recreate => {
                recreate_child(ctx, obj, desired, why).await
            }
            rejection => {
                warn!(%target, error = %e, "failed to update child");
                ctx.recorder
                    .warning(
                        client,
                        obj,
                        REASON_UPDATE_FAILED,
                        ACTION_UPDATE,
                        format!("Failed to update child {target}: {e}"),
                    )
                    .await;
                report(
                    ctx,
                    obj,
                    ConditionStatus::False,
                    ConditionReason::ErrorApplyingChild,
                    &e.to_string(),
                )
                .await?;
                // An immutable-field rejection will not heal by retrying.
                if rejection.is_some() {
                    Ok(ReconcileOutcome::Failed(
                        ConditionReason::ErrorApplyingChild,
                    ))
                } else {
                    Err(e.into())
                }
            }
        },
    }
}

async fn recreate_child<C>(
    ctx: &ControllerContext<C>,
    obj: &TrackingObject,
    desired: DesiredChild,
    why: Destructive,
) -> Result<ReconcileOutcome, ReconcileErr>
where
    C: ClusterClient,
{
    let target = &desired.target;
    let client = ctx.client.as_ref();
    info!(%target, reason = %why, "recreating child");
    ctx.recorder
        .normal(
            client,
            obj,
            REASON_DELETE_STARTED,
            ACTION_DELETE,
            format!("Deleting child {target} for recreation: {why}"),
        )
        .await;
    // Without a garbage collector nothing clears the foregroundDeletion
    // finalizer, so the child is removed directly.
    let propagation = if ctx.cfg.gc_disabled {
        Propagation::Background
    } else {
        Propagation::Foreground
    };
    match recreate::delete_and_wait(client, target, propagation, &ctx.cfg.deletion)
        .await
    {
        Ok(Removal::Gone) => {
            ctx.recorder
                .normal(
                    client,
                    obj,
                    REASON_DELETE_SUCCESSFUL,
                    ACTION_DELETE,
                    format!("Deleted child {target}"),
                )
                .await;
            create_child(ctx, obj, desired).await
        }
        Ok(Removal::Pending) => deletion_pending(ctx, obj, &desired).await,
        Err(e) => {
            warn!(%target, error = %e, "failed to delete child");
            ctx.recorder
                .warning(
                    client,
                    obj,
                    REASON_DELETE_FAILED,
                    ACTION_DELETE,
                    format!("Failed to delete child {target}: {e}"),
                )
                .await;
            report(
                ctx,
                obj,
                ConditionStatus::False,
                ConditionReason::ErrorDeletingChild,
                &e.to_string(),
            )
            .await?;
            Err(e.into())
        }
    }
}

async fn deletion_pending<C>(
    ctx: &ControllerContext<C>,
    obj: &TrackingObject,
    desired: &DesiredChild,
) -> Result<ReconcileOutcome, ReconcileErr>
where
    C: ClusterClient,
{
    debug!(target = %desired.target, "child deletion still in progress");
    report(
        ctx,
        obj,
        ConditionStatus::Unknown,
        ConditionReason::ChildDeletionPending,
        &format!("Waiting for {} to be deleted", desired.target),
    )
    .await?;
    Ok(ReconcileOutcome::DeletionPending)
}

/// Delete the child of a tracking object that is going away, then release
/// the tracking object.
async fn finalize<C>(
    ctx: &ControllerContext<C>,
    obj: &TrackingObject,
) -> Result<ReconcileOutcome, ReconcileErr>
where
    C: ClusterClient,
{
    let client = ctx.client.as_ref();
    match desired_child(obj, &ctx.registry) {
        Ok(desired) => {
            let target = &desired.target;
            let owned = client.get_child(target).await?.is_some_and(|c| {
                c.owner_references()
                    .iter()
                    .any(|r| Some(r.uid.as_str()) == obj.uid())
            });
            if owned {
                info!(%target, "deleting child of deleted tracking object");
                if let Err(e) =
                    client.delete_child(target, Propagation::Background).await
                {
                    ctx.recorder
                        .warning(
                            client,
                            obj,
                            REASON_DELETE_FAILED,
                            ACTION_DELETE,
                            format!("Failed to delete child {target}: {e}"),
                        )
                        .await;
                    return Err(e.into());
                }
                ctx.recorder
                    .normal(
                        client,
                        obj,
                        REASON_DELETE_SUCCESSFUL,
                        ACTION_DELETE,
                        format!("Deleted child {target}"),
                    )
                    .await;
            }
        }
        Err(e) => debug!(error = %e, "no child to clean up"),
    }

    let finalizers: Vec<String> = obj
        .metadata
        .finalizers
        .iter()
        .flatten()
        .filter(|f| f.as_str() != CHILD_CLEANUP_FINALIZER)
        .cloned()
        .collect();
    ctx.client.set_tracking_finalizers(&obj.key(), &finalizers).await?;
    ctx.metrics.remove(&obj.key());
    Ok(ReconcileOutcome::Finalized)
}

/// Write the `InSync` condition (skipped when unchanged) and the gauge.
async fn report<C>(
    ctx: &ControllerContext<C>,
    obj: &TrackingObject,
    status: ConditionStatus,
    reason: ConditionReason,
    message: &str,
) -> Result<(), ClusterError>
where
    C: ClusterClient,
{
    let key = obj.key();
    ctx.metrics
        .set_in_sync(&key, status == ConditionStatus::True);
    let now = chrono::Utc::now().to_rfc3339();
    if let Some(next) = set_condition(
        obj.status.as_ref(),
        ConditionType::InSync,
        status,
        reason,
        message,
        &now,
    ) {
        ctx.client.update_tracking_status(&key, &next).await?;
    }
    Ok(())
}
