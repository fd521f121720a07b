//! Destructive-change detection and the delete half of delete/recreate.

use std::time::Duration;

use tracing::{debug, info};

use crate::apply::ApplyPlan;
use crate::cluster::{ClusterClient, ClusterError, Propagation};
use crate::config::DeletionConfig;
use crate::registry::ChildTarget;

/// Why a change cannot be patched in place.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destructive {
    /// The plan touches fields declared immutable for the kind.
    DeclaredImmutable(Vec<String>),
    /// The API server rejected the patch.
    Rejected(String),
}

impl std::fmt::Display for Destructive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destructive::DeclaredImmutable(fields) => {
                write!(f, "immutable fields changed: {}", fields.join(", "))
            }
            Destructive::Rejected(msg) => write!(f, "patch rejected: {msg}"),
        }
    }
}

/// Destructive before anything is sent.
pub fn detect(plan: &ApplyPlan) -> Option<Destructive> {
    plan.is_destructive().then(|| {
        Destructive::DeclaredImmutable(
            plan.destructive.iter().map(|p| p.to_string()).collect(),
        )
    })
}

/// Destructive as judged by the API server's answer to the patch.
pub fn classify_rejection(err: &ClusterError) -> Option<Destructive> {
    err.is_immutable_rejection()
        .then(|| Destructive::Rejected(err.to_string()))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Removal {
    Gone,
    /// Still present after the poll budget, usually held by a finalizer.
    Pending,
}

/// Delete the child and wait, with doubling delays, until it has
/// disappeared.
pub async fn delete_and_wait<C>(
    client: &C,
    target: &ChildTarget,
    propagation: Propagation,
    cfg: &DeletionConfig,
) -> Result<Removal, ClusterError>
where
    C: ClusterClient + ?Sized,
{
    info!(%target, ?propagation, "deleting child for recreation");
    client.delete_child(target, propagation).await?;
    wait_for_removal(client, target, cfg).await
}

pub async fn wait_for_removal<C>(
    client: &C,
    target: &ChildTarget,
    cfg: &DeletionConfig,
) -> Result<Removal, ClusterError>
where
    C: ClusterClient + ?Sized,
{
    let mut delay = Duration::from_millis(cfg.poll_ms);
    for attempt in 0..=cfg.poll_attempts {
        if client.get_child(target).await?.is_none() {
            return Ok(Removal::Gone);
        }
        if attempt == cfg.poll_attempts {
            break;
        }
        debug!(%target, attempt, ?delay, "child still present");
        tokio::time::sleep(delay).await;
        delay = delay.saturating_mul(2);
    }
    Ok(Removal::Pending)
}
