//! Applier: three-way merge of a desired document onto a live child, using
//! the last-applied annotation as merge base.

pub mod merge;

use std::collections::BTreeMap;

use kube::core::DynamicObject;
use serde_json::Value;
use tracing::{debug, trace};

use crate::cluster::{ClusterClient, ClusterError};
use crate::registry::ChildTarget;
use merge::{FieldPath, FieldSet, Ownership, is_empty_patch, set_path, strip_volatile};

/// Annotation holding the last desired document applied to a child.
pub const LAST_APPLIED_ANNOTATION: &str = "faros.pusher.com/last-applied";

/// The patch an apply would send, computed without touching the cluster.
#[derive(Clone, Debug)]
pub struct ApplyPlan {
    pub patch: Value,
    pub fields: FieldSet,
    /// Pending fields the API server will refuse to change in place.
    pub destructive: Vec<FieldPath>,
}

impl ApplyPlan {
    pub fn is_noop(&self) -> bool {
        is_empty_patch(&self.patch)
    }

    pub fn is_destructive(&self) -> bool {
        !self.destructive.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct ApplyOutcome {
    pub object: DynamicObject,
    pub changed: bool,
}

/// Canonical serialization of `desired` as stored in the annotation.
pub fn encode_last_applied(desired: &DynamicObject) -> Result<String, serde_json::Error> {
    let doc = serde_json::to_value(desired)?;
    serde_json::to_string(&strip_volatile(&doc))
}

/// Merge base recorded on `live`. An unparsable record counts as absent.
pub fn last_applied(live: &DynamicObject) -> Option<Value> {
    let raw = live.metadata.annotations.as_ref()?.get(LAST_APPLIED_ANNOTATION)?;
    match serde_json::from_str(raw) {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(error = %e, "ignoring unparsable last-applied annotation");
            None
        }
    }
}

/// Stamp the last-applied annotation onto a child about to be created.
pub fn annotate_for_create(desired: &mut DynamicObject) -> Result<(), serde_json::Error> {
    let encoded = encode_last_applied(desired)?;
    desired
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(LAST_APPLIED_ANNOTATION.to_string(), encoded);
    Ok(())
}

/// Compute the merge patch taking `live` to `desired`. `immutable` lists the
/// fields of this kind that cannot be patched.
pub fn plan(
    desired: &DynamicObject,
    live: &DynamicObject,
    immutable: &[FieldPath],
) -> Result<ApplyPlan, serde_json::Error> {
    let desired_doc = serde_json::to_value(desired)?;
    let live_doc = serde_json::to_value(live)?;
    let base = last_applied(live);

    let fields = FieldSet::classify(&desired_doc, base.as_ref(), &live_doc);
    let mut patch = fields.patch(&desired_doc);

    let destructive: Vec<FieldPath> = fields
        .pending()
        .filter(|e| e.ownership != Ownership::External)
        .filter(|e| immutable.iter().any(|p| p.overlaps(&e.path)))
        .map(|e| e.path.clone())
        .collect();

    let encoded = encode_last_applied(desired)?;
    let recorded = live
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(LAST_APPLIED_ANNOTATION));
    if recorded != Some(&encoded) {
        set_path(
            &mut patch,
            &[
                "metadata".to_string(),
                "annotations".to_string(),
                LAST_APPLIED_ANNOTATION.to_string(),
            ],
            Value::String(encoded),
        );
    }

    Ok(ApplyPlan {
        patch,
        fields,
        destructive,
    })
}

/// Send `plan` to the cluster. A no-op plan makes no API call.
pub async fn apply<C>(
    client: &C,
    target: &ChildTarget,
    live: DynamicObject,
    plan: &ApplyPlan,
) -> Result<ApplyOutcome, ClusterError>
where
    C: ClusterClient + ?Sized,
{
    if plan.is_noop() {
        trace!(%target, "child already in sync");
        return Ok(ApplyOutcome {
            object: live,
            changed: false,
        });
    }
    for e in plan.fields.conflicts() {
        debug!(%target, field = %e.path, "reverting external change");
    }
    let object = client.patch_child(target, &plan.patch).await?;
    Ok(ApplyOutcome {
        object,
        changed: true,
    })
}
