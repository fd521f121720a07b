use kube::core::DynamicObject;
use tracing::debug;

use crate::apply::merge::{FieldPath, strip_volatile};
use crate::crd::TrackingObject;
use crate::registry::{ChildTarget, KindRegistry, RegistryError};

#[derive(thiserror::Error, Debug)]
pub enum ChildError {
    #[error("unable to unmarshal data: {0}")]
    Unmarshal(String),
    #[error(transparent)]
    UnsupportedKind(RegistryError),
}

impl From<RegistryError> for ChildError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnsupportedKind { .. } => ChildError::UnsupportedKind(e),
            other => ChildError::Unmarshal(other.to_string()),
        }
    }
}

/// The child a tracking object asks for, ready to be created or merged.
#[derive(Clone, Debug)]
pub struct DesiredChild {
    pub object: DynamicObject,
    pub target: ChildTarget,
    pub immutable: Vec<FieldPath>,
}

/// Decode `spec.data` and attach identity: resolved namespace and a
/// controller owner reference back to `obj`. Server-populated fields that
/// may have been committed to git are dropped.
///
/// Namespaced children of a `GitTrackObject` always live in its namespace;
/// owner references cannot cross namespaces.
pub fn desired_child(
    obj: &TrackingObject,
    registry: &KindRegistry,
) -> Result<DesiredChild, ChildError> {
    let raw: serde_json::Value = serde_json::from_slice(&obj.spec.data.0)
        .map_err(|e| ChildError::Unmarshal(e.to_string()))?;
    if !raw.is_object() {
        return Err(ChildError::Unmarshal("data is not an object".into()));
    }
    let mut object: DynamicObject = serde_json::from_value(strip_volatile(&raw))
        .map_err(|e| ChildError::Unmarshal(e.to_string()))?;

    let (mut target, info) = registry.target_for(&object, obj.namespace())?;
    if obj.kind.is_namespaced() && target.namespaced {
        let own = obj.namespace().map(str::to_string);
        if target.namespace != own {
            debug!(
                requested = ?target.namespace,
                namespace = ?own,
                "child namespace pinned to tracking object"
            );
            target.namespace = own;
        }
    }
    object.metadata.namespace = target.namespace.clone();
    object.metadata.owner_references = Some(vec![obj.child_owner_ref()]);

    Ok(DesiredChild {
        object,
        immutable: info.immutable.clone(),
        target,
    })
}
