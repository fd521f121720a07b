//! Capability boundary towards the cluster API. The reconciler only talks to
//! the cluster through [`ClusterClient`], which keeps it testable against an
//! in-memory implementation.

mod kube_client;

pub use kube_client::KubeCluster;

use std::fmt;

use async_trait::async_trait;
use kube::core::DynamicObject;
use serde_json::Value;

use crate::crd::{GitTrackObjectStatus, TrackingKey, TrackingObject};
use crate::registry::ChildTarget;

#[derive(thiserror::Error, Debug)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("api error {code}: {message}")]
    Api { code: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    /// Whether the API server refused a patch because it touches a field
    /// that cannot change after creation.
    pub fn is_immutable_rejection(&self) -> bool {
        match self {
            ClusterError::Invalid(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("immutable")
                    || msg.contains("cannot change")
                    || msg.contains("may not change")
            }
            _ => false,
        }
    }
}

impl From<kube::Error> for ClusterError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(ae) => match ae.code {
                404 => ClusterError::NotFound(ae.message),
                409 => ClusterError::Conflict(ae.message),
                422 => ClusterError::Invalid(ae.message),
                403 => ClusterError::Forbidden(ae.message),
                code => ClusterError::Api {
                    code,
                    message: ae.message,
                },
            },
            kube::Error::SerdeError(e) => ClusterError::Serialization(e),
            other => ClusterError::Transport(other.to_string()),
        }
    }
}

/// Kind of the aggregate a tracking object may be owned by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OwnerKind {
    GitTrack,
    ClusterGitTrack,
}

impl OwnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerKind::GitTrack => "GitTrack",
            OwnerKind::ClusterGitTrack => "ClusterGitTrack",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OwnerLookup {
    pub kind: OwnerKind,
    pub namespace: Option<String>,
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Propagation {
    /// Dependents are removed first; the object lingers with a deletion
    /// timestamp until the `foregroundDeletion` finalizer is cleared.
    Foreground,
    Background,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Normal => f.write_str("Normal"),
            EventKind::Warning => f.write_str("Warning"),
        }
    }
}

/// Object an event is about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvolvedObject {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    pub uid: Option<String>,
}

impl InvolvedObject {
    pub fn of(obj: &TrackingObject) -> Self {
        InvolvedObject {
            api_version: crate::crd::tracking::API_VERSION.to_string(),
            kind: obj.kind.as_str().to_string(),
            namespace: obj.key().namespace,
            name: obj.name().to_string(),
            uid: obj.uid().map(str::to_string),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    /// Namespace the event is filed under.
    pub namespace: String,
    pub involved: InvolvedObject,
    pub kind: EventKind,
    pub reason: String,
    pub action: String,
    pub message: String,
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_tracking(
        &self,
        key: &TrackingKey,
    ) -> Result<Option<TrackingObject>, ClusterError>;

    async fn update_tracking_status(
        &self,
        key: &TrackingKey,
        status: &GitTrackObjectStatus,
    ) -> Result<(), ClusterError>;

    async fn set_tracking_finalizers(
        &self,
        key: &TrackingKey,
        finalizers: &[String],
    ) -> Result<(), ClusterError>;

    /// UID of the owning aggregate, `None` when it does not exist.
    async fn get_owner_uid(
        &self,
        owner: &OwnerLookup,
    ) -> Result<Option<String>, ClusterError>;

    async fn get_child(
        &self,
        target: &ChildTarget,
    ) -> Result<Option<DynamicObject>, ClusterError>;

    async fn create_child(
        &self,
        target: &ChildTarget,
        child: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError>;

    /// Send a JSON merge patch.
    async fn patch_child(
        &self,
        target: &ChildTarget,
        patch: &Value,
    ) -> Result<DynamicObject, ClusterError>;

    /// Delete the child. Deleting an absent child succeeds.
    async fn delete_child(
        &self,
        target: &ChildTarget,
        propagation: Propagation,
    ) -> Result<(), ClusterError>;

    async fn publish_event(&self, event: &EventRecord) -> Result<(), ClusterError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_err(code: u16, message: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: message.into(),
            reason: "Invalid".into(),
            code,
        })
    }

    #[test]
    fn api_errors_map_by_status_code() {
        assert!(ClusterError::from(api_err(404, "nope")).is_not_found());
        assert!(matches!(
            ClusterError::from(api_err(409, "stale")),
            ClusterError::Conflict(_)
        ));
        assert!(matches!(
            ClusterError::from(api_err(429, "slow down")),
            ClusterError::Api { code: 429, .. }
        ));
    }

    #[test]
    fn immutable_rejections_are_recognised() {
        let e = ClusterError::from(api_err(
            422,
            "ClusterRoleBinding.rbac.authorization.k8s.io \"x\" is invalid: roleRef: Invalid value: ...: cannot change roleRef",
        ));
        assert!(e.is_immutable_rejection());
        let e = ClusterError::from(api_err(
            422,
            "Deployment.apps \"x\" is invalid: spec.selector: Invalid value: ...: field is immutable",
        ));
        assert!(e.is_immutable_rejection());
        let e = ClusterError::from(api_err(422, "spec.replicas: must be non-negative"));
        assert!(!e.is_immutable_rejection());
        assert!(!ClusterError::Conflict("field is immutable".into()).is_immutable_rejection());
    }
}
