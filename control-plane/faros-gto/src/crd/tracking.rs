use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::ObjectMeta;
use kube::ResourceExt;

use super::git_track_object::{
    ClusterGitTrackObject, GitTrackObject, GitTrackObjectSpec,
    GitTrackObjectStatus,
};

pub const GROUP: &str = "faros.pusher.com";
pub const API_VERSION: &str = "faros.pusher.com/v1alpha1";

/// The two flavours of tracking resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackingKind {
    GitTrackObject,
    ClusterGitTrackObject,
}

impl TrackingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingKind::GitTrackObject => "GitTrackObject",
            TrackingKind::ClusterGitTrackObject => "ClusterGitTrackObject",
        }
    }

    pub fn is_namespaced(&self) -> bool {
        matches!(self, TrackingKind::GitTrackObject)
    }
}

impl fmt::Display for TrackingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue key of a tracking resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TrackingKey {
    pub kind: TrackingKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl TrackingKey {
    pub fn namespaced(ns: &str, name: &str) -> Self {
        Self {
            kind: TrackingKind::GitTrackObject,
            namespace: Some(ns.to_string()),
            name: name.to_string(),
        }
    }

    pub fn cluster(name: &str) -> Self {
        Self {
            kind: TrackingKind::ClusterGitTrackObject,
            namespace: None,
            name: name.to_string(),
        }
    }
}

impl fmt::Display for TrackingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Kind-agnostic view of a `GitTrackObject` or `ClusterGitTrackObject`.
#[derive(Clone, Debug)]
pub struct TrackingObject {
    pub kind: TrackingKind,
    pub metadata: ObjectMeta,
    pub spec: GitTrackObjectSpec,
    pub status: Option<GitTrackObjectStatus>,
}

impl TrackingObject {
    pub fn key(&self) -> TrackingKey {
        TrackingKey {
            kind: self.kind,
            namespace: if self.kind.is_namespaced() {
                self.metadata.namespace.clone()
            } else {
                None
            },
            name: self.metadata.name.clone().unwrap_or_default(),
        }
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    pub fn uid(&self) -> Option<&str> {
        self.metadata.uid.as_deref()
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .map(|f| f.iter().any(|x| x == finalizer))
            .unwrap_or(false)
    }

    /// Controller owner reference placed on every child of this object.
    pub fn child_owner_ref(&self) -> OwnerReference {
        OwnerReference {
            api_version: API_VERSION.to_string(),
            kind: self.kind.as_str().to_string(),
            name: self.name().to_string(),
            uid: self.uid().unwrap_or_default().to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    pub fn owner_references(&self) -> &[OwnerReference] {
        self.metadata.owner_references.as_deref().unwrap_or_default()
    }
}

impl From<GitTrackObject> for TrackingObject {
    fn from(o: GitTrackObject) -> Self {
        TrackingObject {
            kind: TrackingKind::GitTrackObject,
            metadata: o.metadata,
            spec: o.spec,
            status: o.status,
        }
    }
}

impl From<ClusterGitTrackObject> for TrackingObject {
    fn from(o: ClusterGitTrackObject) -> Self {
        TrackingObject {
            kind: TrackingKind::ClusterGitTrackObject,
            metadata: o.metadata,
            spec: o.spec.into(),
            status: o.status,
        }
    }
}

/// Queue key for any typed tracking resource handed over by the runtime.
pub fn key_of<K>(obj: &K, kind: TrackingKind) -> TrackingKey
where
    K: ResourceExt,
{
    TrackingKey {
        kind,
        namespace: if kind.is_namespaced() {
            obj.namespace()
        } else {
            None
        },
        name: obj.name_any(),
    }
}
