use k8s_openapi::ByteString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired state of a single child object, extracted from git by the
/// upstream sync component.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "faros.pusher.com",
    version = "v1alpha1",
    kind = "GitTrackObject",
    plural = "gittrackobjects",
    shortname = "gto",
    namespaced,
    status = "GitTrackObjectStatus"
)]
pub struct GitTrackObjectSpec {
    /// Name of the child object
    pub name: String,
    /// Kind of the child object
    pub kind: String,
    /// Serialized child object (base64 on the wire)
    #[schemars(with = "String")]
    pub data: ByteString,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "faros.pusher.com",
    version = "v1alpha1",
    kind = "ClusterGitTrackObject",
    plural = "clustergittrackobjects",
    shortname = "cgto",
    status = "GitTrackObjectStatus"
)]
pub struct ClusterGitTrackObjectSpec {
    pub name: String,
    pub kind: String,
    #[schemars(with = "String")]
    pub data: ByteString,
}

impl From<ClusterGitTrackObjectSpec> for GitTrackObjectSpec {
    fn from(s: ClusterGitTrackObjectSpec) -> Self {
        GitTrackObjectSpec {
            name: s.name,
            kind: s.kind,
            data: s.data,
        }
    }
}

impl From<GitTrackObjectSpec> for ClusterGitTrackObjectSpec {
    fn from(s: GitTrackObjectSpec) -> Self {
        ClusterGitTrackObjectSpec {
            name: s.name,
            kind: s.kind,
            data: s.data,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct GitTrackObjectStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<GitTrackObjectCondition>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GitTrackObjectCondition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    /// Last time the condition was written with a material change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
    /// Last time `status` flipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ConditionType {
    InSync,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Reasons written to the `InSync` condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionReason {
    Success,
    ErrorUnmarshallingData,
    ErrorUnsupportedKind,
    ErrorGettingChild,
    ErrorCreatingChild,
    ErrorApplyingChild,
    ErrorDeletingChild,
    ChildDeletionPending,
}

impl ConditionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionReason::Success => "Success",
            ConditionReason::ErrorUnmarshallingData => "ErrorUnmarshallingData",
            ConditionReason::ErrorUnsupportedKind => "ErrorUnsupportedKind",
            ConditionReason::ErrorGettingChild => "ErrorGettingChild",
            ConditionReason::ErrorCreatingChild => "ErrorCreatingChild",
            ConditionReason::ErrorApplyingChild => "ErrorApplyingChild",
            ConditionReason::ErrorDeletingChild => "ErrorDeletingChild",
            ConditionReason::ChildDeletionPending => "ChildDeletionPending",
        }
    }
}

impl std::fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
