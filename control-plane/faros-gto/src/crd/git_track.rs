use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Spec shared by the namespaced and cluster-scoped tracked repositories.
/// The reconciliation engine only relies on their existence and UID; the
/// git-sync component owns everything else.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[kube(
    group = "faros.pusher.com",
    version = "v1alpha1",
    kind = "GitTrack",
    plural = "gittracks",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GitTrackSpec {
    /// Repository URL to track
    pub repository: String,
    /// Branch, tag or commit to check out
    pub reference: String,
    /// Optional sub directory holding the manifests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    /// Optional secret reference for SSH deploy keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_key: Option<DeployKey>,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[kube(
    group = "faros.pusher.com",
    version = "v1alpha1",
    kind = "ClusterGitTrack",
    plural = "clustergittracks"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterGitTrackSpec {
    pub repository: String,
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_key: Option<DeployKey>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeployKey {
    pub secret_name: String,
    pub key: String,
}
