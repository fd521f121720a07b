//! Kind registry: resolves the `apiVersion`/`kind` of a desired document to
//! the API resource used to address it, its scope, and the fields the API
//! server refuses to change in place.

use std::collections::HashMap;
use std::fmt;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, PersistentVolumeClaim, Secret, Service,
    ServiceAccount,
};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, Role, RoleBinding,
};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::Client;
use kube::core::DynamicObject;
use kube::discovery::{ApiResource, Discovery, Scope};
use tracing::{debug, info};

use crate::apply::merge::FieldPath;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unsupported kind {kind} ({api_version})")]
    UnsupportedKind { api_version: String, kind: String },
    #[error("desired object is missing apiVersion/kind")]
    MissingTypeMeta,
    #[error("desired object is missing metadata.name")]
    MissingName,
}

#[derive(Clone, Debug)]
pub struct KindInfo {
    pub resource: ApiResource,
    pub namespaced: bool,
    /// Fields that cannot be patched in place; a change to any of them is
    /// destructive and needs a delete/recreate.
    pub immutable: Vec<FieldPath>,
    /// Preloaded kind; children of these kinds are watched.
    pub builtin: bool,
}

/// Address of a child object in the cluster.
#[derive(Clone, Debug)]
pub struct ChildTarget {
    pub resource: ApiResource,
    pub namespaced: bool,
    pub namespace: Option<String>,
    pub name: String,
}

impl ChildTarget {
    pub fn kind(&self) -> &str {
        &self.resource.kind
    }
}

impl fmt::Display for ChildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.resource.kind, ns, self.name),
            None => write!(f, "{} {}", self.resource.kind, self.name),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct KindRegistry {
    kinds: HashMap<(String, String), KindInfo>,
}

impl KindRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in kinds most commonly kept in git.
    pub fn with_builtins() -> Self {
        let mut r = Self::empty();
        r.register::<Deployment>(true, &[&["spec", "selector"]]);
        r.register::<StatefulSet>(
            true,
            &[
                &["spec", "selector"],
                &["spec", "serviceName"],
                &["spec", "volumeClaimTemplates"],
                &["spec", "podManagementPolicy"],
            ],
        );
        r.register::<DaemonSet>(true, &[&["spec", "selector"]]);
        r.register::<ReplicaSet>(true, &[&["spec", "selector"]]);
        r.register::<Job>(true, &[&["spec", "selector"], &["spec", "template"]]);
        r.register::<CronJob>(true, &[]);
        r.register::<Service>(
            true,
            &[&["spec", "clusterIP"], &["spec", "clusterIPs"]],
        );
        r.register::<ConfigMap>(true, &[]);
        r.register::<Secret>(true, &[&["type"]]);
        r.register::<ServiceAccount>(true, &[]);
        r.register::<PersistentVolumeClaim>(
            true,
            &[
                &["spec", "accessModes"],
                &["spec", "storageClassName"],
                &["spec", "volumeName"],
                &["spec", "selector"],
            ],
        );
        r.register::<Ingress>(true, &[]);
        r.register::<NetworkPolicy>(true, &[]);
        r.register::<PodDisruptionBudget>(true, &[]);
        r.register::<HorizontalPodAutoscaler>(true, &[]);
        r.register::<Role>(true, &[]);
        r.register::<RoleBinding>(true, &[&["roleRef"]]);
        r.register::<Namespace>(false, &[]);
        r.register::<ClusterRole>(false, &[]);
        r.register::<ClusterRoleBinding>(false, &[&["roleRef"]]);
        r.register::<CustomResourceDefinition>(false, &[&["spec", "scope"]]);
        r
    }

    fn register<K>(&mut self, namespaced: bool, immutable: &[&[&str]])
    where
        K: kube::Resource<DynamicType = ()>,
    {
        let resource = ApiResource::erase::<K>(&());
        let immutable = immutable.iter().map(|p| FieldPath::from(*p)).collect();
        self.insert(KindInfo {
            resource,
            namespaced,
            immutable,
            builtin: true,
        });
    }

    /// Register an arbitrary resource (CRD-backed kinds, discovery results).
    pub fn register_resource(&mut self, resource: ApiResource, namespaced: bool) {
        self.insert(KindInfo {
            resource,
            namespaced,
            immutable: Vec::new(),
            builtin: false,
        });
    }

    fn insert(&mut self, info: KindInfo) {
        let key = (info.resource.api_version.clone(), info.resource.kind.clone());
        self.kinds.insert(key, info);
    }

    pub fn builtins(&self) -> impl Iterator<Item = &KindInfo> {
        self.kinds.values().filter(|k| k.builtin)
    }

    pub fn resolve(
        &self,
        api_version: &str,
        kind: &str,
    ) -> Result<&KindInfo, RegistryError> {
        self.kinds
            .get(&(api_version.to_string(), kind.to_string()))
            .ok_or_else(|| RegistryError::UnsupportedKind {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
            })
    }

    /// Resolve where `desired` lives. Namespaced kinds without an explicit
    /// namespace land in `default_ns`.
    pub fn target_for(
        &self,
        desired: &DynamicObject,
        default_ns: Option<&str>,
    ) -> Result<(ChildTarget, &KindInfo), RegistryError> {
        let types = desired
            .types
            .as_ref()
            .filter(|t| !t.api_version.is_empty() && !t.kind.is_empty())
            .ok_or(RegistryError::MissingTypeMeta)?;
        let info = self.resolve(&types.api_version, &types.kind)?;
        let name = desired
            .metadata
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or(RegistryError::MissingName)?;
        let namespace = if info.namespaced {
            Some(
                desired
                    .metadata
                    .namespace
                    .clone()
                    .or_else(|| default_ns.map(str::to_string))
                    .unwrap_or_else(|| "default".to_string()),
            )
        } else {
            None
        };
        Ok((
            ChildTarget {
                resource: info.resource.clone(),
                namespaced: info.namespaced,
                namespace,
                name,
            },
            info,
        ))
    }

    /// Add every resource advertised by the API server that is not already
    /// known. Built-in entries keep their immutable-field declarations.
    pub async fn discover(&mut self, client: Client) -> Result<usize, kube::Error> {
        let discovery = Discovery::new(client).run().await?;
        let mut added = 0;
        for group in discovery.groups() {
            for version in group.versions() {
                for (ar, caps) in group.versioned_resources(version) {
                    let key = (ar.api_version.clone(), ar.kind.clone());
                    if self.kinds.contains_key(&key) {
                        continue;
                    }
                    debug!(api_version = %ar.api_version, kind = %ar.kind, "registry: discovered kind");
                    self.register_resource(ar, matches!(caps.scope, Scope::Namespaced));
                    added += 1;
                }
            }
        }
        info!(added, total = self.kinds.len(), "registry: discovery complete");
        Ok(added)
    }
}
