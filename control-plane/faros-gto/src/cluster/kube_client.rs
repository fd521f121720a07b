use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    Client,
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    core::DynamicObject,
    runtime::events::{Event, EventType, Recorder, Reporter},
};
use serde_json::{Value, json};
use tracing::trace;

use super::{
    ClusterClient, ClusterError, EventKind, EventRecord, OwnerKind,
    OwnerLookup, Propagation,
};
use crate::crd::{
    ClusterGitTrack, ClusterGitTrackObject, GitTrack, GitTrackObject,
    GitTrackObjectStatus, TrackingKey, TrackingKind, TrackingObject,
};
use crate::registry::ChildTarget;

/// [`ClusterClient`] backed by a live API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    recorder: Recorder,
}

impl KubeCluster {
    pub fn new(client: Client, reporter: &str) -> Self {
        let recorder = Recorder::new(
            client.clone(),
            Reporter {
                controller: reporter.to_string(),
                instance: None,
            },
        );
        Self { client, recorder }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn child_api(&self, target: &ChildTarget) -> Api<DynamicObject> {
        match &target.namespace {
            Some(ns) if target.namespaced => {
                Api::namespaced_with(self.client.clone(), ns, &target.resource)
            }
            _ => Api::all_with(self.client.clone(), &target.resource),
        }
    }

    async fn patch_tracking(
        &self,
        key: &TrackingKey,
        patch: &Value,
        status: bool,
    ) -> Result<(), ClusterError> {
        let pp = PatchParams::default();
        let patch = Patch::Merge(patch);
        match (key.kind, key.namespace.as_deref()) {
            (TrackingKind::GitTrackObject, Some(ns)) => {
                let api: Api<GitTrackObject> =
                    Api::namespaced(self.client.clone(), ns);
                if status {
                    api.patch_status(&key.name, &pp, &patch).await?;
                } else {
                    api.patch(&key.name, &pp, &patch).await?;
                }
            }
            (TrackingKind::GitTrackObject, None) => {
                return Err(ClusterError::NotFound(key.to_string()));
            }
            (TrackingKind::ClusterGitTrackObject, _) => {
                let api: Api<ClusterGitTrackObject> =
                    Api::all(self.client.clone());
                if status {
                    api.patch_status(&key.name, &pp, &patch).await?;
                } else {
                    api.patch(&key.name, &pp, &patch).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn get_tracking(
        &self,
        key: &TrackingKey,
    ) -> Result<Option<TrackingObject>, ClusterError> {
        let obj = match (key.kind, key.namespace.as_deref()) {
            (TrackingKind::GitTrackObject, Some(ns)) => {
                let api: Api<GitTrackObject> =
                    Api::namespaced(self.client.clone(), ns);
                api.get_opt(&key.name).await?.map(TrackingObject::from)
            }
            (TrackingKind::GitTrackObject, None) => None,
            (TrackingKind::ClusterGitTrackObject, _) => {
                let api: Api<ClusterGitTrackObject> =
                    Api::all(self.client.clone());
                api.get_opt(&key.name).await?.map(TrackingObject::from)
            }
        };
        Ok(obj)
    }

    async fn update_tracking_status(
        &self,
        key: &TrackingKey,
        status: &GitTrackObjectStatus,
    ) -> Result<(), ClusterError> {
        self.patch_tracking(key, &json!({ "status": status }), true)
            .await
    }

    async fn set_tracking_finalizers(
        &self,
        key: &TrackingKey,
        finalizers: &[String],
    ) -> Result<(), ClusterError> {
        self.patch_tracking(
            key,
            &json!({ "metadata": { "finalizers": finalizers } }),
            false,
        )
        .await
    }

    async fn get_owner_uid(
        &self,
        owner: &OwnerLookup,
    ) -> Result<Option<String>, ClusterError> {
        let uid = match (owner.kind, owner.namespace.as_deref()) {
            (OwnerKind::GitTrack, Some(ns)) => {
                let api: Api<GitTrack> = Api::namespaced(self.client.clone(), ns);
                api.get_opt(&owner.name).await?.and_then(|o| o.metadata.uid)
            }
            (OwnerKind::GitTrack, None) => None,
            (OwnerKind::ClusterGitTrack, _) => {
                let api: Api<ClusterGitTrack> = Api::all(self.client.clone());
                api.get_opt(&owner.name).await?.and_then(|o| o.metadata.uid)
            }
        };
        Ok(uid)
    }

    async fn get_child(
        &self,
        target: &ChildTarget,
    ) -> Result<Option<DynamicObject>, ClusterError> {
        Ok(self.child_api(target).get_opt(&target.name).await?)
    }

    async fn create_child(
        &self,
        target: &ChildTarget,
        child: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        Ok(self
            .child_api(target)
            .create(&PostParams::default(), child)
            .await?)
    }

    async fn patch_child(
        &self,
        target: &ChildTarget,
        patch: &Value,
    ) -> Result<DynamicObject, ClusterError> {
        trace!(%target, %patch, "patching child");
        Ok(self
            .child_api(target)
            .patch(&target.name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    async fn delete_child(
        &self,
        target: &ChildTarget,
        propagation: Propagation,
    ) -> Result<(), ClusterError> {
        let dp = match propagation {
            Propagation::Foreground => DeleteParams::foreground(),
            Propagation::Background => DeleteParams::background(),
        };
        match self.child_api(target).delete(&target.name, &dp).await {
            Ok(_) => Ok(()),
            Err(e) => match ClusterError::from(e) {
                ClusterError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn publish_event(&self, event: &EventRecord) -> Result<(), ClusterError> {
        let reference = ObjectReference {
            api_version: Some(event.involved.api_version.clone()),
            kind: Some(event.involved.kind.clone()),
            name: Some(event.involved.name.clone()),
            namespace: Some(event.namespace.clone()),
            uid: event.involved.uid.clone(),
            ..Default::default()
        };
        self.recorder
            .publish(
                &Event {
                    type_: match event.kind {
                        EventKind::Normal => EventType::Normal,
                        EventKind::Warning => EventType::Warning,
                    },
                    reason: event.reason.clone(),
                    note: Some(event.message.clone()),
                    action: event.action.clone(),
                    secondary: None,
                },
                &reference,
            )
            .await?;
        Ok(())
    }
}
