#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use faros_gto::{
    cluster::{
        ClusterClient, ClusterError, EventKind, EventRecord, OwnerKind,
        OwnerLookup, Propagation,
    },
    config::GtoConfig,
    controller::{ControllerContext, metrics::InSyncMetrics},
    crd::{
        ClusterGitTrackObject, ConditionStatus, ConditionType, GitTrackObject,
        GitTrackObjectCondition, GitTrackObjectSpec, GitTrackObjectStatus,
        TrackingKey, TrackingObject,
        tracking::API_VERSION,
    },
    registry::{ChildTarget, KindRegistry},
};
use k8s_openapi::ByteString;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::DynamicObject;
use serde_json::{Value, json};

// DNS-1123 safe numeric suffix for unique names
pub const DIGITS: [char; 10] =
    ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
pub fn uniq(prefix: &str) -> String {
    format!("{prefix}-{}", nanoid::nanoid!(6, &DIGITS))
}

const DELETION_TIMESTAMP: &str = "2026-01-01T00:00:00Z";

pub fn deployment(name: &str, image: &str) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": name, "labels": {"app": "nginx"}},
        "spec": {
            "replicas": 1,
            "selector": {"matchLabels": {"app": "nginx"}},
            "template": {
                "metadata": {"labels": {"app": "nginx"}},
                "spec": {"containers": [{"name": "nginx", "image": image}]}
            }
        }
    })
}

pub fn cluster_role_binding(name: &str, role: &str) -> Value {
    json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "ClusterRoleBinding",
        "metadata": {"name": name},
        "roleRef": {
            "apiGroup": "rbac.authorization.k8s.io",
            "kind": "ClusterRole",
            "name": role
        },
        "subjects": [{"kind": "ServiceAccount", "name": "default", "namespace": "default"}]
    })
}

pub fn with_strategy(mut doc: Value, strategy: &str) -> Value {
    doc["metadata"]["annotations"] =
        json!({"faros.pusher.com/update-strategy": strategy});
    doc
}

/// Identity of a child in the fake store.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChildKey {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ChildKey {
    pub fn namespaced(kind: &str, ns: &str, name: &str) -> Self {
        Self {
            kind: kind.into(),
            namespace: Some(ns.into()),
            name: name.into(),
        }
    }

    pub fn cluster(kind: &str, name: &str) -> Self {
        Self {
            kind: kind.into(),
            namespace: None,
            name: name.into(),
        }
    }

    fn of(target: &ChildTarget) -> Self {
        Self {
            kind: target.kind().to_string(),
            namespace: target.namespace.clone(),
            name: target.name.clone(),
        }
    }
}

#[derive(Default)]
struct State {
    tracking: HashMap<TrackingKey, TrackingObject>,
    owners: HashMap<OwnerLookup, String>,
    children: HashMap<ChildKey, Value>,
    events: Vec<EventRecord>,
    immutable: Vec<(String, Vec<String>)>,
    fail_next_get_child: Option<ClusterError>,
    fail_next_create: Option<ClusterError>,
    fail_next_patch: Option<ClusterError>,
    patch_calls: usize,
    create_calls: usize,
    next_version: u64,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

/// In-memory API server for driving the reconciler.
///
/// With `gc` off, foreground deletes leave the child behind with a
/// deletion timestamp and the `foregroundDeletion` finalizer, exactly like
/// a cluster without a garbage collector. [`FakeCluster::finalize_child`]
/// plays the role of the collector.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
    gc: bool,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gc() -> Self {
        Self {
            gc: true,
            ..Self::default()
        }
    }

    /// Reject merge patches that change `path` on objects of `kind`.
    pub fn reject_changes_to(&self, kind: &str, path: &[&str]) {
        self.state.lock().unwrap().immutable.push((
            kind.to_string(),
            path.iter().map(|s| s.to_string()).collect(),
        ));
    }

    pub fn fail_next_get_child(&self, err: ClusterError) {
        self.state.lock().unwrap().fail_next_get_child = Some(err);
    }

    pub fn fail_next_create(&self, err: ClusterError) {
        self.state.lock().unwrap().fail_next_create = Some(err);
    }

    pub fn fail_next_patch(&self, err: ClusterError) {
        self.state.lock().unwrap().fail_next_patch = Some(err);
    }

    pub fn add_git_track(&self, ns: &str, name: &str) -> OwnerReference {
        self.add_owner(OwnerKind::GitTrack, Some(ns), name)
    }

    pub fn add_cluster_git_track(&self, name: &str) -> OwnerReference {
        self.add_owner(OwnerKind::ClusterGitTrack, None, name)
    }

    fn add_owner(
        &self,
        kind: OwnerKind,
        ns: Option<&str>,
        name: &str,
    ) -> OwnerReference {
        let uid = uniq("uid");
        self.state.lock().unwrap().owners.insert(
            OwnerLookup {
                kind,
                namespace: ns.map(str::to_string),
                name: name.to_string(),
            },
            uid.clone(),
        );
        OwnerReference {
            api_version: API_VERSION.into(),
            kind: kind.as_str().into(),
            name: name.into(),
            uid,
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    pub fn add_gto(
        &self,
        ns: &str,
        name: &str,
        owner: OwnerReference,
        data: &[u8],
    ) -> TrackingKey {
        let mut o = GitTrackObject::new(name, spec(data));
        o.metadata.namespace = Some(ns.into());
        o.metadata.owner_references = Some(vec![owner]);
        self.insert_tracking(o.into())
    }

    pub fn add_cgto(
        &self,
        name: &str,
        owner: OwnerReference,
        data: &[u8],
    ) -> TrackingKey {
        let mut o = ClusterGitTrackObject::new(name, spec(data).into());
        o.metadata.owner_references = Some(vec![owner]);
        self.insert_tracking(o.into())
    }

    fn insert_tracking(&self, mut t: TrackingObject) -> TrackingKey {
        let mut s = self.state.lock().unwrap();
        t.metadata.uid = Some(uniq("uid"));
        t.metadata.resource_version = Some(s.bump());
        let key = t.key();
        s.tracking.insert(key.clone(), t);
        key
    }

    pub fn set_gto_data(&self, key: &TrackingKey, data: &[u8]) {
        let mut s = self.state.lock().unwrap();
        let rv = s.bump();
        let t = s.tracking.get_mut(key).expect("tracking object");
        t.spec.data = ByteString(data.to_vec());
        t.metadata.resource_version = Some(rv);
    }

    pub fn set_gto_annotation(&self, key: &TrackingKey, k: &str, v: &str) {
        let mut s = self.state.lock().unwrap();
        let rv = s.bump();
        let t = s.tracking.get_mut(key).expect("tracking object");
        t.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(k.into(), v.into());
        t.metadata.resource_version = Some(rv);
    }

    /// Delete a tracking object the way the API server would.
    pub fn delete_tracking(&self, key: &TrackingKey) {
        let mut s = self.state.lock().unwrap();
        let Some(t) = s.tracking.get_mut(key) else { return };
        if t.metadata.finalizers.as_ref().is_some_and(|f| !f.is_empty()) {
            t.metadata.deletion_timestamp =
                Some(serde_json::from_value(json!(DELETION_TIMESTAMP)).unwrap());
            return;
        }
        let uid = t.metadata.uid.clone();
        s.tracking.remove(key);
        if self.gc {
            s.children.retain(|_, c| !owned_by(c, uid.as_deref()));
        }
    }

    pub fn tracking(&self, key: &TrackingKey) -> Option<TrackingObject> {
        self.state.lock().unwrap().tracking.get(key).cloned()
    }

    pub fn in_sync(&self, key: &TrackingKey) -> Option<GitTrackObjectCondition> {
        self.tracking(key)?
            .status?
            .conditions
            .into_iter()
            .find(|c| c.type_ == ConditionType::InSync)
    }

    pub fn child(&self, key: &ChildKey) -> Option<Value> {
        self.state.lock().unwrap().children.get(key).cloned()
    }

    /// Mutate a child as an external actor would.
    pub fn edit_child(&self, key: &ChildKey, f: impl FnOnce(&mut Value)) {
        let mut s = self.state.lock().unwrap();
        let rv = s.bump();
        let c = s.children.get_mut(key).expect("child");
        f(c);
        c["metadata"]["resourceVersion"] = json!(rv);
    }

    /// Remove a child immediately, bypassing finalizers.
    pub fn remove_child(&self, key: &ChildKey) {
        self.state.lock().unwrap().children.remove(key);
    }

    /// Clear the finalizers of a child; a child already being deleted then
    /// disappears.
    pub fn finalize_child(&self, key: &ChildKey) {
        let mut s = self.state.lock().unwrap();
        let Some(c) = s.children.get_mut(key) else { return };
        c["metadata"]["finalizers"] = json!([]);
        if c["metadata"].get("deletionTimestamp").is_some() {
            s.children.remove(key);
        }
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn event_reasons(&self) -> Vec<(EventKind, String)> {
        self.events()
            .into_iter()
            .map(|e| (e.kind, e.reason))
            .collect()
    }

    pub fn patch_calls(&self) -> usize {
        self.state.lock().unwrap().patch_calls
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }
}

fn spec(data: &[u8]) -> GitTrackObjectSpec {
    GitTrackObjectSpec {
        name: "child".into(),
        kind: "Object".into(),
        data: ByteString(data.to_vec()),
    }
}

fn owned_by(child: &Value, uid: Option<&str>) -> bool {
    child["metadata"]["ownerReferences"]
        .as_array()
        .is_some_and(|refs| refs.iter().any(|r| r["uid"].as_str() == uid))
}

fn at<'a>(doc: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(doc, |cur, seg| cur.get(seg))
}

/// Server-side defaults the fake fills in, so tests see the same extra
/// fields a real API server adds.
fn apply_defaults(doc: &mut Value) {
    if doc["kind"] != "Deployment" {
        return;
    }
    let spec = &mut doc["spec"];
    if spec.get("revisionHistoryLimit").is_none() {
        spec["revisionHistoryLimit"] = json!(10);
    }
    if let Some(containers) = spec["template"]["spec"]["containers"].as_array_mut() {
        for c in containers {
            if c.get("imagePullPolicy").is_none() {
                c["imagePullPolicy"] = json!("IfNotPresent");
            }
            if c.get("terminationMessagePath").is_none() {
                c["terminationMessagePath"] = json!("/dev/termination-log");
            }
        }
    }
}

fn to_object(v: &Value) -> Result<DynamicObject, ClusterError> {
    Ok(serde_json::from_value(v.clone())?)
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_tracking(
        &self,
        key: &TrackingKey,
    ) -> Result<Option<TrackingObject>, ClusterError> {
        Ok(self.tracking(key))
    }

    async fn update_tracking_status(
        &self,
        key: &TrackingKey,
        status: &GitTrackObjectStatus,
    ) -> Result<(), ClusterError> {
        let mut s = self.state.lock().unwrap();
        let rv = s.bump();
        let t = s
            .tracking
            .get_mut(key)
            .ok_or_else(|| ClusterError::NotFound(key.to_string()))?;
        t.status = Some(status.clone());
        t.metadata.resource_version = Some(rv);
        Ok(())
    }

    async fn set_tracking_finalizers(
        &self,
        key: &TrackingKey,
        finalizers: &[String],
    ) -> Result<(), ClusterError> {
        let mut s = self.state.lock().unwrap();
        let rv = s.bump();
        let t = s
            .tracking
            .get_mut(key)
            .ok_or_else(|| ClusterError::NotFound(key.to_string()))?;
        t.metadata.finalizers = Some(finalizers.to_vec());
        t.metadata.resource_version = Some(rv);
        if finalizers.is_empty() && t.is_deleting() {
            s.tracking.remove(key);
        }
        Ok(())
    }

    async fn get_owner_uid(
        &self,
        owner: &OwnerLookup,
    ) -> Result<Option<String>, ClusterError> {
        Ok(self.state.lock().unwrap().owners.get(owner).cloned())
    }

    async fn get_child(
        &self,
        target: &ChildTarget,
    ) -> Result<Option<DynamicObject>, ClusterError> {
        let mut s = self.state.lock().unwrap();
        if let Some(e) = s.fail_next_get_child.take() {
            return Err(e);
        }
        s.children
            .get(&ChildKey::of(target))
            .map(to_object)
            .transpose()
    }

    async fn create_child(
        &self,
        target: &ChildTarget,
        child: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        let mut s = self.state.lock().unwrap();
        s.create_calls += 1;
        if let Some(e) = s.fail_next_create.take() {
            return Err(e);
        }
        let key = ChildKey::of(target);
        if s.children.contains_key(&key) {
            return Err(ClusterError::Conflict(format!("{target} already exists")));
        }
        let mut doc = serde_json::to_value(child)?;
        doc["metadata"]["uid"] = json!(uniq("uid"));
        doc["metadata"]["resourceVersion"] = json!(s.bump());
        doc["metadata"]["creationTimestamp"] = json!("2026-01-01T00:00:00Z");
        doc["status"] = json!({});
        apply_defaults(&mut doc);
        s.children.insert(key, doc.clone());
        to_object(&doc)
    }

    async fn patch_child(
        &self,
        target: &ChildTarget,
        patch: &Value,
    ) -> Result<DynamicObject, ClusterError> {
        let mut s = self.state.lock().unwrap();
        s.patch_calls += 1;
        if let Some(e) = s.fail_next_patch.take() {
            return Err(e);
        }
        let key = ChildKey::of(target);
        let current = s
            .children
            .get(&key)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(target.to_string()))?;
        let mut next = current.clone();
        json_patch::merge(&mut next, patch);
        for (kind, path) in &s.immutable {
            if *kind == key.kind && at(&current, path) != at(&next, path) {
                return Err(ClusterError::Invalid(format!(
                    "{} \"{}\" is invalid: {}: Invalid value: cannot change {}",
                    kind,
                    key.name,
                    path.join("."),
                    path.join(".")
                )));
            }
        }
        apply_defaults(&mut next);
        next["metadata"]["resourceVersion"] = json!(s.bump());
        s.children.insert(key, next.clone());
        to_object(&next)
    }

    async fn delete_child(
        &self,
        target: &ChildTarget,
        propagation: Propagation,
    ) -> Result<(), ClusterError> {
        let mut s = self.state.lock().unwrap();
        let key = ChildKey::of(target);
        let gc = self.gc;
        let Some(c) = s.children.get_mut(&key) else {
            return Ok(());
        };
        if propagation == Propagation::Foreground && !gc {
            c["metadata"]["deletionTimestamp"] = json!(DELETION_TIMESTAMP);
            c["metadata"]["finalizers"] = json!(["foregroundDeletion"]);
        } else {
            s.children.remove(&key);
        }
        Ok(())
    }

    async fn publish_event(&self, event: &EventRecord) -> Result<(), ClusterError> {
        self.state.lock().unwrap().events.push(event.clone());
        Ok(())
    }
}

pub fn test_config() -> GtoConfig {
    let mut cfg = GtoConfig::default();
    cfg.deletion.poll_attempts = 2;
    cfg.deletion.poll_ms = 1;
    cfg
}

pub fn context(
    cluster: &FakeCluster,
    cfg: GtoConfig,
) -> Arc<ControllerContext<FakeCluster>> {
    Arc::new(ControllerContext::new(
        Arc::new(cluster.clone()),
        cfg,
        Arc::new(KindRegistry::with_builtins()),
        InSyncMetrics::new(),
    ))
}

pub fn is_status(c: &GitTrackObjectCondition, status: ConditionStatus, reason: &str) -> bool {
    c.status == status && c.reason.as_deref() == Some(reason)
}
