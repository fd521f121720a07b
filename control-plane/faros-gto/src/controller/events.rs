use tracing::{trace, warn};

use crate::cluster::{ClusterClient, EventKind, EventRecord, InvolvedObject};
use crate::crd::TrackingObject;

pub const REASON_CREATE_STARTED: &str = "CreateStarted";
pub const REASON_CREATE_SUCCESSFUL: &str = "CreateSuccessful";
pub const REASON_CREATE_FAILED: &str = "CreateFailed";
pub const REASON_UPDATE_STARTED: &str = "UpdateStarted";
pub const REASON_UPDATE_SUCCESSFUL: &str = "UpdateSuccessful";
pub const REASON_UPDATE_FAILED: &str = "UpdateFailed";
pub const REASON_DELETE_STARTED: &str = "DeleteStarted";
pub const REASON_DELETE_SUCCESSFUL: &str = "DeleteSuccessful";
pub const REASON_DELETE_FAILED: &str = "DeleteFailed";
pub const REASON_UNMARSHAL_FAILED: &str = "UnmarshalFailed";

pub const ACTION_CREATE: &str = "Create";
pub const ACTION_UPDATE: &str = "Update";
pub const ACTION_DELETE: &str = "Delete";
pub const ACTION_UNMARSHAL: &str = "Unmarshal";

/// Publishes events about tracking objects, restricted to the namespace the
/// controller is allowed to write to.
#[derive(Clone, Debug, Default)]
pub struct EventRecorder {
    namespace: Option<String>,
}

impl EventRecorder {
    pub fn new(namespace: Option<String>) -> Self {
        Self { namespace }
    }

    /// Namespace an event about `involved` is filed under. Events about
    /// cluster-scoped objects go to the controller namespace, or `default`
    /// when unrestricted.
    pub fn filing_namespace(&self, involved: &InvolvedObject) -> String {
        involved
            .namespace
            .as_deref()
            .or(self.namespace.as_deref())
            .unwrap_or("default")
            .to_string()
    }

    pub fn in_scope(&self, involved: &InvolvedObject) -> bool {
        match &self.namespace {
            Some(ns) => self.filing_namespace(involved) == *ns,
            None => true,
        }
    }

    /// Fire and forget: publish failures are logged, never returned.
    pub async fn emit<C>(
        &self,
        client: &C,
        obj: &TrackingObject,
        kind: EventKind,
        reason: &str,
        action: &str,
        message: impl Into<String>,
    ) where
        C: ClusterClient + ?Sized,
    {
        let involved = InvolvedObject::of(obj);
        let record = EventRecord {
            namespace: self.filing_namespace(&involved),
            involved,
            kind,
            reason: reason.to_string(),
            action: action.to_string(),
            message: message.into(),
        };
        if !self.in_scope(&record.involved) {
            trace!(
                reason,
                namespace = %record.namespace,
                "dropping event outside controller namespace"
            );
            return;
        }
        if let Err(e) = client.publish_event(&record).await {
            warn!(error = %e, reason, "failed to publish event");
        }
    }

    pub async fn normal<C>(
        &self,
        client: &C,
        obj: &TrackingObject,
        reason: &str,
        action: &str,
        message: impl Into<String>,
    ) where
        C: ClusterClient + ?Sized,
    {
        self.emit(client, obj, EventKind::Normal, reason, action, message)
            .await
    }

    pub async fn warning<C>(
        &self,
        client: &C,
        obj: &TrackingObject,
        reason: &str,
        action: &str,
        message: impl Into<String>,
    ) where
        C: ClusterClient + ?Sized,
    {
        self.emit(client, obj, EventKind::Warning, reason, action, message)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn involved(ns: Option<&str>) -> InvolvedObject {
        InvolvedObject {
            api_version: "faros.pusher.com/v1alpha1".into(),
            kind: "GitTrackObject".into(),
            namespace: ns.map(str::to_string),
            name: "example".into(),
            uid: None,
        }
    }

    #[test]
    fn unrestricted_recorder_accepts_everything() {
        let r = EventRecorder::new(None);
        assert!(r.in_scope(&involved(Some("a"))));
        assert!(r.in_scope(&involved(None)));
    }

    #[test]
    fn restricted_recorder_drops_foreign_namespaces() {
        let r = EventRecorder::new(Some("team-a".into()));
        assert!(r.in_scope(&involved(Some("team-a"))));
        assert!(!r.in_scope(&involved(Some("team-b"))));
    }

    #[test]
    fn cluster_scoped_events_are_filed_in_controller_namespace() {
        let r = EventRecorder::new(Some("team-a".into()));
        assert!(r.in_scope(&involved(None)));
        assert_eq!(r.filing_namespace(&involved(None)), "team-a");
        assert_eq!(r.filing_namespace(&involved(Some("team-a"))), "team-a");

        let r = EventRecorder::new(None);
        assert_eq!(r.filing_namespace(&involved(None)), "default");
    }
}
