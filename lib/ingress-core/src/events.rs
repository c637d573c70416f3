//! Best-effort observability events attached to cluster objects

use k8s_openapi::api::core::v1::ObjectReference;
use kube::{Client, Resource, ResourceExt};
use kube_runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

/// Event severity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventSeverity {
    Normal,
    Warning,
}

/// Sink for observability events. Emission is fire-and-forget: failures
/// never reach the caller.
pub trait EventRecorder: Send + Sync {
    fn emit(&self, object: &ObjectReference, severity: EventSeverity, reason: &str, message: String);
}

/// Build an ObjectReference for any kube resource.
pub fn object_ref<K: Resource<DynamicType = ()>>(obj: &K) -> ObjectReference {
    ObjectReference {
        api_version: Some(K::api_version(&()).to_string()),
        kind: Some(K::kind(&()).to_string()),
        name: Some(obj.name_any()),
        namespace: obj.namespace(),
        uid: obj.meta().uid.clone(),
        resource_version: obj.meta().resource_version.clone(),
        ..Default::default()
    }
}

/// Recorder publishing Kubernetes Events through the API server
#[derive(Clone)]
pub struct KubeEventRecorder {
    client: Client,
    reporter: Reporter,
}

impl KubeEventRecorder {
    pub fn new(client: Client, controller: &str, instance: Option<String>) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: controller.to_string(),
                instance,
            },
        }
    }
}

impl EventRecorder for KubeEventRecorder {
    fn emit(&self, object: &ObjectReference, severity: EventSeverity, reason: &str, message: String) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), object.clone());
        let event = Event {
            type_: match severity {
                EventSeverity::Normal => EventType::Normal,
                EventSeverity::Warning => EventType::Warning,
            },
            reason: reason.to_string(),
            note: Some(message),
            action: "Reconcile".to_string(),
            secondary: None,
        };

        tokio::spawn(async move {
            if let Err(e) = recorder.publish(event).await {
                warn!(error = %e, "Failed to publish event");
            }
        });
    }
}

/// Recorder that only logs, for running without event RBAC
#[derive(Clone, Copy, Debug, Default)]
pub struct LogEventRecorder;

impl EventRecorder for LogEventRecorder {
    fn emit(&self, object: &ObjectReference, severity: EventSeverity, reason: &str, message: String) {
        let kind = object.kind.as_deref().unwrap_or("object");
        let namespace = object.namespace.as_deref().unwrap_or_default();
        let name = object.name.as_deref().unwrap_or_default();
        match severity {
            EventSeverity::Normal => {
                tracing::info!(reason, "{} {}/{}: {}", kind, namespace, name, message)
            }
            EventSeverity::Warning => {
                warn!(reason, "{} {}/{}: {}", kind, namespace, name, message)
            }
        }
    }
}
