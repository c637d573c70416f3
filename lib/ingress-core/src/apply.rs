//! Idempotent writer for derived VirtualServices

use crate::client::VirtualServiceClient;
use crate::error::{ClientError, SyncError};
use crate::events::{object_ref, EventRecorder, EventSeverity};
use crate::key::ReconcileKey;
use istio_api::v1beta1::VirtualServiceSpec;
use istio_api::{VirtualService, MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What an apply did to the stored object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Whether the controller owns `vs`.
pub fn is_managed(vs: &VirtualService) -> bool {
    vs.labels().get(MANAGED_BY_LABEL).map(String::as_str) == Some(MANAGED_BY_VALUE)
}

/// The VirtualService an Ingress should own: same namespace and name,
/// managed-by label and a controller owner reference.
pub fn desired_virtual_service(ingress: &Ingress, spec: VirtualServiceSpec) -> VirtualService {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());

    VirtualService {
        metadata: ObjectMeta {
            name: Some(ingress.name_any()),
            namespace: ingress.namespace(),
            labels: Some(labels),
            owner_references: ingress.controller_owner_ref(&()).map(|oref| vec![oref]),
            ..Default::default()
        },
        spec,
    }
}

/// Semantic equality, ignoring server-managed metadata.
fn up_to_date(existing: &VirtualService, desired: &VirtualService) -> bool {
    existing.spec == desired.spec
        && is_managed(existing)
        && existing.metadata.owner_references == desired.metadata.owner_references
}

/// Creates, updates or deletes derived VirtualServices through the API
pub struct ApplyWriter {
    client: Arc<dyn VirtualServiceClient>,
    recorder: Arc<dyn EventRecorder>,
}

impl ApplyWriter {
    pub fn new(client: Arc<dyn VirtualServiceClient>, recorder: Arc<dyn EventRecorder>) -> Self {
        Self { client, recorder }
    }

    /// Bring the VirtualService owned by `ingress` in line with `spec`.
    pub async fn apply(&self, ingress: &Ingress, spec: VirtualServiceSpec) -> Result<ApplyOutcome, SyncError> {
        let desired = desired_virtual_service(ingress, spec);
        let result = self.write(&desired).await;

        let oref = object_ref(ingress);
        let target = format!("{}/{}", ingress.namespace().unwrap_or_default(), ingress.name_any());
        match &result {
            Ok(ApplyOutcome::Created) => self.recorder.emit(
                &oref,
                EventSeverity::Normal,
                "Created",
                format!("Created VirtualService {}", target),
            ),
            Ok(ApplyOutcome::Updated) => self.recorder.emit(
                &oref,
                EventSeverity::Normal,
                "Updated",
                format!("Updated VirtualService {}", target),
            ),
            Ok(ApplyOutcome::Unchanged) => {}
            Err(SyncError::Client(ClientError::Conflict)) => self.recorder.emit(
                &oref,
                EventSeverity::Warning,
                "Conflict",
                format!("VirtualService {} changed during update, retrying", target),
            ),
            Err(e) => self.recorder.emit(
                &oref,
                EventSeverity::Warning,
                "SyncFailed",
                format!("Failed to apply VirtualService {}: {}", target, e),
            ),
        }
        result
    }

    async fn write(&self, desired: &VirtualService) -> Result<ApplyOutcome, SyncError> {
        let namespace = desired.namespace().unwrap_or_default();
        let name = desired.name_any();

        let Some(existing) = self.client.get(&namespace, &name).await? else {
            self.client.create(desired).await?;
            info!("Created VirtualService {}/{}", namespace, name);
            return Ok(ApplyOutcome::Created);
        };

        if !is_managed(&existing) {
            return Err(SyncError::UnmanagedTarget(format!("{}/{}", namespace, name)));
        }

        if up_to_date(&existing, desired) {
            debug!("VirtualService {}/{} is up to date", namespace, name);
            return Ok(ApplyOutcome::Unchanged);
        }

        // Keep server-side metadata, resourceVersion included, so the
        // replace fails if someone wrote in between.
        let mut updated = existing;
        updated.spec = desired.spec.clone();
        updated
            .labels_mut()
            .insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
        updated.metadata.owner_references = desired.metadata.owner_references.clone();

        self.client.update(&updated).await?;
        info!("Updated VirtualService {}/{}", namespace, name);
        Ok(ApplyOutcome::Updated)
    }

    /// Remove the VirtualService owned by `key`, if any. Returns whether an
    /// object was deleted. Unmanaged objects are left alone.
    pub async fn delete_owned(&self, key: &ReconcileKey) -> Result<bool, SyncError> {
        let Some(existing) = self.client.get(key.namespace(), key.name()).await? else {
            return Ok(false);
        };

        if !is_managed(&existing) {
            warn!(%key, "VirtualService is not managed by this controller, leaving it in place");
            return Ok(false);
        }

        match self.client.delete(key.namespace(), key.name()).await {
            Ok(()) => {
                info!("Deleted VirtualService {}", key);
                self.recorder.emit(
                    &object_ref(&existing),
                    EventSeverity::Normal,
                    "Deleted",
                    format!("Deleted VirtualService {} no longer backed by an adopted Ingress", key),
                );
                Ok(true)
            }
            Err(ClientError::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{shop_ingress, FakeCluster, RecordingRecorder};
    use istio_api::v1beta1::HTTPRoute;

    fn spec(host: &str) -> VirtualServiceSpec {
        VirtualServiceSpec {
            hosts: vec![host.to_string()],
            gateways: vec!["mesh-gw".to_string()],
            http: vec![HTTPRoute::default()],
        }
    }

    fn writer(cluster: &FakeCluster, recorder: &Arc<RecordingRecorder>) -> ApplyWriter {
        ApplyWriter::new(Arc::new(cluster.clone()), recorder.clone())
    }

    #[test]
    fn test_desired_object_identity() {
        let ingress = shop_ingress("istio");
        let vs = desired_virtual_service(&ingress, spec("shop.cluster.local"));
        assert_eq!(vs.metadata.name.as_deref(), Some("shop"));
        assert_eq!(vs.metadata.namespace.as_deref(), Some("retail"));
        assert!(is_managed(&vs));

        let owners = vs.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "Ingress");
        assert_eq!(owners[0].name, "shop");
        assert_eq!(owners[0].controller, Some(true));
    }

    #[tokio::test]
    async fn test_create_then_noop() {
        let cluster = FakeCluster::new();
        let recorder = Arc::new(RecordingRecorder::default());
        let writer = writer(&cluster, &recorder);
        let ingress = shop_ingress("istio");

        let outcome = writer.apply(&ingress, spec("shop.cluster.local")).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Created);

        let outcome = writer.apply(&ingress, spec("shop.cluster.local")).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged);

        assert_eq!(cluster.writes(), 1);
        assert_eq!(recorder.reasons(), vec!["Created"]);
    }

    #[tokio::test]
    async fn test_update_on_spec_change() {
        let cluster = FakeCluster::new();
        let recorder = Arc::new(RecordingRecorder::default());
        let writer = writer(&cluster, &recorder);
        let ingress = shop_ingress("istio");

        writer.apply(&ingress, spec("shop.cluster.local")).await.unwrap();
        let outcome = writer.apply(&ingress, spec("store.cluster.local")).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::Updated);
        let stored = cluster.virtual_service("retail", "shop").unwrap();
        assert_eq!(stored.spec.hosts, vec!["store.cluster.local"]);
        assert_eq!(cluster.updates(), 1);
        assert_eq!(recorder.reasons(), vec!["Created", "Updated"]);
    }

    #[tokio::test]
    async fn test_conflict_is_retryable() {
        let cluster = FakeCluster::new();
        let recorder = Arc::new(RecordingRecorder::default());
        let writer = writer(&cluster, &recorder);
        let ingress = shop_ingress("istio");

        writer.apply(&ingress, spec("shop.cluster.local")).await.unwrap();
        cluster.fail_next_write(ClientError::Conflict);

        let err = writer
            .apply(&ingress, spec("store.cluster.local"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Client(ClientError::Conflict)));
        assert!(err.is_retryable());
        assert_eq!(recorder.reasons(), vec!["Created", "Conflict"]);
    }

    #[tokio::test]
    async fn test_unmanaged_target_is_left_alone() {
        let cluster = FakeCluster::new();
        let recorder = Arc::new(RecordingRecorder::default());
        let writer = writer(&cluster, &recorder);
        cluster.insert_virtual_service(VirtualService {
            metadata: ObjectMeta {
                name: Some("shop".to_string()),
                namespace: Some("retail".to_string()),
                ..Default::default()
            },
            spec: spec("hand.written"),
        });

        let err = writer
            .apply(&shop_ingress("istio"), spec("shop.cluster.local"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnmanagedTarget(_)));
        assert!(!err.is_retryable());

        let deleted = writer
            .delete_owned(&ReconcileKey::new("retail", "shop"))
            .await
            .unwrap();
        assert!(!deleted);
        assert!(cluster.virtual_service("retail", "shop").is_some());
        assert_eq!(cluster.writes(), 0);
    }

    #[tokio::test]
    async fn test_delete_owned() {
        let cluster = FakeCluster::new();
        let recorder = Arc::new(RecordingRecorder::default());
        let writer = writer(&cluster, &recorder);
        let key = ReconcileKey::new("retail", "shop");

        assert!(!writer.delete_owned(&key).await.unwrap());

        writer
            .apply(&shop_ingress("istio"), spec("shop.cluster.local"))
            .await
            .unwrap();
        assert!(writer.delete_owned(&key).await.unwrap());
        assert!(cluster.virtual_service("retail", "shop").is_none());
        assert_eq!(recorder.reasons(), vec!["Created", "Deleted"]);
    }
}
