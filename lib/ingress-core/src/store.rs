//! Read-only views over the watch-fed local caches

use crate::key::ReconcileKey;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube_runtime::reflector::{ObjectRef, Store};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Local replica of Ingress objects
pub trait IngressCache: Send + Sync {
    /// Current cached Ingress for `key`, `None` when it does not exist.
    fn get(&self, key: &ReconcileKey) -> Option<Arc<Ingress>>;

    /// Whether the initial list has been fully loaded.
    fn has_synced(&self) -> bool;
}

/// A port declared by a Service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServicePortRef {
    pub name: Option<String>,
    pub port: i32,
}

/// Lookup of backend Services referenced by Ingress rules
pub trait ServiceCatalog: Send + Sync {
    /// Declared ports of `namespace/name`, `None` when the Service is unknown.
    fn service_ports(&self, namespace: &str, name: &str) -> Option<Vec<ServicePortRef>>;
}

/// Cache backed by kube reflector stores for Ingresses and Services
#[derive(Clone)]
pub struct ReflectorCache {
    ingresses: Store<Ingress>,
    services: Store<Service>,
    synced: Arc<AtomicBool>,
}

impl ReflectorCache {
    pub fn new(ingresses: Store<Ingress>, services: Store<Service>) -> Self {
        Self {
            ingresses,
            services,
            synced: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flip the synced flag once both stores have received their initial list.
    pub async fn wait_ready(&self) -> Result<(), kube_runtime::reflector::store::WriterDropped> {
        self.ingresses.wait_until_ready().await?;
        self.services.wait_until_ready().await?;
        self.synced.store(true, Ordering::Release);
        Ok(())
    }
}

impl IngressCache for ReflectorCache {
    fn get(&self, key: &ReconcileKey) -> Option<Arc<Ingress>> {
        self.ingresses
            .get(&ObjectRef::new(key.name()).within(key.namespace()))
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

impl ServiceCatalog for ReflectorCache {
    fn service_ports(&self, namespace: &str, name: &str) -> Option<Vec<ServicePortRef>> {
        let service = self.services.get(&ObjectRef::new(name).within(namespace))?;
        Some(service_ports(&service))
    }
}

pub(crate) fn service_ports(service: &Service) -> Vec<ServicePortRef> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .map(|p| ServicePortRef {
                    name: p.name.clone(),
                    port: p.port,
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};

    #[test]
    fn test_service_ports() {
        let service = Service {
            spec: Some(ServiceSpec {
                ports: Some(vec![
                    ServicePort {
                        name: Some("http".to_string()),
                        port: 80,
                        ..Default::default()
                    },
                    ServicePort {
                        port: 9090,
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(
            service_ports(&service),
            vec![
                ServicePortRef {
                    name: Some("http".to_string()),
                    port: 80
                },
                ServicePortRef {
                    name: None,
                    port: 9090
                },
            ]
        );
        assert!(service_ports(&Service::default()).is_empty());
    }
}
