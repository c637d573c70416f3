//! In-memory stand-ins for the cluster collaborators

use crate::client::VirtualServiceClient;
use crate::error::ClientError;
use crate::events::{EventRecorder, EventSeverity};
use crate::key::ReconcileKey;
use crate::store::{IngressCache, ServiceCatalog, ServicePortRef};
use async_trait::async_trait;
use istio_api::VirtualService;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Name = (String, String);

#[derive(Default)]
struct State {
    ingresses: BTreeMap<ReconcileKey, Arc<Ingress>>,
    services: BTreeMap<Name, Vec<ServicePortRef>>,
    virtual_services: BTreeMap<Name, VirtualService>,
    write_failures: VecDeque<ClientError>,
    next_version: u64,
    creates: usize,
    updates: usize,
    deletes: usize,
}

/// Fake API server plus informer cache
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
    synced: Arc<AtomicBool>,
    get_delay: Arc<Mutex<Option<Duration>>>,
    panics_left: Arc<AtomicUsize>,
    gets: Arc<AtomicUsize>,
}

impl FakeCluster {
    pub fn new() -> Self {
        let cluster = Self::default();
        cluster.set_synced(true);
        cluster
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::SeqCst);
    }

    pub fn add_service(&self, namespace: &str, name: &str, ports: &[(Option<&str>, i32)]) {
        let ports = ports
            .iter()
            .map(|(name, port)| ServicePortRef {
                name: name.map(str::to_string),
                port: *port,
            })
            .collect();
        self.state()
            .services
            .insert((namespace.to_string(), name.to_string()), ports);
    }

    pub fn put_ingress(&self, ingress: Ingress) {
        let key = ReconcileKey::for_ingress(&ingress).unwrap();
        self.state().ingresses.insert(key, Arc::new(ingress));
    }

    pub fn remove_ingress(&self, namespace: &str, name: &str) {
        self.state()
            .ingresses
            .remove(&ReconcileKey::new(namespace, name));
    }

    pub fn insert_virtual_service(&self, vs: VirtualService) {
        let name = (vs.namespace().unwrap(), vs.name_any());
        self.state().virtual_services.insert(name, vs);
    }

    pub fn virtual_service(&self, namespace: &str, name: &str) -> Option<VirtualService> {
        self.state()
            .virtual_services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Fail the next create or update with `err`.
    pub fn fail_next_write(&self, err: ClientError) {
        self.state().write_failures.push_back(err);
    }

    /// Make every `get` take `delay` before answering.
    pub fn slow_gets(&self, delay: Option<Duration>) {
        *self.get_delay.lock().unwrap() = delay;
    }

    /// Number of VirtualService gets issued.
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Injected write failures not yet consumed.
    pub fn pending_failures(&self) -> usize {
        self.state().write_failures.len()
    }

    /// Make the next `count` gets panic.
    pub fn panic_on_get(&self, count: usize) {
        self.panics_left.store(count, Ordering::SeqCst);
    }

    pub fn creates(&self) -> usize {
        self.state().creates
    }

    pub fn updates(&self) -> usize {
        self.state().updates
    }

    pub fn deletes(&self) -> usize {
        self.state().deletes
    }

    /// Successful creates, updates and deletes.
    pub fn writes(&self) -> usize {
        let state = self.state();
        state.creates + state.updates + state.deletes
    }
}

impl IngressCache for FakeCluster {
    fn get(&self, key: &ReconcileKey) -> Option<Arc<Ingress>> {
        self.state().ingresses.get(key).cloned()
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

impl ServiceCatalog for FakeCluster {
    fn service_ports(&self, namespace: &str, name: &str) -> Option<Vec<ServicePortRef>> {
        self.state()
            .services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl VirtualServiceClient for FakeCluster {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<VirtualService>, ClientError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self
            .panics_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            panic!("injected panic");
        }
        let delay = *self.get_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.virtual_service(namespace, name))
    }

    async fn create(&self, vs: &VirtualService) -> Result<VirtualService, ClientError> {
        let mut state = self.state();
        if let Some(err) = state.write_failures.pop_front() {
            return Err(err);
        }
        let key = (vs.namespace().unwrap(), vs.name_any());
        if state.virtual_services.contains_key(&key) {
            return Err(ClientError::Conflict);
        }
        state.next_version += 1;
        let mut stored = vs.clone();
        stored.metadata.resource_version = Some(state.next_version.to_string());
        state.virtual_services.insert(key, stored.clone());
        state.creates += 1;
        Ok(stored)
    }

    async fn update(&self, vs: &VirtualService) -> Result<VirtualService, ClientError> {
        let mut state = self.state();
        if let Some(err) = state.write_failures.pop_front() {
            return Err(err);
        }
        let key = (vs.namespace().unwrap(), vs.name_any());
        let current = state
            .virtual_services
            .get(&key)
            .ok_or(ClientError::NotFound)?;
        if current.metadata.resource_version != vs.metadata.resource_version {
            return Err(ClientError::Conflict);
        }
        state.next_version += 1;
        let mut stored = vs.clone();
        stored.metadata.resource_version = Some(state.next_version.to_string());
        state.virtual_services.insert(key, stored.clone());
        state.updates += 1;
        Ok(stored)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ClientError> {
        let mut state = self.state();
        state
            .virtual_services
            .remove(&(namespace.to_string(), name.to_string()))
            .ok_or(ClientError::NotFound)?;
        state.deletes += 1;
        Ok(())
    }
}

/// Recorder keeping every emitted event
#[derive(Default)]
pub struct RecordingRecorder {
    events: Mutex<Vec<(EventSeverity, String, String)>>,
}

impl RecordingRecorder {
    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, reason, _)| reason.clone())
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(severity, _, _)| *severity == EventSeverity::Warning)
            .map(|(_, reason, _)| reason.clone())
            .collect()
    }
}

impl EventRecorder for RecordingRecorder {
    fn emit(&self, _object: &ObjectReference, severity: EventSeverity, reason: &str, message: String) {
        self.events
            .lock()
            .unwrap()
            .push((severity, reason.to_string(), message));
    }
}

/// `retail/shop` routing host `shop` to `shop-svc:8080`, with the given
/// class annotation.
pub fn shop_ingress(class: &str) -> Ingress {
    let manifest = format!(
        r#"
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: shop
  namespace: retail
  uid: 6b1c3c55-0d5b-4a53-9a0e-0d3f7f1f2b11
  annotations:
    kubernetes.io/ingress.class: {}
spec:
  rules:
  - host: shop
    http:
      paths:
      - path: /
        pathType: Prefix
        backend:
          service:
            name: shop-svc
            port:
              number: 8080
"#,
        class
    );
    serde_yaml::from_str(&manifest).unwrap()
}
