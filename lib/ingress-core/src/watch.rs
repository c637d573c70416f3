//! Watches feeding the local caches and the work queue

use crate::key::{ChangeKind, KeyExtractor, ReconcileKey};
use crate::store::ReflectorCache;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::{Ingress, IngressBackend};
use kube::{Api, Client, ResourceExt};
use kube_runtime::reflector::{self, Store};
use kube_runtime::watcher::Event;
use kube_runtime::{watcher, WatchStreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Start the Ingress and Service watches. Ingress changes are pushed
/// through `extractor`; Service changes requeue the Ingresses in the same
/// namespace that route to the Service.
pub fn start_watchers(client: Client, extractor: KeyExtractor, cancel: CancellationToken) -> ReflectorCache {
    let ingresses: Api<Ingress> = Api::all(client.clone());
    let services: Api<Service> = Api::all(client);

    let (ingress_reader, ingress_writer) = reflector::store();
    let (service_reader, service_writer) = reflector::store();
    let cache = ReflectorCache::new(ingress_reader.clone(), service_reader);

    let mut ingress_events = watcher(ingresses, watcher::Config::default())
        .default_backoff()
        .reflect(ingress_writer)
        .boxed();
    {
        let extractor = extractor.clone();
        let ingresses = ingress_reader.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            info!("Watching ingresses");
            let mut relist = Relist::default();
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = ingress_events.next() => event,
                };
                match event {
                    Some(Ok(event)) => on_ingress_event(&ingresses, &event, &extractor, &mut relist),
                    Some(Err(e)) => warn!(error = %e, "Ingress watch error"),
                    None => {
                        error!("Ingress watch stream ended");
                        break;
                    }
                }
            }
        });
    }

    let mut service_events = watcher(services, watcher::Config::default())
        .default_backoff()
        .reflect(service_writer)
        .boxed();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            info!("Watching services");
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = service_events.next() => event,
                };
                match event {
                    Some(Ok(event)) => on_service_event(&ingress_reader, &event, &extractor),
                    Some(Err(e)) => warn!(error = %e, "Service watch error"),
                    None => {
                        error!("Service watch stream ended");
                        break;
                    }
                }
            }
        });
    }

    {
        let cache = cache.clone();
        tokio::spawn(async move {
            match cache.wait_ready().await {
                Ok(()) => info!("Informer caches synced"),
                Err(e) => error!(error = %e, "Informer cache writer dropped before sync"),
            }
        });
    }

    cache
}

/// Ingresses cached when a relist started. The reflector swaps its store on
/// `InitDone` without yielding a `Delete` for objects that vanished while
/// the watch was down, so those are diffed out here.
#[derive(Default)]
struct Relist {
    before: Option<Vec<Arc<Ingress>>>,
}

fn on_ingress_event(ingresses: &Store<Ingress>, event: &Event<Ingress>, extractor: &KeyExtractor, relist: &mut Relist) {
    match event {
        Event::Apply(ingress) | Event::InitApply(ingress) => extractor.on_change(ingress, ChangeKind::Applied),
        Event::Delete(ingress) => extractor.on_change(ingress, ChangeKind::Deleted),
        Event::Init => relist.before = Some(ingresses.state()),
        Event::InitDone => {
            let Some(before) = relist.before.take() else {
                return;
            };
            let current: BTreeSet<ReconcileKey> = ingresses
                .state()
                .iter()
                .filter_map(|ingress| ReconcileKey::for_ingress(ingress))
                .collect();
            for ingress in before {
                if ReconcileKey::for_ingress(&ingress).is_some_and(|key| !current.contains(&key)) {
                    debug!("Ingress {} disappeared during relist", ingress.name_any());
                    extractor.on_change(&ingress, ChangeKind::Deleted);
                }
            }
        }
    }
}

fn on_service_event(ingresses: &Store<Ingress>, event: &Event<Service>, extractor: &KeyExtractor) {
    match event {
        Event::Apply(service) | Event::InitApply(service) | Event::Delete(service) => {
            requeue_dependents(ingresses, service, extractor)
        }
        Event::Init | Event::InitDone => {}
    }
}

fn requeue_dependents(ingresses: &Store<Ingress>, service: &Service, extractor: &KeyExtractor) {
    let Some(namespace) = service.namespace() else {
        return;
    };
    let name = service.name_any();
    for ingress in ingresses.state() {
        if ingress.namespace().as_deref() == Some(namespace.as_str()) && routes_to(&ingress, &name) {
            debug!("Service {}/{} changed, requeueing ingress {}", namespace, name, ingress.name_any());
            extractor.on_change(&ingress, ChangeKind::Applied);
        }
    }
}

/// Whether any rule or the default backend of `ingress` targets `service`.
pub fn routes_to(ingress: &Ingress, service: &str) -> bool {
    let Some(spec) = ingress.spec.as_ref() else {
        return false;
    };
    let targets = |backend: &IngressBackend| {
        backend.service.as_ref().is_some_and(|s| s.name == service)
    };

    spec.default_backend.as_ref().is_some_and(targets)
        || spec
            .rules
            .iter()
            .flatten()
            .filter_map(|rule| rule.http.as_ref())
            .flat_map(|http| http.paths.iter())
            .any(|path| targets(&path.backend))
}
