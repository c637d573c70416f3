//! Reconciliation keys and the watch-to-queue key extractor

use crate::queue::WorkQueue;
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use std::fmt;
use tracing::{debug, warn};

/// `namespace/name` identity of one unit of work
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReconcileKey {
    namespace: String,
    name: String,
}

impl ReconcileKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key for an Ingress; `None` for objects without a namespace or name.
    pub fn for_ingress(ingress: &Ingress) -> Option<Self> {
        let namespace = ingress.namespace()?;
        let name = ingress.metadata.name.clone()?;
        Some(Self::new(namespace, name))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ReconcileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Kind of change a watch delivered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Applied,
    Deleted,
}

/// Converts Ingress change notifications into queue entries
#[derive(Clone)]
pub struct KeyExtractor {
    queue: WorkQueue<ReconcileKey>,
}

impl KeyExtractor {
    pub fn new(queue: WorkQueue<ReconcileKey>) -> Self {
        Self { queue }
    }

    /// Push the key of a changed Ingress. Deduplication is left to the queue.
    pub fn on_change(&self, ingress: &Ingress, kind: ChangeKind) {
        match ReconcileKey::for_ingress(ingress) {
            Some(key) => {
                debug!(%key, ?kind, "Enqueueing ingress");
                self.queue.add(key);
            }
            None => warn!(?kind, "Ignoring ingress without namespace or name"),
        }
    }
}
