//! Reconciliation engine turning Ingress objects into Istio VirtualServices
//!
//! This library provides:
//! - A deduplicating, rate-limited work queue keyed by `namespace/name`
//! - A worker pool driving the per-key sync state machine
//! - The Ingress to VirtualService translator
//! - An idempotent apply writer for the derived VirtualService
//! - kube-backed caches, API client and event recorder

pub mod apply;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod key;
pub mod queue;
pub mod store;
pub mod sync;
pub mod translate;
pub mod watch;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use apply::{ApplyOutcome, ApplyWriter};
pub use client::{KubeVirtualServices, VirtualServiceClient};
pub use config::{Config, ConfigError};
pub use error::{ClientError, SyncError, TranslateError};
pub use events::{EventRecorder, EventSeverity, KubeEventRecorder, LogEventRecorder};
pub use key::{KeyExtractor, ReconcileKey};
pub use queue::{BackoffLimiter, WorkQueue};
pub use store::{IngressCache, ReflectorCache, ServiceCatalog, ServicePortRef};
pub use sync::{SyncHandler, SyncOutcome};
pub use translate::translate;
pub use watch::start_watchers;
pub use worker::{RunError, WorkerPool};
