//! Per-key sync: fetch, filter, translate, apply

use crate::apply::{ApplyOutcome, ApplyWriter};
use crate::client::VirtualServiceClient;
use crate::config::Config;
use crate::error::SyncError;
use crate::events::{object_ref, EventRecorder, EventSeverity};
use crate::key::ReconcileKey;
use crate::store::{IngressCache, ServiceCatalog};
use crate::translate::{is_adopted, translate};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a successful sync
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The Ingress was translated and its VirtualService applied.
    Applied(ApplyOutcome),
    /// The Ingress is gone; `removed` tells whether an owned VirtualService was deleted.
    Deleted { removed: bool },
    /// The Ingress belongs to another class; any owned VirtualService was removed.
    Filtered { removed: bool },
}

/// Reconciles one key against the cached Ingress and the API server
pub struct SyncHandler {
    config: Arc<Config>,
    ingresses: Arc<dyn IngressCache>,
    services: Arc<dyn ServiceCatalog>,
    writer: ApplyWriter,
    recorder: Arc<dyn EventRecorder>,
}

impl SyncHandler {
    pub fn new(
        config: Arc<Config>,
        ingresses: Arc<dyn IngressCache>,
        services: Arc<dyn ServiceCatalog>,
        client: Arc<dyn VirtualServiceClient>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            config,
            ingresses,
            services,
            writer: ApplyWriter::new(client, recorder.clone()),
            recorder,
        }
    }

    /// Whether the Ingress cache has completed its initial list.
    pub fn has_synced(&self) -> bool {
        self.ingresses.has_synced()
    }

    pub async fn sync(&self, key: &ReconcileKey) -> Result<SyncOutcome, SyncError> {
        let Some(ingress) = self.ingresses.get(key) else {
            debug!(%key, "Ingress no longer exists, collecting its VirtualService");
            let removed = self.writer.delete_owned(key).await?;
            return Ok(SyncOutcome::Deleted { removed });
        };

        if !is_adopted(&ingress, &self.config) {
            let removed = self.writer.delete_owned(key).await?;
            if removed {
                info!(%key, "Ingress left class {}, removed its VirtualService", self.config.ingress_class);
            } else {
                debug!(%key, "Ignoring ingress of another class");
            }
            return Ok(SyncOutcome::Filtered { removed });
        }

        let spec = match translate(&ingress, &self.config, self.services.as_ref()) {
            Ok(spec) => spec,
            Err(e) => {
                warn!(%key, error = %e, "Cannot translate ingress");
                self.recorder.emit(
                    &object_ref(&*ingress),
                    EventSeverity::Warning,
                    "TranslationFailed",
                    e.to_string(),
                );
                return Err(e.into());
            }
        };

        let outcome = self.writer.apply(&ingress, spec).await?;
        Ok(SyncOutcome::Applied(outcome))
    }
}
