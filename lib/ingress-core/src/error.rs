use thiserror::Error;

/// Errors returned by the VirtualService API boundary
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("object not found")]
    NotFound,

    #[error("write conflict: object was modified since it was read")]
    Conflict,

    #[error("Kubernetes error: {0}")]
    Kube(kube::Error),
}

impl From<kube::Error> for ClientError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => ClientError::NotFound,
            kube::Error::Api(resp) if resp.code == 409 => ClientError::Conflict,
            _ => ClientError::Kube(err),
        }
    }
}

/// Reasons an Ingress cannot be translated. None of these heal on retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("backend service {namespace}/{name} does not exist")]
    MissingService { namespace: String, name: String },

    #[error("backend service {service} has no port named {port}")]
    UnknownPortName { service: String, port: String },

    #[error("backend service {service} port {port} is not a valid port number")]
    InvalidPort { service: String, port: i32 },

    #[error("backend service {service} has no port and {count} declared ports")]
    AmbiguousPort { service: String, count: usize },

    #[error("path {path} has a non-service backend")]
    UnsupportedBackend { path: String },

    #[error("invalid weights annotation entry {0:?}")]
    InvalidWeightAnnotation(String),

    #[error("weight {weight} for service {service} is outside 0-100")]
    WeightOutOfRange { service: String, weight: i32 },

    #[error("weights for path {path} sum to {sum}, expected 100")]
    WeightSum { path: String, sum: i32 },

    #[error("path {path} mixes weighted and unweighted backends")]
    MixedWeights { path: String },

    #[error("ingress has no rules or default backend")]
    NoRoutes,
}

/// Errors produced while syncing a single key
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("translation failed: {0}")]
    Translate(#[from] TranslateError),

    #[error("API error: {0}")]
    Client(#[from] ClientError),

    #[error("VirtualService {0} exists but is not managed by this controller")]
    UnmanagedTarget(String),

    #[error("sync timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("sync panicked: {0}")]
    Panicked(String),
}

impl SyncError {
    /// Whether the worker pool should requeue the key with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Translate(_) | SyncError::UnmanagedTarget(_) => false,
            SyncError::Client(_) | SyncError::Timeout(_) | SyncError::Panicked(_) => true,
        }
    }
}
