//! Istio networking API types used by the ingress-istio controller
//!
//! Only the subset of the mesh API the controller writes is modelled:
//! - VirtualService: HTTP routing for a set of hosts bound to gateways

pub mod v1beta1;

pub use v1beta1::VirtualService;

/// Label marking objects created and owned by the controller
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Value of [`MANAGED_BY_LABEL`] on controller-owned objects
pub const MANAGED_BY_VALUE: &str = "ingress-istio-controller";

/// Legacy class annotation carried by Ingress objects
pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";
/// Comma-separated gateway references overriding the default gateway
pub const GATEWAYS_ANNOTATION: &str = "ingress-istio.io/gateways";
/// Comma-separated `service=weight` pairs for weighted backends
pub const WEIGHTS_ANNOTATION: &str = "ingress-istio.io/weights";
