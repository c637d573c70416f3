/// API version v1beta1 of the Istio networking group

pub mod virtual_service;

pub use virtual_service::{
    Destination, HTTPMatchRequest, HTTPRoute, HTTPRouteDestination, PortSelector, StringMatch,
    VirtualService, VirtualServiceSpec,
};

/// API group for Istio networking resources
pub const API_GROUP: &str = "networking.istio.io";
/// API version for Istio networking resources
pub const API_VERSION: &str = "v1beta1";
