use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// VirtualService binds a set of hosts to gateways and routes their HTTP
/// traffic to mesh destinations
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "networking.istio.io",
    version = "v1beta1",
    kind = "VirtualService",
    plural = "virtualservices",
    namespaced,
    derive = "Default",
    derive = "PartialEq"
)]
pub struct VirtualServiceSpec {
    /// Destination hosts this routing applies to
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Gateways (and sidecars) the routes are bound to
    #[serde(default)]
    pub gateways: Vec<String>,

    /// Ordered HTTP routes; the first matching route wins
    #[serde(default)]
    pub http: Vec<HTTPRoute>,
}

/// A single HTTP route: match conditions and weighted destinations
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HTTPRoute {
    /// Match conditions; an empty list matches every request
    #[serde(rename = "match", default, skip_serializing_if = "Vec::is_empty")]
    pub r#match: Vec<HTTPMatchRequest>,

    /// Weighted destinations traffic is split across
    #[serde(default)]
    pub route: Vec<HTTPRouteDestination>,
}

/// Request attributes a route matches on
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HTTPMatchRequest {
    /// URI match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<StringMatch>,

    /// HTTP authority (Host header) match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authority: Option<StringMatch>,
}

/// String matching mode
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum StringMatch {
    /// Exact string match
    Exact(String),
    /// Prefix match
    Prefix(String),
}

/// A destination together with its share of traffic
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HTTPRouteDestination {
    pub destination: Destination,

    /// Share of traffic (0-100) sent to this destination
    #[serde(default)]
    pub weight: i32,
}

/// Mesh service traffic is forwarded to
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Destination {
    /// Fully qualified service host (e.g. `reviews.default.svc.cluster.local`)
    pub host: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<PortSelector>,
}

/// Port on the destination host
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PortSelector {
    pub number: u32,
}
