//! Ingress to VirtualService translation
//!
//! Translation is a pure function of the Ingress, the controller
//! configuration and the Service catalog: identical inputs produce an
//! identical spec, ordering included, so the apply writer can diff it
//! against what is stored.

use crate::config::Config;
use crate::error::TranslateError;
use crate::store::ServiceCatalog;
use istio_api::v1beta1::{
    Destination, HTTPMatchRequest, HTTPRoute, HTTPRouteDestination, PortSelector, StringMatch,
    VirtualServiceSpec,
};
use istio_api::{GATEWAYS_ANNOTATION, INGRESS_CLASS_ANNOTATION, WEIGHTS_ANNOTATION};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, Ingress, IngressBackend, IngressServiceBackend,
};
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};

const WILDCARD_HOST: &str = "*";
const EXACT_PATH_TYPE: &str = "Exact";

/// Class an Ingress declares: the class annotation, falling back to
/// `spec.ingressClassName`.
pub fn ingress_class(ingress: &Ingress) -> Option<&str> {
    ingress
        .annotations()
        .get(INGRESS_CLASS_ANNOTATION)
        .map(String::as_str)
        .or_else(|| {
            ingress
                .spec
                .as_ref()
                .and_then(|spec| spec.ingress_class_name.as_deref())
        })
}

/// Whether this controller adopts the Ingress.
pub fn is_adopted(ingress: &Ingress, config: &Config) -> bool {
    ingress_class(ingress) == Some(config.ingress_class.as_str())
}

/// Append the cluster domain to hosts that do not already carry it.
pub fn qualify_host(host: &str, cluster_domain: &str) -> String {
    if host == WILDCARD_HOST
        || host == cluster_domain
        || host
            .strip_suffix(cluster_domain)
            .is_some_and(|rest| rest.ends_with('.'))
    {
        host.to_string()
    } else {
        format!("{}.{}", host, cluster_domain)
    }
}

/// In-mesh DNS name of a Service.
pub fn service_host(service: &str, namespace: &str, cluster_domain: &str) -> String {
    format!("{}.{}.svc.{}", service, namespace, cluster_domain)
}

/// Split 100 across `n` backends: `100 / n` each, the remainder handed out
/// one point at a time from the first backend on.
pub fn even_split(n: usize) -> Vec<i32> {
    if n == 0 {
        return Vec::new();
    }
    let n = n as i32;
    let base = 100 / n;
    let remainder = 100 % n;
    (0..n).map(|i| base + i32::from(i < remainder)).collect()
}

/// Translate an Ingress into the desired VirtualService spec.
///
/// Routes keep rule declaration order and Istio matches them first to
/// last. With several hosts, a host-less rule produces routes without an
/// authority match, so a host-less `/` prefix declared before a named host
/// catches that host's traffic too.
pub fn translate<S>(ingress: &Ingress, config: &Config, services: &S) -> Result<VirtualServiceSpec, TranslateError>
where
    S: ServiceCatalog + ?Sized,
{
    let namespace = ingress.namespace().unwrap_or_else(|| "default".to_string());
    let weights = parse_weights(ingress.annotations().get(WEIGHTS_ANNOTATION))?;
    let resolver = BackendResolver {
        namespace: &namespace,
        config,
        services,
        weights: &weights,
    };

    let spec = ingress.spec.clone().unwrap_or_default();
    let rules = spec.rules.unwrap_or_default();

    let rule_hosts: Vec<Option<String>> = rules
        .iter()
        .map(|rule| {
            rule.host
                .as_deref()
                .filter(|h| !h.is_empty())
                .map(|h| qualify_host(h, &config.cluster_domain))
        })
        .collect();

    let mut hosts: BTreeSet<String> = rule_hosts
        .iter()
        .map(|h| h.clone().unwrap_or_else(|| WILDCARD_HOST.to_string()))
        .collect();
    let scope_by_authority = hosts.len() > 1;

    let mut http = Vec::new();
    for (rule, host) in rules.iter().zip(&rule_hosts) {
        let paths = rule
            .http
            .as_ref()
            .map(|value| value.paths.as_slice())
            .unwrap_or_default();

        for group in group_paths(paths) {
            let authority = host
                .as_ref()
                .filter(|_| scope_by_authority)
                .map(|h| StringMatch::Exact(h.clone()));
            let uri = if group.exact {
                StringMatch::Exact(group.path.clone())
            } else {
                StringMatch::Prefix(group.path.clone())
            };

            http.push(HTTPRoute {
                r#match: vec![HTTPMatchRequest {
                    uri: Some(uri),
                    authority,
                }],
                route: resolver.destinations(&group.path, &group.backends)?,
            });
        }
    }

    if let Some(backend) = spec.default_backend.as_ref() {
        http.push(HTTPRoute {
            r#match: Vec::new(),
            route: resolver.destinations("<default>", &[backend])?,
        });
        if hosts.is_empty() {
            hosts.insert(WILDCARD_HOST.to_string());
        }
    }

    if http.is_empty() {
        return Err(TranslateError::NoRoutes);
    }

    Ok(VirtualServiceSpec {
        hosts: hosts.into_iter().collect(),
        gateways: gateways(ingress, config),
        http,
    })
}

fn gateways(ingress: &Ingress, config: &Config) -> Vec<String> {
    let mut gateways: Vec<String> = Vec::new();
    if let Some(value) = ingress.annotations().get(GATEWAYS_ANNOTATION) {
        for gateway in value.split(',').map(str::trim).filter(|g| !g.is_empty()) {
            if !gateways.iter().any(|g| g == gateway) {
                gateways.push(gateway.to_string());
            }
        }
    }
    if gateways.is_empty() {
        gateways.push(config.default_gateway.clone());
    }
    gateways
}

/// Parse `svc=weight,svc2=weight` into a map keyed by service name.
fn parse_weights(value: Option<&String>) -> Result<BTreeMap<String, i32>, TranslateError> {
    let mut weights = BTreeMap::new();
    let Some(value) = value else {
        return Ok(weights);
    };

    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (service, weight) = entry
            .split_once('=')
            .ok_or_else(|| TranslateError::InvalidWeightAnnotation(entry.to_string()))?;
        let service = service.trim();
        let weight: i32 = weight
            .trim()
            .parse()
            .map_err(|_| TranslateError::InvalidWeightAnnotation(entry.to_string()))?;
        if service.is_empty() {
            return Err(TranslateError::InvalidWeightAnnotation(entry.to_string()));
        }
        if !(0..=100).contains(&weight) {
            return Err(TranslateError::WeightOutOfRange {
                service: service.to_string(),
                weight,
            });
        }
        weights.insert(service.to_string(), weight);
    }
    Ok(weights)
}

/// Backends sharing one path match inside a rule
struct PathGroup<'a> {
    path: String,
    exact: bool,
    backends: Vec<&'a IngressBackend>,
}

/// Merge paths with the same `(path, pathType)`, keeping first-seen order.
fn group_paths(paths: &[HTTPIngressPath]) -> Vec<PathGroup<'_>> {
    let mut groups: Vec<PathGroup<'_>> = Vec::new();
    for path in paths {
        let value = path
            .path
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or("/")
            .to_string();
        let exact = path.path_type == EXACT_PATH_TYPE;

        match groups
            .iter_mut()
            .find(|g| g.path == value && g.exact == exact)
        {
            Some(group) => group.backends.push(&path.backend),
            None => groups.push(PathGroup {
                path: value,
                exact,
                backends: vec![&path.backend],
            }),
        }
    }
    groups
}

struct BackendResolver<'a, S: ?Sized> {
    namespace: &'a str,
    config: &'a Config,
    services: &'a S,
    weights: &'a BTreeMap<String, i32>,
}

impl<S: ServiceCatalog + ?Sized> BackendResolver<'_, S> {
    fn destinations(
        &self,
        path: &str,
        backends: &[&IngressBackend],
    ) -> Result<Vec<HTTPRouteDestination>, TranslateError> {
        let mut resolved = Vec::with_capacity(backends.len());
        for backend in backends {
            let service = backend
                .service
                .as_ref()
                .ok_or_else(|| TranslateError::UnsupportedBackend {
                    path: path.to_string(),
                })?;
            let port = self.resolve_port(service)?;
            resolved.push((service.name.as_str(), port));
        }

        let explicit: Vec<Option<i32>> = resolved
            .iter()
            .map(|(name, _)| self.weights.get(*name).copied())
            .collect();
        let weights = self.assign_weights(path, &explicit)?;

        Ok(resolved
            .into_iter()
            .zip(weights)
            .map(|((name, port), weight)| HTTPRouteDestination {
                destination: Destination {
                    host: service_host(name, self.namespace, &self.config.cluster_domain),
                    port: Some(PortSelector { number: port }),
                },
                weight,
            })
            .collect())
    }

    fn assign_weights(&self, path: &str, explicit: &[Option<i32>]) -> Result<Vec<i32>, TranslateError> {
        match explicit {
            [] => Ok(Vec::new()),
            [single] => Ok(vec![single.unwrap_or(self.config.default_weight as i32)]),
            _ if explicit.iter().all(Option::is_none) => Ok(even_split(explicit.len())),
            _ if explicit.iter().all(Option::is_some) => {
                let weights: Vec<i32> = explicit.iter().flatten().copied().collect();
                let sum: i32 = weights.iter().sum();
                if sum != 100 {
                    return Err(TranslateError::WeightSum {
                        path: path.to_string(),
                        sum,
                    });
                }
                Ok(weights)
            }
            _ => Err(TranslateError::MixedWeights {
                path: path.to_string(),
            }),
        }
    }

    fn resolve_port(&self, service: &IngressServiceBackend) -> Result<u32, TranslateError> {
        let ports = self
            .services
            .service_ports(self.namespace, &service.name)
            .ok_or_else(|| TranslateError::MissingService {
                namespace: self.namespace.to_string(),
                name: service.name.clone(),
            })?;

        let requested = service.port.as_ref();
        let number = |port: i32| {
            u32::try_from(port).map_err(|_| TranslateError::InvalidPort {
                service: service.name.clone(),
                port,
            })
        };

        if let Some(port) = requested.and_then(|p| p.number) {
            return number(port);
        }

        if let Some(port_name) = requested.and_then(|p| p.name.as_deref()) {
            let port = ports
                .iter()
                .find(|p| p.name.as_deref() == Some(port_name))
                .ok_or_else(|| TranslateError::UnknownPortName {
                    service: service.name.clone(),
                    port: port_name.to_string(),
                })?;
            return number(port.port);
        }

        match ports.as_slice() {
            [only] => number(only.port),
            _ => Err(TranslateError::AmbiguousPort {
                service: service.name.clone(),
                count: ports.len(),
            }),
        }
    }
}
