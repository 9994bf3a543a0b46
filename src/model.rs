//! Snapshot values read from the cluster.
//!
//! These are flattened views of the `k8s-openapi` objects, keeping only what
//! URL resolution reads. They are built fresh for every discovery call.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::core::v1 as corev1;

/// The mechanism by which a service is reachable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExposureType {
    /// Cluster-internal virtual address.
    ClusterIp,
    /// A port opened on every node, forwarding to the backing pods.
    NodePort,
    /// An externally provisioned load balancer.
    LoadBalancer,
    /// A DNS alias to a name outside the cluster.
    ExternalName,
    /// Administrator-assigned external addresses.
    ///
    /// Kubernetes has no such `spec.type`; external IPs may be set on any
    /// service, so this never comes from [`ExposureType::from_service_type`].
    ExternalIp,
}

impl ExposureType {
    /// Every exposure type.
    pub const ALL: [ExposureType; 5] = [
        ExposureType::ClusterIp,
        ExposureType::NodePort,
        ExposureType::LoadBalancer,
        ExposureType::ExternalName,
        ExposureType::ExternalIp,
    ];

    /// Maps a service's `spec.type` value.
    ///
    /// An absent type is `ClusterIP`, the platform default. Unknown values yield `None`.
    #[must_use]
    pub fn from_service_type(value: Option<&str>) -> Option<Self> {
        match value {
            None | Some("ClusterIP") => Some(Self::ClusterIp),
            Some("NodePort") => Some(Self::NodePort),
            Some("LoadBalancer") => Some(Self::LoadBalancer),
            Some("ExternalName") => Some(Self::ExternalName),
            Some(_) => None,
        }
    }

    /// The platform name of this exposure type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClusterIp => "ClusterIP",
            Self::NodePort => "NodePort",
            Self::LoadBalancer => "LoadBalancer",
            Self::ExternalName => "ExternalName",
            Self::ExternalIp => "ExternalIP",
        }
    }
}

impl fmt::Display for ExposureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown exposure type name.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown exposure type {0:?}")]
pub struct UnknownExposureType(String);

impl FromStr for ExposureType {
    type Err = UnknownExposureType;

    /// Parses a platform name, ignoring ASCII case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownExposureType(s.to_string()))
    }
}

/// A port declared on a service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServicePort {
    /// The port name, used as the application protocol label.
    pub name: Option<String>,
    /// The service port.
    pub port: i32,
    /// The node port, when the service allocates one.
    pub node_port: Option<i32>,
}

/// A service and the addressing fields resolution reads.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Service {
    /// Service name.
    pub name: String,
    /// Namespace, when known.
    pub namespace: Option<String>,
    /// Metadata labels.
    pub labels: BTreeMap<String, String>,
    /// The exposure type from `spec.type`; `None` for unrecognized values.
    pub exposure: Option<ExposureType>,
    /// Declared ports, in declaration order.
    pub ports: Vec<ServicePort>,
    /// Cluster-internal address. Headless services (`None`) have no address.
    pub cluster_ip: Option<String>,
    /// Administrator-assigned external addresses.
    pub external_ips: Vec<String>,
    /// DNS alias of an `ExternalName` service.
    pub external_name: Option<String>,
    /// Published load-balancer ingress addresses (IP, or hostname when no IP is published).
    pub ingress: Vec<String>,
}

/// A single backing address of a service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EndpointAddress {
    /// The pod IP.
    pub ip: String,
    /// Name of the referenced workload instance.
    pub target: Option<String>,
    /// Namespace of the referenced workload instance, when recorded.
    pub target_namespace: Option<String>,
}

/// A group of addresses sharing the same ports.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EndpointSubset {
    /// Ready addresses, in recorded order.
    pub addresses: Vec<EndpointAddress>,
}

/// The live backing addresses of a service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EndpointRecord {
    /// Name of the service this record belongs to.
    pub name: String,
    /// Namespace, when known.
    pub namespace: Option<String>,
    /// Address subsets, in recorded order.
    pub subsets: Vec<EndpointSubset>,
}

/// A running pod.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkloadInstance {
    /// Pod name.
    pub name: String,
    /// Namespace, when known.
    pub namespace: Option<String>,
    /// Address of the node the pod is scheduled on.
    pub host_ip: Option<String>,
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

impl From<&corev1::ServicePort> for ServicePort {
    fn from(port: &corev1::ServicePort) -> Self {
        Self {
            name: port.name.clone(),
            port: port.port,
            node_port: port.node_port,
        }
    }
}

impl From<&corev1::Service> for Service {
    fn from(svc: &corev1::Service) -> Self {
        let spec = svc.spec.as_ref();

        let ingress = svc
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .map(|ingress| {
                ingress
                    .iter()
                    .filter_map(|i| non_empty(i.ip.as_ref()).or_else(|| non_empty(i.hostname.as_ref())))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: svc.metadata.name.clone().unwrap_or_default(),
            namespace: svc.metadata.namespace.clone(),
            labels: svc.metadata.labels.clone().unwrap_or_default(),
            exposure: ExposureType::from_service_type(spec.and_then(|s| s.type_.as_deref())),
            ports: spec
                .and_then(|s| s.ports.as_ref())
                .map(|ports| ports.iter().map(ServicePort::from).collect())
                .unwrap_or_default(),
            cluster_ip: spec
                .and_then(|s| non_empty(s.cluster_ip.as_ref()))
                .filter(|ip| ip != "None"),
            external_ips: spec
                .and_then(|s| s.external_ips.clone())
                .unwrap_or_default(),
            external_name: spec.and_then(|s| non_empty(s.external_name.as_ref())),
            ingress,
        }
    }
}

impl From<corev1::Service> for Service {
    fn from(svc: corev1::Service) -> Self {
        Self::from(&svc)
    }
}

impl From<&corev1::EndpointAddress> for EndpointAddress {
    fn from(addr: &corev1::EndpointAddress) -> Self {
        let target = addr.target_ref.as_ref();
        Self {
            ip: addr.ip.clone(),
            target: target.and_then(|r| r.name.clone()),
            target_namespace: target.and_then(|r| r.namespace.clone()),
        }
    }
}

impl From<&corev1::Endpoints> for EndpointRecord {
    fn from(ep: &corev1::Endpoints) -> Self {
        let subsets = ep
            .subsets
            .iter()
            .flatten()
            .map(|s| EndpointSubset {
                addresses: s
                    .addresses
                    .iter()
                    .flatten()
                    .map(EndpointAddress::from)
                    .collect(),
            })
            .collect();

        Self {
            name: ep.metadata.name.clone().unwrap_or_default(),
            namespace: ep.metadata.namespace.clone(),
            subsets,
        }
    }
}

impl From<corev1::Endpoints> for EndpointRecord {
    fn from(ep: corev1::Endpoints) -> Self {
        Self::from(&ep)
    }
}

impl From<&corev1::Pod> for WorkloadInstance {
    fn from(pod: &corev1::Pod) -> Self {
        Self {
            name: pod.metadata.name.clone().unwrap_or_default(),
            namespace: pod.metadata.namespace.clone(),
            host_ip: pod
                .status
                .as_ref()
                .and_then(|s| non_empty(s.host_ip.as_ref())),
        }
    }
}

impl From<corev1::Pod> for WorkloadInstance {
    fn from(pod: corev1::Pod) -> Self {
        Self::from(&pod)
    }
}
