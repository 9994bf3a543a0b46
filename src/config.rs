//! Engine configuration.

use crate::model::ExposureType;

/// Scheme used for URLs whose protocol cannot be read from the service.
pub const DEFAULT_PROTOCOL: &str = "http";

/// Configuration fixed when a discovery engine is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// The exposure type this engine resolves. Services of other types are ignored.
    pub mode: ExposureType,

    /// The Kubernetes API server URL.
    /// If `None`, the client is inferred from the in-cluster environment or kubeconfig.
    pub control_plane: Option<String>,

    /// Scheme for load-balancer ingress URLs.
    pub load_balancer_protocol: String,

    /// Scheme for external-name URLs.
    pub external_name_protocol: String,
}

impl DiscoveryConfig {
    /// Creates a configuration resolving services of the given exposure type.
    #[must_use]
    pub fn new(mode: ExposureType) -> Self {
        Self {
            mode,
            control_plane: None,
            load_balancer_protocol: DEFAULT_PROTOCOL.to_string(),
            external_name_protocol: DEFAULT_PROTOCOL.to_string(),
        }
    }

    /// Sets an explicit control-plane URL.
    #[must_use]
    pub fn control_plane(mut self, endpoint: impl Into<String>) -> Self {
        self.control_plane = Some(endpoint.into());
        self
    }

    /// Sets the scheme for load-balancer ingress URLs.
    #[must_use]
    pub fn load_balancer_protocol(mut self, scheme: impl Into<String>) -> Self {
        self.load_balancer_protocol = scheme.into();
        self
    }

    /// Sets the scheme for external-name URLs.
    #[must_use]
    pub fn external_name_protocol(mut self, scheme: impl Into<String>) -> Self {
        self.external_name_protocol = scheme.into();
        self
    }
}

impl Default for DiscoveryConfig {
    /// Resolves `LoadBalancer` services.
    fn default() -> Self {
        Self::new(ExposureType::LoadBalancer)
    }
}
