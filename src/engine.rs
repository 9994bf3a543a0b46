//! The discovery engine.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::aggregate::{DiscoveryResult, ResultAggregator};
use crate::client::{ClusterStateClient, KubeClusterState, LabelSelector, Scope};
use crate::config::DiscoveryConfig;
use crate::error::Result;
use crate::resolver::Resolver;

/// Per-call options: which services to list and how long to spend.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    /// Namespace to list services in. If `None`, all namespaces are listed.
    pub namespace: Option<String>,

    /// Labels a service must carry.
    pub selector: LabelSelector,

    /// When to stop resolving and return what has been found so far.
    pub deadline: Option<Instant>,
}

impl Query {
    /// Queries services in every namespace.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts the query to a namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Requires a `key=value` label.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.selector = self.selector.label(key, value);
        self
    }

    /// Requires every label in `labels`.
    #[must_use]
    pub fn labels(mut self, labels: BTreeMap<String, String>) -> Self {
        for (k, v) in labels {
            self.selector = self.selector.label(k, v);
        }
        self
    }

    /// Gives the call `timeout` from now to finish.
    #[must_use]
    pub fn timeout(self, timeout: Duration) -> Self {
        self.deadline(Instant::now() + timeout)
    }

    /// Gives the call until `deadline` to finish.
    #[must_use]
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The namespace scope of the service listing.
    #[must_use]
    pub fn scope(&self) -> Scope {
        Scope::from_namespace(self.namespace.as_deref())
    }
}

/// Something that turns a service query into discovered URLs.
#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    /// Discovers service URLs.
    ///
    /// Each call lists services afresh and builds its result from scratch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connectivity`](crate::Error::Connectivity) if the
    /// cluster cannot be queried. Lookup misses and malformed URLs are not
    /// errors; see [`DiscoveryResult::issues`].
    async fn discover(&self, query: &Query) -> Result<DiscoveryResult>;
}

/// Resolves services of one exposure type against a cluster.
///
/// The engine holds no per-call state and may be shared between concurrent calls.
#[derive(Clone, Debug)]
pub struct DiscoveryEngine<C> {
    client: C,
    config: DiscoveryConfig,
}

impl<C: ClusterStateClient> DiscoveryEngine<C> {
    /// Creates an engine reading cluster state from `client`.
    #[must_use]
    pub fn new(client: C, config: DiscoveryConfig) -> Self {
        Self { client, config }
    }

    /// The engine's configuration.
    #[must_use]
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// The underlying cluster client.
    #[must_use]
    pub fn client(&self) -> &C {
        &self.client
    }
}

impl DiscoveryEngine<KubeClusterState> {
    /// Connects to the configured control plane, or infers one if none is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`](crate::Error::InvalidEndpoint) for an
    /// unusable control-plane URL, or
    /// [`Error::Connectivity`](crate::Error::Connectivity) if no client
    /// configuration can be inferred.
    pub async fn connect(config: DiscoveryConfig) -> Result<Self> {
        let client = match config.control_plane.as_deref() {
            Some(endpoint) => KubeClusterState::from_endpoint(endpoint)?,
            None => KubeClusterState::try_default().await?,
        };

        Ok(Self::new(client, config))
    }
}

#[async_trait]
impl<C: ClusterStateClient> DiscoveryProvider for DiscoveryEngine<C> {
    async fn discover(&self, query: &Query) -> Result<DiscoveryResult> {
        let scope = query.scope();
        let resolver = Resolver::new(&self.client, &self.config, &scope, query.deadline);

        let mut agg = ResultAggregator::new();
        agg.begin();

        tracing::debug!(
            "discovering {} services in {scope} with selector {:?}",
            self.config.mode,
            query.selector.to_string()
        );

        let Some(services) = resolver
            .bounded(self.client.list_services(&scope, &query.selector))
            .await?
        else {
            tracing::warn!("discovery deadline expired before services were listed");
            agg.mark_partial();
            return Ok(agg.finish());
        };

        resolver.resolve(&services, &mut agg).await?;

        let result = agg.finish();
        tracing::debug!(
            "discovered {} {} services ({} issues)",
            result.len(),
            self.config.mode,
            result.issues().len()
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use k8s_openapi::api::core::v1::{
        EndpointAddress, EndpointSubset, Endpoints, LoadBalancerIngress, LoadBalancerStatus,
        ObjectReference, Pod, PodStatus, Service, ServicePort, ServiceSpec, ServiceStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;
    use crate::Error;
    use crate::client::{Lookup, SnapshotClusterState};
    use crate::model::{self, EndpointRecord, ExposureType, WorkloadInstance};
    use crate::url::ResolvedUrl;

    // Helper to create object metadata in the "prod" namespace
    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("prod".to_string()),
            ..Default::default()
        }
    }

    // Helper to create a service port
    fn make_port(name: Option<&str>, port: i32, node_port: Option<i32>) -> ServicePort {
        ServicePort {
            name: name.map(String::from),
            port,
            node_port,
            ..Default::default()
        }
    }

    fn make_service(name: &str, spec: ServiceSpec) -> Service {
        Service {
            metadata: meta(name),
            spec: Some(spec),
            ..Default::default()
        }
    }

    fn cluster_ip_service(name: &str, ip: &str, ports: Vec<ServicePort>) -> Service {
        make_service(
            name,
            ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                cluster_ip: Some(ip.to_string()),
                ports: Some(ports),
                ..Default::default()
            },
        )
    }

    fn load_balancer_service(name: &str, ingress: &[&str]) -> Service {
        Service {
            status: Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus {
                    ingress: Some(
                        ingress
                            .iter()
                            .map(|ip| LoadBalancerIngress {
                                ip: Some((*ip).to_string()),
                                ..Default::default()
                            })
                            .collect(),
                    ),
                }),
                ..Default::default()
            }),
            ..make_service(
                name,
                ServiceSpec {
                    type_: Some("LoadBalancer".to_string()),
                    cluster_ip: Some("10.0.0.9".to_string()),
                    ports: Some(vec![make_port(Some("http"), 80, Some(30080))]),
                    ..Default::default()
                },
            )
        }
    }

    fn external_name_service(name: &str, external_name: &str) -> Service {
        make_service(
            name,
            ServiceSpec {
                type_: Some("ExternalName".to_string()),
                external_name: Some(external_name.to_string()),
                ..Default::default()
            },
        )
    }

    fn node_port_service(name: &str, ports: Vec<ServicePort>) -> Service {
        make_service(
            name,
            ServiceSpec {
                type_: Some("NodePort".to_string()),
                cluster_ip: Some("10.0.0.20".to_string()),
                ports: Some(ports),
                ..Default::default()
            },
        )
    }

    fn make_endpoints(name: &str, pods: &[&str]) -> Endpoints {
        Endpoints {
            metadata: meta(name),
            subsets: Some(vec![EndpointSubset {
                addresses: Some(
                    pods.iter()
                        .enumerate()
                        .map(|(i, pod)| EndpointAddress {
                            ip: format!("10.2.0.{}", i + 1),
                            target_ref: Some(ObjectReference {
                                kind: Some("Pod".to_string()),
                                name: Some((*pod).to_string()),
                                namespace: Some("prod".to_string()),
                                ..Default::default()
                            }),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }]),
        }
    }

    fn make_pod(name: &str, host_ip: &str) -> Pod {
        Pod {
            metadata: meta(name),
            status: Some(PodStatus {
                host_ip: Some(host_ip.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn url(host: &str, port: Option<i32>) -> ResolvedUrl {
        ResolvedUrl::new("http", host, port).unwrap()
    }

    fn mixed_cluster() -> SnapshotClusterState {
        SnapshotClusterState::new()
            .with_service(cluster_ip_service(
                "db",
                "10.0.0.5",
                vec![
                    make_port(Some("http"), 80, None),
                    make_port(Some("metrics"), 9100, None),
                ],
            ))
            .with_service(load_balancer_service("web", &["1.2.3.4", "1.2.3.5"]))
            .with_service(external_name_service("legacy", "legacy.example.com"))
            .with_service(node_port_service(
                "api",
                vec![make_port(Some("http"), 8080, Some(31000))],
            ))
            .with_endpoints(make_endpoints("api", &["api-0"]))
            .with_instance(make_pod("api-0", "10.1.1.9"))
    }

    async fn discover(state: SnapshotClusterState, mode: ExposureType) -> DiscoveryResult {
        DiscoveryEngine::new(state, DiscoveryConfig::new(mode))
            .discover(&Query::all())
            .await
            .unwrap()
    }

    // Scenarios

    #[tokio::test]
    async fn cluster_ip_scenario() {
        let result = discover(mixed_cluster(), ExposureType::ClusterIp).await;

        assert_eq!(result.len(), 1);
        assert_eq!(result.get("db"), &[url("10.0.0.5", Some(80))]);
    }

    #[tokio::test]
    async fn load_balancer_scenario() {
        let result = discover(mixed_cluster(), ExposureType::LoadBalancer).await;

        assert_eq!(result.len(), 1);
        assert_eq!(
            result.get("web"),
            &[url("1.2.3.4", None), url("1.2.3.5", None)]
        );
        assert_eq!(result.get("web")[0].to_string(), "http://1.2.3.4");
    }

    #[tokio::test]
    async fn external_name_scenario() {
        let result = discover(mixed_cluster(), ExposureType::ExternalName).await;

        assert_eq!(result.len(), 1);
        assert_eq!(result.get("legacy"), &[url("legacy.example.com", None)]);
    }

    #[tokio::test]
    async fn node_port_scenario() {
        let result = discover(mixed_cluster(), ExposureType::NodePort).await;

        assert_eq!(result.len(), 1);
        assert_eq!(result.get("api"), &[url("10.1.1.9", Some(31000))]);
        assert_eq!(result.get("api")[0].to_string(), "http://10.1.1.9:31000");
    }

    #[tokio::test]
    async fn node_port_missing_pod_scenario() {
        let state = SnapshotClusterState::new()
            .with_service(node_port_service(
                "api",
                vec![make_port(Some("http"), 8080, Some(31000))],
            ))
            .with_endpoints(make_endpoints("api", &["api-0"]));

        let result = discover(state, ExposureType::NodePort).await;

        assert!(result.is_empty());
        assert!(!result.is_partial());
    }

    #[tokio::test]
    async fn external_ip_mode_ignores_types() {
        let mut svc = cluster_ip_service("ext", "10.0.0.30", Vec::new());
        if let Some(spec) = svc.spec.as_mut() {
            spec.external_ips = Some(vec!["192.0.2.1".to_string()]);
        }

        let result = discover(mixed_cluster().with_service(svc), ExposureType::ExternalIp).await;

        assert_eq!(result.len(), 1);
        assert_eq!(result.get("ext"), &[url("192.0.2.1", None)]);
    }

    // Properties

    #[tokio::test]
    async fn protocols_drawn_from_whitelist_or_default() {
        let config = |mode| {
            DiscoveryConfig::new(mode)
                .load_balancer_protocol("https")
                .external_name_protocol("ftp")
        };

        for mode in ExposureType::ALL {
            let engine = DiscoveryEngine::new(mixed_cluster(), config(mode));
            let result = engine.discover(&Query::all()).await.unwrap();

            for (_, url) in result.urls() {
                match mode {
                    ExposureType::ClusterIp | ExposureType::NodePort => {
                        assert!(
                            crate::classify(Some(url.scheme())).is_some(),
                            "{url} in {mode}"
                        );
                    }
                    ExposureType::LoadBalancer => assert_eq!(url.scheme(), "https"),
                    ExposureType::ExternalName => assert_eq!(url.scheme(), "ftp"),
                    ExposureType::ExternalIp => assert_eq!(url.scheme(), "http"),
                }
            }
        }
    }

    #[tokio::test]
    async fn node_port_never_uses_declared_port() {
        let result = discover(mixed_cluster(), ExposureType::NodePort).await;

        for (_, url) in result.urls() {
            assert_eq!(url.port(), Some(31000));
        }
    }

    #[tokio::test]
    async fn discovery_is_idempotent() {
        let engine = DiscoveryEngine::new(
            mixed_cluster(),
            DiscoveryConfig::new(ExposureType::ClusterIp),
        );

        let first = engine.discover(&Query::all()).await.unwrap();
        let second = engine.discover(&Query::all()).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn changing_mode_inherits_nothing() {
        let state = mixed_cluster();

        let cluster_ip = DiscoveryEngine::new(
            state.clone(),
            DiscoveryConfig::new(ExposureType::ClusterIp),
        );
        let load_balancer =
            DiscoveryEngine::new(state, DiscoveryConfig::new(ExposureType::LoadBalancer));

        let before = cluster_ip.discover(&Query::all()).await.unwrap();
        let after = load_balancer.discover(&Query::all()).await.unwrap();

        assert!(before.contains("db"));
        assert!(!after.contains("db"));
        assert_eq!(after.len(), 1);
    }

    #[tokio::test]
    async fn query_scopes_and_selects_services() {
        let mut labelled = cluster_ip_service("cache", "10.0.0.6", vec![make_port(Some("http"), 80, None)]);
        labelled.metadata.labels = Some([("tier".to_string(), "cache".to_string())].into());

        let mut elsewhere = cluster_ip_service("db", "10.9.0.5", vec![make_port(Some("http"), 80, None)]);
        elsewhere.metadata.namespace = Some("dev".to_string());

        let engine = DiscoveryEngine::new(
            mixed_cluster().with_service(labelled).with_service(elsewhere),
            DiscoveryConfig::new(ExposureType::ClusterIp),
        );

        let all = engine.discover(&Query::all()).await.unwrap();
        assert_eq!(all.get("db").len(), 2);
        assert_eq!(all.get("cache").len(), 1);

        let dev = engine.discover(&Query::all().namespace("dev")).await.unwrap();
        assert_eq!(dev.get("db"), &[url("10.9.0.5", Some(80))]);
        assert!(!dev.contains("cache"));

        let cache = engine
            .discover(&Query::all().namespace("prod").label("tier", "cache"))
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("cache"));
    }

    // Failure handling

    /// Cluster client whose queries always fail.
    struct Unreachable;

    #[async_trait]
    impl ClusterStateClient for Unreachable {
        async fn list_services(
            &self,
            _scope: &Scope,
            _selector: &LabelSelector,
        ) -> Result<Vec<model::Service>> {
            Err(Error::connectivity("connection refused"))
        }

        async fn get_endpoint_record(
            &self,
            _scope: &Scope,
            _service: &str,
        ) -> Result<Lookup<EndpointRecord>> {
            Err(Error::connectivity("connection refused"))
        }

        async fn get_workload_instance(
            &self,
            _scope: &Scope,
            _instance: &str,
        ) -> Result<Lookup<WorkloadInstance>> {
            Err(Error::connectivity("connection refused"))
        }
    }

    #[tokio::test]
    async fn connectivity_error_aborts_call() {
        let engine = DiscoveryEngine::new(Unreachable, DiscoveryConfig::new(ExposureType::ClusterIp));

        let err = engine.discover(&Query::all()).await.unwrap_err();
        assert!(matches!(err, Error::Connectivity { .. }));
        assert_eq!(err.to_string(), "cluster query failed: connection refused");
    }

    /// Serves a fixed snapshot, but fails or stalls on secondary lookups.
    struct Degraded {
        inner: SnapshotClusterState,
        stall: Option<Duration>,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl ClusterStateClient for Degraded {
        async fn list_services(
            &self,
            scope: &Scope,
            selector: &LabelSelector,
        ) -> Result<Vec<model::Service>> {
            self.inner.list_services(scope, selector).await
        }

        async fn get_endpoint_record(
            &self,
            scope: &Scope,
            service: &str,
        ) -> Result<Lookup<EndpointRecord>> {
            let n = self.lookups.fetch_add(1, Ordering::SeqCst);
            match self.stall {
                Some(stall) if n > 0 => tokio::time::sleep(stall).await,
                Some(_) => {}
                None => return Err(Error::connectivity("endpoints forbidden")),
            }
            self.inner.get_endpoint_record(scope, service).await
        }

        async fn get_workload_instance(
            &self,
            scope: &Scope,
            instance: &str,
        ) -> Result<Lookup<WorkloadInstance>> {
            self.inner.get_workload_instance(scope, instance).await
        }
    }

    fn two_node_port_services() -> SnapshotClusterState {
        SnapshotClusterState::new()
            .with_service(node_port_service(
                "api",
                vec![make_port(Some("http"), 8080, Some(31000))],
            ))
            .with_service(node_port_service(
                "blog",
                vec![make_port(Some("http"), 8080, Some(31001))],
            ))
            .with_endpoints(make_endpoints("api", &["api-0"]))
            .with_endpoints(make_endpoints("blog", &["blog-0"]))
            .with_instance(make_pod("api-0", "10.1.1.9"))
            .with_instance(make_pod("blog-0", "10.1.1.10"))
    }

    #[tokio::test]
    async fn secondary_query_failure_aborts_call() {
        let engine = DiscoveryEngine::new(
            Degraded {
                inner: two_node_port_services(),
                stall: None,
                lookups: AtomicUsize::new(0),
            },
            DiscoveryConfig::new(ExposureType::NodePort),
        );

        let err = engine.discover(&Query::all()).await.unwrap_err();
        assert!(matches!(err, Error::Connectivity { .. }));
    }

    #[tokio::test]
    async fn node_port_without_allocation_skips_lookups() {
        let degraded = Degraded {
            inner: SnapshotClusterState::new().with_service(node_port_service(
                "api",
                vec![
                    make_port(Some("http"), 8080, None),
                    make_port(Some("metrics"), 9090, Some(31090)),
                ],
            )),
            stall: None,
            lookups: AtomicUsize::new(0),
        };
        let engine = DiscoveryEngine::new(degraded, DiscoveryConfig::new(ExposureType::NodePort));

        let result = engine.discover(&Query::all()).await.unwrap();

        assert!(result.is_empty());
        assert!(!result.is_partial());
        assert_eq!(engine.client().lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn connect_rejects_invalid_control_plane() {
        for endpoint in ["", "bad host", "ftp://10.0.0.1"] {
            let config = DiscoveryConfig::new(ExposureType::ClusterIp).control_plane(endpoint);
            let err = DiscoveryEngine::connect(config).await.unwrap_err();
            assert!(matches!(err, Error::InvalidEndpoint(_)), "{endpoint:?}: {err}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_returns_partial_result() {
        let engine = DiscoveryEngine::new(
            Degraded {
                inner: two_node_port_services(),
                stall: Some(Duration::from_secs(60)),
                lookups: AtomicUsize::new(0),
            },
            DiscoveryConfig::new(ExposureType::NodePort),
        );

        let result = engine
            .discover(&Query::all().timeout(Duration::from_secs(5)))
            .await
            .unwrap();

        assert!(result.is_partial());
        assert_eq!(result.get("api"), &[url("10.1.1.9", Some(31000))]);
        assert!(!result.contains("blog"));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_not_reached_is_complete() {
        let engine = DiscoveryEngine::new(
            two_node_port_services(),
            DiscoveryConfig::new(ExposureType::NodePort),
        );

        let result = engine
            .discover(&Query::all().timeout(Duration::from_secs(5)))
            .await
            .unwrap();

        assert!(!result.is_partial());
        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn engine_is_shareable_across_tasks() {
        let engine = std::sync::Arc::new(DiscoveryEngine::new(
            mixed_cluster(),
            DiscoveryConfig::new(ExposureType::LoadBalancer),
        ));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.discover(&Query::all()).await.unwrap() })
            })
            .collect();

        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.get("web").len(), 2);
        }
    }

    #[test]
    fn query_builder() {
        let query = Query::all()
            .namespace("prod")
            .label("app", "web")
            .labels([("tier".to_string(), "front".to_string())].into());

        assert_eq!(query.scope(), Scope::Namespace("prod".to_string()));
        assert_eq!(query.selector.to_string(), "app=web,tier=front");
        assert!(query.deadline.is_none());
        assert_eq!(Query::all().scope(), Scope::All);
    }
}
