//! Read-only queries against the cluster.
//!
//! [`ClusterStateClient`] is the only blocking seam of discovery. The live
//! implementation, [`KubeClusterState`], issues one API request per query;
//! [`SnapshotClusterState`] answers from objects captured up front, so every
//! read during a call sees the same state.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::{Endpoints, Pod, Service as CoreService};
use kube::api::ListParams;
use kube::{Api, Client, Config, Resource};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::model::{EndpointRecord, Service, WorkloadInstance};

/// The namespace scope of a query.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Every namespace.
    #[default]
    All,
    /// A single namespace.
    Namespace(String),
}

impl Scope {
    /// Scope of an object whose namespace may be unknown.
    #[must_use]
    pub fn from_namespace(namespace: Option<&str>) -> Self {
        namespace.map_or(Self::All, |ns| Self::Namespace(ns.to_string()))
    }

    /// Returns whether an object in `namespace` falls within this scope.
    #[must_use]
    pub fn contains(&self, namespace: Option<&str>) -> bool {
        match self {
            Self::All => true,
            Self::Namespace(ns) => namespace == Some(ns.as_str()),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Namespace(ns) => f.write_str(ns),
        }
    }
}

/// An equality-based label selector.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    /// Creates an empty selector, which matches everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a `key=value` requirement.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns whether the selector has no requirements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns whether `labels` satisfies every requirement.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|(k, v)| labels.get(k) == Some(v))
    }
}

/// Renders the selector in API query form, e.g. `app=web,tier=front`.
impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSelector {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl From<BTreeMap<String, String>> for LabelSelector {
    fn from(labels: BTreeMap<String, String>) -> Self {
        Self(labels)
    }
}

impl From<HashMap<String, String>> for LabelSelector {
    fn from(labels: HashMap<String, String>) -> Self {
        labels.into_iter().collect()
    }
}

/// Outcome of a by-name lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup<T> {
    /// Exactly one object matched.
    Found(T),
    /// Nothing matched.
    NotFound,
    /// An unscoped lookup matched objects in several namespaces.
    Ambiguous {
        /// Namespaces of the matching objects.
        namespaces: Vec<String>,
    },
}

impl<T> Lookup<T> {
    /// Classifies the matches of an unscoped lookup.
    #[must_use]
    pub fn from_matches(mut items: Vec<T>, namespace: impl Fn(&T) -> Option<String>) -> Self {
        match items.len() {
            0 => Self::NotFound,
            1 => Self::Found(items.remove(0)),
            _ => Self::Ambiguous {
                namespaces: items
                    .iter()
                    .map(|item| namespace(item).unwrap_or_default())
                    .collect(),
            },
        }
    }

    /// Maps the found value.
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Self::Found(v) => Lookup::Found(f(v)),
            Self::NotFound => Lookup::NotFound,
            Self::Ambiguous { namespaces } => Lookup::Ambiguous { namespaces },
        }
    }
}

/// Read-only queries discovery issues against the cluster.
///
/// Errors are connectivity failures only; absence is reported through
/// [`Lookup::NotFound`].
#[async_trait]
pub trait ClusterStateClient: Send + Sync {
    /// Lists services within `scope` whose labels match `selector`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connectivity`] if the query fails.
    async fn list_services(&self, scope: &Scope, selector: &LabelSelector) -> Result<Vec<Service>>;

    /// Fetches the endpoint record of the named service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connectivity`] if the query fails.
    async fn get_endpoint_record(&self, scope: &Scope, service: &str)
    -> Result<Lookup<EndpointRecord>>;

    /// Fetches the named workload instance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connectivity`] if the query fails.
    async fn get_workload_instance(
        &self,
        scope: &Scope,
        instance: &str,
    ) -> Result<Lookup<WorkloadInstance>>;
}

/// Live cluster state read through the Kubernetes API.
#[derive(Clone)]
pub struct KubeClusterState {
    client: Client,
}

impl KubeClusterState {
    /// Wraps an existing kube client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connects using the in-cluster environment or the local kubeconfig.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connectivity`] if no client configuration can be inferred.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await.map_err(Error::connectivity)?;
        Ok(Self::new(client))
    }

    /// Connects to an explicit control-plane URL, without credentials.
    ///
    /// An endpoint without a scheme, such as `10.0.0.1:6443`, is taken as `https`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] if `endpoint` is not a valid `http` or
    /// `https` URL or a client cannot be built for it.
    pub fn from_endpoint(endpoint: &str) -> Result<Self> {
        let uri = control_plane_uri(endpoint)?;
        let client = Client::try_from(Config::new(uri))
            .map_err(|e| Error::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        Ok(Self::new(client))
    }

    /// Captures services, endpoints and pods within `scope` in three list calls.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connectivity`] if any list call fails.
    pub async fn snapshot(&self, scope: &Scope) -> Result<SnapshotClusterState> {
        let lp = ListParams::default();
        let services = self.api::<CoreService>(scope).list(&lp).await;
        let endpoints = self.api::<Endpoints>(scope).list(&lp).await;
        let pods = self.api::<Pod>(scope).list(&lp).await;

        Ok(SnapshotClusterState {
            services: services
                .map_err(Error::connectivity)?
                .items
                .iter()
                .map(Service::from)
                .collect(),
            endpoints: endpoints
                .map_err(Error::connectivity)?
                .items
                .iter()
                .map(EndpointRecord::from)
                .collect(),
            instances: pods
                .map_err(Error::connectivity)?
                .items
                .iter()
                .map(WorkloadInstance::from)
                .collect(),
        })
    }

    fn api<K>(&self, scope: &Scope) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        match scope {
            Scope::All => Api::all(self.client.clone()),
            Scope::Namespace(ns) => Api::namespaced(self.client.clone(), ns),
        }
    }

    /// Looks up a namespaced object by name.
    ///
    /// Unscoped lookups list across all namespaces with a `metadata.name`
    /// field selector, since a get needs a namespace.
    async fn lookup<K>(&self, scope: &Scope, name: &str) -> Result<Lookup<K>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + fmt::Debug,
        K::DynamicType: Default,
    {
        let api = self.api::<K>(scope);

        if let Scope::Namespace(_) = scope {
            let found = api.get_opt(name).await.map_err(Error::connectivity)?;
            return Ok(found.map_or(Lookup::NotFound, Lookup::Found));
        }

        let lp = ListParams::default().fields(&format!("metadata.name={name}"));
        let items = api.list(&lp).await.map_err(Error::connectivity)?.items;
        Ok(Lookup::from_matches(items, |k| k.meta().namespace.clone()))
    }
}

/// Parses a control-plane endpoint into an absolute `http`/`https` URI.
fn control_plane_uri(endpoint: &str) -> Result<http::Uri> {
    let invalid = |reason: &dyn fmt::Display| Error::InvalidEndpoint(format!("{endpoint:?}: {reason}"));

    let endpoint = endpoint.trim();
    let uri = if endpoint.contains("://") {
        endpoint.parse::<http::Uri>()
    } else {
        format!("https://{endpoint}").parse::<http::Uri>()
    }
    .map_err(|e| invalid(&e))?;

    match uri.scheme_str() {
        Some("http" | "https") => {}
        Some(other) => return Err(invalid(&format!("unsupported scheme {other}"))),
        None => return Err(invalid(&"missing scheme")),
    }

    match uri.authority() {
        Some(authority) if !authority.host().is_empty() => Ok(uri),
        _ => Err(invalid(&"missing host")),
    }
}

impl fmt::Debug for KubeClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeClusterState")
            .field("default_namespace", &self.client.default_namespace())
            .finish()
    }
}

#[async_trait]
impl ClusterStateClient for KubeClusterState {
    async fn list_services(&self, scope: &Scope, selector: &LabelSelector) -> Result<Vec<Service>> {
        let mut lp = ListParams::default();
        if !selector.is_empty() {
            lp = lp.labels(&selector.to_string());
        }

        let list = self
            .api::<CoreService>(scope)
            .list(&lp)
            .await
            .map_err(Error::connectivity)?;

        tracing::debug!("listed {} services in {scope}", list.items.len());
        Ok(list.items.iter().map(Service::from).collect())
    }

    async fn get_endpoint_record(
        &self,
        scope: &Scope,
        service: &str,
    ) -> Result<Lookup<EndpointRecord>> {
        let found = self.lookup::<Endpoints>(scope, service).await?;
        Ok(found.map(|ep| EndpointRecord::from(&ep)))
    }

    async fn get_workload_instance(
        &self,
        scope: &Scope,
        instance: &str,
    ) -> Result<Lookup<WorkloadInstance>> {
        let found = self.lookup::<Pod>(scope, instance).await?;
        Ok(found.map(|pod| WorkloadInstance::from(&pod)))
    }
}

/// Cluster state held in memory.
///
/// Immutable once built, so it can be shared between concurrent discovery
/// calls and every call reads a consistent state.
#[derive(Clone, Debug, Default)]
pub struct SnapshotClusterState {
    services: Vec<Service>,
    endpoints: Vec<EndpointRecord>,
    instances: Vec<WorkloadInstance>,
}

impl SnapshotClusterState {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<Service>) -> Self {
        self.services.push(service.into());
        self
    }

    /// Adds an endpoint record.
    #[must_use]
    pub fn with_endpoints(mut self, record: impl Into<EndpointRecord>) -> Self {
        self.endpoints.push(record.into());
        self
    }

    /// Adds a workload instance.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<WorkloadInstance>) -> Self {
        self.instances.push(instance.into());
        self
    }
}

fn find_named<T: Clone>(
    items: &[T],
    scope: &Scope,
    name: &str,
    key: impl Fn(&T) -> (&str, Option<&str>),
) -> Lookup<T> {
    let matches = items
        .iter()
        .filter(|item| {
            let (n, ns) = key(item);
            n == name && scope.contains(ns)
        })
        .cloned()
        .collect();

    Lookup::from_matches(matches, |item| key(item).1.map(String::from))
}

#[async_trait]
impl ClusterStateClient for SnapshotClusterState {
    async fn list_services(&self, scope: &Scope, selector: &LabelSelector) -> Result<Vec<Service>> {
        Ok(self
            .services
            .iter()
            .filter(|s| scope.contains(s.namespace.as_deref()) && selector.matches(&s.labels))
            .cloned()
            .collect())
    }

    async fn get_endpoint_record(
        &self,
        scope: &Scope,
        service: &str,
    ) -> Result<Lookup<EndpointRecord>> {
        Ok(find_named(&self.endpoints, scope, service, |r| {
            (r.name.as_str(), r.namespace.as_deref())
        }))
    }

    async fn get_workload_instance(
        &self,
        scope: &Scope,
        instance: &str,
    ) -> Result<Lookup<WorkloadInstance>> {
        Ok(find_named(&self.instances, scope, instance, |i| {
            (i.name.as_str(), i.namespace.as_deref())
        }))
    }
}
