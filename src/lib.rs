#![deny(missing_docs)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Kubernetes service discovery into concrete protocol URLs.
//!
//! Kubernetes describes how a service is reachable through its exposure type:
//! a cluster-internal address, a port opened on every node, a provisioned load
//! balancer, a DNS alias, or administrator-assigned external addresses. This
//! crate reads a snapshot of services (and, for node ports, their endpoints and
//! pods) and turns one chosen exposure type into `scheme://host[:port]` URLs
//! that a monitoring system or client can connect to.
//!
//! # Features
//!
//! - **One exposure type per engine**: `ClusterIP`, `NodePort`, `LoadBalancer`,
//!   `ExternalName` or `ExternalIP`, fixed at construction
//! - **Protocol whitelist**: port-based types only expose ports named `http`,
//!   `https`, `ftp`, `dns` or `irc`
//! - **Node-port traversal**: service → endpoints → pod → host address
//! - **Degrades, never guesses**: lookup misses drop the entry, malformed URLs
//!   and ambiguous unscoped lookups are reported as [`Issue`]s
//! - **Deadlines**: a per-call deadline returns the entries found so far,
//!   flagged as partial
//!
//! # Usage
//!
//! ```ignore
//! use std::time::Duration;
//! use kube_service_urls::{DiscoveryConfig, DiscoveryEngine, DiscoveryProvider, ExposureType, Query};
//!
//! let config = DiscoveryConfig::new(ExposureType::NodePort);
//! let engine = DiscoveryEngine::connect(config).await?;
//!
//! let result = engine
//!     .discover(&Query::all().namespace("prod").timeout(Duration::from_secs(10)))
//!     .await?;
//!
//! for (service, urls) in &result {
//!     for url in urls {
//!         println!("{service}: {url}");
//!     }
//! }
//! ```

mod aggregate;
mod client;
mod config;
mod engine;
mod error;
mod model;
mod protocol;
mod resolver;
mod url;

pub use aggregate::{DiscoveryResult, Issue, ResultAggregator};
pub use client::{
    ClusterStateClient, KubeClusterState, LabelSelector, Lookup, Scope, SnapshotClusterState,
};
pub use config::{DEFAULT_PROTOCOL, DiscoveryConfig};
pub use engine::{DiscoveryEngine, DiscoveryProvider, Query};
pub use error::{BoxError, Error, Result};
pub use model::{
    EndpointAddress, EndpointRecord, EndpointSubset, ExposureType, Service, ServicePort,
    UnknownExposureType, WorkloadInstance,
};
pub use protocol::{Protocol, classify};
pub use url::{MalformedUrl, ResolvedUrl};
