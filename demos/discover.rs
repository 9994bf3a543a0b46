//! Lists service URLs discovered in a Kubernetes cluster.
//!
//! # Environment Variables
//!
//! - `DISCOVERY_MODE`: exposure type to resolve (default: `LoadBalancer`)
//! - `CONTROL_PLANE`: API server URL (default: in-cluster or kubeconfig)
//! - `SERVICE_NAMESPACE`: namespace to list (default: all namespaces)
//! - `SERVICE_SELECTOR`: label selector, e.g. `app=web,tier=front`
//! - `DEADLINE_MS`: milliseconds allowed for the call (default: no deadline)
//! - `SNAPSHOT`: set to `1` to capture the namespace in three list calls and
//!   resolve against that capture instead of the live API

use std::env;
use std::time::Duration;

use kube_service_urls::{
    DiscoveryConfig, DiscoveryEngine, DiscoveryProvider, DiscoveryResult, ExposureType,
    KubeClusterState, Query,
};
use tracing::{Level, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    let mode: ExposureType = match env::var("DISCOVERY_MODE") {
        Ok(mode) => mode.parse()?,
        Err(_) => ExposureType::LoadBalancer,
    };

    let mut config = DiscoveryConfig::new(mode);
    if let Ok(endpoint) = env::var("CONTROL_PLANE") {
        config = config.control_plane(endpoint);
    }

    let mut query = Query::all();
    if let Ok(ns) = env::var("SERVICE_NAMESPACE") {
        query = query.namespace(ns);
    }

    if let Ok(selector) = env::var("SERVICE_SELECTOR") {
        for pair in selector.split(',').filter(|p| !p.is_empty()) {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            query = query.label(k.trim(), v.trim());
        }
    }

    if let Some(ms) = env::var("DEADLINE_MS").ok().and_then(|d| d.parse().ok()) {
        query = query.timeout(Duration::from_millis(ms));
    }

    info!("Discovering {mode} services");

    let result: DiscoveryResult = if env::var("SNAPSHOT").is_ok_and(|v| v == "1") {
        let live = match config.control_plane.as_deref() {
            Some(endpoint) => KubeClusterState::from_endpoint(endpoint)?,
            None => KubeClusterState::try_default().await?,
        };
        let snapshot = live.snapshot(&query.scope()).await?;
        info!("Captured cluster snapshot");
        DiscoveryEngine::new(snapshot, config).discover(&query).await?
    } else {
        DiscoveryEngine::connect(config).await?.discover(&query).await?
    };

    for (service, urls) in &result {
        for url in urls {
            info!("{service}: {url}");
        }
    }

    for issue in result.issues() {
        warn!("{issue}");
    }

    if result.is_partial() {
        warn!("Deadline expired; result is partial");
    }

    info!("Total services: {}", result.len());

    Ok(())
}
