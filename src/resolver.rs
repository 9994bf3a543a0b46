//! Per-exposure-type URL resolution.
//!
//! Exactly one strategy runs per call, chosen by [`DiscoveryConfig::mode`]:
//!
//! | Mode           | Host                         | Port                | Scheme             |
//! |----------------|------------------------------|---------------------|--------------------|
//! | `ClusterIP`    | service cluster IP           | declared port       | port name          |
//! | `NodePort`     | host IP of a backing pod     | node port           | port name          |
//! | `LoadBalancer` | each published ingress       | none                | configured default |
//! | `ExternalName` | the external name            | none                | configured default |
//! | `ExternalIP`   | each external IP             | none                | `http`             |
//!
//! Port-based modes only consider ports whose name classifies as a supported
//! [`Protocol`](crate::Protocol).

use std::future::Future;

use tokio::time::Instant;

use crate::aggregate::{Issue, ResultAggregator};
use crate::client::{ClusterStateClient, Lookup, Scope};
use crate::config::{DEFAULT_PROTOCOL, DiscoveryConfig};
use crate::error::Result;
use crate::model::{EndpointRecord, ExposureType, Service};
use crate::protocol::classify;
use crate::url::{self, MalformedUrl, ResolvedUrl};

/// Where the backing-pod walk of a `NodePort` service ended.
#[derive(Debug, PartialEq, Eq)]
enum Backing {
    /// The first usable pod host address.
    Host(String),
    /// No endpoint record, no addresses, or no usable pod.
    NotFound,
    /// The call deadline passed mid-walk.
    Expired,
}

/// Resolves one call's service snapshot into URLs.
pub(crate) struct Resolver<'a, C: ?Sized> {
    client: &'a C,
    config: &'a DiscoveryConfig,
    scope: &'a Scope,
    deadline: Option<Instant>,
}

impl<'a, C> Resolver<'a, C>
where
    C: ClusterStateClient + ?Sized,
{
    pub(crate) fn new(
        client: &'a C,
        config: &'a DiscoveryConfig,
        scope: &'a Scope,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            client,
            config,
            scope,
            deadline,
        }
    }

    /// Runs a client query, giving up with `None` once the deadline passes.
    pub(crate) async fn bounded<T>(
        &self,
        query: impl Future<Output = Result<T>>,
    ) -> Result<Option<T>> {
        match self.deadline {
            None => query.await.map(Some),
            Some(deadline) => match tokio::time::timeout_at(deadline, query).await {
                Ok(result) => result.map(Some),
                Err(_) => Ok(None),
            },
        }
    }

    /// Resolves every service matching the configured mode into `agg`.
    ///
    /// Stops early and marks the result partial if the deadline passes.
    pub(crate) async fn resolve(
        &self,
        services: &[Service],
        agg: &mut ResultAggregator,
    ) -> Result<()> {
        let mode = self.config.mode;

        for service in services.iter().filter(|s| selects(mode, s)) {
            match mode {
                ExposureType::ClusterIp => cluster_ip(service, agg),
                ExposureType::LoadBalancer => {
                    load_balancer(service, &self.config.load_balancer_protocol, agg);
                }
                ExposureType::ExternalName => {
                    external_name(service, &self.config.external_name_protocol, agg);
                }
                ExposureType::ExternalIp => external_ip(service, agg),
                ExposureType::NodePort => {
                    if !self.node_port(service, agg).await? {
                        tracing::warn!(
                            "discovery deadline expired at service {}; result is partial",
                            service.name
                        );
                        agg.mark_partial();
                        return Ok(());
                    }
                }
            }
        }

        Ok(())
    }

    /// Emits one URL per supported port, all on the first usable backing host.
    ///
    /// Returns `false` if the deadline expired.
    async fn node_port(&self, service: &Service, agg: &mut ResultAggregator) -> Result<bool> {
        let ports: Vec<_> = service
            .ports
            .iter()
            .filter_map(|port| {
                let protocol = classify(port.name.as_deref())?;
                if port.node_port.is_none() {
                    tracing::debug!(
                        "service {} port {} has no node port allocated",
                        service.name,
                        port.port
                    );
                }
                port.node_port.map(|node_port| (protocol, node_port))
            })
            .collect();

        if ports.is_empty() {
            return Ok(true);
        }

        let host = match self.backing_host(service, agg).await? {
            Backing::Host(host) => host,
            Backing::NotFound => {
                tracing::debug!("no backing host for node port service {}", service.name);
                return Ok(true);
            }
            Backing::Expired => return Ok(false),
        };

        for (protocol, node_port) in ports {
            emit(
                agg,
                &service.name,
                ResolvedUrl::new(protocol.as_str(), host.as_str(), Some(node_port)),
            );
        }

        Ok(true)
    }

    /// Walks endpoint addresses in order and returns the first pod host address.
    ///
    /// A subset without addresses ends the walk. Pods that are missing, have no
    /// host address yet, or are ambiguous are skipped.
    async fn backing_host(&self, service: &Service, agg: &mut ResultAggregator) -> Result<Backing> {
        let scope = service
            .namespace
            .as_deref()
            .map_or_else(|| self.scope.clone(), |ns| Scope::Namespace(ns.to_string()));

        let Some(found) = self
            .bounded(self.client.get_endpoint_record(&scope, &service.name))
            .await?
        else {
            return Ok(Backing::Expired);
        };

        let record = match found {
            Lookup::Found(record) => record,
            Lookup::NotFound => {
                tracing::debug!("no endpoints for service {}", service.name);
                return Ok(Backing::NotFound);
            }
            Lookup::Ambiguous { namespaces } => {
                agg.report(Issue::Ambiguous {
                    service: service.name.clone(),
                    kind: "Endpoints",
                    name: service.name.clone(),
                    namespaces,
                });
                return Ok(Backing::NotFound);
            }
        };

        if record.subsets.is_empty() {
            return Ok(Backing::NotFound);
        }

        for subset in &record.subsets {
            if subset.addresses.is_empty() {
                return Ok(Backing::NotFound);
            }

            for address in &subset.addresses {
                let Some(target) = address.target.as_deref() else {
                    tracing::debug!("endpoint address {} has no target pod", address.ip);
                    continue;
                };

                let instance_scope = instance_scope(&record, address.target_namespace.as_deref())
                    .unwrap_or_else(|| scope.clone());

                let Some(found) = self
                    .bounded(self.client.get_workload_instance(&instance_scope, target))
                    .await?
                else {
                    return Ok(Backing::Expired);
                };

                match found {
                    Lookup::Found(instance) => match instance.host_ip {
                        Some(host) if url::validate_host(&host).is_ok() => {
                            tracing::debug!(
                                "service {} backed by pod {target} on {host}",
                                service.name
                            );
                            return Ok(Backing::Host(host));
                        }
                        _ => tracing::debug!("pod {target} has no usable host address"),
                    },
                    Lookup::NotFound => tracing::debug!("pod {target} not found"),
                    Lookup::Ambiguous { namespaces } => agg.report(Issue::Ambiguous {
                        service: service.name.clone(),
                        kind: "Pod",
                        name: target.to_string(),
                        namespaces,
                    }),
                }
            }
        }

        Ok(Backing::NotFound)
    }
}

/// Returns whether `service` is handled by the `mode` strategy.
fn selects(mode: ExposureType, service: &Service) -> bool {
    match mode {
        ExposureType::ExternalIp => !service.external_ips.is_empty(),
        _ => service.exposure == Some(mode),
    }
}

/// Namespace to look a backing pod up in: the address's own reference, then the record's.
fn instance_scope(record: &EndpointRecord, target_namespace: Option<&str>) -> Option<Scope> {
    target_namespace
        .or(record.namespace.as_deref())
        .map(|ns| Scope::Namespace(ns.to_string()))
}

fn emit(agg: &mut ResultAggregator, service: &str, url: Result<ResolvedUrl, MalformedUrl>) {
    match url {
        Ok(url) => agg.add(service, url),
        Err(error) => agg.report(Issue::MalformedUrl {
            service: service.to_string(),
            error,
        }),
    }
}

fn cluster_ip(service: &Service, agg: &mut ResultAggregator) {
    let Some(address) = service.cluster_ip.as_deref() else {
        tracing::debug!("service {} is headless", service.name);
        return;
    };

    for port in &service.ports {
        if let Some(protocol) = classify(port.name.as_deref()) {
            emit(
                agg,
                &service.name,
                ResolvedUrl::new(protocol.as_str(), address, Some(port.port)),
            );
        }
    }
}

fn load_balancer(service: &Service, scheme: &str, agg: &mut ResultAggregator) {
    if service.ingress.is_empty() {
        tracing::debug!("load balancer for {} not provisioned yet", service.name);
    }

    for ingress in &service.ingress {
        emit(
            agg,
            &service.name,
            ResolvedUrl::new(scheme, ingress.as_str(), None),
        );
    }
}

fn external_name(service: &Service, scheme: &str, agg: &mut ResultAggregator) {
    let name = service.external_name.as_deref().unwrap_or_default();
    emit(agg, &service.name, ResolvedUrl::new(scheme, name, None));
}

// External IPs are administrator-assigned and carry no protocol metadata.
fn external_ip(service: &Service, agg: &mut ResultAggregator) {
    for ip in &service.external_ips {
        emit(
            agg,
            &service.name,
            ResolvedUrl::new(DEFAULT_PROTOCOL, ip.as_str(), None),
        );
    }
}
