//! Collecting resolved URLs into a discovery result.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;

use crate::url::{MalformedUrl, ResolvedUrl};

/// A per-entry condition that kept a URL out of the result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Issue {
    /// The resolved components did not form a valid URL.
    MalformedUrl {
        /// The originating service.
        service: String,
        /// What was wrong with the URL.
        error: MalformedUrl,
    },

    /// An unscoped lookup matched objects in several namespaces.
    Ambiguous {
        /// The originating service.
        service: String,
        /// Kind of object looked up, e.g. `Endpoints` or `Pod`.
        kind: &'static str,
        /// Name of the object looked up.
        name: String,
        /// Namespaces of the matching objects.
        namespaces: Vec<String>,
    },
}

impl Issue {
    /// The service the issue was raised for.
    #[must_use]
    pub fn service(&self) -> &str {
        match self {
            Self::MalformedUrl { service, .. } | Self::Ambiguous { service, .. } => service,
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedUrl { service, error } => {
                write!(f, "service {service}: malformed URL: {error}")
            }
            Self::Ambiguous {
                service,
                kind,
                name,
                namespaces,
            } => write!(
                f,
                "service {service}: {kind} {name} found in several namespaces ({})",
                namespaces.join(", ")
            ),
        }
    }
}

/// The URLs discovered by one call, keyed by service name.
///
/// A service may map to several URLs, one per port or address. URLs keep
/// their emission order and are not deduplicated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiscoveryResult {
    entries: BTreeMap<String, Vec<ResolvedUrl>>,
    issues: Vec<Issue>,
    partial: bool,
}

impl DiscoveryResult {
    /// URLs discovered for `service`; empty if there are none.
    #[must_use]
    pub fn get(&self, service: &str) -> &[ResolvedUrl] {
        self.entries.get(service).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns whether any URL was discovered for `service`.
    #[must_use]
    pub fn contains(&self, service: &str) -> bool {
        self.entries.contains_key(service)
    }

    /// Iterates services and their URLs, ordered by service name.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Vec<ResolvedUrl>> {
        self.entries.iter()
    }

    /// Iterates every `(service, url)` pair.
    pub fn urls(&self) -> impl Iterator<Item = (&str, &ResolvedUrl)> {
        self.entries
            .iter()
            .flat_map(|(name, urls)| urls.iter().map(move |url| (name.as_str(), url)))
    }

    /// Number of services with at least one URL.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether no URL was discovered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Conditions that kept entries out of the result.
    #[must_use]
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// Returns whether the call's deadline expired before resolution finished.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    /// Consumes the result, returning the service-to-URLs mapping.
    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, Vec<ResolvedUrl>> {
        self.entries
    }
}

impl<'a> IntoIterator for &'a DiscoveryResult {
    type Item = (&'a String, &'a Vec<ResolvedUrl>);
    type IntoIter = btree_map::Iter<'a, String, Vec<ResolvedUrl>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Accumulates the output of a single discovery call.
///
/// Each call owns its aggregator; nothing is shared between calls.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    result: DiscoveryResult,
}

impl ResultAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all accumulated state.
    pub fn begin(&mut self) {
        self.result = DiscoveryResult::default();
    }

    /// Records a URL for `service`.
    pub fn add(&mut self, service: &str, url: ResolvedUrl) {
        tracing::debug!("discovered {service}: {url}");
        self.result
            .entries
            .entry(service.to_string())
            .or_default()
            .push(url);
    }

    /// Records a condition that kept an entry out of the result.
    pub fn report(&mut self, issue: Issue) {
        tracing::warn!("{issue}");
        self.result.issues.push(issue);
    }

    /// Flags the result as incomplete.
    pub fn mark_partial(&mut self) {
        self.result.partial = true;
    }

    /// Returns a copy of the accumulated result.
    #[must_use]
    pub fn snapshot(&self) -> DiscoveryResult {
        self.result.clone()
    }

    /// Consumes the aggregator, returning the accumulated result.
    #[must_use]
    pub fn finish(self) -> DiscoveryResult {
        self.result
    }
}
