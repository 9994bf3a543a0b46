//! Resolved service URLs.

use std::fmt;
use std::net::Ipv6Addr;

/// Reasons a URL could not be built from a resolved protocol, host and port.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MalformedUrl {
    /// The scheme is empty.
    #[error("empty scheme")]
    EmptyScheme,

    /// The scheme contains characters not allowed in a URL scheme.
    #[error("invalid scheme {0:?}")]
    InvalidScheme(String),

    /// The host is empty.
    #[error("empty host")]
    EmptyHost,

    /// The host contains whitespace or URL delimiters.
    #[error("invalid host {0:?}")]
    InvalidHost(String),

    /// The port is outside `1..=65535`.
    #[error("port {0} out of range")]
    PortOutOfRange(i32),
}

/// A concrete `scheme://host[:port]` URL with an empty path.
///
/// Equality compares scheme, host and port.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolvedUrl {
    scheme: String,
    host: String,
    port: Option<u16>,
}

impl ResolvedUrl {
    /// Builds a URL, validating each component.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedUrl`] if the scheme or host is empty or contains
    /// characters that cannot appear in that position, or if the port does not
    /// fit in `1..=65535`.
    pub fn new(
        scheme: impl Into<String>,
        host: impl Into<String>,
        port: Option<i32>,
    ) -> Result<Self, MalformedUrl> {
        let scheme = scheme.into();
        let host = host.into();

        let mut chars = scheme.chars();
        match chars.next() {
            None => return Err(MalformedUrl::EmptyScheme),
            Some(c) if !c.is_ascii_alphabetic() => return Err(MalformedUrl::InvalidScheme(scheme)),
            Some(_) => {}
        }

        if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
            return Err(MalformedUrl::InvalidScheme(scheme));
        }

        validate_host(&host)?;

        let port = match port {
            None => None,
            Some(p) => match u16::try_from(p) {
                Ok(p) if p != 0 => Some(p),
                _ => return Err(MalformedUrl::PortOutOfRange(p)),
            },
        };

        Ok(Self { scheme, host, port })
    }

    /// The URL scheme, e.g. `http`.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The host name or address, without brackets.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The explicit port, if any.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// The path, which is always empty.
    #[must_use]
    pub fn path(&self) -> &str {
        ""
    }
}

/// Checks that `host` can stand as the host of a URL.
///
/// # Errors
///
/// Returns [`MalformedUrl`] if `host` is empty or contains whitespace or URL delimiters.
pub(crate) fn validate_host(host: &str) -> Result<(), MalformedUrl> {
    if host.is_empty() {
        return Err(MalformedUrl::EmptyHost);
    }

    if host
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '@'))
    {
        return Err(MalformedUrl::InvalidHost(host.to_string()));
    }

    Ok(())
}

impl fmt::Display for ResolvedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            write!(f, "{}://[{}]", self.scheme, self.host)?;
        } else {
            write!(f, "{}://{}", self.scheme, self.host)?;
        }

        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }

        Ok(())
    }
}
