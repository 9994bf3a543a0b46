//! Application protocols recognized on declared service ports.
//!
//! Kubernetes only records the transport (`TCP`, `UDP`, `SCTP`) of a service port.
//! The application protocol is taken from the port *name* instead, and only a
//! fixed set of names is considered discoverable.

use std::fmt;

/// A discoverable application protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Plain HTTP.
    Http,
    /// HTTP over TLS.
    Https,
    /// File transfer protocol.
    Ftp,
    /// Domain name system.
    Dns,
    /// Internet relay chat.
    Irc,
}

impl Protocol {
    /// Every recognized protocol, in whitelist order.
    pub const ALL: [Protocol; 5] = [
        Protocol::Http,
        Protocol::Https,
        Protocol::Ftp,
        Protocol::Dns,
        Protocol::Irc,
    ];

    /// Returns the URL scheme for this protocol.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Ftp => "ftp",
            Protocol::Dns => "dns",
            Protocol::Irc => "irc",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a declared port name.
///
/// Matching is case-sensitive: `"http"` is recognized, `"HTTP"` is not.
/// Unnamed ports and unrecognized names yield `None`.
#[must_use]
pub fn classify(label: Option<&str>) -> Option<Protocol> {
    let label = label?;
    Protocol::ALL.into_iter().find(|p| p.as_str() == label)
}
