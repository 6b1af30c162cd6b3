//! Downstream server identity.
//!
//! Approval records are keyed by `(transport kind, locator)`. The locator is
//! the exact command line for stdio servers or the exact URL for SSE and
//! streamable-HTTP servers. Comparison is byte-exact: a server reached
//! through a different command string or URL is a different server, even if
//! it behaves identically. The host-side nickname for a server is never part
//! of the identity.

use serde::{Deserialize, Serialize};

/// Transport family used to reach a downstream server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Sse,
    Http,
}

/// Unique key for a downstream server in the approval store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub kind: TransportKind,
    pub locator: String,
}

impl ServerIdentity {
    /// Identity of a child-process server. `locator` is the full command
    /// line (command plus arguments, space-joined) used to launch it.
    pub fn stdio(command_line: impl Into<String>) -> Self {
        Self {
            kind: TransportKind::Stdio,
            locator: command_line.into(),
        }
    }

    /// Identity of an SSE server reached at the given URL.
    pub fn sse(url: impl Into<String>) -> Self {
        Self {
            kind: TransportKind::Sse,
            locator: url.into(),
        }
    }

    /// Identity of a streamable-HTTP server reached at the given URL.
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            kind: TransportKind::Http,
            locator: url.into(),
        }
    }
}

impl std::fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
            TransportKind::Http => "http",
        };
        write!(f, "{}:{}", kind, self.locator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_equality_is_byte_exact() {
        assert_eq!(ServerIdentity::stdio("echo hi"), ServerIdentity::stdio("echo hi"));
        assert_ne!(ServerIdentity::stdio("echo hi"), ServerIdentity::stdio("echo  hi"));
        assert_ne!(
            ServerIdentity::sse("http://localhost:3000"),
            ServerIdentity::http("http://localhost:3000")
        );
    }

    #[test]
    fn identity_serializes_with_lowercase_kind() {
        let json = serde_json::to_value(ServerIdentity::http("http://x/")).unwrap();
        assert_eq!(json["kind"], "http");
        assert_eq!(json["locator"], "http://x/");
    }
}
