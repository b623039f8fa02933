//! Node identity: the `name@host:port` identifier of a cluster member.
//!
//! A [`NodeId`] is stored in canonical form (host lowercased, IPv6 brackets
//! preserved), so equality and ordering are plain string semantics on the
//! canonical rendering. Parsing validates every component up front; an
//! invalid identifier never becomes a `NodeId` value.

// Layer 1: Standard library imports
use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

// Layer 2: Third-party crate imports
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// Layer 3: Internal module imports
use super::error::ClusterError;

/// Maximum length of the name component.
const MAX_NAME_LEN: usize = 64;

/// Canonical node identifier: `name@host:port`.
///
/// - `name` starts with a letter and uses `[A-Za-z0-9_-]`, at most 64 chars
/// - `host` is an IPv4 address, a bracketed IPv6 address, or a DNS name
/// - `port` is in `1..=65535`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    name: String,
    host: String,
    port: u16,
}

impl NodeId {
    /// Build a node id from components, validating and canonicalizing them.
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Result<Self, ClusterError> {
        let name = name.into();
        let host = host.into();
        let input = format!("{name}@{host}:{port}");

        validate_name(&name).map_err(|reason| ClusterError::InvalidNodeId {
            input: input.clone(),
            reason,
        })?;
        let host = canonicalize_host(&host).map_err(|reason| ClusterError::InvalidNodeId {
            input: input.clone(),
            reason,
        })?;
        if port == 0 {
            return Err(ClusterError::InvalidNodeId {
                input,
                reason: "port must be in 1..=65535".into(),
            });
        }

        Ok(Self { name, host, port })
    }

    /// The name component.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The canonical host component (brackets stripped for IPv6).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port component.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The `host:port` dial address for this node.
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Replace the port, e.g. after binding to an OS-assigned port.
    pub(crate) fn with_port(&self, port: u16) -> Self {
        Self {
            name: self.name.clone(),
            host: self.host.clone(),
            port,
        }
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}@[{}]:{}", self.name, self.host, self.port)
        } else {
            write!(f, "{}@{}:{}", self.name, self.host, self.port)
        }
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeId {
    /// Lexicographic order of the canonical string, so tie-breaks agree on
    /// every node regardless of how the id was constructed.
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl FromStr for NodeId {
    type Err = ClusterError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let err = |reason: &str| ClusterError::InvalidNodeId {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let at = input.find('@').ok_or_else(|| err("missing '@' separator"))?;
        let name = &input[..at];
        let host_port = &input[at + 1..];

        let (host, port_str) = if let Some(rest) = host_port.strip_prefix('[') {
            // Bracketed IPv6: name@[::1]:4369
            let close = rest.find(']').ok_or_else(|| err("unterminated '[' in host"))?;
            let host = &rest[..close];
            let tail = &rest[close + 1..];
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| err("missing ':port' after host"))?;
            (host, port)
        } else {
            let colon = host_port
                .rfind(':')
                .ok_or_else(|| err("missing ':port' after host"))?;
            (&host_port[..colon], &host_port[colon + 1..])
        };

        let port: u16 = port_str.parse().map_err(|_| err("invalid port"))?;
        Self::new(name, host, port)
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("empty name".into());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(format!("name longer than {MAX_NAME_LEN} chars"));
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap_or('0');
    if !first.is_ascii_alphabetic() {
        return Err("name must start with a letter".into());
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err("name may only contain [A-Za-z0-9_-]".into());
    }
    Ok(())
}

/// Canonicalize a host: IPv4 and IPv6 are normalized by the std parsers,
/// DNS names are lowercased. Surrounding IPv6 brackets are accepted and
/// stripped (they are re-added on display).
fn canonicalize_host(host: &str) -> Result<String, String> {
    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if bare.is_empty() {
        return Err("empty host".into());
    }
    if let Ok(v4) = bare.parse::<Ipv4Addr>() {
        return Ok(v4.to_string());
    }
    if let Ok(v6) = bare.parse::<Ipv6Addr>() {
        return Ok(v6.to_string());
    }
    // DNS name: letters, digits, hyphens and dot-separated labels.
    let lowered = bare.to_ascii_lowercase();
    let valid = lowered.split('.').all(|label| {
        !label.is_empty()
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    });
    if !valid {
        return Err(format!("invalid host '{host}'"));
    }
    Ok(lowered)
}
