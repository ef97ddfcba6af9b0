//! Peer descriptor parsing and DNS resolution.
//!
//! Peers are declared as `host[:port]` tokens. Resolution goes through the
//! system resolver (which returns both A and AAAA records) under a bounded
//! constant-interval retry budget, because peers in freshly scheduled
//! containers routinely have no DNS records for the first seconds of their
//! life. IPv6 literals never carry brackets once resolved.

use crate::config::DiscoverySettings;
use crate::error::{CorralError, Result};
use crate::protocol::AdminChannel;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use tokio::net::lookup_host;

/// A configured peer: the raw token plus its parsed host and port.
///
/// Recomputed on every orchestration run; only the raw token is ever
/// persisted (as the key of the identity map).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    /// The token as configured, used as the stable identity-map key.
    pub raw: String,
    /// Host name or address literal, brackets stripped.
    pub host: String,
    /// Port; the cluster data port when the token omitted one.
    pub port: u16,
}

impl NodeDescriptor {
    /// Parse a `host[:port]` token. IPv6 literals may be bracketed
    /// (`[::1]:6379`) or bare (`::1`, which cannot carry a port).
    pub fn parse(token: &str, default_port: u16) -> Result<Self> {
        let raw = token.trim().to_string();
        if raw.is_empty() {
            return Err(CorralError::Validation {
                field: "peer".into(),
                reason: "empty descriptor".into(),
            });
        }

        let (host, port) = if let Some(rest) = raw.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or_else(|| CorralError::Validation {
                field: "peer".into(),
                reason: format!("unterminated bracket in {:?}", raw),
            })?;
            let port = match after.strip_prefix(':') {
                Some(p) => parse_port(&raw, p)?,
                None if after.is_empty() => default_port,
                None => {
                    return Err(CorralError::Validation {
                        field: "peer".into(),
                        reason: format!("trailing garbage in {:?}", raw),
                    })
                }
            };
            (host.to_string(), port)
        } else if raw.matches(':').count() > 1 {
            // Bare IPv6 literal; no port position exists.
            (raw.clone(), default_port)
        } else if let Some((host, port)) = raw.split_once(':') {
            (host.to_string(), parse_port(&raw, port)?)
        } else {
            (raw.clone(), default_port)
        };

        if host.is_empty() {
            return Err(CorralError::Validation {
                field: "peer".into(),
                reason: format!("empty host in {:?}", raw),
            });
        }

        Ok(Self { raw, host, port })
    }
}

impl fmt::Display for NodeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn parse_port(raw: &str, port: &str) -> Result<u16> {
    port.parse().map_err(|_| CorralError::Validation {
        field: "peer".into(),
        reason: format!("invalid port in {:?}", raw),
    })
}

/// A resolved peer address. Displays as `ip:port` with no brackets, the
/// form the cluster-formation command consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSocket {
    /// Resolved address.
    pub ip: IpAddr,
    /// Port carried over from the descriptor.
    pub port: u16,
}

impl fmt::Display for ResolvedSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Resolves descriptors through the system resolver under a retry budget.
#[derive(Debug, Clone)]
pub struct PeerResolver {
    policy: RetryPolicy,
}

impl PeerResolver {
    /// Create a resolver with the given retry budget.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Resolve one descriptor. The first address the system resolver
    /// returns wins, v4 or v6.
    pub async fn resolve(&self, descriptor: &NodeDescriptor) -> Result<ResolvedSocket> {
        let host = descriptor.host.clone();
        let port = descriptor.port;

        self.policy
            .run(&descriptor.raw, || {
                let host = host.clone();
                async move {
                    let mut addrs =
                        lookup_host((host.as_str(), port)).await.map_err(|e| CorralError::Dns {
                            host: host.clone(),
                            reason: e.to_string(),
                        })?;
                    match addrs.next() {
                        Some(addr) => Ok(ResolvedSocket {
                            ip: addr.ip(),
                            port,
                        }),
                        None => Err(CorralError::Dns {
                            host: host.clone(),
                            reason: "no address records".into(),
                        }),
                    }
                }
            })
            .await
    }

    /// Resolve every descriptor in order, failing on the first peer whose
    /// budget exhausts.
    pub async fn resolve_all(&self, descriptors: &[NodeDescriptor]) -> Result<Vec<ResolvedSocket>> {
        let mut sockets = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let socket = self.resolve(descriptor).await?;
            tracing::debug!(peer = %descriptor.raw, resolved = %socket, "peer resolved");
            sockets.push(socket);
        }
        Ok(sockets)
    }
}

/// Ask the discovery service for the active leader of the configured group
/// and return it as a descriptor, replacing the statically configured
/// upstream. Runs before the normal resolve path.
pub async fn discover_leader(
    channel: &AdminChannel,
    discovery: &DiscoverySettings,
    default_port: u16,
) -> Result<NodeDescriptor> {
    let endpoint = NodeDescriptor::parse(
        &format!("{}:{}", discovery.host, discovery.port),
        discovery.port,
    )?;
    let (host, port) = channel.leader_for(&endpoint, &discovery.group).await?;
    tracing::info!(
        group = %discovery.group,
        leader = %format!("{}:{}", host, port),
        "discovery service answered"
    );
    NodeDescriptor::parse(&format!("{}:{}", host, port), default_port)
}
