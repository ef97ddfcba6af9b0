//! Node identity remapping across IP churn.
//!
//! The store's identity file records node IDs against addresses. When a
//! container restarts with a new IP, the records still carry the old one
//! and the node would rejoin the cluster as a stranger. The remapper keeps
//! a persisted descriptor→IP map next to the cluster data; whenever a
//! peer's freshly resolved address differs from the recorded one, every
//! occurrence of the old IP in the identity file is rewritten to the new
//! one and the map is updated. The identity file is replaced atomically
//! (temp file in the same directory, then rename) so an interrupted run
//! never leaves a half-rewritten file.

use crate::error::{CorralError, Result};
use crate::resolve::{NodeDescriptor, PeerResolver};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Current on-disk format version of the address map.
pub const MAP_VERSION: u32 = 1;

/// Persisted descriptor→IP map. Exactly one entry per raw descriptor,
/// updated in place on churn, never deleted automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityMap {
    /// On-disk format version.
    pub version: u32,
    /// When the map was last written.
    pub written_at: DateTime<Utc>,
    /// Raw descriptor → last-known resolved IP.
    pub addresses: BTreeMap<String, IpAddr>,
}

impl IdentityMap {
    /// Build a fresh map from resolved addresses.
    pub fn new(addresses: BTreeMap<String, IpAddr>) -> Self {
        Self {
            version: MAP_VERSION,
            written_at: Utc::now(),
            addresses,
        }
    }

    /// Load the map, if one has been written. An unknown format version
    /// is treated as absent rather than guessed at.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CorralError::file(path, e)),
        };
        let map: Self = serde_json::from_str(&content)?;
        if map.version != MAP_VERSION {
            warn!(
                found = map.version,
                expected = MAP_VERSION,
                "address map version mismatch; rebuilding"
            );
            return Ok(None);
        }
        Ok(Some(map))
    }

    /// Persist the map atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut content = serde_json::to_string_pretty(self)?;
        content.push('\n');
        write_atomic(path, &content)
    }
}

/// Write `content` to `path` via a temp file in the same directory and a
/// rename over the original.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        CorralError::Internal(format!("{} has no parent directory", path.display()))
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| CorralError::file(dir, e))?;
    tmp.write_all(content.as_bytes())
        .map_err(|e| CorralError::file(path, e))?;
    tmp.persist(path).map_err(|e| CorralError::file(path, e.error))?;
    Ok(())
}

/// Is `c` a character that could extend an address literal of this family?
fn is_addr_char(c: char, v6: bool) -> bool {
    if v6 {
        c.is_ascii_hexdigit() || c == ':' || c == '.'
    } else {
        c.is_ascii_digit() || c == '.'
    }
}

/// Replace whole-address occurrences of `old` with `new`, skipping matches
/// embedded in a longer literal (`10.0.0.1` never rewrites inside
/// `10.0.0.11` or `110.0.0.1`). Returns the rewritten text and the number
/// of replacements.
pub fn rewrite_ip(content: &str, old: &IpAddr, new: &IpAddr) -> (String, usize) {
    let needle = old.to_string();
    let replacement = new.to_string();
    let v6 = old.is_ipv6();

    let mut result = String::with_capacity(content.len());
    let mut count = 0;
    let mut rest = content;

    while let Some(pos) = rest.find(&needle) {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + needle.len()..];

        let prev_extends = result.chars().last().map_or(false, |c| is_addr_char(c, v6));
        let next_extends = after.chars().next().map_or(false, |c| is_addr_char(c, v6));

        if prev_extends || next_extends {
            result.push_str(&needle);
        } else {
            result.push_str(&replacement);
            count += 1;
        }
        rest = after;
    }
    result.push_str(rest);
    (result, count)
}

/// Remaps identity-file addresses when peer IPs drift across restarts.
pub struct IdentityRemapper<'a> {
    resolver: &'a PeerResolver,
    peers: &'a [NodeDescriptor],
    map_path: PathBuf,
    identity_path: PathBuf,
}

impl<'a> IdentityRemapper<'a> {
    /// Create a remapper over the given peers and file locations.
    pub fn new(
        resolver: &'a PeerResolver,
        peers: &'a [NodeDescriptor],
        map_path: impl Into<PathBuf>,
        identity_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            resolver,
            peers,
            map_path: map_path.into(),
            identity_path: identity_path.into(),
        }
    }

    /// Resolve every peer and reconcile the identity file and map.
    pub async fn run(&self) -> Result<()> {
        let mut current = BTreeMap::new();
        for peer in self.peers {
            let socket = self.resolver.resolve(peer).await.map_err(|e| {
                CorralError::Bootstrap(format!("identity remap: peer {}: {}", peer.raw, e))
            })?;
            current.insert(peer.raw.clone(), socket.ip);
        }

        let previous = match IdentityMap::load(&self.map_path)? {
            Some(map) => map,
            None => {
                if self.identity_path.exists() {
                    warn!(
                        identity = %self.identity_path.display(),
                        "identity file exists without an address map; adopting current addresses"
                    );
                } else {
                    info!("first bootstrap; recording peer addresses");
                }
                IdentityMap::new(current.clone()).save(&self.map_path)?;
                return Ok(());
            }
        };

        let changed: Vec<(&String, IpAddr, IpAddr)> = current
            .iter()
            .filter_map(|(raw, new_ip)| {
                previous
                    .addresses
                    .get(raw)
                    .filter(|old_ip| *old_ip != new_ip)
                    .map(|old_ip| (raw, *old_ip, *new_ip))
            })
            .collect();

        let new_entries = current
            .keys()
            .any(|raw| !previous.addresses.contains_key(raw));

        if changed.is_empty() && !new_entries {
            debug!("peer addresses unchanged");
            return Ok(());
        }

        if !changed.is_empty() && self.identity_path.exists() {
            let mut content = std::fs::read_to_string(&self.identity_path)
                .map_err(|e| CorralError::file(&self.identity_path, e))?;
            for (raw, old_ip, new_ip) in &changed {
                let (rewritten, count) = rewrite_ip(&content, old_ip, new_ip);
                info!(
                    peer = %raw,
                    old = %old_ip,
                    new = %new_ip,
                    occurrences = count,
                    "remapping identity records"
                );
                content = rewritten;
            }
            write_atomic(&self.identity_path, &content)?;
        }

        IdentityMap::new(current).save(&self.map_path)
    }
}
