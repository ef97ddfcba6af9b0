//! Configuration module for Corral.
//!
//! All intent reaches Corral through environment variables and is captured
//! once, at startup, into an immutable [`CorralConfig`] bundle that is then
//! passed by reference into every component. Nothing reads the process
//! environment after construction.

use crate::error::{CorralError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default data port of the underlying store.
pub const DEFAULT_PORT: u16 = 6379;

/// Parse a boolean-ish switch token.
///
/// Accepts exactly `yes`, `true`, `1`, `on` and `no`, `false`, `0`, `off`
/// (case-insensitive, surrounding whitespace ignored). Anything else is a
/// validation error — silent false-ness for a typo like `ture` has bitten
/// too many deployments.
pub fn parse_switch(field: &str, token: &str) -> Result<bool> {
    match token.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" | "on" => Ok(true),
        "no" | "false" | "0" | "off" => Ok(false),
        other => Err(CorralError::Validation {
            field: field.to_string(),
            reason: format!("unrecognized switch value {:?}", other),
        }),
    }
}

/// Split a peer-list value on commas, semicolons, and whitespace.
pub fn split_peer_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Tri-state gate for the post-formation cluster health check.
///
/// `Auto` behaves exactly like `On`: the convergence poll runs unless the
/// operator explicitly disables it. This truthy-unless-disabled default is
/// deliberate and easy to misread — a cluster with the gate set to `Off`
/// reports bootstrap success without ever confirming that all slots are
/// covered. Set it to `off` only when an external system owns convergence
/// verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthGate {
    /// Default: check unless disabled.
    Auto,
    /// Always check.
    On,
    /// Never check.
    Off,
}

impl HealthGate {
    /// Parse from an `auto|on|off` token (switch tokens also accepted).
    pub fn parse(field: &str, token: &str) -> Result<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(HealthGate::Auto),
            _ => Ok(if parse_switch(field, token)? {
                HealthGate::On
            } else {
                HealthGate::Off
            }),
        }
    }

    /// Whether the convergence poll should run.
    pub fn enabled(&self) -> bool {
        !matches!(self, HealthGate::Off)
    }
}

/// Replication role of this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Serves writes; never points at an upstream.
    Primary,
    /// Follows a configured upstream primary.
    Replica,
}

/// Main configuration for a Corral-supervised node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorralConfig {
    /// Node identity and role.
    pub node: NodeSettings,
    /// Authentication intent.
    pub auth: AuthSettings,
    /// TLS intent.
    pub tls: TlsSettings,
    /// Persistence policy.
    pub persistence: PersistenceSettings,
    /// Cluster topology and bootstrap knobs.
    pub cluster: ClusterSettings,
    /// Optional discovery-service delegation.
    pub discovery: Option<DiscoverySettings>,
    /// Performance knobs passed through to the store.
    pub performance: PerformanceSettings,
    /// Store process and file locations.
    pub store: StoreSettings,
}

/// Node identity and replication role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Replication role.
    pub role: NodeRole,
    /// Upstream primary descriptor (`host[:port]`), replica role only.
    pub primary: Option<String>,
    /// Address to announce to peers instead of the bind address.
    pub announce_ip: Option<String>,
    /// Port to announce to peers instead of the bind port.
    pub announce_port: Option<u16>,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            role: NodeRole::Primary,
            primary: None,
            announce_ip: None,
            announce_port: None,
        }
    }
}

/// Authentication settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Credential required from clients; empty means none.
    pub password: String,
    /// Explicit opt-in for running without a credential.
    pub allow_empty: bool,
    /// Credential presented to the upstream primary (replica role).
    pub primary_password: Option<String>,
}

impl AuthSettings {
    /// Credential to present when speaking to the store, if any.
    pub fn client_password(&self) -> Option<&str> {
        if self.password.is_empty() {
            None
        } else {
            Some(&self.password)
        }
    }
}

/// TLS settings.
///
/// Certificate and key material is validated for presence on disk by
/// [`CorralConfig::validate`] before synthesis runs; the synthesizer only
/// wires paths into directives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsSettings {
    /// Enable TLS on the store.
    pub enabled: bool,
    /// Encrypted port.
    pub port: u16,
    /// Path to the certificate file (PEM).
    pub cert_file: Option<PathBuf>,
    /// Path to the private key file (PEM).
    pub key_file: Option<PathBuf>,
    /// Path to the trust-anchor file (PEM).
    pub ca_file: Option<PathBuf>,
    /// Path to a trust-anchor directory; alternative to `ca_file`.
    pub ca_dir: Option<PathBuf>,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            port: DEFAULT_PORT,
            cert_file: None,
            key_file: None,
            ca_file: None,
            ca_dir: None,
        }
    }
}

/// One point-in-time snapshot trigger: `changes` writes within `seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavePoint {
    /// Window length in seconds.
    pub seconds: u64,
    /// Minimum number of changes within the window.
    pub changes: u64,
}

/// Persistence policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSettings {
    /// Enable the append-only log.
    pub append_only: bool,
    /// Snapshot triggers; ignored when `snapshots_disabled` is set.
    pub save_points: Vec<SavePoint>,
    /// Disable point-in-time snapshotting entirely.
    pub snapshots_disabled: bool,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            append_only: true,
            save_points: Vec::new(),
            snapshots_disabled: false,
        }
    }
}

/// Cluster topology and bootstrap knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    /// Raw `host[:port]` peer descriptors, self included.
    pub peers: Vec<String>,
    /// Whether this node is the elected bootstrap initiator.
    pub initiator: bool,
    /// Replicas per master handed to the formation command.
    pub replicas_per_master: u32,
    /// Plaintext data port.
    pub port: u16,
    /// Per-peer readiness deadline.
    pub peer_timeout: Duration,
    /// Bounded worker pool size for concurrent peer probes.
    pub probe_concurrency: usize,
    /// Fixed delay before the first DNS query, for slow service discovery.
    pub dns_delay: Duration,
    /// DNS attempts per peer.
    pub dns_retries: u32,
    /// Constant interval between DNS attempts.
    pub dns_backoff: Duration,
    /// TCP connect attempts per probe.
    pub connect_retries: u32,
    /// Constant interval between connect attempts.
    pub connect_backoff: Duration,
    /// Overall convergence deadline after formation.
    pub convergence_timeout: Duration,
    /// Interval between convergence polls.
    pub poll_interval: Duration,
    /// Post-formation health check gate. `auto` means on; see [`HealthGate`].
    pub health_check: HealthGate,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            initiator: false,
            replicas_per_master: 1,
            port: DEFAULT_PORT,
            peer_timeout: Duration::from_secs(60),
            probe_concurrency: 8,
            dns_delay: Duration::ZERO,
            dns_retries: 30,
            dns_backoff: Duration::from_secs(1),
            connect_retries: 30,
            connect_backoff: Duration::from_secs(1),
            convergence_timeout: Duration::from_secs(90),
            poll_interval: Duration::from_secs(2),
            health_check: HealthGate::Auto,
        }
    }
}

impl ClusterSettings {
    /// Whether cluster bootstrap applies at all.
    pub fn cluster_mode(&self) -> bool {
        !self.peers.is_empty()
    }
}

/// Discovery-service delegation: a naming service resolving a logical
/// group name to the currently active leader's `(host, port)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    /// Discovery endpoint host.
    pub host: String,
    /// Discovery endpoint port.
    pub port: u16,
    /// Logical group name to look up.
    pub group: String,
}

/// Performance knobs passed through to the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceSettings {
    /// IO thread count; absent leaves the store default.
    pub io_threads: Option<u32>,
    /// Memory ceiling (store syntax, e.g. `2gb`); absent leaves unset.
    pub max_memory: Option<String>,
    /// Eviction policy name; absent leaves the store default.
    pub eviction_policy: Option<String>,
    /// Command names to disable via empty rename.
    pub disabled_commands: Vec<String>,
}

/// Store process and file locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Store server binary.
    pub binary: PathBuf,
    /// Store administrative CLI binary.
    pub cli: PathBuf,
    /// Config file Corral owns and rewrites.
    pub config_file: PathBuf,
    /// Operator overrides file included last.
    pub overrides_file: PathBuf,
    /// Data directory; the identity file and address map live here.
    pub data_dir: PathBuf,
    /// Identity file name inside `data_dir`.
    pub identity_file: String,
    /// Deadline for the local store to answer pings after spawn.
    pub startup_timeout: Duration,
    /// Grace period between SIGTERM and SIGKILL on shutdown.
    pub stop_grace: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/local/bin/keyval-server"),
            cli: PathBuf::from("/usr/local/bin/keyval-cli"),
            config_file: PathBuf::from("/etc/keyval/keyval.conf"),
            overrides_file: PathBuf::from("/etc/keyval/overrides.conf"),
            data_dir: PathBuf::from("/data"),
            identity_file: "nodes.conf".to_string(),
            startup_timeout: Duration::from_secs(30),
            stop_grace: Duration::from_secs(10),
        }
    }
}

impl StoreSettings {
    /// Absolute path of the identity file.
    pub fn identity_path(&self) -> PathBuf {
        self.data_dir.join(&self.identity_file)
    }

    /// Absolute path of the persisted descriptor→IP map.
    pub fn identity_map_path(&self) -> PathBuf {
        self.data_dir.join("corral-addresses.json")
    }
}

impl Default for CorralConfig {
    fn default() -> Self {
        Self {
            node: NodeSettings::default(),
            auth: AuthSettings::default(),
            tls: TlsSettings::default(),
            persistence: PersistenceSettings::default(),
            cluster: ClusterSettings::default(),
            discovery: None,
            performance: PerformanceSettings::default(),
            store: StoreSettings::default(),
        }
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn var_switch(name: &str, default: bool) -> Result<bool> {
    match var(name) {
        Some(v) => parse_switch(name, &v),
        None => Ok(default),
    }
}

fn var_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match var(name) {
        Some(v) => v.parse::<T>().map(Some).map_err(|_| CorralError::Validation {
            field: name.to_string(),
            reason: format!("cannot parse {:?}", v),
        }),
        None => Ok(None),
    }
}

fn var_secs(name: &str, default: Duration) -> Result<Duration> {
    Ok(var_parse::<u64>(name)?.map(Duration::from_secs).unwrap_or(default))
}

fn var_millis(name: &str, default: Duration) -> Result<Duration> {
    Ok(var_parse::<u64>(name)?.map(Duration::from_millis).unwrap_or(default))
}

/// Parse a snapshot policy value: whitespace-separated `seconds:changes`
/// pairs, e.g. `900:1 300:10 60:10000`.
pub fn parse_save_policy(field: &str, value: &str) -> Result<Vec<SavePoint>> {
    let mut points = Vec::new();
    for pair in value.split_whitespace() {
        let (secs, changes) = pair.split_once(':').ok_or_else(|| CorralError::Validation {
            field: field.to_string(),
            reason: format!("expected seconds:changes, got {:?}", pair),
        })?;
        let parse = |s: &str| {
            s.parse::<u64>().map_err(|_| CorralError::Validation {
                field: field.to_string(),
                reason: format!("non-numeric component in {:?}", pair),
            })
        };
        points.push(SavePoint {
            seconds: parse(secs)?,
            changes: parse(changes)?,
        });
    }
    Ok(points)
}

impl CorralConfig {
    /// Build the configuration bundle from `CORRAL_*` environment variables.
    ///
    /// Unset variables fall back to defaults; malformed values are
    /// validation errors, never silent defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Node
        if let Some(role) = var("CORRAL_REPLICATION_MODE") {
            config.node.role = match role.trim().to_ascii_lowercase().as_str() {
                "primary" | "master" => NodeRole::Primary,
                "replica" | "slave" => NodeRole::Replica,
                other => {
                    return Err(CorralError::Validation {
                        field: "CORRAL_REPLICATION_MODE".into(),
                        reason: format!("unrecognized role {:?}", other),
                    })
                }
            };
        }
        config.node.primary = var("CORRAL_PRIMARY_HOST").map(|host| {
            match var("CORRAL_PRIMARY_PORT") {
                Some(port) => format!("{}:{}", host, port),
                None => host,
            }
        });
        config.node.announce_ip = var("CORRAL_ANNOUNCE_IP");
        config.node.announce_port = var_parse("CORRAL_ANNOUNCE_PORT")?;

        // Auth
        config.auth.password = var("CORRAL_PASSWORD").unwrap_or_default();
        config.auth.allow_empty = var_switch("CORRAL_ALLOW_EMPTY_PASSWORD", false)?;
        config.auth.primary_password = var("CORRAL_PRIMARY_PASSWORD");

        // TLS
        config.tls.enabled = var_switch("CORRAL_TLS_ENABLED", false)?;
        config.tls.port = var_parse("CORRAL_TLS_PORT")?.unwrap_or(DEFAULT_PORT);
        config.tls.cert_file = var("CORRAL_TLS_CERT_FILE").map(PathBuf::from);
        config.tls.key_file = var("CORRAL_TLS_KEY_FILE").map(PathBuf::from);
        config.tls.ca_file = var("CORRAL_TLS_CA_FILE").map(PathBuf::from);
        config.tls.ca_dir = var("CORRAL_TLS_CA_DIR").map(PathBuf::from);

        // Persistence
        config.persistence.append_only = var_switch("CORRAL_AOF_ENABLED", true)?;
        config.persistence.snapshots_disabled = var_switch("CORRAL_SNAPSHOTS_DISABLED", false)?;
        if let Some(policy) = var("CORRAL_SNAPSHOT_POLICY") {
            config.persistence.save_points =
                parse_save_policy("CORRAL_SNAPSHOT_POLICY", &policy)?;
        }

        // Cluster
        if let Some(peers) = var("CORRAL_NODES") {
            config.cluster.peers = split_peer_list(&peers);
        }
        config.cluster.initiator = var_switch("CORRAL_CLUSTER_CREATOR", false)?;
        config.cluster.replicas_per_master =
            var_parse("CORRAL_CLUSTER_REPLICAS")?.unwrap_or(1);
        config.cluster.port = var_parse("CORRAL_PORT")?.unwrap_or(DEFAULT_PORT);
        config.cluster.peer_timeout =
            var_secs("CORRAL_PEER_TIMEOUT", config.cluster.peer_timeout)?;
        config.cluster.probe_concurrency =
            var_parse("CORRAL_PROBE_CONCURRENCY")?.unwrap_or(config.cluster.probe_concurrency);
        config.cluster.dns_delay = var_secs("CORRAL_DNS_DELAY", config.cluster.dns_delay)?;
        config.cluster.dns_retries =
            var_parse("CORRAL_DNS_RETRIES")?.unwrap_or(config.cluster.dns_retries);
        config.cluster.dns_backoff =
            var_millis("CORRAL_DNS_BACKOFF_MS", config.cluster.dns_backoff)?;
        config.cluster.connect_retries =
            var_parse("CORRAL_CONNECT_RETRIES")?.unwrap_or(config.cluster.connect_retries);
        config.cluster.connect_backoff =
            var_millis("CORRAL_CONNECT_BACKOFF_MS", config.cluster.connect_backoff)?;
        config.cluster.convergence_timeout =
            var_secs("CORRAL_CONVERGENCE_TIMEOUT", config.cluster.convergence_timeout)?;
        config.cluster.poll_interval =
            var_millis("CORRAL_POLL_INTERVAL_MS", config.cluster.poll_interval)?;
        if let Some(gate) = var("CORRAL_CLUSTER_HEALTH_CHECK") {
            config.cluster.health_check =
                HealthGate::parse("CORRAL_CLUSTER_HEALTH_CHECK", &gate)?;
        }

        // Discovery
        if let Some(host) = var("CORRAL_DISCOVERY_HOST") {
            config.discovery = Some(DiscoverySettings {
                host,
                port: var_parse("CORRAL_DISCOVERY_PORT")?.unwrap_or(26379),
                group: var("CORRAL_DISCOVERY_GROUP").unwrap_or_else(|| "primary".to_string()),
            });
        }

        // Performance
        config.performance.io_threads = var_parse("CORRAL_IO_THREADS")?;
        config.performance.max_memory = var("CORRAL_MAX_MEMORY");
        config.performance.eviction_policy = var("CORRAL_EVICTION_POLICY");
        if let Some(commands) = var("CORRAL_DISABLE_COMMANDS") {
            config.performance.disabled_commands = split_peer_list(&commands);
        }

        // Store
        if let Some(binary) = var("CORRAL_STORE_BINARY") {
            config.store.binary = PathBuf::from(binary);
        }
        if let Some(cli) = var("CORRAL_STORE_CLI") {
            config.store.cli = PathBuf::from(cli);
        }
        if let Some(path) = var("CORRAL_CONFIG_FILE") {
            config.store.config_file = PathBuf::from(path);
        }
        if let Some(path) = var("CORRAL_OVERRIDES_FILE") {
            config.store.overrides_file = PathBuf::from(path);
        }
        if let Some(dir) = var("CORRAL_DATA_DIR") {
            config.store.data_dir = PathBuf::from(dir);
        }
        if let Some(name) = var("CORRAL_IDENTITY_FILE") {
            config.store.identity_file = name;
        }
        config.store.startup_timeout =
            var_secs("CORRAL_STARTUP_TIMEOUT", config.store.startup_timeout)?;
        config.store.stop_grace = var_secs("CORRAL_STOP_GRACE", config.store.stop_grace)?;

        Ok(config)
    }

    /// The port peers actually dial: the encrypted port when TLS is on and
    /// the plaintext port is forced off, the plaintext port otherwise.
    pub fn effective_port(&self) -> u16 {
        if self.tls.enabled && self.cluster.port == DEFAULT_PORT && self.tls.port == DEFAULT_PORT {
            self.tls.port
        } else if self.tls.enabled && self.cluster.port == 0 {
            self.tls.port
        } else {
            self.cluster.port
        }
    }

    /// Validate the bundle. Every failure here is fatal and surfaces
    /// before any process is spawned.
    pub fn validate(&self) -> Result<()> {
        if self.auth.password.is_empty() && !self.auth.allow_empty {
            return Err(CorralError::Validation {
                field: "CORRAL_PASSWORD".into(),
                reason: "empty credential requires CORRAL_ALLOW_EMPTY_PASSWORD=yes".into(),
            });
        }

        if self.node.role == NodeRole::Replica && self.node.primary.is_none() {
            return Err(CorralError::Validation {
                field: "CORRAL_PRIMARY_HOST".into(),
                reason: "replica role requires an upstream primary".into(),
            });
        }

        if self.tls.enabled {
            let cert = self.tls.cert_file.as_ref().ok_or_else(|| CorralError::Validation {
                field: "CORRAL_TLS_CERT_FILE".into(),
                reason: "required when TLS is enabled".into(),
            })?;
            let key = self.tls.key_file.as_ref().ok_or_else(|| CorralError::Validation {
                field: "CORRAL_TLS_KEY_FILE".into(),
                reason: "required when TLS is enabled".into(),
            })?;
            for (field, path) in [("CORRAL_TLS_CERT_FILE", cert), ("CORRAL_TLS_KEY_FILE", key)] {
                if !path.exists() {
                    return Err(CorralError::Validation {
                        field: field.into(),
                        reason: format!("{} not found", path.display()),
                    });
                }
            }
            match (&self.tls.ca_file, &self.tls.ca_dir) {
                (None, None) => {
                    return Err(CorralError::Validation {
                        field: "CORRAL_TLS_CA_FILE".into(),
                        reason: "a trust-anchor file or directory is required".into(),
                    })
                }
                (Some(path), _) if !path.exists() => {
                    return Err(CorralError::Validation {
                        field: "CORRAL_TLS_CA_FILE".into(),
                        reason: format!("{} not found", path.display()),
                    })
                }
                (None, Some(dir)) if !dir.is_dir() => {
                    return Err(CorralError::Validation {
                        field: "CORRAL_TLS_CA_DIR".into(),
                        reason: format!("{} is not a directory", dir.display()),
                    })
                }
                _ => {}
            }

            // Equal non-default ports cannot be disambiguated.
            if self.cluster.port == self.tls.port && self.cluster.port != DEFAULT_PORT {
                return Err(CorralError::Validation {
                    field: "CORRAL_TLS_PORT".into(),
                    reason: format!(
                        "conflicts with CORRAL_PORT ({}); pick distinct ports",
                        self.cluster.port
                    ),
                });
            }
        }

        if self.cluster.initiator && self.cluster.peers.is_empty() {
            return Err(CorralError::Validation {
                field: "CORRAL_NODES".into(),
                reason: "cluster creator requires a peer list".into(),
            });
        }

        if self.cluster.cluster_mode() && self.cluster.probe_concurrency == 0 {
            return Err(CorralError::Validation {
                field: "CORRAL_PROBE_CONCURRENCY".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_switch_accepts_known_tokens() {
        for token in ["yes", "YES", "true", "1", "on", " On "] {
            assert!(parse_switch("f", token).unwrap(), "{token}");
        }
        for token in ["no", "False", "0", "off", " OFF "] {
            assert!(!parse_switch("f", token).unwrap(), "{token}");
        }
    }

    #[test]
    fn test_parse_switch_rejects_unknown_tokens() {
        for token in ["", "ture", "2", "y", "enabled"] {
            let err = parse_switch("CORRAL_TLS_ENABLED", token).unwrap_err();
            assert!(err.to_string().contains("CORRAL_TLS_ENABLED"), "{token}");
        }
    }

    #[test]
    fn test_split_peer_list() {
        assert_eq!(
            split_peer_list("a:6379,b:6379;c:6379 d"),
            vec!["a:6379", "b:6379", "c:6379", "d"]
        );
        assert_eq!(split_peer_list("  ,; "), Vec::<String>::new());
    }

    #[test]
    fn test_health_gate() {
        assert_eq!(HealthGate::parse("f", "auto").unwrap(), HealthGate::Auto);
        assert_eq!(HealthGate::parse("f", "yes").unwrap(), HealthGate::On);
        assert_eq!(HealthGate::parse("f", "off").unwrap(), HealthGate::Off);
        assert!(HealthGate::Auto.enabled());
        assert!(HealthGate::On.enabled());
        assert!(!HealthGate::Off.enabled());
        assert!(HealthGate::parse("f", "maybe").is_err());
    }

    #[test]
    fn test_save_policy_parsing() {
        let points = parse_save_policy("f", "900:1 300:10").unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0], SavePoint { seconds: 900, changes: 1 });
        assert_eq!(points[1], SavePoint { seconds: 300, changes: 10 });

        assert!(parse_save_policy("f", "900").is_err());
        assert!(parse_save_policy("f", "900:x").is_err());
        assert!(parse_save_policy("f", "").unwrap().is_empty());
    }

    #[test]
    fn test_empty_credential_requires_opt_in() {
        let mut config = CorralConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("CORRAL_PASSWORD"));

        config.auth.allow_empty = true;
        config.validate().unwrap();

        config.auth.allow_empty = false;
        config.auth.password = "secret".into();
        config.validate().unwrap();
    }

    #[test]
    fn test_replica_requires_primary() {
        let mut config = CorralConfig::default();
        config.auth.allow_empty = true;
        config.node.role = NodeRole::Replica;
        assert!(config.validate().is_err());

        config.node.primary = Some("primary-0:6379".into());
        config.validate().unwrap();
    }

    #[test]
    fn test_tls_conflicting_ports() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("tls.crt");
        let key = dir.path().join("tls.key");
        let ca = dir.path().join("ca.crt");
        for path in [&cert, &key, &ca] {
            std::fs::write(path, "pem").unwrap();
        }

        let mut config = CorralConfig::default();
        config.auth.allow_empty = true;
        config.tls.enabled = true;
        config.tls.cert_file = Some(cert);
        config.tls.key_file = Some(key);
        config.tls.ca_file = Some(ca);

        // Both at the default is the forced-plaintext-off case, not an error.
        config.cluster.port = DEFAULT_PORT;
        config.tls.port = DEFAULT_PORT;
        config.validate().unwrap();

        // Equal non-default ports conflict.
        config.cluster.port = 7000;
        config.tls.port = 7000;
        assert!(config.validate().is_err());

        config.tls.port = 7001;
        config.validate().unwrap();
    }

    #[test]
    fn test_tls_requires_material_paths() {
        let mut config = CorralConfig::default();
        config.auth.allow_empty = true;
        config.tls.enabled = true;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("CORRAL_TLS_CERT_FILE"));
    }

    #[test]
    fn test_effective_port_prefers_tls_when_plaintext_forced_off() {
        let mut config = CorralConfig::default();
        config.tls.enabled = true;
        config.cluster.port = DEFAULT_PORT;
        config.tls.port = DEFAULT_PORT;
        assert_eq!(config.effective_port(), DEFAULT_PORT);

        config.tls.enabled = false;
        config.cluster.port = 7000;
        assert_eq!(config.effective_port(), 7000);
    }
}
