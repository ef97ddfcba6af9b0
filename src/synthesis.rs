//! Config synthesis: intent bundle → directive store calls.
//!
//! Rules run in a fixed order so that repeated synthesis of the same
//! intent leaves the file byte-identical and the trailing `include`
//! directive always lands last, letting operator overrides win regardless
//! of how many times a container has restarted. Each rule is independently
//! inert when its intent is absent.

use crate::config::{CorralConfig, NodeRole, DEFAULT_PORT};
use crate::directive::ConfigFile;
use crate::error::{CorralError, Result};
use crate::probe::ReadinessProber;
use crate::protocol::AdminChannel;
use crate::resolve::{self, NodeDescriptor, PeerResolver};
use tracing::{debug, info};

/// Applies the configuration intent to a directive file.
pub struct Synthesizer<'a> {
    config: &'a CorralConfig,
    resolver: &'a PeerResolver,
    prober: &'a ReadinessProber,
    channel: &'a AdminChannel,
}

impl<'a> Synthesizer<'a> {
    /// Create a synthesizer over the given collaborators.
    pub fn new(
        config: &'a CorralConfig,
        resolver: &'a PeerResolver,
        prober: &'a ReadinessProber,
        channel: &'a AdminChannel,
    ) -> Self {
        Self {
            config,
            resolver,
            prober,
            channel,
        }
    }

    /// Run every rule against `file`, in order. The file is not saved;
    /// the caller owns the single serialize pass.
    pub async fn apply(&self, file: &mut ConfigFile) -> Result<()> {
        self.apply_auth(file);
        self.apply_persistence(file);
        self.apply_ports(file);
        self.apply_tls(file);
        self.apply_announce(file);
        self.apply_cluster(file);
        self.apply_performance(file);
        self.apply_replication(file).await?;
        self.apply_command_restrictions(file);
        self.finalize(file);
        info!(path = %file.path().display(), "configuration synthesized");
        Ok(())
    }

    fn apply_auth(&self, file: &mut ConfigFile) {
        let auth = &self.config.auth;
        if auth.password.is_empty() {
            // Validation already required the explicit opt-in; an open
            // node must not refuse non-loopback clients.
            debug!("empty credential allowed, relaxing protected mode");
            file.set("protected-mode", "no");
        } else {
            file.set("requirepass", &auth.password);
        }
        if let Some(primary_password) = &auth.primary_password {
            file.set("masterauth", primary_password);
        }
    }

    fn apply_persistence(&self, file: &mut ConfigFile) {
        let persistence = &self.config.persistence;
        file.set(
            "appendonly",
            if persistence.append_only { "yes" } else { "no" },
        );

        // The save directive is list-typed: clear the previous policy,
        // then append the new one so repeated synthesis cannot stack
        // triggers.
        file.unset("save");
        if persistence.snapshots_disabled {
            file.append("save", "");
        } else {
            for point in &persistence.save_points {
                file.append("save", &format!("{} {}", point.seconds, point.changes));
            }
        }
    }

    fn apply_ports(&self, file: &mut ConfigFile) {
        let tls = &self.config.tls;
        let port = self.config.cluster.port;
        if tls.enabled && port == DEFAULT_PORT && tls.port == DEFAULT_PORT {
            // Both at the default would double-bind; expose only the
            // encrypted port.
            debug!("plaintext port forced off in favor of the encrypted port");
            file.set("port", "0");
        } else {
            file.set("port", &port.to_string());
        }
    }

    fn apply_tls(&self, file: &mut ConfigFile) {
        let tls = &self.config.tls;
        if !tls.enabled {
            return;
        }

        file.set("tls-port", &tls.port.to_string());
        if let Some(cert) = &tls.cert_file {
            file.set("tls-cert-file", &cert.display().to_string());
        }
        if let Some(key) = &tls.key_file {
            file.set("tls-key-file", &key.display().to_string());
        }
        if let Some(ca) = &tls.ca_file {
            file.set("tls-ca-cert-file", &ca.display().to_string());
        } else if let Some(dir) = &tls.ca_dir {
            file.set("tls-ca-cert-dir", &dir.display().to_string());
        }
        file.set("tls-replication", "yes");
        if self.config.cluster.cluster_mode() {
            file.set("tls-cluster", "yes");
        }
    }

    fn apply_announce(&self, file: &mut ConfigFile) {
        if let Some(ip) = &self.config.node.announce_ip {
            file.set("replica-announce-ip", ip);
        }
        if let Some(port) = self.config.node.announce_port {
            file.set("replica-announce-port", &port.to_string());
        }
    }

    fn apply_cluster(&self, file: &mut ConfigFile) {
        if !self.config.cluster.cluster_mode() {
            return;
        }
        file.set("cluster-enabled", "yes");
        file.set("cluster-config-file", &self.config.store.identity_file);
        // Peers advertise resolved addresses; hostnames may not resolve
        // from every pod network.
        file.set("cluster-preferred-endpoint-type", "ip");
        file.set("dir", &self.config.store.data_dir.display().to_string());
    }

    fn apply_performance(&self, file: &mut ConfigFile) {
        let perf = &self.config.performance;
        if let Some(io_threads) = perf.io_threads {
            file.set("io-threads", &io_threads.to_string());
        }
        if let Some(max_memory) = &perf.max_memory {
            file.set("maxmemory", max_memory);
        }
        if let Some(policy) = &perf.eviction_policy {
            file.set("maxmemory-policy", policy);
        }
    }

    /// Wire the upstream for the replica role: discovery (when configured)
    /// names the current leader, the resolver pins it to an address, and
    /// the prober confirms the port answers before the directive lands.
    async fn apply_replication(&self, file: &mut ConfigFile) -> Result<()> {
        if self.config.node.role != NodeRole::Replica {
            return Ok(());
        }

        let upstream = match &self.config.discovery {
            Some(discovery) => {
                resolve::discover_leader(self.channel, discovery, self.config.effective_port())
                    .await?
            }
            None => {
                let raw = self.config.node.primary.as_ref().ok_or_else(|| {
                    CorralError::Validation {
                        field: "CORRAL_PRIMARY_HOST".into(),
                        reason: "replica role requires an upstream primary".into(),
                    }
                })?;
                NodeDescriptor::parse(raw, self.config.effective_port())?
            }
        };

        let socket = self.resolver.resolve(&upstream).await?;
        self.prober
            .wait(
                &socket.ip.to_string(),
                socket.port,
                self.config.cluster.peer_timeout,
            )
            .await?;

        info!(upstream = %socket, "upstream primary confirmed reachable");
        file.set("replicaof", &format!("{} {}", socket.ip, socket.port));
        Ok(())
    }

    fn apply_command_restrictions(&self, file: &mut ConfigFile) {
        for command in &self.config.performance.disabled_commands {
            if file.has_tokens(&["rename-command", command]) {
                continue;
            }
            file.append("rename-command", &format!("{} \"\"", command));
        }
    }

    /// Overrides must apply last no matter how many times synthesis ran.
    fn finalize(&self, file: &mut ConfigFile) {
        file.unset("include");
        file.append(
            "include",
            &self.config.store.overrides_file.display().to_string(),
        );
    }
}
