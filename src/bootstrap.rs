//! Cluster bootstrap orchestration.
//!
//! One state machine, one run per process lifetime:
//!
//! ```text
//! Idle → ValidatingPeers → ResolvingAddresses → Forming
//!      → PollingConvergence → {Converged | Failed}
//! ```
//!
//! Only the elected initiator walks the whole machine; every other node
//! returns immediately and serves traffic once locally ready. Peer
//! validation fans out behind a bounded worker pool so N slow peers cost
//! one timeout, not N. Formation is issued at most once per process and a
//! non-zero exit from the formation command is a warning, not a failure —
//! re-forming an already-formed cluster fails idempotently, and the
//! convergence poll is the signal that decides the outcome.

use crate::config::{CorralConfig, HealthGate};
use crate::error::{CorralError, Result};
use crate::probe::ReadinessProber;
use crate::protocol::{self, AdminChannel, AdminCli};
use crate::resolve::{NodeDescriptor, PeerResolver, ResolvedSocket};
use crate::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Orchestrator phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    /// Not yet started.
    Idle,
    /// Probing every configured peer for readiness.
    ValidatingPeers,
    /// Resolving every peer to an address.
    ResolvingAddresses,
    /// Issuing the one-shot formation command.
    Forming,
    /// Waiting for the convergence predicate.
    PollingConvergence,
    /// Terminal: cluster formed and verified (or nothing to do).
    Converged,
    /// Terminal: bootstrap failed; the supervisor must stop the store.
    Failed,
}

/// Inputs the orchestrator needs, extracted from the bundle once.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Parsed peer descriptors, self included.
    pub peers: Vec<NodeDescriptor>,
    /// Whether this node issues formation.
    pub initiator: bool,
    /// Replica factor for the formation command.
    pub replicas_per_master: u32,
    /// Per-peer readiness deadline.
    pub peer_timeout: Duration,
    /// Worker pool bound for concurrent probes.
    pub probe_concurrency: usize,
    /// Fixed delay before DNS queries begin.
    pub dns_delay: Duration,
    /// Convergence deadline.
    pub convergence_timeout: Duration,
    /// Convergence poll cadence.
    pub poll_interval: Duration,
    /// Convergence check gate.
    pub health_check: HealthGate,
    /// Where to query introspection: the local node.
    pub local_host: String,
    /// Local node port.
    pub local_port: u16,
}

impl OrchestratorConfig {
    /// Extract orchestration inputs from the configuration bundle.
    pub fn from_config(config: &CorralConfig) -> Result<Self> {
        let port = config.effective_port();
        let peers = config
            .cluster
            .peers
            .iter()
            .map(|raw| NodeDescriptor::parse(raw, port))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            peers,
            initiator: config.cluster.initiator,
            replicas_per_master: config.cluster.replicas_per_master,
            peer_timeout: config.cluster.peer_timeout,
            probe_concurrency: config.cluster.probe_concurrency,
            dns_delay: config.cluster.dns_delay,
            convergence_timeout: config.cluster.convergence_timeout,
            poll_interval: config.cluster.poll_interval,
            health_check: config.cluster.health_check,
            local_host: "127.0.0.1".to_string(),
            local_port: port,
        })
    }
}

/// The bootstrap orchestrator.
pub struct Orchestrator {
    config: OrchestratorConfig,
    resolver: PeerResolver,
    prober: ReadinessProber,
    channel: AdminChannel,
    cli: AdminCli,
    shutdown: ShutdownCoordinator,
    state: BootstrapState,
    formed: bool,
}

impl Orchestrator {
    /// Create an orchestrator over the given collaborators.
    pub fn new(
        config: OrchestratorConfig,
        resolver: PeerResolver,
        prober: ReadinessProber,
        channel: AdminChannel,
        cli: AdminCli,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            config,
            resolver,
            prober,
            channel,
            cli,
            shutdown,
            state: BootstrapState::Idle,
            formed: false,
        }
    }

    /// Current phase.
    pub fn state(&self) -> BootstrapState {
        self.state
    }

    /// Run the state machine to a terminal state.
    pub async fn run(&mut self) -> Result<()> {
        let result = self.drive().await;
        self.state = match result {
            Ok(()) => BootstrapState::Converged,
            Err(_) => BootstrapState::Failed,
        };
        result
    }

    async fn drive(&mut self) -> Result<()> {
        if !self.config.initiator {
            info!("not the bootstrap initiator; serving once locally ready");
            return Ok(());
        }
        if self.shutdown.is_shutting_down() {
            return Err(cancelled());
        }

        self.state = BootstrapState::ValidatingPeers;
        info!(peers = self.config.peers.len(), "validating peer readiness");
        tokio::select! {
            result = self.validate_peers() => result?,
            _ = self.shutdown.wait_for_shutdown() => return Err(cancelled()),
        }

        self.state = BootstrapState::ResolvingAddresses;
        if !self.config.dns_delay.is_zero() {
            debug!(delay_secs = self.config.dns_delay.as_secs(), "delaying DNS queries");
            tokio::select! {
                _ = sleep(self.config.dns_delay) => {}
                _ = self.shutdown.wait_for_shutdown() => return Err(cancelled()),
            }
        }
        let sockets = tokio::select! {
            result = self.resolver.resolve_all(&self.config.peers) => {
                result.map_err(|e| CorralError::Bootstrap(format!("address resolution: {}", e)))?
            }
            _ = self.shutdown.wait_for_shutdown() => return Err(cancelled()),
        };

        self.state = BootstrapState::Forming;
        self.form(&sockets).await?;

        if self.config.health_check.enabled() {
            self.state = BootstrapState::PollingConvergence;
            self.poll_convergence().await?;
        } else {
            info!("convergence check disabled; trusting formation");
        }

        info!("cluster bootstrap complete");
        Ok(())
    }

    /// Probe every peer concurrently, bounded by the worker pool. The
    /// first failure aborts the remaining probes and names the peer.
    async fn validate_peers(&self) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.probe_concurrency));
        let mut tasks = JoinSet::new();

        for peer in &self.config.peers {
            let prober = self.prober.clone();
            let semaphore = Arc::clone(&semaphore);
            let host = peer.host.clone();
            let raw = peer.raw.clone();
            let port = peer.port;
            let timeout = self.config.peer_timeout;

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("probe semaphore closed");
                prober.wait(&host, port, timeout).await.map_err(|e| match e {
                    CorralError::Bootstrap(reason) => {
                        CorralError::Bootstrap(format!("peer {}: {}", raw, reason))
                    }
                    other => other,
                })?;
                Ok::<String, CorralError>(raw)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(raw)) => debug!(peer = %raw, "peer validated"),
                Ok(Err(e)) => {
                    tasks.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(CorralError::Internal(format!("probe task panicked: {}", e)));
                }
            }
        }
        Ok(())
    }

    /// Issue formation at most once per process lifetime.
    async fn form(&mut self, sockets: &[ResolvedSocket]) -> Result<()> {
        if self.formed {
            debug!("formation already issued this run");
            return Ok(());
        }
        self.formed = true;

        let output = self
            .cli
            .create_cluster(sockets, self.config.replicas_per_master)
            .await?;

        if output.success {
            info!("formation command succeeded");
        } else {
            // An already-formed cluster makes the create command fail;
            // convergence introspection decides whether that matters.
            warn!(
                code = output.code,
                detail = output
                    .stderr
                    .lines()
                    .chain(output.stdout.lines())
                    .next()
                    .unwrap_or("")
                    .trim(),
                "formation command returned non-zero; verifying convergence instead"
            );
        }
        Ok(())
    }

    /// Poll cluster introspection until the status-ok token appears, the
    /// deadline passes, or shutdown interrupts.
    async fn poll_convergence(&self) -> Result<()> {
        let deadline = Instant::now() + self.config.convergence_timeout;
        let host = self.config.local_host.as_str();
        let port = self.config.local_port;
        info!(
            timeout_secs = self.config.convergence_timeout.as_secs(),
            "polling cluster convergence"
        );

        loop {
            if self.shutdown.is_shutting_down() {
                return Err(cancelled());
            }

            match self.channel.cluster_info(host, port).await {
                Ok(status) if protocol::is_converged(&status) => {
                    info!("cluster converged");
                    return Ok(());
                }
                Ok(_) => debug!("cluster not yet converged"),
                Err(e) => debug!(error = %e, "introspection attempt failed"),
            }

            if Instant::now() >= deadline {
                return Err(CorralError::Bootstrap(format!(
                    "cluster did not converge within {:?}",
                    self.config.convergence_timeout
                )));
            }

            tokio::select! {
                _ = sleep(self.config.poll_interval) => {}
                _ = self.shutdown.wait_for_shutdown() => return Err(cancelled()),
            }
        }
    }
}

fn cancelled() -> CorralError {
    CorralError::Bootstrap("cancelled by shutdown signal".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;

    fn test_orchestrator(config: OrchestratorConfig) -> Orchestrator {
        let channel = AdminChannel::Inline {
            password: None,
            op_timeout: Duration::from_millis(500),
        };
        let policy = RetryPolicy::new(2, Duration::from_millis(20));
        Orchestrator::new(
            config,
            PeerResolver::new(policy),
            ReadinessProber::new(channel.clone(), policy),
            channel,
            AdminCli::new("/bin/false"),
            ShutdownCoordinator::new(),
        )
    }

    fn minimal_config(initiator: bool) -> OrchestratorConfig {
        OrchestratorConfig {
            peers: vec![NodeDescriptor::parse("127.0.0.1:1", 6379).unwrap()],
            initiator,
            replicas_per_master: 1,
            peer_timeout: Duration::from_millis(200),
            probe_concurrency: 4,
            dns_delay: Duration::ZERO,
            convergence_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(50),
            health_check: HealthGate::Auto,
            local_host: "127.0.0.1".to_string(),
            local_port: 1,
        }
    }

    #[tokio::test]
    async fn test_non_initiator_skips_everything() {
        let mut orchestrator = test_orchestrator(minimal_config(false));
        orchestrator.run().await.unwrap();
        assert_eq!(orchestrator.state(), BootstrapState::Converged);
    }

    #[tokio::test]
    async fn test_unready_peer_fails_and_names_it() {
        let mut orchestrator = test_orchestrator(minimal_config(true));
        let err = orchestrator.run().await.unwrap_err();
        assert_eq!(orchestrator.state(), BootstrapState::Failed);
        assert!(err.to_string().contains("127.0.0.1:1"), "{err}");
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_validation() {
        let mut orchestrator = test_orchestrator(OrchestratorConfig {
            peer_timeout: Duration::from_secs(60),
            ..minimal_config(true)
        });
        orchestrator.shutdown.shutdown();

        let start = std::time::Instant::now();
        let err = orchestrator.run().await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
