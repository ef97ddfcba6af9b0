//! Corral - bootstrap and configuration supervisor for distributed
//! key-value clusters.
//!
//! Corral turns a declarative set of node addresses and environment-derived
//! intent into a running, converged, sharded cluster. It owns the two jobs
//! the store itself cannot do for you: keeping the store's config file in a
//! deterministic state across repeated container restarts, and coordinating
//! N independently-starting processes into exactly one cluster.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Corral                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Config Synthesizer ─→ Directive Store ─→ store config file  │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Identity Remapper ─→ address map + identity file            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Orchestrator: Peer Resolver | Readiness Prober | Formation  │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Store process (external): spawned, probed, supervised       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! [`run`] executes the fixed ordering the bootstrap depends on: the
//! config file is synthesized and the identity file remapped *before* the
//! store process starts; the orchestrator runs only after the store is
//! locally ready; and a failed bootstrap stops the store and exits
//! non-zero — never a half-alive node.
//!
//! # Quick Start
//!
//! ```no_run
//! use corral::config::CorralConfig;
//!
//! #[tokio::main]
//! async fn main() -> corral::Result<()> {
//!     let config = CorralConfig::from_env()?;
//!     corral::run(config).await
//! }
//! ```

pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod directive;
pub mod error;
pub mod identity;
pub mod observability;
pub mod probe;
pub mod protocol;
pub mod resolve;
pub mod retry;
pub mod shutdown;
pub mod synthesis;

// Re-exports
pub use error::{CorralError, Result};

use bootstrap::{Orchestrator, OrchestratorConfig};
use config::CorralConfig;
use directive::ConfigFile;
use identity::IdentityRemapper;
use probe::ReadinessProber;
use protocol::{AdminChannel, AdminCli};
use resolve::{NodeDescriptor, PeerResolver};
use retry::RetryPolicy;
use shutdown::{ShutdownCoordinator, SignalHandler};
use std::time::Duration;
use synthesis::Synthesizer;
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

/// Collaborators built once from the bundle and shared by every entry
/// point.
struct Runtime {
    channel: AdminChannel,
    resolver: PeerResolver,
    prober: ReadinessProber,
}

impl Runtime {
    fn new(config: &CorralConfig) -> Self {
        let channel = AdminChannel::from_config(config);
        let resolver = PeerResolver::new(RetryPolicy::new(
            config.cluster.dns_retries,
            config.cluster.dns_backoff,
        ));
        let prober = ReadinessProber::new(
            channel.clone(),
            RetryPolicy::new(config.cluster.connect_retries, config.cluster.connect_backoff),
        );
        Self {
            channel,
            resolver,
            prober,
        }
    }
}

/// Synthesize the store's config file from the bundle and write it out.
pub async fn render_config(config: &CorralConfig) -> Result<()> {
    config.validate()?;
    let runtime = Runtime::new(config);

    let mut file = ConfigFile::load(&config.store.config_file)?;
    Synthesizer::new(config, &runtime.resolver, &runtime.prober, &runtime.channel)
        .apply(&mut file)
        .await?;
    file.save()
}

/// Reconcile the identity file and address map against freshly resolved
/// peer addresses.
pub async fn remap_identities(config: &CorralConfig) -> Result<()> {
    let runtime = Runtime::new(config);
    let peers = parse_peers(config)?;
    IdentityRemapper::new(
        &runtime.resolver,
        &peers,
        config.store.identity_map_path(),
        config.store.identity_path(),
    )
    .run()
    .await
}

/// Probe a single `host[:port]` target until ready or deadline.
pub async fn wait_ready(config: &CorralConfig, target: &str, timeout: Duration) -> Result<()> {
    let runtime = Runtime::new(config);
    let descriptor = NodeDescriptor::parse(target, config.effective_port())?;
    runtime
        .prober
        .wait(&descriptor.host, descriptor.port, timeout)
        .await
}

fn parse_peers(config: &CorralConfig) -> Result<Vec<NodeDescriptor>> {
    let port = config.effective_port();
    config
        .cluster
        .peers
        .iter()
        .map(|raw| NodeDescriptor::parse(raw, port))
        .collect()
}

/// Run the full supervise-and-bootstrap flow with the given configuration.
pub async fn run(config: CorralConfig) -> Result<()> {
    config.validate()?;
    info!(
        peers = config.cluster.peers.len(),
        initiator = config.cluster.initiator,
        "starting corral"
    );

    let coordinator = ShutdownCoordinator::new();
    tokio::spawn(SignalHandler::new(coordinator.clone()).run());

    let runtime = Runtime::new(&config);

    // Config must be complete before the store reads it.
    let mut file = ConfigFile::load(&config.store.config_file)?;
    Synthesizer::new(&config, &runtime.resolver, &runtime.prober, &runtime.channel)
        .apply(&mut file)
        .await?;
    file.save()?;

    // Identity records must be consistent before the store loads them.
    if config.cluster.cluster_mode() {
        let peers = parse_peers(&config)?;
        IdentityRemapper::new(
            &runtime.resolver,
            &peers,
            config.store.identity_map_path(),
            config.store.identity_path(),
        )
        .run()
        .await?;
    }

    let mut child = spawn_store(&config)?;

    // The orchestrator (and everything else) needs the local node
    // answering pings first.
    let local_port = config.effective_port();
    if let Err(e) = runtime
        .prober
        .wait("127.0.0.1", local_port, config.store.startup_timeout)
        .await
    {
        error!(error = %e, "store never became locally ready");
        stop_store(&mut child, config.store.stop_grace).await;
        return Err(e);
    }

    if config.cluster.cluster_mode() {
        let mut orchestrator = Orchestrator::new(
            OrchestratorConfig::from_config(&config)?,
            runtime.resolver.clone(),
            runtime.prober.clone(),
            runtime.channel.clone(),
            AdminCli::from_config(&config),
            coordinator.clone(),
        );
        if let Err(e) = orchestrator.run().await {
            error!(error = %e, "cluster bootstrap failed; stopping store");
            stop_store(&mut child, config.store.stop_grace).await;
            return Err(e);
        }
    }

    // Supervise until the store exits or a signal arrives.
    let exited = tokio::select! {
        status = child.wait() => Some(status?),
        _ = coordinator.wait_for_shutdown() => None,
    };

    match exited {
        Some(status) if status.success() => {
            info!("store exited cleanly");
            Ok(())
        }
        Some(status) => Err(CorralError::Bootstrap(format!(
            "store exited with {}",
            status
        ))),
        None => {
            info!("shutdown requested; stopping store");
            stop_store(&mut child, config.store.stop_grace).await;
            Ok(())
        }
    }
}

fn spawn_store(config: &CorralConfig) -> Result<Child> {
    let child = Command::new(&config.store.binary)
        .arg(&config.store.config_file)
        .spawn()
        .map_err(|e| {
            CorralError::Internal(format!(
                "failed to start {}: {}",
                config.store.binary.display(),
                e
            ))
        })?;
    info!(
        binary = %config.store.binary.display(),
        pid = child.id(),
        "store process started"
    );
    Ok(child)
}

/// SIGTERM first, SIGKILL after the grace period.
async fn stop_store(child: &mut Child, grace: Duration) {
    if let Some(pid) = child.id() {
        // SAFETY: kill() with a live child pid is always safe to call.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            info!("store stopped");
            return;
        }
        warn!(grace_secs = grace.as_secs(), "store ignored SIGTERM; killing");
    }
    let _ = child.kill().await;
}
