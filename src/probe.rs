//! Two-phase node readiness probing.
//!
//! Phase one is a raw TCP connect under a bounded retry budget, so an
//! unreachable peer fails fast without spawning a protocol exchange. Phase
//! two is the liveness ping, which must return the exact canonical reply:
//! a store that accepts connections but is still loading its dataset
//! answers the ping with an error and is not ready. Both phases run under
//! one hard deadline.

use crate::error::{CorralError, Result};
use crate::protocol::AdminChannel;
use crate::retry::RetryPolicy;
use std::time::Duration;
use tokio::net::TcpStream;

/// Probes a target until ready or deadline.
#[derive(Debug, Clone)]
pub struct ReadinessProber {
    channel: AdminChannel,
    connect_policy: RetryPolicy,
}

impl ReadinessProber {
    /// Create a prober using the given admin channel and connect budget.
    pub fn new(channel: AdminChannel, connect_policy: RetryPolicy) -> Self {
        Self {
            channel,
            connect_policy,
        }
    }

    /// TCP connect probe only.
    async fn probe_tcp(&self, host: &str, port: u16) -> Result<()> {
        self.connect_policy
            .run("tcp-probe", || async {
                TcpStream::connect((host, port))
                    .await
                    .map(drop)
                    .map_err(|e| CorralError::Connection {
                        target: format!("{}:{}", host, port),
                        reason: e.to_string(),
                    })
            })
            .await
    }

    /// Liveness probe: ping until the canonical reply arrives.
    async fn probe_ping(&self, host: &str, port: u16) -> Result<()> {
        self.connect_policy
            .run("ping-probe", || self.channel.ping(host, port))
            .await
    }

    /// Wait for `host:port` to become ready within `timeout`.
    ///
    /// TCP success without the canonical ping reply is not ready. On
    /// expiry the error names the peer and the deadline.
    pub async fn wait(&self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        let target = format!("{}:{}", host, port);
        tracing::debug!(%target, timeout_secs = timeout.as_secs(), "waiting for node");

        let both_phases = async {
            self.probe_tcp(host, port).await?;
            self.probe_ping(host, port).await
        };

        match tokio::time::timeout(timeout, both_phases).await {
            Ok(Ok(())) => {
                tracing::info!(%target, "node ready");
                Ok(())
            }
            Ok(Err(e)) => Err(CorralError::Bootstrap(format!(
                "node {} never became ready: {}",
                target, e
            ))),
            Err(_) => Err(CorralError::Bootstrap(format!(
                "node {} not ready within {:?}",
                target, timeout
            ))),
        }
    }
}
