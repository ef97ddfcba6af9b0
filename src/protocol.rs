//! Minimal administrative protocol exchanges against the store.
//!
//! Corral needs four exchanges and nothing more: a liveness ping, optional
//! authentication, the cluster-status introspection text, and the discovery
//! lookup of a group's active leader. Plaintext deployments run these
//! inline over TCP; TLS deployments delegate to the store's own CLI binary
//! so certificate mechanics stay with the store. The one-shot
//! cluster-formation invocation always goes through the CLI — its exit
//! status and captured output are the only feedback channel the formation
//! interface defines.

use crate::config::CorralConfig;
use crate::error::{CorralError, Result};
use crate::resolve::{NodeDescriptor, ResolvedSocket};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::Command;

/// Canonical liveness reply.
pub const PONG: &str = "PONG";

/// Token scanned for in cluster-status introspection output.
pub const CONVERGED_TOKEN: &str = "cluster_state:ok";

/// Whether introspection output reports a converged cluster.
pub fn is_converged(info: &str) -> bool {
    info.lines().any(|line| line.trim() == CONVERGED_TOKEN)
}

/// One parsed protocol reply. Error replies are data, not `Err`: whether
/// `-LOADING` is fatal depends on who asked (a liveness probe retries it,
/// an AUTH exchange does not).
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    Simple(String),
    Bulk(String),
    Array(Vec<String>),
    ErrorReply(String),
    Null,
}

/// Captured result of a CLI subprocess invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Whether the process exited zero.
    pub success: bool,
    /// Exit code, if the process exited at all.
    pub code: Option<i32>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

/// Administrative channel to a store node.
///
/// Cheap to clone; a fresh connection (or subprocess) is made per call,
/// which is the right trade for a bootstrap path that talks to each peer a
/// handful of times.
#[derive(Debug, Clone)]
pub enum AdminChannel {
    /// Inline plaintext exchanges.
    Inline {
        /// Credential sent via AUTH before the command, when present.
        password: Option<String>,
        /// Deadline for one connect-and-exchange round trip.
        op_timeout: Duration,
    },
    /// Exchanges via the store CLI subprocess.
    Cli(AdminCli),
}

impl AdminChannel {
    /// Build the channel the configuration calls for: CLI when TLS is on,
    /// inline otherwise.
    pub fn from_config(config: &CorralConfig) -> Self {
        if config.tls.enabled {
            AdminChannel::Cli(AdminCli::from_config(config))
        } else {
            AdminChannel::Inline {
                password: config.auth.client_password().map(|p| p.to_string()),
                op_timeout: Duration::from_secs(5),
            }
        }
    }

    /// Liveness ping. Ready means the reply is exactly [`PONG`].
    pub async fn ping(&self, host: &str, port: u16) -> Result<()> {
        let target = format!("{}:{}", host, port);
        let reply = match self {
            AdminChannel::Inline { password, op_timeout } => {
                match inline_command(host, port, password.as_deref(), *op_timeout, &["PING"]).await?
                {
                    // A node that answers with an error (still loading,
                    // failing over) is probed again, not given up on.
                    Reply::ErrorReply(reason) => {
                        return Err(CorralError::UnexpectedReply { target, reply: reason })
                    }
                    reply => reply_text(reply),
                }
            }
            AdminChannel::Cli(cli) => {
                let out = cli.invoke(Some((host, port)), &["PING"]).await?;
                if !out.success {
                    return Err(CorralError::Connection {
                        target,
                        reason: first_line(&out.stderr),
                    });
                }
                out.stdout.trim().to_string()
            }
        };

        if reply == PONG {
            Ok(())
        } else {
            Err(CorralError::UnexpectedReply { target, reply })
        }
    }

    /// Cluster-status introspection text.
    pub async fn cluster_info(&self, host: &str, port: u16) -> Result<String> {
        match self {
            AdminChannel::Inline { password, op_timeout } => {
                match inline_command(
                    host,
                    port,
                    password.as_deref(),
                    *op_timeout,
                    &["CLUSTER", "INFO"],
                )
                .await?
                {
                    Reply::ErrorReply(reason) => Err(CorralError::Protocol {
                        target: format!("{}:{}", host, port),
                        reason,
                    }),
                    reply => Ok(reply_text(reply)),
                }
            }
            AdminChannel::Cli(cli) => {
                let out = cli.invoke(Some((host, port)), &["CLUSTER", "INFO"]).await?;
                if !out.success {
                    return Err(CorralError::Connection {
                        target: format!("{}:{}", host, port),
                        reason: first_line(&out.stderr),
                    });
                }
                Ok(out.stdout)
            }
        }
    }

    /// Discovery lookup: `(host, port)` of the named group's active leader.
    pub async fn leader_for(
        &self,
        endpoint: &NodeDescriptor,
        group: &str,
    ) -> Result<(String, u16)> {
        let target = endpoint.to_string();
        let lines: Vec<String> = match self {
            AdminChannel::Inline { password, op_timeout } => {
                let reply = inline_command(
                    &endpoint.host,
                    endpoint.port,
                    password.as_deref(),
                    *op_timeout,
                    &["SENTINEL", "get-master-addr-by-name", group],
                )
                .await?;
                match reply {
                    Reply::Array(items) => items,
                    Reply::Null => Vec::new(),
                    other => {
                        return Err(CorralError::UnexpectedReply {
                            target,
                            reply: reply_text(other),
                        })
                    }
                }
            }
            AdminChannel::Cli(cli) => {
                let out = cli
                    .invoke(
                        Some((&endpoint.host, endpoint.port)),
                        &["SENTINEL", "get-master-addr-by-name", group],
                    )
                    .await?;
                if !out.success {
                    return Err(CorralError::Connection {
                        target,
                        reason: first_line(&out.stderr),
                    });
                }
                out.stdout
                    .lines()
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect()
            }
        };

        match lines.as_slice() {
            [host, port] => {
                let port = port.parse().map_err(|_| CorralError::Protocol {
                    target: target.clone(),
                    reason: format!("non-numeric port {:?} for group {:?}", port, group),
                })?;
                Ok((host.clone(), port))
            }
            _ => Err(CorralError::Protocol {
                target,
                reason: format!("group {:?} has no active leader", group),
            }),
        }
    }
}

/// Flatten a reply into display text for matching and error messages.
fn reply_text(reply: Reply) -> String {
    match reply {
        Reply::Simple(s) | Reply::Bulk(s) | Reply::ErrorReply(s) => s,
        Reply::Array(items) => items.join("\n"),
        Reply::Null => String::new(),
    }
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or("").trim().to_string()
}

/// One inline request/response round trip, deadline-bounded end to end.
async fn inline_command(
    host: &str,
    port: u16,
    password: Option<&str>,
    op_timeout: Duration,
    args: &[&str],
) -> Result<Reply> {
    let target = format!("{}:{}", host, port);
    let exchange = async {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| CorralError::Connection {
                target: target.clone(),
                reason: e.to_string(),
            })?;
        let mut stream = BufReader::new(stream);

        if let Some(password) = password {
            write_command(&mut stream, &["AUTH", password]).await?;
            match read_reply(&mut stream, &target).await? {
                Reply::Simple(ok) if ok == "OK" => {}
                other => {
                    return Err(CorralError::Protocol {
                        target: target.clone(),
                        reason: format!("authentication refused: {}", reply_text(other)),
                    })
                }
            }
        }

        write_command(&mut stream, args).await?;
        read_reply(&mut stream, &target).await
    };

    tokio::time::timeout(op_timeout, exchange)
        .await
        .map_err(|_| CorralError::Timeout(op_timeout.as_millis() as u64))?
}

/// Encode a command as an array of bulk strings.
async fn write_command(stream: &mut BufReader<TcpStream>, args: &[&str]) -> Result<()> {
    let mut buf = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        buf.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        buf.extend_from_slice(arg.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    stream.get_mut().write_all(&buf).await?;
    Ok(())
}

async fn read_line(stream: &mut BufReader<TcpStream>, target: &str) -> Result<String> {
    let mut line = String::new();
    let n = stream.read_line(&mut line).await?;
    if n == 0 {
        return Err(CorralError::Connection {
            target: target.to_string(),
            reason: "connection closed mid-reply".into(),
        });
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Parse one reply. Array elements are expected to be bulk or simple
/// strings, which covers every exchange Corral performs.
async fn read_reply(stream: &mut BufReader<TcpStream>, target: &str) -> Result<Reply> {
    let line = read_line(stream, target).await?;
    if line.is_empty() {
        return Err(CorralError::Protocol {
            target: target.to_string(),
            reason: "empty reply line".into(),
        });
    }
    let (kind, rest) = line.split_at(1);

    match kind {
        "+" => Ok(Reply::Simple(rest.to_string())),
        ":" => Ok(Reply::Simple(rest.to_string())),
        "-" => Ok(Reply::ErrorReply(rest.to_string())),
        "$" => {
            let len: i64 = rest.parse().map_err(|_| CorralError::Protocol {
                target: target.to_string(),
                reason: format!("bad bulk length {:?}", rest),
            })?;
            if len < 0 {
                return Ok(Reply::Null);
            }
            let mut buf = vec![0u8; len as usize + 2];
            stream.read_exact(&mut buf).await?;
            buf.truncate(len as usize);
            Ok(Reply::Bulk(String::from_utf8_lossy(&buf).into_owned()))
        }
        "*" => {
            let count: i64 = rest.parse().map_err(|_| CorralError::Protocol {
                target: target.to_string(),
                reason: format!("bad array length {:?}", rest),
            })?;
            if count < 0 {
                return Ok(Reply::Null);
            }
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                match Box::pin(read_reply(stream, target)).await? {
                    Reply::Simple(s) | Reply::Bulk(s) => items.push(s),
                    Reply::Null => items.push(String::new()),
                    other => {
                        return Err(CorralError::Protocol {
                            target: target.to_string(),
                            reason: format!("unexpected array element: {}", reply_text(other)),
                        })
                    }
                }
            }
            Ok(Reply::Array(items))
        }
        other => Err(CorralError::Protocol {
            target: target.to_string(),
            reason: format!("unknown reply marker {:?}", other),
        }),
    }
}

/// Store CLI invoker: connection flags are derived once from configuration,
/// per-call arguments are appended.
#[derive(Debug, Clone)]
pub struct AdminCli {
    binary: PathBuf,
    password: Option<String>,
    tls_args: Vec<String>,
    /// Deadline for one subprocess invocation.
    pub timeout: Duration,
}

impl AdminCli {
    /// Derive CLI flags from the configuration bundle.
    pub fn from_config(config: &CorralConfig) -> Self {
        let mut tls_args = Vec::new();
        if config.tls.enabled {
            tls_args.push("--tls".to_string());
            if let Some(cert) = &config.tls.cert_file {
                tls_args.push("--cert".to_string());
                tls_args.push(cert.display().to_string());
            }
            if let Some(key) = &config.tls.key_file {
                tls_args.push("--key".to_string());
                tls_args.push(key.display().to_string());
            }
            if let Some(ca) = &config.tls.ca_file {
                tls_args.push("--cacert".to_string());
                tls_args.push(ca.display().to_string());
            } else if let Some(dir) = &config.tls.ca_dir {
                tls_args.push("--cacertdir".to_string());
                tls_args.push(dir.display().to_string());
            }
        }

        Self {
            binary: config.store.cli.clone(),
            password: config.auth.client_password().map(|p| p.to_string()),
            tls_args,
            timeout: Duration::from_secs(60),
        }
    }

    /// Build a CLI invoker for tests or bespoke binaries.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            password: None,
            tls_args: Vec::new(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Run the CLI against an optional target with the given arguments,
    /// capturing output. A failed spawn is an error; a non-zero exit is
    /// reported through [`CommandOutput::success`] for the caller to judge.
    pub async fn invoke(&self, target: Option<(&str, u16)>, args: &[&str]) -> Result<CommandOutput> {
        let mut command = Command::new(&self.binary);
        if let Some((host, port)) = target {
            command.arg("-h").arg(host).arg("-p").arg(port.to_string());
        }
        if let Some(password) = &self.password {
            command.arg("--no-auth-warning").arg("-a").arg(password);
        }
        command.args(&self.tls_args);
        command.args(args);
        command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        command.kill_on_drop(true);

        let invocation = async {
            let output = command.output().await.map_err(|e| CorralError::Internal(format!(
                "failed to spawn {}: {}",
                self.binary.display(),
                e
            )))?;
            Ok(CommandOutput {
                success: output.status.success(),
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        };

        tokio::time::timeout(self.timeout, invocation)
            .await
            .map_err(|_| CorralError::Timeout(self.timeout.as_millis() as u64))?
    }

    /// Issue the one-shot cluster-formation command: every resolved socket,
    /// the replica factor, and the non-interactive confirmation flag.
    pub async fn create_cluster(
        &self,
        sockets: &[ResolvedSocket],
        replicas_per_master: u32,
    ) -> Result<CommandOutput> {
        let rendered: Vec<String> = sockets.iter().map(|s| s.to_string()).collect();
        let mut args: Vec<&str> = vec!["--cluster", "create"];
        args.extend(rendered.iter().map(|s| s.as_str()));
        let replicas = replicas_per_master.to_string();
        args.push("--cluster-replicas");
        args.push(&replicas);
        args.push("--cluster-yes");

        tracing::info!(
            nodes = sockets.len(),
            replicas_per_master,
            "issuing cluster formation"
        );
        self.invoke(None, &args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpListener;

    #[test]
    fn test_convergence_predicate() {
        let ok = "cluster_enabled:1\r\ncluster_state:ok\r\ncluster_slots_assigned:16384\r\n";
        assert!(is_converged(ok));

        let fail = "cluster_enabled:1\r\ncluster_state:fail\r\n";
        assert!(!is_converged(fail));

        // Token must be the whole line, not a substring of another field.
        let tricky = "cluster_state:fail\r\nprev_cluster_state:okish\r\n";
        assert!(!is_converged(tricky));
    }

    /// Bind a listener that answers the first command with `reply`.
    async fn one_shot_server(reply: &'static [u8]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = stream.read(&mut buf).await.unwrap();
            stream.write_all(reply).await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn test_inline_ping() {
        let port = one_shot_server(b"+PONG\r\n").await;

        let channel = AdminChannel::Inline {
            password: None,
            op_timeout: Duration::from_secs(2),
        };
        channel.ping("127.0.0.1", port).await.unwrap();
    }

    #[tokio::test]
    async fn test_inline_ping_wrong_reply() {
        let port = one_shot_server(b"+LOADING\r\n").await;

        let channel = AdminChannel::Inline {
            password: None,
            op_timeout: Duration::from_secs(2),
        };
        let err = channel.ping("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, CorralError::UnexpectedReply { .. }));
    }

    #[tokio::test]
    async fn test_inline_bulk_reply() {
        let port = one_shot_server(b"$20\r\ncluster_state:ok\r\nxx\r\n").await;

        let channel = AdminChannel::Inline {
            password: None,
            op_timeout: Duration::from_secs(2),
        };
        let info = channel.cluster_info("127.0.0.1", port).await.unwrap();
        assert!(is_converged(&info));
    }

    #[tokio::test]
    async fn test_inline_discovery_reply() {
        let port = one_shot_server(b"*2\r\n$8\r\n10.0.0.7\r\n$4\r\n6379\r\n").await;

        let channel = AdminChannel::Inline {
            password: None,
            op_timeout: Duration::from_secs(2),
        };
        let endpoint = NodeDescriptor::parse(&format!("127.0.0.1:{}", port), port).unwrap();
        let (host, leader_port) = channel.leader_for(&endpoint, "primary").await.unwrap();
        assert_eq!(host, "10.0.0.7");
        assert_eq!(leader_port, 6379);
    }

    #[tokio::test]
    async fn test_inline_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let channel = AdminChannel::Inline {
            password: None,
            op_timeout: Duration::from_secs(2),
        };
        let err = channel.ping("127.0.0.1", port).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
