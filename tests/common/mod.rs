//! Common test utilities for integration tests.

use std::net::TcpListener as StdTcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Find an available port for testing.
pub fn find_available_port() -> u16 {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("failed to bind to port");
    listener.local_addr().unwrap().port()
}

/// Test environment that manages temporary directories and cleanup.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub data_dir: PathBuf,
    pub config_path: PathBuf,
    pub overrides_path: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let data_dir = temp_dir.path().join("data");
        std::fs::create_dir_all(&data_dir).expect("failed to create data dir");
        let config_path = temp_dir.path().join("store.conf");
        let overrides_path = temp_dir.path().join("overrides.conf");

        Self {
            temp_dir,
            data_dir,
            config_path,
            overrides_path,
        }
    }

    /// Write an executable stub standing in for the store CLI. Invocations
    /// append their arguments to `log_name` in the temp dir; the stub
    /// exits with `code`.
    pub fn write_stub_cli(&self, log_name: &str, code: i32) -> (PathBuf, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let log_path = self.temp_dir.path().join(log_name);
        let cli_path = self.temp_dir.path().join(format!("stub-cli-{}", log_name));
        let script = format!("#!/bin/sh\necho \"$@\" >> {}\nexit {}\n", log_path.display(), code);
        std::fs::write(&cli_path, script).expect("failed to write stub cli");
        let mut perms = std::fs::metadata(&cli_path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&cli_path, perms).unwrap();

        (cli_path, log_path)
    }
}

/// A fake store node: answers the liveness ping canonically and reports a
/// configurable cluster state through introspection.
pub struct FakeNode {
    pub port: u16,
    converged: Arc<AtomicBool>,
}

impl FakeNode {
    /// Start a node with a fixed convergence state.
    pub async fn start(converged: bool) -> Self {
        Self::start_with(Arc::new(AtomicBool::new(converged))).await
    }

    /// Start a node whose convergence state can be flipped mid-test.
    pub async fn start_with(converged: Arc<AtomicBool>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::clone(&converged);

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let mut buf = [0u8; 512];
                    loop {
                        let Ok(n) = stream.read(&mut buf).await else {
                            return;
                        };
                        if n == 0 {
                            return;
                        }
                        let request = String::from_utf8_lossy(&buf[..n]).to_uppercase();
                        let reply: Vec<u8> = if request.contains("PING") {
                            b"+PONG\r\n".to_vec()
                        } else if request.contains("CLUSTER") {
                            let status = if state.load(Ordering::SeqCst) {
                                "cluster_enabled:1\r\ncluster_state:ok\r\n"
                            } else {
                                "cluster_enabled:1\r\ncluster_state:fail\r\n"
                            };
                            format!("${}\r\n{}\r\n", status.len(), status).into_bytes()
                        } else {
                            b"-ERR unknown command\r\n".to_vec()
                        };
                        if stream.write_all(&reply).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        Self { port, converged }
    }

    /// Flip the reported convergence state.
    pub fn set_converged(&self, converged: bool) {
        self.converged.store(converged, Ordering::SeqCst);
    }

    /// Target string for this node.
    pub fn descriptor(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }
}
