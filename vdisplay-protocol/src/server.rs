//! Display server process lifecycle
//!
//! The server is a separate executable listening on a loopback port. It
//! is managed only through process primitives (copy, kill, spawn) run by
//! a [`CommandRunner`], and its liveness is judged by a TCP connect.

use crate::{DisplayError, Result, DEFAULT_SERVER_PORT};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

/// Exit status of `pkill` when no process matched
const PKILL_NO_MATCH: i32 = 1;

/// Output of a host shell command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, `None` if killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs shell command lines on the host
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command`. `Err` means it could not be executed at all.
    async fn run(&self, command: &str) -> Result<CommandOutput>;
}

/// Runs commands through a local shell (`sh -c` by default, `su -c` on
/// rooted devices)
#[derive(Debug, Clone)]
pub struct LocalShell {
    program: String,
    args: Vec<String>,
}

impl LocalShell {
    /// Build from a shell invocation such as `["su", "-c"]`
    pub fn new(shell: &[String]) -> Self {
        match shell.split_first() {
            Some((program, args)) => Self {
                program: program.clone(),
                args: args.to_vec(),
            },
            None => Self::default(),
        }
    }
}

impl Default for LocalShell {
    fn default() -> Self {
        Self {
            program: "sh".to_string(),
            args: vec!["-c".to_string()],
        }
    }
}

#[async_trait]
impl CommandRunner for LocalShell {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        debug!("$ {}", command);
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Server lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Host the server listens on
    pub host: String,
    /// Port the server listens on
    pub port: u16,
    /// Liveness check connect timeout in milliseconds
    pub liveness_timeout_ms: u64,
    /// Interval between liveness checks while waiting for startup, in milliseconds
    pub poll_interval_ms: u64,
    /// Total startup wait in milliseconds
    pub start_timeout_ms: u64,
    /// Packaged server executable
    pub binary_path: PathBuf,
    /// Host storage the executable is materialized into
    pub staging_dir: PathBuf,
    /// Location the server process is launched from
    pub install_dir: PathBuf,
    /// Executable and process name
    pub process_name: String,
    /// Shell invocation used for process management
    pub shell: Vec<String>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        let process_name = "vdisplay-server".to_string();
        let data_dir = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
        let staging_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("vdisplay");

        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_SERVER_PORT,
            liveness_timeout_ms: 300,
            poll_interval_ms: 200,
            start_timeout_ms: 10_000,
            binary_path: data_dir.join("vdisplay").join(&process_name),
            staging_dir,
            install_dir: PathBuf::from("/data/local/tmp"),
            process_name,
            shell: vec!["sh".to_string(), "-c".to_string()],
        }
    }
}

impl LifecycleConfig {
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    /// Path the server is launched from
    pub fn installed_path(&self) -> PathBuf {
        self.install_dir.join(&self.process_name)
    }
}

/// Quote a string for POSIX shells
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn path_arg(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

/// Keeps exactly one display server running
pub struct ServerLifecycleManager {
    config: LifecycleConfig,
    runner: Arc<dyn CommandRunner>,
}

impl ServerLifecycleManager {
    pub fn new(config: LifecycleConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Whether something accepts connections on the server port
    pub async fn is_running(&self) -> bool {
        let addr = (self.config.host.as_str(), self.config.port);
        matches!(
            timeout(self.config.liveness_timeout(), TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }

    /// Make sure a server is reachable, starting one if needed.
    ///
    /// Returns immediately if the port already answers; otherwise stages,
    /// restarts and polls until the port answers or the startup bound
    /// passes.
    pub async fn ensure_running(&self) -> bool {
        if self.is_running().await {
            debug!(
                "Display server already listening on port {}",
                self.config.port
            );
            return true;
        }

        info!(
            "Display server not reachable on port {}, starting it",
            self.config.port
        );
        if let Err(e) = self.launch().await {
            error!("Failed to launch display server: {}", e);
            return false;
        }

        self.wait_until_running().await
    }

    /// Terminate the server process.
    ///
    /// Reports whether the kill command ran, not whether a process was found.
    pub async fn stop_server(&self) -> bool {
        info!("Stopping display server");
        match self.runner.run(&self.kill_command()).await {
            Ok(output) => {
                debug!("Kill exited with {:?}", output.code);
                true
            }
            Err(e) => {
                warn!("Failed to run kill command: {}", e);
                false
            }
        }
    }

    fn kill_command(&self) -> String {
        format!("pkill -f {}", shell_quote(&self.config.process_name))
    }

    async fn launch(&self) -> Result<()> {
        let staged = self.stage_binary().await?;
        self.kill_existing().await?;

        let installed = self.config.installed_path();
        self.run_checked(&format!(
            "mkdir -p {dir} && cp {src} {dst} && chmod 755 {dst}",
            dir = path_arg(&self.config.install_dir),
            src = path_arg(&staged),
            dst = path_arg(&installed),
        ))
        .await?;

        self.runner
            .run(&format!(
                "nohup {} > /dev/null 2>&1 &",
                path_arg(&installed)
            ))
            .await?;

        info!("Launched display server from {}", installed.display());
        Ok(())
    }

    /// Copy the packaged executable onto host storage, overwriting any
    /// previous copy
    async fn stage_binary(&self) -> Result<PathBuf> {
        let source = &self.config.binary_path;
        if !tokio::fs::try_exists(source).await? {
            return Err(DisplayError::Server(format!(
                "Server executable not found at {}",
                source.display()
            )));
        }

        tokio::fs::create_dir_all(&self.config.staging_dir).await?;
        let target = self.config.staging_dir.join(&self.config.process_name);
        let bytes = tokio::fs::copy(source, &target).await?;

        debug!("Staged server executable ({} bytes) at {}", bytes, target.display());
        Ok(target)
    }

    async fn kill_existing(&self) -> Result<()> {
        let output = self.runner.run(&self.kill_command()).await?;
        match output.code {
            Some(0) => debug!("Terminated previous display server"),
            Some(PKILL_NO_MATCH) => debug!("No previous display server running"),
            code => warn!(
                "Kill command exited with {:?}: {}",
                code,
                output.stderr.trim()
            ),
        }
        Ok(())
    }

    async fn run_checked(&self, command: &str) -> Result<CommandOutput> {
        let output = self.runner.run(command).await?;
        if !output.success() {
            return Err(DisplayError::Server(format!(
                "`{}` exited with {:?}: {}",
                command,
                output.code,
                output.stderr.trim()
            )));
        }
        Ok(output)
    }

    async fn wait_until_running(&self) -> bool {
        let deadline = Instant::now() + self.config.start_timeout();

        loop {
            if self.is_running().await {
                info!("Display server is up on port {}", self.config.port);
                return true;
            }
            if Instant::now() >= deadline {
                warn!(
                    "Display server did not come up within {:?}",
                    self.config.start_timeout()
                );
                return false;
            }
            sleep(self.config.poll_interval()).await;
        }
    }
}
