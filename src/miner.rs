//! Mining client process control
//!
//! The mining client is an external collaborator: scenarios only start it
//! against the pool and stop it again. [`XmrigLauncher`] drives a real
//! `xmrig` binary, leaving a log file and a pid file in the build directory.

use crate::{ConnectionEndpoint, Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Rig identifier the harness mines under
pub const RIG_ID: &str = "monero_pool_int_test";

/// What to mine, where, and at which fixed difficulty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerSpec {
    pub wallet: String,
    pub pool: ConnectionEndpoint,
    pub difficulty: u64,
    pub algorithm: String,
    pub rig_id: String,
    pub build_dir: PathBuf,
}

impl MinerSpec {
    pub fn new(
        wallet: impl Into<String>,
        pool: ConnectionEndpoint,
        difficulty: u64,
        build_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            wallet: wallet.into(),
            pool,
            difficulty,
            algorithm: "rx/0".to_string(),
            rig_id: RIG_ID.to_string(),
            build_dir: build_dir.into(),
        }
    }

    /// Difficulty directive passed as the pool password
    pub fn difficulty_directive(&self) -> String {
        format!("d={}", self.difficulty)
    }
}

/// A running (or pretend) mining client
#[derive(Debug)]
pub struct MinerHandle {
    pub id: Uuid,
    pub pid: Option<u32>,
    pub log_file: PathBuf,
    pub pid_file: PathBuf,
    child: Option<Child>,
}

impl MinerHandle {
    /// Handle with no process behind it
    pub fn detached(id: Uuid, build_dir: &Path) -> Self {
        Self {
            id,
            pid: None,
            log_file: log_file_path(build_dir, id),
            pid_file: pid_file_path(build_dir, id),
            child: None,
        }
    }
}

/// Opaque start/stop control of a mining client
#[async_trait]
pub trait MinerLauncher: Send + Sync {
    async fn start(&self, spec: &MinerSpec) -> Result<MinerHandle>;

    async fn stop(&self, handle: MinerHandle) -> Result<()>;
}

fn log_file_path(build_dir: &Path, id: Uuid) -> PathBuf {
    build_dir.join(format!("xmrig-{}.log", id))
}

fn pid_file_path(build_dir: &Path, id: Uuid) -> PathBuf {
    build_dir.join(format!("xmrig-{}.pid", id))
}

/// Launches the `xmrig` mining client
#[derive(Debug, Clone)]
pub struct XmrigLauncher {
    binary: PathBuf,
}

impl XmrigLauncher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Locate the binary, searching `PATH` when given a bare name
    pub fn resolve_binary(&self) -> Result<PathBuf> {
        if self.binary.components().count() > 1 {
            return if self.binary.is_file() {
                Ok(self.binary.clone())
            } else {
                Err(Error::process(format!(
                    "mining client not found at {}",
                    self.binary.display()
                )))
            };
        }

        std::env::var_os("PATH")
            .iter()
            .flat_map(|paths| std::env::split_paths(paths).collect::<Vec<_>>())
            .map(|dir| dir.join(&self.binary))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                Error::process(format!("{} not found in PATH", self.binary.display()))
            })
    }

    /// Command-line arguments for one run
    pub fn arguments(spec: &MinerSpec, id: Uuid) -> Vec<String> {
        vec![
            format!("--log-file={}", log_file_path(&spec.build_dir, id).display()),
            "--algo".to_string(),
            spec.algorithm.clone(),
            "-u".to_string(),
            spec.wallet.clone(),
            "-o".to_string(),
            format!("localhost:{}", spec.pool.port()),
            "-p".to_string(),
            spec.difficulty_directive(),
            "--rig-id".to_string(),
            spec.rig_id.clone(),
        ]
    }
}

#[async_trait]
impl MinerLauncher for XmrigLauncher {
    async fn start(&self, spec: &MinerSpec) -> Result<MinerHandle> {
        let binary = self.resolve_binary()?;
        let id = Uuid::new_v4();
        let args = Self::arguments(spec, id);

        tokio::fs::create_dir_all(&spec.build_dir).await.map_err(|e| {
            Error::process(format!(
                "cannot create build dir {}: {}",
                spec.build_dir.display(),
                e
            ))
        })?;

        debug!("Spawning {} {:?}", binary.display(), args);

        let child = Command::new(&binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::process(format!("failed to spawn {}: {}", binary.display(), e)))?;

        let mut handle = MinerHandle::detached(id, &spec.build_dir);
        handle.pid = child.id();
        handle.child = Some(child);

        if let Some(pid) = handle.pid {
            tokio::fs::write(&handle.pid_file, pid.to_string()).await?;
        }

        info!(
            "Mining client {} started (pid {:?}) against {} at {}",
            id,
            handle.pid,
            spec.pool,
            spec.difficulty_directive()
        );
        Ok(handle)
    }

    async fn stop(&self, mut handle: MinerHandle) -> Result<()> {
        if let Some(mut child) = handle.child.take() {
            match child.try_wait() {
                Ok(Some(status)) => warn!("Mining client {} had already exited: {}", handle.id, status),
                _ => child
                    .kill()
                    .await
                    .map_err(|e| Error::process(format!("failed to stop {}: {}", handle.id, e)))?,
            }
        }
        info!("Mining client {} stopped", handle.id);
        Ok(())
    }
}
