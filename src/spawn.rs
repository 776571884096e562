//! Starting child workers for RUN and RUN_WAIT.
//!
//! A child worker is this same executable started again in worker mode. It
//! gets its own session and reports to the same supervisor.

use crate::config::WorkerConfig;
use anyhow::Context as _;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Starts worker processes.
pub trait Spawner {
    fn spawn(&mut self, sequence: &Path, loops: u32) -> io::Result<Box<dyn ChildWorker>>;
}

/// Handle to a running child worker.
#[async_trait(?Send)]
pub trait ChildWorker {
    /// Wait for the worker to exit. `true` means it exited successfully.
    async fn wait(&mut self) -> io::Result<bool>;

    /// Terminate the worker without waiting for it.
    fn kill(&mut self) -> io::Result<()>;
}

#[async_trait(?Send)]
impl ChildWorker for Child {
    async fn wait(&mut self) -> io::Result<bool> {
        Ok(Child::wait(self).await?.success())
    }

    fn kill(&mut self) -> io::Result<()> {
        self.start_kill()
    }
}

/// Re-executes the current binary as a worker.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    exe: PathBuf,
    /// Supervisor socket. Without one, children run detached in debug mode.
    socket: Option<PathBuf>,
    config: WorkerConfig,
}

impl ProcessSpawner {
    pub fn new(socket: Option<PathBuf>, config: WorkerConfig) -> anyhow::Result<Self> {
        let exe = std::env::current_exe().context("Failed to locate the current executable")?;
        Ok(Self {
            exe,
            socket,
            config,
        })
    }

    fn command(&self, sequence: &Path, loops: u32) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.arg("--file")
            .arg(sequence)
            .arg("--loops")
            .arg(loops.to_string())
            .args(self.config.to_args());
        match &self.socket {
            Some(socket) => cmd.arg("--worker-socket").arg(socket),
            None => cmd.arg("--debug"),
        };
        cmd.stdin(Stdio::null());
        cmd
    }
}

impl Spawner for ProcessSpawner {
    fn spawn(&mut self, sequence: &Path, loops: u32) -> io::Result<Box<dyn ChildWorker>> {
        let child = self.command(sequence, loops).spawn()?;
        Ok(Box::new(child))
    }
}
