//! The supervisor: collects coordination messages from every worker, keeps
//! the status table and decides when the whole run is over.

use crate::config::SupervisorConfig;
use crate::error::SupervisorError;
use crate::logfile::LogFile;
use crate::message::{Message, MessageSource};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Running,
    Completed,
}

/// Status-table row for one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEntry {
    pub name: String,
    pub status: WorkerStatus,
    pub succeeded: u32,
    pub failed: u32,
    pub total: u32,
    /// Failure messages keyed by loop index.
    pub failures: BTreeMap<u32, Vec<String>>,
}

impl WorkerEntry {
    fn new(name: &str, loops: u32) -> Self {
        Self {
            name: name.to_string(),
            status: WorkerStatus::Running,
            succeeded: 0,
            failed: 0,
            total: loops,
            failures: BTreeMap::new(),
        }
    }

    fn status_line(&self) -> String {
        let status = match self.status {
            WorkerStatus::Running => "running",
            WorkerStatus::Completed => "completed",
        };
        format!(
            "{}: {status}, {} of {} loop(s) done, {} passed, {} failed",
            self.name,
            self.succeeded + self.failed,
            self.total,
            self.succeeded,
            self.failed
        )
    }
}

/// Status table, in the order workers were started.
#[derive(Debug)]
pub struct SupervisorState {
    workers: Vec<WorkerEntry>,
    max_workers: usize,
    failure_log: LogFile,
}

impl SupervisorState {
    pub fn new(max_workers: usize, failure_log: LogFile) -> Self {
        Self {
            workers: Vec::new(),
            max_workers,
            failure_log,
        }
    }

    pub fn get(&self, name: &str) -> Option<&WorkerEntry> {
        self.workers.iter().find(|w| w.name == name)
    }

    pub fn workers(&self) -> &[WorkerEntry] {
        &self.workers
    }

    pub fn any_running(&self) -> bool {
        self.workers.iter().any(|w| w.status == WorkerStatus::Running)
    }

    /// Fold one message into the table.
    ///
    /// # Errors
    ///
    /// A message other than `worker_run_start` for a worker that was never
    /// started, or a start beyond the worker limit.
    pub fn apply(&mut self, msg: &Message) -> Result<(), SupervisorError> {
        let Some(entry) = self.workers.iter_mut().find(|w| w.name == msg.name()) else {
            return self.start(msg);
        };

        match msg {
            Message::WorkerRunStart { loops, .. } => {
                // the same sequence started again by another RUN
                entry.status = WorkerStatus::Running;
                entry.total += loops;
            }
            Message::WorkerRunComplete { .. } => entry.status = WorkerStatus::Completed,
            Message::LoopResultPass { .. } => entry.succeeded += 1,
            Message::LoopResultFail {
                iteration, msgq, ..
            } => {
                entry.failed += 1;
                entry.failures.insert(*iteration, msgq.clone());
                let text = log_block("FAILURE LOOP", "FAILURE MESSAGES", *iteration, msgq);
                self.failure_log.append(&text);
            }
            Message::NeedRecovery {
                iteration, msgq, ..
            } => {
                let text = log_block("ERROR LOOP", "ERROR MESSAGE", *iteration, msgq);
                self.failure_log.append(&text);
            }
        }
        Ok(())
    }

    fn start(&mut self, msg: &Message) -> Result<(), SupervisorError> {
        let Message::WorkerRunStart { name, loops } = msg else {
            return Err(SupervisorError::UnknownWorker {
                kind: msg.kind(),
                name: msg.name().to_string(),
            });
        };
        if self.workers.len() >= self.max_workers {
            return Err(SupervisorError::TooManyWorkers(self.max_workers));
        }
        self.workers.push(WorkerEntry::new(name, *loops));
        Ok(())
    }

    pub fn status_lines(&self) -> Vec<String> {
        self.workers.iter().map(WorkerEntry::status_line).collect()
    }

    pub fn failure_log_path(&self) -> Option<&Path> {
        self.failure_log.path()
    }

    /// Final per-worker report.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for w in &self.workers {
            let _ = writeln!(
                out,
                "* Sequence [{}]>> Total loops: {}, PASSED: {}, FAILED: {}",
                w.name, w.total, w.succeeded, w.failed
            );
            if !w.failures.is_empty() {
                let loops: Vec<String> = w.failures.keys().map(u32::to_string).collect();
                let _ = writeln!(out, "    failed loops: {}", loops.join(", "));
            }
        }
        if self.failure_log.exists() {
            if let Some(path) = self.failure_log.path() {
                let _ = writeln!(out, "Failure log: {}", path.display());
            }
        }
        out
    }

    pub fn close(&mut self) {
        self.failure_log.close();
    }
}

fn log_block(loop_label: &str, messages_label: &str, iteration: u32, msgq: &[String]) -> String {
    let mut text = format!("\n{loop_label}: {iteration}\n{messages_label}:\n");
    for line in msgq {
        text.push_str(line);
        text.push('\n');
    }
    text
}

/// Polls a message source until no worker is running.
pub struct Supervisor<S> {
    source: S,
    state: SupervisorState,
    config: SupervisorConfig,
}

impl<S: MessageSource> Supervisor<S> {
    pub fn new(source: S, state: SupervisorState, config: SupervisorConfig) -> Self {
        Self {
            source,
            state,
            config,
        }
    }

    pub fn state(&self) -> &SupervisorState {
        &self.state
    }

    pub fn into_state(self) -> SupervisorState {
        self.state
    }

    /// Apply a message that did not arrive through the source, such as the
    /// start of the main worker.
    pub fn handle(&mut self, msg: &Message) {
        debug!("{} from {}", msg.kind(), msg.name());
        if let Err(e) = self.state.apply(msg) {
            warn!("rejected message: {e}");
        }
    }

    /// Take at most one message per tick. Returns once nothing is running and
    /// the source is drained.
    pub async fn run(&mut self) {
        let mut last_status = Vec::new();
        loop {
            if let Some(msg) = self.source.try_recv() {
                self.handle(&msg);
            }

            let status = self.state.status_lines();
            if status != last_status {
                for line in &status {
                    info!("{line}");
                }
                last_status = status;
            }

            if !self.state.any_running() {
                while let Some(msg) = self.source.try_recv() {
                    self.handle(&msg);
                }
                if !self.state.any_running() {
                    break;
                }
            }
            tokio::time::sleep(self.config.tick).await;
        }
        self.state.close();
    }
}
