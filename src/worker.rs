//! The sequence worker: runs a parsed sequence for a number of loops,
//! classifies every command result and drives recovery.
//!
//! Each loop is one pass over the top-level commands:
//!
//! - expect and escape failures are recorded for the loop (or are fatal with
//!   `stop_on_failure`),
//! - timeouts and builtin errors are fatal,
//! - anything else is an environment failure: children are killed, the
//!   session is closed and the loop starts over, within a retry budget.
//!
//! `LOOP` runs a subsequence as a nested frame with its own round counter and
//! failure list. Its failures are handed to the enclosing frame, and an
//! environment failure inside it unwinds to the top-level loop.

use crate::command::{Command, Context};
use crate::config::WorkerConfig;
use crate::error::{CommandError, Outcome, TransportError, WorkerError};
use crate::logfile::{ERROR_DUMP_BANNER, LogFile, LogKind, log_path};
use crate::message::{Message, MessageSink};
use crate::parser::{SequenceFile, parse_file, sequence_name};
use crate::session::Session;
use crate::spawn::{ChildWorker, Spawner};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Pause after killing each child worker.
const CHILD_KILL_SETTLE: Duration = Duration::from_millis(100);

const TRANSCRIPT_BANNER: &str = "*************SEQUENCE LOGGING***************";

/// Retry budget for recoveries, scoped to one loop index.
///
/// The budget is refilled whenever recovery happens at a new loop index and
/// shrinks while it keeps happening at the same one.
#[derive(Debug, Clone)]
pub struct RecoveryTracker {
    max: u32,
    budget: u32,
    last_loop: Option<u32>,
}

impl RecoveryTracker {
    pub fn new(max: u32) -> Self {
        Self {
            max,
            budget: max,
            last_loop: None,
        }
    }

    /// Account for a recovery at `iteration`. `false` means the budget is
    /// spent and the worker must give up.
    pub fn record(&mut self, iteration: u32) -> bool {
        if self.last_loop == Some(iteration) {
            self.budget = self.budget.saturating_sub(1);
        } else {
            self.budget = self.max;
            self.last_loop = Some(iteration);
        }
        self.budget > 0
    }

    pub fn remaining(&self) -> u32 {
        self.budget
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}

/// Transcript log for a worker, or a disabled log when logging is off.
pub fn transcript(config: &WorkerConfig, name: &str) -> LogFile {
    if !config.logging_enabled {
        return LogFile::disabled();
    }
    LogFile::new(
        log_path(&config.log_dir, name, LogKind::Transcript),
        TRANSCRIPT_BANNER,
    )
}

fn error_dump(config: &WorkerConfig, path: &Path) -> LogFile {
    let name = sequence_name(path);
    LogFile::new(
        log_path(&config.log_dir, &name, LogKind::ErrorDump),
        format!("{ERROR_DUMP_BANNER}\n\nTEST SEQUENCE: {}\n", path.display()),
    )
}

pub struct Worker {
    name: String,
    path: PathBuf,
    sequence: Arc<SequenceFile>,
    session: Session,
    sink: Box<dyn MessageSink>,
    spawner: Box<dyn Spawner>,
    config: WorkerConfig,
    /// Running RUN children, with the sequence name each one reports as.
    children: Vec<(String, Box<dyn ChildWorker>)>,
    recovery: RecoveryTracker,
    error_dump: LogFile,
    /// Failures recorded by nested frames, not yet claimed by their parent.
    carried: Vec<String>,
    /// Formatted context of the innermost command that failed.
    failure_info: Option<String>,
    /// Current top-level loop, 1-based.
    iteration: u32,
    stopped: bool,
}

impl Worker {
    pub fn new(
        sequence: SequenceFile,
        session: Session,
        sink: Box<dyn MessageSink>,
        spawner: Box<dyn Spawner>,
        config: WorkerConfig,
    ) -> Self {
        let name = sequence.name();
        let path = sequence.path.clone();
        Self {
            error_dump: error_dump(&config, &path),
            recovery: RecoveryTracker::new(config.recovery_retry),
            name,
            path,
            sequence: Arc::new(sequence),
            session,
            sink,
            spawner,
            config,
            children: Vec::new(),
            carried: Vec::new(),
            failure_info: None,
            iteration: 0,
            stopped: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Run every loop, then stop. The worker reports its own results; the
    /// returned error only tells the caller how it ended.
    pub async fn run(&mut self, loops: u32) -> Result<(), WorkerError> {
        info!(
            "[{}] running {} for {loops} loop(s)",
            self.name,
            self.path.display()
        );
        let result = self.run_loops(loops).await;
        if let Err(err) = &result {
            self.report_fatal(err);
        }
        self.stop().await;
        result
    }

    async fn run_loops(&mut self, loops: u32) -> Result<(), WorkerError> {
        let commands = self.sequence.commands.clone();
        for iteration in 1..=loops {
            self.iteration = iteration;
            self.children.clear();
            loop {
                match self.pass(&commands).await {
                    Ok(failures) => {
                        self.report_loop(iteration, loops, failures)?;
                        break;
                    }
                    Err(err) => match err.outcome(self.config.recover_on_timeout) {
                        Outcome::NeedsRecovery => self.recover(iteration, err).await?,
                        _ => return Err(err.into()),
                    },
                }
            }
        }
        Ok(())
    }

    /// Run `commands` once. Returns the failures recorded on the way, or the
    /// first failure that cannot just be recorded.
    async fn pass(&mut self, commands: &[Arc<Command>]) -> Result<Vec<String>, CommandError> {
        let mut failures = Vec::new();
        for cmd in commands {
            debug!("[{}] {cmd}", self.name);
            let result = {
                let mut ctx = Context::new(self);
                cmd.execute(&mut ctx).await
            };
            failures.append(&mut self.carried);

            let Err(err) = result else {
                continue;
            };
            let outcome = err.outcome(self.config.recover_on_timeout);
            if outcome == Outcome::ExpectFail && !self.config.stop_on_failure {
                warn!("[{}] loop {}: {err}", self.name, self.iteration);
                failures.push(self.error_info(cmd, &err));
                continue;
            }
            if self.failure_info.is_none() {
                self.failure_info = Some(self.error_info(cmd, &err));
            }
            return Err(err);
        }
        Ok(failures)
    }

    /// Run a subsequence `loops` times as a nested frame.
    pub(crate) async fn run_nested(
        &mut self,
        commands: Vec<Arc<Command>>,
        loops: u32,
    ) -> Result<String, CommandError> {
        for round in 1..=loops {
            debug!("[{}] subsequence round {round}/{loops}", self.name);
            let mut failures = self.pass(&commands).await?;
            self.carried.append(&mut failures);
        }
        Ok(String::new())
    }

    pub(crate) fn subsequence(&self, symbol: &str) -> Option<Vec<Arc<Command>>> {
        self.sequence.subsequence(symbol).map(<[_]>::to_vec)
    }

    /// A relative sequence without a directory part lives next to this one.
    pub(crate) fn resolve_sequence(&self, file: &str) -> PathBuf {
        let file = Path::new(file);
        if file.is_absolute() || file.components().count() > 1 {
            return file.to_path_buf();
        }
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(file),
            _ => file.to_path_buf(),
        }
    }

    /// Register and start a child worker. The start message goes out first so
    /// the supervisor knows the child before the child reports anything.
    pub(crate) async fn spawn_child(
        &mut self,
        path: &Path,
        loops: u32,
        wait: bool,
    ) -> Result<String, CommandError> {
        let name = sequence_name(path);
        self.sink.send(&Message::WorkerRunStart {
            name: name.clone(),
            loops,
        })?;

        let mut child = match self.spawner.spawn(path, loops) {
            Ok(child) => child,
            Err(e) => {
                self.sink.send(&Message::WorkerRunComplete { name })?;
                return Err(CommandError::Builtin(format!(
                    "cannot start worker for {}: {e}",
                    path.display()
                )));
            }
        };
        info!("[{}] started worker {name} for {loops} loop(s)", self.name);

        if wait {
            let success = child
                .wait()
                .await
                .map_err(|e| CommandError::Builtin(format!("waiting for worker {name}: {e}")))?;
            if !success {
                warn!("[{}] worker {name} did not exit cleanly", self.name);
            }
        } else {
            self.children.push((name, child));
        }
        Ok(String::new())
    }

    async fn recover(&mut self, iteration: u32, err: CommandError) -> Result<(), WorkerError> {
        let info = self.failure_info.take().unwrap_or_else(|| err.to_string());
        self.error_dump.append(&format!(
            "\nERROR INFO:\n{info}\nSESSION INFO:\n{}\n",
            self.session.describe()
        ));

        if !self.recovery.record(iteration) {
            return Err(WorkerError::RecoveryExhausted {
                retries: self.recovery.max(),
                iteration,
            });
        }
        warn!(
            "[{}] loop {iteration}: {err}, restarting the loop ({} retries left)",
            self.name,
            self.recovery.remaining()
        );

        self.sink.send(&Message::NeedRecovery {
            name: self.name.clone(),
            iteration,
            msgq: vec![info],
        })?;
        self.kill_children().await?;
        self.session.close().await;
        Ok(())
    }

    /// Kill every running child and report it complete on its behalf, since a
    /// killed worker cannot report anything itself.
    async fn kill_children(&mut self) -> Result<(), TransportError> {
        for (name, mut child) in std::mem::take(&mut self.children) {
            match child.kill() {
                Ok(()) => debug!("[{}] killed worker {name}", self.name),
                Err(e) => warn!("[{}] cannot kill worker {name}: {e}", self.name),
            }
            tokio::time::sleep(CHILD_KILL_SETTLE).await;
            self.sink.send(&Message::WorkerRunComplete { name })?;
        }
        Ok(())
    }

    fn report_loop(
        &mut self,
        iteration: u32,
        loops: u32,
        failures: Vec<String>,
    ) -> Result<(), TransportError> {
        let name = self.name.clone();
        let msg = if failures.is_empty() {
            info!("[{name}] loop {iteration}/{loops} passed");
            Message::LoopResultPass { name, iteration }
        } else {
            warn!(
                "[{name}] loop {iteration}/{loops} failed with {} failure(s)",
                failures.len()
            );
            Message::LoopResultFail {
                name,
                iteration,
                msgq: failures,
            }
        };
        self.sink.send(&msg)
    }

    fn report_fatal(&mut self, err: &WorkerError) {
        error!("[{}] {err}", self.name);
        let info = self.failure_info.take().unwrap_or_else(|| {
            format!(
                "{err}\nSession: {}\nSequence: {}\nLoop: {}",
                self.session.describe(),
                self.path.display(),
                self.iteration
            )
        });

        // A transport failure cannot be reported over the same transport.
        if !matches!(err, WorkerError::Transport(_)) {
            let msg = Message::LoopResultFail {
                name: self.name.clone(),
                iteration: self.iteration,
                msgq: vec![info.clone()],
            };
            if let Err(e) = self.sink.send(&msg) {
                error!("[{}] cannot report failure: {e}", self.name);
            }
        }

        let detail = match err {
            WorkerError::Command(cmd_err) => cmd_err.dump(),
            other => format!("{other}\n"),
        };
        self.error_dump.append(&format!(
            "\nDUMP ERROR INFO:\n{info}\n\n{detail}\nSESSION INFO:\n{}\n",
            self.session.describe()
        ));
    }

    fn error_info(&self, cmd: &Command, err: &CommandError) -> String {
        format!(
            "{err}\nCommand: {cmd}\nSession: {}\nSequence: {}\nLoop: {}",
            self.session.describe(),
            self.path.display(),
            self.iteration
        )
    }

    /// Report completion, then release the session and logs. Safe to call
    /// more than once.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        let msg = Message::WorkerRunComplete {
            name: self.name.clone(),
        };
        if let Err(e) = self.sink.send(&msg) {
            error!("[{}] cannot report completion: {e}", self.name);
        }
        self.session.shutdown().await;
        self.error_dump.close();
        info!("[{}] stopped", self.name);
    }
}

/// Parse `path` and run it as a worker.
///
/// A sequence that does not parse is reported as a completed worker, with the
/// syntax error in the error dump, so that a supervisor waiting on it can
/// finish.
pub async fn run_worker(
    path: &Path,
    loops: u32,
    session: Session,
    mut sink: Box<dyn MessageSink>,
    spawner: Box<dyn Spawner>,
    config: WorkerConfig,
) -> Result<(), WorkerError> {
    let sequence = match parse_file(path) {
        Ok(sequence) => sequence,
        Err(e) => {
            error!("{}: {e}", path.display());
            let mut dump = error_dump(&config, path);
            dump.append(&format!("\n{e}\n"));
            dump.close();
            let name = sequence_name(path);
            if let Err(te) = sink.send(&Message::WorkerRunComplete { name }) {
                error!("cannot report completion: {te}");
            }
            return Err(e.into());
        }
    };

    let mut worker = Worker::new(sequence, session, sink, spawner, config);
    worker.run(loops).await
}
