//! The command model: [`ShellCommand`], the [`BuiltinCommand`] trait, and the
//! [`Context`] commands receive when executed.

use crate::error::CommandError;
use crate::pattern::Pattern;
use crate::session::Session;
use crate::worker::Worker;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Timeout of a shell command that does not override it.
pub const DEFAULT_SHELL_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout used by builtins that wait on the session (ENTER, PASSWD, FIND).
pub const DEFAULT_BUILTIN_TIMEOUT: Duration = Duration::from_secs(30);

/// A line of text sent to the remote shell, with its completion criteria.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellCommand {
    pub text: String,
    /// Must all be found, in order, before the prompt.
    pub expects: Vec<Pattern>,
    /// Any one of these fails the command immediately.
    pub escapes: Vec<Pattern>,
    /// `None` sends the command without waiting for it to complete.
    pub timeout: Option<Duration>,
    /// Keep the sent text out of logs and skip echo handling.
    pub secret: bool,
    /// Raw top-level fields as written in the sequence file.
    pub args: Vec<String>,
}

impl ShellCommand {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            args: vec![text.clone()],
            text,
            expects: Vec::new(),
            escapes: Vec::new(),
            timeout: Some(DEFAULT_SHELL_TIMEOUT),
            secret: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_expects(mut self, expects: impl IntoIterator<Item = impl Into<Pattern>>) -> Self {
        self.expects = expects.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_escapes(mut self, escapes: impl IntoIterator<Item = impl Into<Pattern>>) -> Self {
        self.escapes = escapes.into_iter().map(Into::into).collect();
        self
    }

    /// Send and return at once.
    pub fn fire_and_forget(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.secret {
            f.write_str("******")
        } else if self.text.is_empty() {
            f.write_str("ENTER")
        } else {
            f.write_str(&self.text)
        }
    }
}

/// Named-range markers. They shape the parsed sequence and never run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Region {
    Open(String),
    Close,
}

/// A builtin control command.
///
/// To add one:
///
/// 1. Define `NAME`, `USAGE`, `DESCRIPTION` and `ARGC` constants on the struct.
/// 2. Re-export the struct from `src/commands/mod.rs`.
/// 3. Add one entry to the `REGISTRY` in [`crate::parser`].
#[async_trait(?Send)]
pub trait BuiltinCommand: 'static {
    /// The token that introduced this command, accessible through a trait object.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Build the command from the arguments following its token. The argument
    /// count has already been checked against the registry entry.
    fn parse(args: &[String]) -> Result<Self, crate::error::SyntaxError>
    where
        Self: Sized;

    /// Parse and box. Used as the function-pointer type of the registry.
    fn parse_boxed(args: &[String]) -> Result<Box<dyn BuiltinCommand>, crate::error::SyntaxError>
    where
        Self: Sized,
    {
        Ok(Box::new(Self::parse(args)?))
    }

    /// Whether the command takes a slot in the command list.
    fn is_sequenced(&self) -> bool {
        true
    }

    fn region(&self) -> Option<Region> {
        None
    }

    /// Subsequence symbol this command needs registered at parse time.
    fn references(&self) -> Option<&str> {
        None
    }

    /// Run the command; the returned string is its output.
    async fn execute(&self, ctx: &mut Context<'_>) -> Result<String, CommandError>;
}

/// One entry of a parsed sequence.
pub enum Command {
    Shell(ShellCommand),
    Builtin(Box<dyn BuiltinCommand>),
}

impl Command {
    pub fn is_sequenced(&self) -> bool {
        match self {
            Command::Shell(_) => true,
            Command::Builtin(b) => b.is_sequenced(),
        }
    }

    /// Builtin token, or `None` for shell commands.
    pub fn builtin_name(&self) -> Option<&'static str> {
        match self {
            Command::Shell(_) => None,
            Command::Builtin(b) => Some(b.name()),
        }
    }

    pub async fn execute(&self, ctx: &mut Context<'_>) -> Result<String, CommandError> {
        match self {
            Command::Shell(shell) => ctx.session().run(shell).await,
            Command::Builtin(builtin) => builtin.execute(ctx).await,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Shell(shell) => shell.fmt(f),
            Command::Builtin(b) => write!(f, "{}: {}", b.name(), b.description()),
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Shell(shell) => f.debug_tuple("Shell").field(shell).finish(),
            Command::Builtin(b) => f.debug_tuple("Builtin").field(&b.name()).finish(),
        }
    }
}

/// Execution context passed to [`BuiltinCommand::execute`].
///
/// Gives a command access to the worker's session, its parsed sequence and
/// its child workers, without any process-wide state.
pub struct Context<'a> {
    pub(crate) worker: &'a mut Worker,
}

impl<'a> Context<'a> {
    pub(crate) fn new(worker: &'a mut Worker) -> Self {
        Self { worker }
    }

    pub fn session(&mut self) -> &mut Session {
        self.worker.session_mut()
    }

    /// Resolve a sequence file named by RUN/RUN_WAIT. Bare file names are
    /// looked up next to the sequence currently running.
    pub fn resolve_sequence(&self, file: &str) -> PathBuf {
        self.worker.resolve_sequence(file)
    }

    /// Start a child worker for `file`, optionally waiting for it to exit.
    pub async fn spawn_worker(
        &mut self,
        file: &str,
        loops: u32,
        wait: bool,
    ) -> Result<String, CommandError> {
        let path = self.resolve_sequence(file);
        self.worker.spawn_child(&path, loops, wait).await
    }

    /// Run a registered subsequence as a nested invocation.
    pub async fn run_subsequence(&mut self, symbol: &str, loops: u32) -> Result<String, CommandError> {
        let commands = self
            .worker
            .subsequence(symbol)
            .ok_or_else(|| CommandError::Builtin(format!("unregistered subsequence `{symbol}`")))?;
        Box::pin(self.worker.run_nested(commands, loops)).await
    }
}
