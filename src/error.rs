//! Error taxonomy shared by the parser, the session engine, the worker and
//! the coordination transport.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A malformed sequence-file line or builtin usage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("builtin command syntax error, usage: {usage}")]
    Usage { usage: &'static str },

    #[error("shell command has {0} fields, at most 4 are allowed")]
    TooManyFields(usize),

    #[error("SUBSEQUENCE `{0}` is still open, subsequences cannot be nested")]
    NestedSubsequence(String),

    #[error("ENDSUBSEQUENCE without a preceding SUBSEQUENCE")]
    UnmatchedEnd,

    #[error("subsequence `{0}` is never closed")]
    UnclosedSubsequence(String),

    #[error("LOOP references undefined subsequence `{0}`")]
    UndefinedSymbol(String),

    #[error("invalid {what}: `{value}`")]
    InvalidValue { what: &'static str, value: String },
}

/// Failure to turn a sequence file into commands. Always fatal, before any
/// worker runs.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("cannot read sequence file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("line {line}: {source}")]
    Syntax {
        line: usize,
        #[source]
        source: SyntaxError,
    },
}

impl ParseError {
    /// The syntax error behind this failure, if it is one.
    pub fn syntax(&self) -> Option<&SyntaxError> {
        match self {
            ParseError::Syntax { source, .. } => Some(source),
            ParseError::Io { .. } => None,
        }
    }
}

/// Failure of a single command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("expect failure: `{pattern}` not found")]
    Expect {
        pattern: String,
        output: String,
        prompt: String,
    },

    #[error("escape pattern `{pattern}` matched")]
    Escaped {
        pattern: String,
        output: String,
        prompt: String,
    },

    #[error("command timed out after {}s", .timeout.as_secs_f64())]
    Timeout {
        timeout: Duration,
        output: String,
        prompt: String,
    },

    #[error("builtin command error: {0}")]
    Builtin(String),

    #[error("connection failure: {0}")]
    Connection(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// How the worker treats the result of one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    ExpectFail,
    Timeout,
    BuiltinError,
    NeedsRecovery,
}

impl CommandError {
    /// Classify this failure. Anything that is not an expect, escape, timeout
    /// or builtin failure is an environment failure and eligible for recovery.
    /// `recover_on_timeout` moves timeouts across that boundary.
    pub fn outcome(&self, recover_on_timeout: bool) -> Outcome {
        match self {
            CommandError::Expect { .. } | CommandError::Escaped { .. } => Outcome::ExpectFail,
            CommandError::Timeout { .. } if recover_on_timeout => Outcome::NeedsRecovery,
            CommandError::Timeout { .. } => Outcome::Timeout,
            CommandError::Builtin(_) | CommandError::Transport(_) => Outcome::BuiltinError,
            CommandError::Connection(_) => Outcome::NeedsRecovery,
        }
    }

    /// Output captured before the failure, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            CommandError::Expect { output, .. }
            | CommandError::Escaped { output, .. }
            | CommandError::Timeout { output, .. } => Some(output),
            _ => None,
        }
    }

    /// Completion pattern in force when the failure happened.
    pub fn prompt(&self) -> Option<&str> {
        match self {
            CommandError::Expect { prompt, .. }
            | CommandError::Escaped { prompt, .. }
            | CommandError::Timeout { prompt, .. } => Some(prompt),
            _ => None,
        }
    }

    /// Long form used in error dumps: the summary plus prompt and output.
    pub fn dump(&self) -> String {
        let mut s = format!("{self}\n");
        if let Some(prompt) = self.prompt() {
            s.push_str(&format!("SHELL PROMPT:\n{prompt}\n\n"));
        }
        if let Some(output) = self.output() {
            s.push_str(&format!("READ OUTPUT:\n{output}\n"));
        }
        s
    }
}

impl From<io::Error> for CommandError {
    fn from(e: io::Error) -> Self {
        CommandError::Connection(e.to_string())
    }
}

/// A coordination message could not be delivered.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot deliver message to {endpoint} within {}s: {reason}", .window.as_secs())]
    Undeliverable {
        endpoint: String,
        window: Duration,
        reason: String,
    },

    #[error("cannot encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("cannot listen on {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("message channel closed")]
    Closed,
}

/// Reasons a worker stops before completing its loops.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("recovery failed after {retries} retries at loop {iteration}")]
    RecoveryExhausted { retries: u32, iteration: u32 },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A coordination message the supervisor could not apply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    #[error("`{kind}` from unknown worker `{name}`")]
    UnknownWorker { kind: &'static str, name: String },

    #[error("too many workers started, maximum is {0}")]
    TooManyWorkers(usize),
}
