//! # Autoseq
//!
//! Sequence-driven automation of interactive terminal sessions.
//!
//! Autoseq runs plain-text *sequence files* against a shell, a telnet or ssh
//! connection, or a serial console. Every line sends one command, waits for
//! the prompt to come back and checks the output against expected and escape
//! patterns. Sequences repeat for a number of loops, can start other
//! sequences as parallel workers, and recover from dropped connections by
//! restarting the loop.
//!
//! ## Quick start
//!
//! ```no_run
//! use autoseq::{NullSink, PtyConnector, Session, WorkerConfig, parse_file};
//! use autoseq::spawn::ProcessSpawner;
//! use autoseq::worker::Worker;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let sequence = parse_file("smoke.seq")?;
//!     let config = WorkerConfig::default();
//!     let session = Session::new(Box::new(PtyConnector), autoseq::LogFile::disabled());
//!     let spawner = ProcessSpawner::new(None, config.clone())?;
//!
//!     let mut worker = Worker::new(sequence, session, Box::new(NullSink), Box::new(spawner), config);
//!     worker.run(3).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Sequence syntax
//!
//! A shell command line has up to four `;`-separated fields:
//!
//! ```text
//! command ; expect1, expect2 ; escape1, escape2 ; timeout
//! ```
//!
//! Expects must all show up, in order, before the prompt. Any escape fails
//! the command at once. A trailing number is the timeout in seconds and a
//! negative timeout sends the command without waiting. Patterns are matched
//! literally first, then as regular expressions.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `CTRL-C` | Send an interrupt to the session |
//! | `RUN file [loops]` | Start another sequence as a parallel worker |
//! | `RUN_WAIT file [loops]` | Start another sequence and wait for it |
//! | `CLOSE` | Close the session |
//! | `ENTER` | Send an empty line and wait for the prompt |
//! | `WAIT 1h30m` | Sleep (`h`, `m`, `s`, `ms`; a bare number is seconds) |
//! | `PULSE` | Start a keepalive loop in the remote shell |
//! | `SETPROMPT pattern` | Change the completion prompt |
//! | `FIND file dir1,dir2` | Look for a file on a UEFI shell |
//! | `SUBSEQUENCE name` ... `ENDSUBSEQUENCE` | Define a named subsequence |
//! | `LOOP name loops` | Run a subsequence in place |
//! | `PASSWD secret` | Send a password, kept out of logs |
//! | `# comment` | Comment; `\#` is a literal `#` |
//!
//! ## Supervision
//!
//! The `autoseq` binary runs the main sequence as a worker process and
//! supervises it. Workers report [`Message`]s over a Unix domain socket;
//! the [`Supervisor`] tallies them and prints a summary once every worker
//! has completed.
//!
//! ## Custom connections
//!
//! Implement [`Connector`] and [`Connection`] to drive something other than
//! a PTY:
//!
//! ```no_run
//! use autoseq::{Connection, Connector};
//! use std::io;
//!
//! struct Loopback(Vec<u8>);
//!
//! impl Connection for Loopback {
//!     fn write(&mut self, data: &[u8]) -> io::Result<()> {
//!         self.0.extend_from_slice(data);
//!         self.0.extend_from_slice(b"$ ");
//!         Ok(())
//!     }
//!
//!     fn read_available(&mut self) -> io::Result<Vec<u8>> {
//!         Ok(std::mem::take(&mut self.0))
//!     }
//!
//!     fn close(&mut self) -> io::Result<bool> {
//!         Ok(true)
//!     }
//! }
//!
//! struct LoopbackConnector;
//!
//! impl Connector for LoopbackConnector {
//!     fn open(&mut self, _command: Option<&str>) -> anyhow::Result<Box<dyn Connection>> {
//!         Ok(Box::new(Loopback(b"$ ".to_vec())))
//!     }
//! }
//! ```

pub mod ansi;
pub mod command;
pub mod commands;
pub mod config;
pub mod echo;
pub mod error;
pub mod logfile;
pub mod message;
pub mod parser;
pub mod pattern;
pub mod pty;
pub(crate) mod pty_reader;
pub mod session;
pub mod spawn;
pub mod supervisor;
pub mod uds;
pub mod worker;

pub use command::{BuiltinCommand, Command, Context, ShellCommand};
pub use config::{SupervisorConfig, WorkerConfig};
pub use error::{CommandError, ParseError, SyntaxError, TransportError, WorkerError};
pub use logfile::LogFile;
pub use message::{Message, MessageSink, MessageSource, NullSink};
pub use parser::{SequenceFile, parse_file, parse_str};
pub use pattern::Pattern;
pub use pty::PtyConnector;
pub use session::{Connection, Connector, Session};
pub use supervisor::{Supervisor, SupervisorState};
pub use worker::{Worker, run_worker};
