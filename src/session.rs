//! The session engine: one interactive shell per worker, driven one command
//! at a time.
//!
//! [`Session::run`] sends a [`ShellCommand`] and polls the connection until
//! one of three things happens:
//!
//! - an escape pattern shows up anywhere in the output (fail fast),
//! - the completion prompt shows up at the tail of the output, at which
//!   point the expects are checked in order,
//! - the command's timeout passes.
//!
//! The byte stream itself sits behind the [`Connection`] trait so the engine
//! can be driven by a PTY in production and by scripted fakes in tests.

use crate::ansi::{self, StreamDecoder};
use crate::command::ShellCommand;
use crate::echo;
use crate::error::CommandError;
use crate::logfile::LogFile;
use crate::pattern::Pattern;
use log::{debug, info, warn};
use std::io;
use std::ops::Range;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Completion pattern of a fresh session: a prompt character at the end of
/// a line, optionally followed by a space.
pub const DEFAULT_PROMPT: &str = r"[$#>%] ?$";

/// Pause between two reads of the connection.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Characters before the prompt that still count as the output tail.
const PROMPT_TAIL: usize = 16;

/// Commands that open their own connection instead of running in a local shell.
const CONNECT_TRIGGERS: &[&str] = &["telnet", "ssh", "connect", "solshell"];

/// Commands after which the far end is expected to hang up.
const QUIT_COMMANDS: &[&str] = &["exit", "quit"];

const SHELL_START_TIMEOUT: Duration = Duration::from_secs(5);
const INTERRUPT_SETTLE: Duration = Duration::from_secs(1);
const CLOSE_RETRY_DELAY: Duration = Duration::from_millis(100);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

const TERMINAL_COLUMNS: usize = 80;
const INTERRUPT: u8 = 0x03;
const DISCONNECTED: &str = "disconnected";

/// A bidirectional byte stream to an interactive shell.
pub trait Connection {
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Everything received since the last call, without blocking. An empty
    /// vector means nothing new; [`io::ErrorKind::UnexpectedEof`] means the
    /// far end has gone away and no bytes remain.
    fn read_available(&mut self) -> io::Result<Vec<u8>>;

    /// Ask the far end to terminate. `Ok(false)` means it has not finished
    /// yet and the call should be repeated.
    fn close(&mut self) -> io::Result<bool>;
}

/// Opens connections for a session.
pub trait Connector {
    /// `None` starts a local shell; `Some(cmd)` runs `cmd` (a telnet, ssh or
    /// console command) as the session itself.
    fn open(&mut self, command: Option<&str>) -> anyhow::Result<Box<dyn Connection>>;
}

/// Per-worker terminal session.
pub struct Session {
    connector: Box<dyn Connector>,
    conn: Option<Box<dyn Connection>>,
    label: String,
    /// Bytes read but not consumed by a command.
    pending: Vec<u8>,
    prompt: Pattern,
    default_prompt: Pattern,
    transcript: LogFile,
    /// Last line of the previous output, where the next command is typed.
    prompt_line: String,
    columns: usize,
}

impl Session {
    pub fn new(connector: Box<dyn Connector>, transcript: LogFile) -> Self {
        Self {
            connector,
            conn: None,
            label: DISCONNECTED.to_string(),
            pending: Vec::new(),
            prompt: Pattern::new(DEFAULT_PROMPT),
            default_prompt: Pattern::new(DEFAULT_PROMPT),
            transcript,
            prompt_line: String::new(),
            columns: TERMINAL_COLUMNS,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub fn prompt(&self) -> &Pattern {
        &self.prompt
    }

    pub fn set_prompt(&mut self, prompt: Pattern) {
        self.prompt = prompt;
    }

    /// One-line description used in error reports.
    pub fn describe(&self) -> String {
        format!("{} (prompt `{}`)", self.label, self.prompt)
    }

    pub fn transcript_path(&self) -> Option<&std::path::Path> {
        self.transcript.path()
    }

    /// Write `text` and a line terminator.
    pub fn send(&mut self, text: &str) -> Result<(), CommandError> {
        self.send_line(text, false)
    }

    fn send_line(&mut self, text: &str, secret: bool) -> Result<(), CommandError> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| CommandError::Connection("session is not connected".into()))?;
        if secret {
            debug!("send: ******");
        } else {
            debug!("send: {text}");
        }
        conn.write(format!("{text}\n").as_bytes())?;
        Ok(())
    }

    /// Run one shell command and return its output.
    ///
    /// # Errors
    ///
    /// [`CommandError::Escaped`] or [`CommandError::Expect`] when the output
    /// does not satisfy the command, [`CommandError::Timeout`] when the prompt
    /// never came back, [`CommandError::Connection`] when the stream failed.
    pub async fn run(&mut self, cmd: &ShellCommand) -> Result<String, CommandError> {
        let launched = self.connect_for(&cmd.text).await?;
        if !launched {
            self.flush();
            self.send_line(&cmd.text, cmd.secret)?;
        }

        let Some(timeout) = cmd.timeout else {
            return Ok(String::new());
        };

        let deadline = Instant::now() + timeout;
        let skip_echo = launched || cmd.secret || cmd.text.trim().is_empty();
        let mut echo_end = skip_echo.then_some(0);
        let mut output = StreamDecoder::new();

        loop {
            let chunk = match self.read_chunk() {
                Ok(chunk) => chunk,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && is_quit(&cmd.text) => {
                    info!("{} ended after `{}`", self.label, cmd.text.trim());
                    output.finish();
                    let text = output.text();
                    let start = echo_end.unwrap_or(0).min(text.len());
                    let rest = text.get(start..).unwrap_or_default().to_string();
                    self.close().await;
                    return Ok(rest);
                }
                Err(e) => {
                    return Err(CommandError::Connection(format!("{}: {e}", self.label)));
                }
            };

            if !chunk.is_empty() {
                let added = output.push(&chunk);
                if !added.is_empty() {
                    self.transcript.append(added);
                }
                let text = output.text();

                if echo_end.is_none() {
                    echo_end = self.locate_echo(&cmd.text, text);
                }
                let start = echo_end
                    .filter(|&s| text.is_char_boundary(s))
                    .unwrap_or(0);
                let echo_partial = echo_end.is_none() && awaiting_echo(&cmd.text, text);

                if !echo_partial {
                    if let Some(result) = self.check(cmd, &text[start..]) {
                        self.remember_tail(text);
                        return result;
                    }
                }
            }

            if Instant::now() >= deadline {
                output.finish();
                let text = output.text().to_string();
                let start = echo_end.filter(|&s| text.is_char_boundary(s)).unwrap_or(0);
                self.remember_tail(&text);
                return Err(CommandError::Timeout {
                    timeout,
                    output: text[start..].to_string(),
                    prompt: self.prompt.to_string(),
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Escape check, then prompt detection and the expect walk. `None` means
    /// keep reading.
    fn check(&self, cmd: &ShellCommand, out: &str) -> Option<Result<String, CommandError>> {
        for escape in &cmd.escapes {
            if let Some(range) = escape.find(out) {
                return Some(Err(CommandError::Escaped {
                    pattern: escape.to_string(),
                    output: line_around(out, range).to_string(),
                    prompt: self.prompt.to_string(),
                }));
            }
        }

        let tail = tail_start(out, PROMPT_TAIL + self.prompt.as_str().chars().count());
        let end = tail + self.prompt.find(&out[tail..])?.start;
        let output = &out[..end];

        let mut pos = 0;
        for expect in &cmd.expects {
            match expect.find(&output[pos..]) {
                Some(found) => pos += found.end,
                None => {
                    return Some(Err(CommandError::Expect {
                        pattern: expect.to_string(),
                        output: output.to_string(),
                        prompt: self.prompt.to_string(),
                    }));
                }
            }
        }
        Some(Ok(output.to_string()))
    }

    /// Byte offset where the echo of `sent` ends in `text`.
    fn locate_echo(&self, sent: &str, text: &str) -> Option<usize> {
        if let Some(rest) = echo::strip_echo(sent, text) {
            return Some(text.len() - rest.len());
        }
        if let Some(wrapped) = self.wrapped(sent) {
            if let Some(rest) = echo::strip_echo(&wrapped, text) {
                return Some(text.len() - rest.len());
            }
        }
        if let Some(len) = echo::echo_prefix_len(sent, text) {
            return Some(len);
        }
        let first_line = &text[..text.find('\n')?];
        (echo::collapse_duplicate(first_line) == Some(sent.trim()))
            .then(|| first_line.trim_end().len())
    }

    /// `sent` as the terminal echoes it when it wraps past the last column.
    fn wrapped(&self, sent: &str) -> Option<String> {
        let used = self.prompt_line.chars().count() % self.columns;
        let room = self.columns - used;
        let (at, _) = sent.char_indices().nth(room)?;
        Some(format!("{}\r{}", &sent[..at], &sent[at..]))
    }

    /// Open a connection if there is none. Returns `true` when `text` itself
    /// was used to open it and must not be sent again.
    async fn connect_for(&mut self, text: &str) -> Result<bool, CommandError> {
        if self.conn.is_some() {
            return Ok(false);
        }

        let program = text.split_whitespace().next().unwrap_or_default();
        if CONNECT_TRIGGERS.contains(&program) {
            info!("opening session: {text}");
            let conn = self
                .connector
                .open(Some(text))
                .map_err(|e| CommandError::Connection(format!("{text}: {e:#}")))?;
            self.conn = Some(conn);
            self.label = text.to_string();
            return Ok(true);
        }

        info!("opening local shell");
        let conn = self
            .connector
            .open(None)
            .map_err(|e| CommandError::Connection(format!("local shell: {e:#}")))?;
        self.conn = Some(conn);
        self.label = "local shell".to_string();
        self.await_prompt(SHELL_START_TIMEOUT).await?;
        Ok(false)
    }

    /// Read into the pending buffer until the prompt shows up or `within` passes.
    async fn await_prompt(&mut self, within: Duration) -> Result<(), CommandError> {
        let deadline = Instant::now() + within;
        loop {
            let chunk = self.read_chunk()?;
            self.pending.extend_from_slice(&chunk);
            if self.prompt.matches(&decode(&self.pending)) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                debug!("no prompt from {} after {within:?}", self.label);
                return Ok(());
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    fn read_chunk(&mut self) -> io::Result<Vec<u8>> {
        match self.conn.as_mut() {
            Some(conn) => conn.read_available(),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "no connection")),
        }
    }

    /// Send an interrupt and return what the shell printed in response.
    pub async fn interrupt(&mut self) -> Result<String, CommandError> {
        let Some(conn) = self.conn.as_mut() else {
            debug!("nothing to interrupt, session is not connected");
            return Ok(String::new());
        };
        conn.write(&[INTERRUPT])?;
        self.await_prompt(INTERRUPT_SETTLE).await?;
        let output = decode(&self.pending);
        self.flush();
        Ok(output)
    }

    /// Drain and log anything received but not consumed by a command.
    pub fn flush(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            match conn.read_available() {
                Ok(bytes) => self.pending.extend_from_slice(&bytes),
                Err(e) => debug!("flush {}: {e}", self.label),
            }
        }
        if !self.pending.is_empty() {
            let text = decode(&std::mem::take(&mut self.pending));
            self.transcript.append(&text);
            self.remember_tail(&text);
        }
        self.transcript.flush();
    }

    /// Close the connection and fall back to the default prompt. Closing a
    /// disconnected session does nothing.
    pub async fn close(&mut self) {
        self.flush();
        if let Some(mut conn) = self.conn.take() {
            let deadline = Instant::now() + CLOSE_TIMEOUT;
            loop {
                match conn.close() {
                    Ok(true) => break,
                    Ok(false) if Instant::now() < deadline => sleep(CLOSE_RETRY_DELAY).await,
                    Ok(false) => {
                        warn!("{} still open after {CLOSE_TIMEOUT:?}, abandoning it", self.label);
                        break;
                    }
                    Err(e) => {
                        warn!("closing {}: {e}", self.label);
                        break;
                    }
                }
            }
            info!("closed {}", self.label);
        }
        self.label = DISCONNECTED.to_string();
        self.prompt = self.default_prompt.clone();
        self.prompt_line.clear();
    }

    /// Close and release the transcript. Used on worker shutdown.
    pub async fn shutdown(&mut self) {
        self.close().await;
        self.transcript.close();
    }

    fn remember_tail(&mut self, text: &str) {
        let tail = text.rsplit(['\n', '\r']).next().unwrap_or_default();
        if !tail.is_empty() || text.ends_with(['\n', '\r']) {
            self.prompt_line = tail.to_string();
        }
    }
}

fn decode(bytes: &[u8]) -> String {
    ansi::strip(&String::from_utf8_lossy(bytes))
}

fn is_quit(text: &str) -> bool {
    QUIT_COMMANDS.contains(&text.trim())
}

/// Whether `text` could still be the beginning of the echo of `sent`.
fn awaiting_echo(sent: &str, text: &str) -> bool {
    let text = text.trim();
    !text.is_empty() && text.len() < sent.trim().len() && sent.trim().starts_with(text)
}

/// Byte offset `chars` characters before the end of `s`.
fn tail_start(s: &str, chars: usize) -> usize {
    s.char_indices()
        .rev()
        .nth(chars.saturating_sub(1))
        .map_or(0, |(i, _)| i)
}

/// The line of `s` containing `range`.
fn line_around(s: &str, range: Range<usize>) -> &str {
    let start = s[..range.start].rfind('\n').map_or(0, |i| i + 1);
    let end = s[range.end..].find('\n').map_or(s.len(), |i| range.end + i);
    s[start..end].trim_end_matches('\r')
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Shell state shared between a test and its fake connections.
    #[derive(Default)]
    pub(crate) struct FakeShell {
        pub written: Vec<String>,
        pub output: Vec<u8>,
        pub replies: Vec<(String, String)>,
        pub hangup_on: Option<String>,
        /// Stop hanging up after this many hangups.
        pub max_hangups: Option<u32>,
        pub hangups: u32,
        pub eof: bool,
        pub banner: String,
        pub opened: Vec<Option<String>>,
        pub closed: u32,
    }

    impl FakeShell {
        pub fn reply(&mut self, line: &str, output: &str) {
            self.replies.push((line.to_string(), output.to_string()));
        }
    }

    pub(crate) struct FakeConnection(Rc<RefCell<FakeShell>>);

    impl Connection for FakeConnection {
        fn write(&mut self, data: &[u8]) -> io::Result<()> {
            let line = String::from_utf8_lossy(data).trim_end_matches('\n').to_string();
            let mut shell = self.0.borrow_mut();
            let hangup = shell.hangup_on.as_deref() == Some(line.as_str())
                && shell.max_hangups.is_none_or(|max| shell.hangups < max);
            if hangup {
                shell.eof = true;
                shell.hangups += 1;
            } else if let Some((_, reply)) = shell.replies.iter().find(|(l, _)| *l == line) {
                let reply = reply.clone();
                shell.output.extend_from_slice(reply.as_bytes());
            }
            shell.written.push(line);
            Ok(())
        }

        fn read_available(&mut self) -> io::Result<Vec<u8>> {
            let mut shell = self.0.borrow_mut();
            if !shell.output.is_empty() {
                return Ok(std::mem::take(&mut shell.output));
            }
            if shell.eof {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            Ok(Vec::new())
        }

        fn close(&mut self) -> io::Result<bool> {
            self.0.borrow_mut().closed += 1;
            Ok(true)
        }
    }

    pub(crate) struct FakeConnector(pub Rc<RefCell<FakeShell>>);

    impl Connector for FakeConnector {
        fn open(&mut self, command: Option<&str>) -> anyhow::Result<Box<dyn Connection>> {
            let mut shell = self.0.borrow_mut();
            shell.opened.push(command.map(str::to_string));
            shell.eof = false;
            let banner = shell.banner.clone();
            shell.output.extend_from_slice(banner.as_bytes());
            Ok(Box::new(FakeConnection(self.0.clone())))
        }
    }

    fn session(banner: &str) -> (Session, Rc<RefCell<FakeShell>>) {
        let shell = Rc::new(RefCell::new(FakeShell {
            banner: banner.to_string(),
            ..Default::default()
        }));
        let session = Session::new(Box::new(FakeConnector(shell.clone())), LogFile::disabled());
        (session, shell)
    }

    #[tokio::test(start_paused = true)]
    async fn test_expect_then_prompt() {
        let (mut session, shell) = session("$ ");
        session.set_prompt(Pattern::new("$ "));
        shell.borrow_mut().reply("echo OK", "OK\n$ ");

        let cmd = ShellCommand::new("echo OK")
            .with_expects(["OK"])
            .with_timeout(Duration::from_secs(2));
        let output = session.run(&cmd).await.unwrap();
        assert_eq!(output, "OK\n");
        assert_eq!(shell.borrow().written, vec!["echo OK"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_is_removed() {
        let (mut session, shell) = session(">>> ");
        session.set_prompt(Pattern::new(">>> "));
        shell.borrow_mut().reply("echo hi", "echo hi\r\nhi\r\n>>> ");

        let cmd = ShellCommand::new("echo hi").with_expects(["hi"]);
        assert_eq!(session.run(&cmd).await.unwrap(), "\r\nhi\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expects_must_appear_in_order() {
        let (mut session, shell) = session("$ ");
        shell.borrow_mut().reply("status", "second first\n$ ");

        let cmd = ShellCommand::new("status").with_expects(["first", "second"]);
        match session.run(&cmd).await {
            Err(CommandError::Expect { pattern, output, .. }) => {
                assert_eq!(pattern, "second");
                assert_eq!(output, "second first\n");
            }
            other => panic!("expected an expect failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_escape_fails_before_timeout() {
        let (mut session, shell) = session("$ ");
        shell
            .borrow_mut()
            .reply("frobnicate", "sh: frobnicate: command not found\n");

        let cmd = ShellCommand::new("frobnicate")
            .with_escapes(["command not found"])
            .with_timeout(Duration::from_secs(2));
        let started = Instant::now();
        match session.run(&cmd).await {
            Err(CommandError::Escaped { pattern, output, .. }) => {
                assert_eq!(pattern, "command not found");
                assert_eq!(output, "sh: frobnicate: command not found");
            }
            other => panic!("expected an escape, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_output() {
        let (mut session, _shell) = session("$ ");
        let cmd = ShellCommand::new("sleep 100").with_timeout(Duration::from_secs(2));
        let started = Instant::now();
        match session.run(&cmd).await {
            Err(CommandError::Timeout { timeout, prompt, .. }) => {
                assert_eq!(timeout, Duration::from_secs(2));
                assert_eq!(prompt, DEFAULT_PROMPT);
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_escape_sequence_split_across_reads() {
        let (mut session, shell) = session("$ ");
        shell.borrow_mut().reply("show", "\x1b[1;3");

        let cmd = ShellCommand::new("show")
            .with_expects(["OK"])
            .with_timeout(Duration::from_secs(2));
        let late = async {
            sleep(Duration::from_millis(100)).await;
            shell.borrow_mut().output.extend_from_slice(b"2mOK\x1b[0m\n$ ");
        };
        let (result, ()) = tokio::join!(session.run(&cmd), late);
        assert_eq!(result.unwrap(), "OK\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_and_forget() {
        let (mut session, shell) = session("$ ");
        let cmd = ShellCommand::new("tail -f log").fire_and_forget();
        assert_eq!(session.run(&cmd).await.unwrap(), "");
        assert_eq!(shell.borrow().written, vec!["tail -f log"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_command_opens_session() {
        let (mut session, shell) = session("root@bmc:~# ");
        let cmd = ShellCommand::new("ssh root@bmc");
        session.run(&cmd).await.unwrap();

        let shell = shell.borrow();
        assert_eq!(shell.opened, vec![Some("ssh root@bmc".to_string())]);
        assert!(shell.written.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_hangup_passes_and_disconnects() {
        let (mut session, shell) = session("root@bmc:~# ");
        shell.borrow_mut().hangup_on = Some("exit".to_string());
        session.run(&ShellCommand::new("ssh root@bmc")).await.unwrap();
        session.set_prompt(Pattern::new("bmc:~# "));

        session.run(&ShellCommand::new("exit")).await.unwrap();
        assert!(!session.is_connected());
        assert_eq!(session.prompt().as_str(), DEFAULT_PROMPT);
        assert_eq!(shell.borrow().closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_hangup_is_a_connection_error() {
        let (mut session, shell) = session("$ ");
        shell.borrow_mut().hangup_on = Some("reboot".to_string());
        let err = session.run(&ShellCommand::new("reboot")).await.unwrap_err();
        assert!(matches!(err, CommandError::Connection(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent() {
        let (mut session, shell) = session("$ ");
        session.run(&ShellCommand::new("true").fire_and_forget()).await.unwrap();
        session.close().await;
        session.close().await;
        assert_eq!(shell.borrow().closed, 1);
        assert!(!session.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt() {
        let (mut session, shell) = session("$ ");
        assert_eq!(session.interrupt().await.unwrap(), "");

        session.run(&ShellCommand::new("yes").fire_and_forget()).await.unwrap();
        shell.borrow_mut().reply("\u{3}", "^C\n$ ");
        let output = session.interrupt().await.unwrap();
        assert!(output.contains("^C"));
    }

    #[test]
    fn test_wrapped_echo_uses_prompt_column() {
        let (mut session, _shell) = session("$ ");
        session.prompt_line = "x".repeat(76);
        assert_eq!(session.wrapped("abcdef").as_deref(), Some("abcd\ref"));
        assert_eq!(session.wrapped("abc"), None);
    }

    #[test]
    fn test_tail_and_line_helpers() {
        assert_eq!(tail_start("abcdef", 2), 4);
        assert_eq!(tail_start("ab", 10), 0);
        assert_eq!(line_around("one\r\ntwo three\r\nfour", 9..14), "two three");
    }

    #[test]
    fn test_awaiting_echo() {
        assert!(awaiting_echo("show version", "show ve"));
        assert!(!awaiting_echo("show version", "OK\n$ "));
        assert!(!awaiting_echo("show version", ""));
    }
}
