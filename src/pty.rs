//! PTY-backed [`Connection`]s: a local shell or a telnet/ssh/console command
//! running under a pseudo terminal.

use crate::pty_reader::spawn_reader;
use crate::session::{Connection, Connector};
use anyhow::{Context, Result};
use log::debug;
use portable_pty::{Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{self, Write};
use std::sync::mpsc::{Receiver, TryRecvError};

/// Prompt of the local shell started for commands that do not open their own
/// connection.
pub const LOCAL_SHELL_PROMPT: &str = ">>> ";

const LOCAL_SHELL: &str = "sh";

/// Terminal size reported to the child. The session assumes the same width
/// when it resolves wrapped echoes.
const PTY_SIZE: PtySize = PtySize {
    rows: 24,
    cols: 80,
    pixel_width: 0,
    pixel_height: 0,
};

/// A program running inside a PTY.
pub struct PtyConnection {
    #[allow(dead_code)]
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    output: Receiver<Vec<u8>>,
    killed: bool,
}

impl PtyConnection {
    pub fn spawn(cmd: CommandBuilder, label: &str) -> Result<Self> {
        let pair = portable_pty::native_pty_system()
            .openpty(PTY_SIZE)
            .context("Failed to open PTY")?;

        let child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn {label}"))?;

        let writer = pair
            .master
            .take_writer()
            .context("Failed to get PTY writer")?;
        let reader = pair
            .master
            .try_clone_reader()
            .context("Failed to get PTY reader")?;
        let output = spawn_reader(reader, label).context("Failed to start PTY reader")?;

        Ok(Self {
            master: pair.master,
            child,
            writer,
            output,
            killed: false,
        })
    }
}

impl Connection for PtyConnection {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        loop {
            match self.output.try_recv() {
                Ok(chunk) => bytes.extend(chunk),
                Err(TryRecvError::Empty) => return Ok(bytes),
                Err(TryRecvError::Disconnected) if bytes.is_empty() => {
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
                Err(TryRecvError::Disconnected) => return Ok(bytes),
            }
        }
    }

    fn close(&mut self) -> io::Result<bool> {
        if self.child.try_wait()?.is_some() {
            return Ok(true);
        }
        if !self.killed {
            debug!("terminating pty child");
            self.child.kill()?;
            self.killed = true;
        }
        Ok(self.child.try_wait()?.is_some())
    }
}

/// Opens [`PtyConnection`]s for a session.
#[derive(Debug, Default)]
pub struct PtyConnector;

impl Connector for PtyConnector {
    fn open(&mut self, command: Option<&str>) -> Result<Box<dyn Connection>> {
        let conn = match command {
            None => {
                let mut cmd = CommandBuilder::new(LOCAL_SHELL);
                cmd.env("PS1", LOCAL_SHELL_PROMPT);
                PtyConnection::spawn(cmd, LOCAL_SHELL)?
            }
            Some(line) => {
                let mut cmd = CommandBuilder::new(LOCAL_SHELL);
                cmd.args(["-c", line]);
                PtyConnection::spawn(cmd, line)?
            }
        };
        Ok(Box::new(conn))
    }
}
