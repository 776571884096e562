//! Unix-domain-socket transport for coordination messages.
//!
//! The supervisor owns one listening socket named after the main sequence.
//! Every message is its own connection: the client connects, writes one JSON
//! object and shuts down its write half; the server accepts at most one
//! connection per poll and reads until the peer closes.

use crate::error::TransportError;
use crate::message::{Message, MessageSink, MessageSource};
use chrono::Local;
use log::{debug, warn};
use rand::Rng;
use std::fs;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// How long a client keeps retrying one message.
pub const SEND_WINDOW: Duration = Duration::from_secs(90);

/// Read timeout for one accepted connection.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between client attempts, in milliseconds. Randomized so that
/// workers started together do not retry in lockstep.
const RETRY_JITTER_MS: std::ops::Range<u64> = 20..80;

/// Socket path for the supervisor of sequence `name` in `dir`. A path that is
/// already taken gets a timestamp suffix.
pub fn socket_path(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(format!(".uds_{name}.sock"));
    if !path.exists() {
        return path;
    }
    let stamp = Local::now().format("%Y%m%d%H%M%S%3f");
    dir.join(format!(".uds_{name}_{stamp}.sock"))
}

/// Listening end, polled by the supervisor.
#[derive(Debug)]
pub struct UdsServer {
    path: PathBuf,
    listener: UnixListener,
}

impl UdsServer {
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self, TransportError> {
        let path = path.into();
        let listener = listen(&path)?;
        debug!("listening on {}", path.display());
        Ok(Self { path, listener })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_message(stream: &mut UnixStream) -> io::Result<String> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        let mut payload = String::new();
        stream.read_to_string(&mut payload)?;
        Ok(payload)
    }

    /// Replace a listener that started failing. Clients retrying in the
    /// meantime see the socket disappear and reappear.
    fn rebuild(&mut self) {
        let _ = fs::remove_file(&self.path);
        match listen(&self.path) {
            Ok(listener) => self.listener = listener,
            Err(e) => warn!("{e}"),
        }
    }
}

fn listen(path: &Path) -> Result<UnixListener, TransportError> {
    let bind_error = |source| TransportError::Bind {
        path: path.to_path_buf(),
        source,
    };
    let listener = UnixListener::bind(path).map_err(bind_error)?;
    listener.set_nonblocking(true).map_err(bind_error)?;
    Ok(listener)
}

impl MessageSource for UdsServer {
    fn try_recv(&mut self) -> Option<Message> {
        let mut stream = match self.listener.accept() {
            Ok((stream, _)) => stream,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
            Err(e) => {
                warn!("accept on {} failed: {e}, rebuilding it", self.path.display());
                self.rebuild();
                return None;
            }
        };

        let payload = match Self::read_message(&mut stream) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("cannot read message: {e}");
                return None;
            }
        };
        match Message::from_json(payload.trim()) {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!("discarding malformed message {payload:?}: {e}");
                None
            }
        }
    }
}

impl Drop for UdsServer {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Sending end used by worker processes.
#[derive(Debug, Clone)]
pub struct UdsClient {
    path: PathBuf,
    window: Duration,
}

impl UdsClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_window(path, SEND_WINDOW)
    }

    pub fn with_window(path: impl Into<PathBuf>, window: Duration) -> Self {
        Self {
            path: path.into(),
            window,
        }
    }

    fn deliver(&self, payload: &str) -> io::Result<()> {
        let mut stream = UnixStream::connect(&self.path)?;
        stream.write_all(payload.as_bytes())?;
        stream.shutdown(Shutdown::Write)
    }
}

impl MessageSink for UdsClient {
    fn send(&mut self, msg: &Message) -> Result<(), TransportError> {
        let payload = msg.to_json()?;
        let mut rng = rand::thread_rng();
        let mut deadline = Instant::now() + self.window;
        let mut reresolved = false;

        loop {
            let err = match self.deliver(&payload) {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if Instant::now() >= deadline {
                // The supervisor may be in the middle of rebuilding its socket.
                if !reresolved && err.kind() == io::ErrorKind::NotFound {
                    warn!("{} is gone, waiting for it to come back", self.path.display());
                    reresolved = true;
                    deadline = Instant::now() + self.window;
                    continue;
                }
                return Err(TransportError::Undeliverable {
                    endpoint: self.path.display().to_string(),
                    window: self.window,
                    reason: err.to_string(),
                });
            }

            debug!("send {} failed: {err}, retrying", msg.kind());
            thread::sleep(Duration::from_millis(rng.gen_range(RETRY_JITTER_MS)));
        }
    }
}
