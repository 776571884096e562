//! Coordination messages between workers and the supervisor, and the channel
//! abstraction they travel over.
//!
//! On the wire every message is one JSON object with an `MSG` kind, the
//! worker `NAME` and kind-specific upper-case fields:
//!
//! ```json
//! {"MSG":"loop_result_fail","NAME":"boot","LOOP":2,"MSGQ":["expect failure: `OK` not found"]}
//! ```

use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{Receiver, SyncSender, TryRecvError, TrySendError, sync_channel};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "MSG", rename_all = "snake_case", rename_all_fields = "UPPERCASE")]
pub enum Message {
    /// A worker began running `loops` iterations.
    WorkerRunStart { name: String, loops: u32 },

    /// A worker terminated, normally or not.
    #[serde(rename = "worker_run_cmplt")]
    WorkerRunComplete { name: String },

    LoopResultPass {
        name: String,
        #[serde(rename = "LOOP")]
        iteration: u32,
    },

    LoopResultFail {
        name: String,
        #[serde(rename = "LOOP")]
        iteration: u32,
        msgq: Vec<String>,
    },

    /// An environment failure restarted loop `iteration`.
    #[serde(rename = "test_need_recovery")]
    NeedRecovery {
        name: String,
        #[serde(rename = "LOOP")]
        iteration: u32,
        msgq: Vec<String>,
    },
}

impl Message {
    /// Name of the worker the message is about.
    pub fn name(&self) -> &str {
        match self {
            Message::WorkerRunStart { name, .. }
            | Message::WorkerRunComplete { name }
            | Message::LoopResultPass { name, .. }
            | Message::LoopResultFail { name, .. }
            | Message::NeedRecovery { name, .. } => name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::WorkerRunStart { .. } => "worker_run_start",
            Message::WorkerRunComplete { .. } => "worker_run_cmplt",
            Message::LoopResultPass { .. } => "loop_result_pass",
            Message::LoopResultFail { .. } => "loop_result_fail",
            Message::NeedRecovery { .. } => "test_need_recovery",
        }
    }

    pub fn to_json(&self) -> Result<String, TransportError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Sending half of a coordination channel.
pub trait MessageSink {
    /// Deliver `msg`, retrying transient failures for a bounded window.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] once the window is exhausted; the sending
    /// worker treats that as fatal.
    fn send(&mut self, msg: &Message) -> Result<(), TransportError>;
}

/// Receiving half of a coordination channel, polled by the supervisor.
pub trait MessageSource {
    /// At most one pending message, without blocking.
    fn try_recv(&mut self) -> Option<Message>;
}

/// Discards every message. Used when a worker runs without a supervisor.
#[derive(Debug, Default)]
pub struct NullSink;

impl MessageSink for NullSink {
    fn send(&mut self, msg: &Message) -> Result<(), TransportError> {
        log::debug!("{} for {} (no supervisor)", msg.kind(), msg.name());
        Ok(())
    }
}

/// In-process channel with the same bounded-retry contract as the socket
/// transport.
pub fn memory_channel(capacity: usize, window: Duration) -> (MemorySink, MemorySource) {
    let (tx, rx) = sync_channel(capacity);
    (MemorySink { tx, window }, MemorySource { rx })
}

const MEMORY_RETRY_DELAY: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct MemorySink {
    tx: SyncSender<Message>,
    window: Duration,
}

impl MessageSink for MemorySink {
    fn send(&mut self, msg: &Message) -> Result<(), TransportError> {
        let deadline = Instant::now() + self.window;
        let mut msg = msg.clone();
        loop {
            match self.tx.try_send(msg) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Disconnected(_)) => return Err(TransportError::Closed),
                Err(TrySendError::Full(back)) if Instant::now() < deadline => {
                    msg = back;
                    thread::sleep(MEMORY_RETRY_DELAY);
                }
                Err(TrySendError::Full(_)) => {
                    return Err(TransportError::Undeliverable {
                        endpoint: "memory channel".to_string(),
                        window: self.window,
                        reason: "channel full".to_string(),
                    });
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct MemorySource {
    rx: Receiver<Message>,
}

impl MemorySource {
    /// Everything currently queued.
    pub fn drain(&mut self) -> Vec<Message> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl MessageSource for MemorySource {
    fn try_recv(&mut self) -> Option<Message> {
        match self.rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}
