use async_trait::async_trait;
use autoseq::message::{MemorySink, MemorySource, memory_channel};
use autoseq::spawn::{ChildWorker, Spawner};
use autoseq::supervisor::WorkerStatus;
use autoseq::{
    Connection, Connector, LogFile, Message, MessageSink, Session, Supervisor, SupervisorConfig,
    SupervisorState, WorkerConfig, WorkerError, run_worker,
};
use std::cell::RefCell;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use tempfile::TempDir;

/// A shell that answers known lines and hangs up on one of them.
#[derive(Default)]
struct Script {
    replies: Vec<(String, String)>,
    hangup_on: Option<String>,
    output: Vec<u8>,
    gone: bool,
    sent: Vec<String>,
}

struct ScriptedConnection(Rc<RefCell<Script>>);

impl Connection for ScriptedConnection {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let line = String::from_utf8_lossy(data).trim_end().to_string();
        let mut script = self.0.borrow_mut();
        if script.hangup_on.as_deref() == Some(line.as_str()) {
            script.gone = true;
        } else if let Some((_, reply)) = script.replies.iter().find(|(l, _)| *l == line) {
            let reply = reply.clone();
            script.output.extend_from_slice(reply.as_bytes());
        }
        script.sent.push(line);
        Ok(())
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let mut script = self.0.borrow_mut();
        if !script.output.is_empty() {
            return Ok(std::mem::take(&mut script.output));
        }
        if script.gone {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok(Vec::new())
    }

    fn close(&mut self) -> io::Result<bool> {
        Ok(true)
    }
}

struct ScriptedConnector(Rc<RefCell<Script>>);

impl Connector for ScriptedConnector {
    fn open(&mut self, _command: Option<&str>) -> anyhow::Result<Box<dyn Connection>> {
        let mut script = self.0.borrow_mut();
        script.gone = false;
        script.output.extend_from_slice(b"$ ");
        Ok(Box::new(ScriptedConnection(self.0.clone())))
    }
}

/// Pretends every child worker ran one passing loop.
struct InstantChildren(MemorySink);

struct Finished;

#[async_trait(?Send)]
impl ChildWorker for Finished {
    async fn wait(&mut self) -> io::Result<bool> {
        Ok(true)
    }

    fn kill(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Spawner for InstantChildren {
    fn spawn(&mut self, sequence: &Path, _loops: u32) -> io::Result<Box<dyn ChildWorker>> {
        let name = autoseq::parser::sequence_name(sequence);
        let send = |sink: &mut MemorySink, msg: Message| {
            sink.send(&msg).map_err(|e| io::Error::other(e.to_string()))
        };
        send(&mut self.0, Message::LoopResultPass { name: name.clone(), iteration: 1 })?;
        send(&mut self.0, Message::WorkerRunComplete { name })?;
        Ok(Box::new(Finished))
    }
}

struct Run {
    script: Rc<RefCell<Script>>,
    messages: MemorySource,
    result: Result<(), WorkerError>,
    logs: TempDir,
}

async fn run_sequence(
    source: &str,
    loops: u32,
    config: WorkerConfig,
    setup: impl FnOnce(&mut Script),
) -> Run {
    let logs = tempfile::tempdir().unwrap();
    let path = logs.path().join("main.seq");
    std::fs::write(&path, source).unwrap();

    let script = Rc::new(RefCell::new(Script::default()));
    setup(&mut script.borrow_mut());

    let session = Session::new(
        Box::new(ScriptedConnector(script.clone())),
        LogFile::disabled(),
    );
    let (sink, messages) = memory_channel(64, Duration::from_millis(100));
    let config = WorkerConfig {
        log_dir: logs.path().join("log"),
        ..config
    };
    let result = run_worker(
        &path,
        loops,
        session,
        Box::new(sink.clone()),
        Box::new(InstantChildren(sink)),
        config,
    )
    .await;

    Run {
        script,
        messages,
        result,
        logs,
    }
}

async fn supervise(messages: MemorySource, loops: u32, failure_log: LogFile) -> SupervisorState {
    let config = SupervisorConfig {
        tick: Duration::from_millis(10),
        ..SupervisorConfig::default()
    };
    let state = SupervisorState::new(config.max_workers, failure_log);
    let mut supervisor = Supervisor::new(messages, state, config);
    supervisor.handle(&Message::WorkerRunStart {
        name: "main".into(),
        loops,
    });
    supervisor.run().await;
    supervisor.into_state()
}

#[tokio::test(start_paused = true)]
async fn test_passing_sequence_end_to_end() {
    let run = run_sequence("echo hi ; hi\n", 3, WorkerConfig::default(), |s| {
        s.replies.push(("echo hi".into(), "echo hi\r\nhi\r\n$ ".into()));
    })
    .await;
    assert!(run.result.is_ok());
    assert_eq!(run.script.borrow().sent, vec!["echo hi"; 3]);

    let state = supervise(run.messages, 3, LogFile::disabled()).await;
    let main = state.get("main").unwrap();
    assert_eq!(main.status, WorkerStatus::Completed);
    assert_eq!((main.total, main.succeeded, main.failed), (3, 3, 0));
    assert!(
        state
            .summary()
            .contains("* Sequence [main]>> Total loops: 3, PASSED: 3, FAILED: 0")
    );
}

#[tokio::test(start_paused = true)]
async fn test_expect_failures_are_summarized() {
    let run = run_sequence(
        "# greeting\necho hi ; bye ; ; 5\nWAIT 2s\n",
        2,
        WorkerConfig::default(),
        |s| s.replies.push(("echo hi".into(), "hi\n$ ".into())),
    )
    .await;
    assert!(run.result.is_ok());

    let failure_path = run.logs.path().join("failure.log");
    let state = supervise(
        run.messages,
        2,
        LogFile::new(&failure_path, autoseq::logfile::FAILURE_BANNER),
    )
    .await;

    let main = state.get("main").unwrap();
    assert_eq!((main.succeeded, main.failed), (0, 2));
    assert_eq!(main.failures.keys().copied().collect::<Vec<_>>(), vec![1, 2]);

    let log = std::fs::read_to_string(&failure_path).unwrap();
    assert!(log.contains("FAILURE LOOP: 1"));
    assert!(log.contains("FAILURE LOOP: 2"));
    assert!(state.summary().contains("failed loops: 1, 2"));
}

#[tokio::test(start_paused = true)]
async fn test_lost_connection_exhausts_recovery() {
    let config = WorkerConfig {
        recovery_retry: 2,
        ..Default::default()
    };
    let run = run_sequence("reboot ; up\n", 1, config, |s| {
        s.hangup_on = Some("reboot".into());
    })
    .await;
    assert!(matches!(
        run.result,
        Err(WorkerError::RecoveryExhausted { retries: 2, iteration: 1 })
    ));

    let failure_path = run.logs.path().join("failure.log");
    let state = supervise(
        run.messages,
        1,
        LogFile::new(&failure_path, autoseq::logfile::FAILURE_BANNER),
    )
    .await;
    let main = state.get("main").unwrap();
    assert_eq!(main.status, WorkerStatus::Completed);
    assert_eq!(main.failed, 1);

    let log = std::fs::read_to_string(&failure_path).unwrap();
    assert_eq!(log.matches("ERROR LOOP: 1").count(), 2);
    assert!(log.contains("FAILURE LOOP: 1"));

    // the error dump records every recovery and the final failure
    let dumps: Vec<PathBuf> = std::fs::read_dir(run.logs.path().join("log").join("errordump"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(dumps.len(), 1);
    let dump = std::fs::read_to_string(&dumps[0]).unwrap();
    assert!(dump.contains("TEST SEQUENCE:"));
    assert!(dump.contains("DUMP ERROR INFO:"));
}

#[tokio::test(start_paused = true)]
async fn test_child_workers_are_tracked() {
    let run = run_sequence(
        "RUN child.seq\nRUN_WAIT other.seq\n",
        1,
        WorkerConfig::default(),
        |_| {},
    )
    .await;
    assert!(run.result.is_ok());

    let state = supervise(run.messages, 1, LogFile::disabled()).await;
    assert!(!state.any_running());
    let names: Vec<&str> = state.workers().iter().map(|w| w.name.as_str()).collect();
    assert_eq!(names, vec!["main", "child", "other"]);
    assert_eq!(state.get("child").unwrap().succeeded, 1);
    assert_eq!(state.get("other").unwrap().succeeded, 1);
}

#[tokio::test]
async fn test_unparsable_sequence_completes_without_loops() {
    let run = run_sequence("LOOP missing\n", 1, WorkerConfig::default(), |_| {}).await;
    assert!(matches!(run.result, Err(WorkerError::Parse(_))));
    assert!(run.script.borrow().sent.is_empty());

    let state = supervise(run.messages, 1, LogFile::disabled()).await;
    let main = state.get("main").unwrap();
    assert_eq!(main.status, WorkerStatus::Completed);
    assert_eq!((main.succeeded, main.failed), (0, 0));
}
