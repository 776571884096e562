use anyhow::{Context, Result, bail};
use autoseq::config::{DEFAULT_LOG_DIR, DEFAULT_RECOVERY_RETRY};
use autoseq::logfile::{FAILURE_BANNER, LogKind, log_path};
use autoseq::parser::check_registry;
use autoseq::spawn::{ChildWorker, ProcessSpawner, Spawner};
use autoseq::uds::{UdsClient, UdsServer, socket_path};
use autoseq::worker::transcript;
use autoseq::{
    LogFile, Message, MessageSink, NullSink, PtyConnector, Session, Supervisor, SupervisorConfig,
    SupervisorState, WorkerConfig, parse_file, run_worker,
};
use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "autoseq",
    about = "Run sequence files against interactive terminal sessions",
    version
)]
struct Args {
    /// Path to the sequence file
    #[arg(short, long)]
    file: PathBuf,

    /// Number of times to run the sequence
    #[arg(short, long, default_value_t = 1)]
    loops: u32,

    /// Stop at the first expect failure instead of recording it
    #[arg(short = 'S', long)]
    stop_on_failure: bool,

    /// Write a transcript of every session
    #[arg(short = 'L', long)]
    enable_logging: bool,

    /// Run the sequence in this process, without a supervisor
    #[arg(short = 'D', long)]
    debug: bool,

    /// Directory for transcripts, error dumps and the failure log
    #[arg(long, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,

    /// Recoveries allowed at one loop before the worker gives up
    #[arg(long, default_value_t = DEFAULT_RECOVERY_RETRY)]
    recovery_retry: u32,

    /// Recover from command timeouts instead of stopping
    #[arg(long)]
    recover_on_timeout: bool,

    /// Supervisor poll interval in milliseconds
    #[arg(long, default_value_t = 200)]
    tick_ms: u64,

    /// Report to the supervisor listening at this socket
    #[arg(long, hide = true)]
    worker_socket: Option<PathBuf>,
}

impl Args {
    fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            stop_on_failure: self.stop_on_failure,
            recovery_retry: self.recovery_retry,
            log_dir: self.log_dir.clone(),
            logging_enabled: self.enable_logging,
            recover_on_timeout: self.recover_on_timeout,
        }
    }

    fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            tick: Duration::from_millis(self.tick_ms),
            log_dir: self.log_dir.clone(),
            ..SupervisorConfig::default()
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    check_registry()?;

    if args.loops == 0 {
        bail!("--loops must be at least 1");
    }

    match (&args.worker_socket, args.debug) {
        (Some(socket), _) => {
            let sink = UdsClient::new(socket);
            let spawner = ProcessSpawner::new(Some(socket.clone()), args.worker_config())?;
            worker(&args, Box::new(sink), Box::new(spawner)).await
        }
        (None, true) => {
            let spawner = ProcessSpawner::new(None, args.worker_config())?;
            worker(&args, Box::new(NullSink), Box::new(spawner)).await
        }
        (None, false) => supervise(&args).await,
    }
}

async fn worker(
    args: &Args,
    sink: Box<dyn MessageSink>,
    spawner: Box<dyn Spawner>,
) -> Result<()> {
    let config = args.worker_config();
    let name = autoseq::parser::sequence_name(&args.file);
    let session = Session::new(Box::new(PtyConnector), transcript(&config, &name));
    run_worker(&args.file, args.loops, session, sink, spawner, config)
        .await
        .with_context(|| format!("Sequence {} did not finish", args.file.display()))
}

async fn supervise(args: &Args) -> Result<()> {
    let sequence = parse_file(&args.file)
        .with_context(|| format!("Failed to parse sequence file: {}", args.file.display()))?;
    let name = sequence.name();
    let config = args.supervisor_config();

    let server = UdsServer::bind(socket_path(Path::new("."), &name))
        .context("Failed to open the supervisor socket")?;
    let socket = server.path().to_path_buf();

    let failure_log = LogFile::new(
        log_path(&config.log_dir, &name, LogKind::Failure),
        FAILURE_BANNER,
    );
    let state = SupervisorState::new(config.max_workers, failure_log);
    let mut supervisor = Supervisor::new(server, state, config);

    // Registered here so the supervisor does not stop before the main worker
    // has reported anything.
    supervisor.handle(&Message::WorkerRunStart {
        name: name.clone(),
        loops: args.loops,
    });

    let mut spawner = ProcessSpawner::new(Some(socket), args.worker_config())?;
    let mut main_worker = spawner
        .spawn(&args.file, args.loops)
        .with_context(|| format!("Failed to start worker for {}", args.file.display()))?;
    info!("supervising {name}");

    supervisor.run().await;
    match main_worker.wait().await {
        Ok(true) => {}
        Ok(false) => warn!("worker {name} exited with an error"),
        Err(e) => warn!("cannot wait for worker {name}: {e}"),
    }

    let state = supervisor.into_state();
    print!("{}", state.summary());
    if state.workers().iter().any(|w| w.failed > 0) {
        bail!("{name} finished with failed loops");
    }
    Ok(())
}
