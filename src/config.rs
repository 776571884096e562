//! Runtime configuration of workers and the supervisor.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LOG_DIR: &str = "log";
pub const DEFAULT_RECOVERY_RETRY: u32 = 3;
pub const DEFAULT_TICK: Duration = Duration::from_millis(200);
pub const DEFAULT_MAX_WORKERS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Treat an expect failure as fatal instead of recording it.
    pub stop_on_failure: bool,
    /// Recoveries allowed at one loop index before the worker gives up.
    pub recovery_retry: u32,
    pub log_dir: PathBuf,
    /// Write a session transcript.
    pub logging_enabled: bool,
    /// Treat command timeouts as environment failures and recover from them.
    pub recover_on_timeout: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            stop_on_failure: false,
            recovery_retry: DEFAULT_RECOVERY_RETRY,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            logging_enabled: false,
            recover_on_timeout: false,
        }
    }
}

impl WorkerConfig {
    /// Command-line flags that reproduce this configuration in a child worker.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--log-dir".to_string(),
            self.log_dir.display().to_string(),
            "--recovery-retry".to_string(),
            self.recovery_retry.to_string(),
        ];
        if self.stop_on_failure {
            args.push("--stop-on-failure".to_string());
        }
        if self.logging_enabled {
            args.push("--enable-logging".to_string());
        }
        if self.recover_on_timeout {
            args.push("--recover-on-timeout".to_string());
        }
        args
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Pause between two polls of the message channel.
    pub tick: Duration,
    /// Distinct workers that may be tracked at once.
    pub max_workers: usize,
    pub log_dir: PathBuf,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            max_workers: DEFAULT_MAX_WORKERS,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.recovery_retry, 3);
        assert!(!config.stop_on_failure);
        assert!(!config.recover_on_timeout);
        assert_eq!(SupervisorConfig::default().max_workers, 5);
    }

    #[test]
    fn test_to_args() {
        let config = WorkerConfig {
            stop_on_failure: true,
            recovery_retry: 5,
            log_dir: PathBuf::from("/tmp/logs"),
            logging_enabled: false,
            recover_on_timeout: true,
        };
        assert_eq!(
            config.to_args(),
            vec![
                "--log-dir",
                "/tmp/logs",
                "--recovery-retry",
                "5",
                "--stop-on-failure",
                "--recover-on-timeout"
            ]
        );
    }
}
