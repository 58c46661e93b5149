//! Supervision of the isolated processing worker
//!
//! Heavy per-item work runs in a separate process: the same executable
//! re-invoked with `--process-queue`. At most one worker runs at a time.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::cli::PROCESS_QUEUE_FLAG;
use crate::db::MediaStore;

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("a processing worker is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// How a worker process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl WorkerExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Result of a processing attempt that was not rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingRun {
    /// Nothing needed processing, no worker was started
    NothingToProcess,
    Exited(WorkerExit),
    LaunchFailed,
}

/// Starts a worker and waits for it to terminate
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self) -> io::Result<WorkerExit>;
}

/// Re-invokes the current executable with the processing flag appended
pub struct ProcessWorkerLauncher {
    program: PathBuf,
    args: Vec<OsString>,
    working_dir: PathBuf,
}

impl ProcessWorkerLauncher {
    pub fn new(program: PathBuf, args: Vec<OsString>, working_dir: PathBuf) -> Self {
        Self {
            program,
            args,
            working_dir,
        }
    }

    /// Same program, arguments and working directory as this process
    pub fn from_current_process() -> io::Result<Self> {
        let args = std::env::args_os()
            .skip(1)
            .filter(|a| a != PROCESS_QUEUE_FLAG)
            .collect();
        Ok(Self::new(std::env::current_exe()?, args, std::env::current_dir()?))
    }
}

#[async_trait]
impl WorkerLauncher for ProcessWorkerLauncher {
    async fn launch(&self) -> io::Result<WorkerExit> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(PROCESS_QUEUE_FLAG)
            .current_dir(&self.working_dir)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await?;

        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Ok(WorkerExit {
            code: status.code(),
            signal,
        })
    }
}

/// Owns the "worker is running" flag
pub struct ProcessingSupervisor {
    store: Arc<dyn MediaStore>,
    launcher: Arc<dyn WorkerLauncher>,
    running: AtomicBool,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ProcessingSupervisor {
    pub fn new(store: Arc<dyn MediaStore>, launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self {
            store,
            launcher,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_processing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one worker if there is anything to process.
    ///
    /// Resolves when the worker terminates, whatever its exit status; only a
    /// worker that is already running or an unreadable store is an error.
    pub async fn try_start_processing(&self) -> Result<ProcessingRun, ProcessingError> {
        if self.is_processing() {
            return Err(ProcessingError::AlreadyRunning);
        }

        let pending = self
            .store
            .count_needing_processing()
            .await
            .context("Could not count items needing processing")?;
        if pending == 0 {
            info!("No more videos to process");
            return Ok(ProcessingRun::NothingToProcess);
        }

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ProcessingError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);

        info!(pending, "Starting processing worker");
        match self.launcher.launch().await {
            Ok(exit) if exit.success() => {
                info!("Processing worker finished");
                Ok(ProcessingRun::Exited(exit))
            }
            Ok(exit) => {
                warn!(code = ?exit.code, signal = ?exit.signal, "Processing worker exited abnormally");
                Ok(ProcessingRun::Exited(exit))
            }
            Err(e) => {
                error!(error = %e, "Could not start processing worker");
                Ok(ProcessingRun::LaunchFailed)
            }
        }
    }
}
