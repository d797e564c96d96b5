//! Offline trainer boundary.

use std::path::{Path, PathBuf};
use std::process::Command;

use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::{Result, WarmpathError};

/// Produces a model artifact at `output` from the decision log at `dataset`.
///
/// Runs on a blocking thread; implementations may take minutes.
pub trait ModelTrainer: Send + Sync {
    fn train(&self, dataset: &Path, output: &Path) -> Result<()>;
}

impl<F> ModelTrainer for F
where
    F: Fn(&Path, &Path) -> Result<()> + Send + Sync,
{
    fn train(&self, dataset: &Path, output: &Path) -> Result<()> {
        self(dataset, output)
    }
}

/// Runs an external training program:
/// `<program> <args..> --log-path <dataset> --output <output>`.
#[derive(Debug, Clone)]
pub struct CommandTrainer {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandTrainer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// `python3 train_model.py`
    pub fn python(script: impl Into<String>) -> Self {
        Self::new("python3").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl ModelTrainer for CommandTrainer {
    fn train(&self, dataset: &Path, output: &Path) -> Result<()> {
        debug!(program = %self.program.display(), args = ?self.args, "launching trainer");
        let out = Command::new(&self.program)
            .args(&self.args)
            .arg("--log-path")
            .arg(dataset)
            .arg("--output")
            .arg(output)
            .output()?;
        if out.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&out.stderr);
            Err(WarmpathError::Training(format!(
                "{} exited with {}: {}",
                self.program.display(),
                out.status,
                stderr.trim()
            )))
        }
    }
}

/// Where a training run executes.
#[derive(Debug)]
enum TrainWorker {
    Blocking(tokio::task::JoinHandle<()>),
    Thread(std::thread::JoinHandle<()>),
    /// The worker could not be started; `wait` reports the failure.
    Unstarted,
}

/// Handle to a training run started by
/// [`ModelRegistry::train`](super::ModelRegistry::train).
#[derive(Debug)]
pub struct TrainJob {
    pub version: String,
    worker: TrainWorker,
    result: oneshot::Receiver<Result<()>>,
}

impl TrainJob {
    /// Run `work` on tokio's blocking pool when a runtime is available,
    /// otherwise on a dedicated OS thread.
    pub(crate) fn spawn<F>(version: String, work: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let (tx, result) = oneshot::channel();
        let run = move || {
            let _ = tx.send(work());
        };
        let worker = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => TrainWorker::Blocking(runtime.spawn_blocking(run)),
            Err(_) => match std::thread::Builder::new()
                .name(format!("warmpath-train-{version}"))
                .spawn(run)
            {
                Ok(thread) => TrainWorker::Thread(thread),
                Err(e) => {
                    error!(version = %version, error = %e, "failed to spawn training thread");
                    TrainWorker::Unstarted
                }
            },
        };
        Self {
            version,
            worker,
            result,
        }
    }

    /// Wait for training to finish.
    pub async fn wait(self) -> Result<()> {
        let version = self.version;
        match self.result.await {
            Ok(result) => {
                if result.is_ok() {
                    info!(version = %version, "training job finished");
                }
                result
            }
            Err(_) => Err(WarmpathError::Training(format!(
                "training worker for {version} exited without a result"
            ))),
        }
    }

    pub fn is_finished(&self) -> bool {
        match &self.worker {
            TrainWorker::Blocking(handle) => handle.is_finished(),
            TrainWorker::Thread(handle) => handle.is_finished(),
            TrainWorker::Unstarted => true,
        }
    }
}
