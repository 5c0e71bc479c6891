//! Lifecycle management for long-running service processes.
//!
//! The runner starts every registered process concurrently, shares a single
//! [`CancellationToken`] between them and cancels it when a process fails or
//! the service receives SIGINT/SIGTERM. Processes are given a bounded window
//! to finish their in-flight work, after which closers run (also bounded).
//!
//! Unlike a fire-and-exit supervisor, [`Runner::run`] hands the outcome back
//! to `main`, which decides the exit code.
//!
//! # Example
//!
//! ```no_run
//! use trackbox_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Runner::new()
//!         .with_app_process(|ctx| async move {
//!             ctx.cancelled().await;
//!             Ok(())
//!         })
//!         .with_closer(|| async move {
//!             tracing::info!("closing connections");
//!             Ok(())
//!         })
//!         .with_closer_timeout(Duration::from_secs(5))
//!         .run()
//!         .await
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A long-running process. Receives the shared cancellation token and
/// resolves once it has stopped.
pub type AppProcess = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send,
>;

/// A cleanup function executed after all processes have stopped.
pub type Closer =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send>;

struct NamedProcess {
    name: String,
    process: AppProcess,
}

pub struct Runner {
    processes: Vec<NamedProcess>,
    closers: Vec<Closer>,
    shutdown_timeout: Duration,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Creates a runner with no processes, a 15 second shutdown window and
    /// a 10 second closer timeout.
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
            closers: Vec::new(),
            shutdown_timeout: Duration::from_secs(15),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Adds a boxed process under a name used in log output.
    pub fn with_named_process(mut self, name: impl Into<String>, process: AppProcess) -> Self {
        self.processes.push(NamedProcess {
            name: name.into(),
            process,
        });
        self
    }

    /// Adds a process from a closure.
    ///
    /// If any process returns an error, the shared token is cancelled and the
    /// error is returned from [`Runner::run`].
    pub fn with_app_process<F, Fut>(self, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = format!("process_{}", self.processes.len());
        self.with_named_process(name, Box::new(|token| Box::pin(process(token))))
    }

    /// Adds a closer. Closers always run once processes have stopped,
    /// regardless of how they stopped, and a failing closer does not prevent
    /// the others from running.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    /// Sets how long processes may take to stop after cancellation before
    /// they are aborted.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Uses an externally owned token, allowing callers to trigger shutdown.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Runs all processes until they finish, one fails, or a shutdown signal
    /// arrives, then runs the closers.
    ///
    /// Returns the first process error, if any.
    pub async fn run(self) -> anyhow::Result<()> {
        let token = self.cancellation_token;
        let mut join_set = JoinSet::new();

        for NamedProcess { name, process } in self.processes {
            let process_token = token.clone();
            join_set.spawn(async move {
                debug!(process = %name, "starting process");
                let result = process(process_token).await;
                (name, result)
            });
        }

        let signal = shutdown_signal();
        tokio::pin!(signal);

        let mut first_error = None;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = &mut signal => {
                    token.cancel();
                    break;
                }
                joined = join_set.join_next() => match joined {
                    None => break,
                    Some(result) => {
                        if let Some(err) = Self::record_exit(result) {
                            first_error.get_or_insert(err);
                            token.cancel();
                            break;
                        }
                    }
                },
            }
        }

        Self::drain_processes(join_set, self.shutdown_timeout, &mut first_error).await;

        if !self.closers.is_empty() {
            info!(timeout = ?self.closer_timeout, "running closers");
            match tokio::time::timeout(self.closer_timeout, Self::run_closers(self.closers)).await
            {
                Ok(()) => info!("all closers completed"),
                Err(_) => error!(timeout = ?self.closer_timeout, "closers timed out"),
            }
        }

        match first_error {
            Some(err) => {
                error!("application exiting with error: {:#}", err);
                Err(err)
            }
            None => {
                info!("application exiting normally");
                Ok(())
            }
        }
    }

    /// Logs how a process ended and returns its error, if it failed.
    fn record_exit(
        result: Result<(String, anyhow::Result<()>), tokio::task::JoinError>,
    ) -> Option<anyhow::Error> {
        match result {
            Ok((name, Ok(()))) => {
                debug!(process = %name, "process completed");
                None
            }
            Ok((name, Err(err))) => {
                error!(process = %name, "process error: {:#}", err);
                Some(err.context(format!("process '{}' failed", name)))
            }
            Err(err) => {
                error!("process panicked: {}", err);
                Some(anyhow::anyhow!("process panicked: {}", err))
            }
        }
    }

    /// Waits for the remaining processes to observe cancellation, aborting
    /// them once the shutdown window has elapsed.
    async fn drain_processes(
        mut join_set: JoinSet<(String, anyhow::Result<()>)>,
        timeout: Duration,
        first_error: &mut Option<anyhow::Error>,
    ) {
        let drained = tokio::time::timeout(timeout, async {
            while let Some(result) = join_set.join_next().await {
                if let Some(err) = Self::record_exit(result) {
                    first_error.get_or_insert(err);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(timeout = ?timeout, "processes did not stop in time, aborting");
            join_set.shutdown().await;
        }
    }

    async fn run_closers(closers: Vec<Closer>) {
        let mut closer_set = JoinSet::new();

        for closer in closers {
            closer_set.spawn(async move { closer().await });
        }

        while let Some(result) = closer_set.join_next().await {
            match result {
                Ok(Ok(())) => debug!("closer completed successfully"),
                Ok(Err(err)) => error!("closer error: {:#}", err),
                Err(err) => error!("closer panicked: {}", err),
            }
        }
    }
}

/// Resolves on SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("error setting up SIGINT handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("error setting up SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
