//! Launches mount processes and watches them until they exit.
//!
//! There is no readiness handshake with any backend tool: a mount process that
//! is still running after the grace window is taken as mounted. A slow starter
//! can therefore be misreported as failed, and one that dies after the window
//! is only noticed when its watcher reaps it.

use std::collections::VecDeque;
use std::future::Future;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tempfile::TempPath;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::AppError;

/// Lines of stderr kept for diagnostics.
const STDERR_TAIL: usize = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExitState {
    Running,
    /// `None` when the status could not be collected.
    Exited(Option<ExitStatus>),
}

/// A mount process that survived the grace window, not yet handed to a watcher.
pub struct RunningProcess {
    child: Child,
    label: String,
}

/// Termination capability for a supervised process. Exactly one exists per
/// process and it is deliberately not `Clone`.
///
/// Signals go through the watcher, which owns the `Child`: it only signals a
/// process it has not reaped yet, so a recycled pid is never hit.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    signals: mpsc::UnboundedSender<Signal>,
    exit: watch::Receiver<ExitState>,
}

/// Renders argv for logs with `-P <secret>` masked.
pub fn display_argv(argv: &[String]) -> String {
    let mut out = Vec::with_capacity(argv.len());
    let mut mask_next = false;
    for arg in argv {
        if mask_next {
            out.push("********");
            mask_next = false;
            continue;
        }
        mask_next = arg == "-P";
        out.push(arg.as_str());
    }
    out.join(" ")
}

/// Starts `argv` and classifies the launch.
///
/// An exit inside `grace` is a launch failure carrying the captured stderr.
pub async fn launch(argv: &[String], grace: Duration, label: &str) -> Result<RunningProcess, AppError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(AppError::LaunchFailed {
            message: "empty mount command".to_string(),
            output: String::new(),
        });
    };
    debug!("Run cmd: {}", display_argv(argv));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| AppError::LaunchFailed {
            message: format!("failed to start {program}"),
            output: e.to_string(),
        })?;

    let stderr = child
        .stderr
        .take()
        .map(|pipe| tokio::spawn(drain(pipe, label.to_string())));

    let early_exit = tokio::time::timeout(grace, child.wait()).await;
    match early_exit {
        Ok(status) => {
            let status = status?;
            let output = match stderr {
                Some(task) => tokio::time::timeout(Duration::from_secs(1), task)
                    .await
                    .ok()
                    .and_then(Result::ok)
                    .unwrap_or_default(),
                None => String::new(),
            };
            info!("Mount process for {label} exited during startup with {status}");
            Err(AppError::LaunchFailed {
                message: format!("Mount process exited with {status}"),
                output,
            })
        }
        // still running after the grace window: the reader keeps draining stderr on its own
        Err(_) => Ok(RunningProcess {
            child,
            label: label.to_string(),
        }),
    }
}

/// Forwards stderr to the log and returns its tail once the pipe closes.
/// Draining continuously keeps a chatty process from blocking on a full pipe.
async fn drain<R: AsyncRead + Unpin>(pipe: R, label: String) -> String {
    let mut lines = BufReader::new(pipe).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!(path = %label, "{line}");
                if tail.len() == STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                warn!(path = %label, "Failed to read mount process stderr: {e}");
                break;
            }
        }
    }
    tail.into_iter().collect::<Vec<_>>().join("\n")
}

impl RunningProcess {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Hands the child to a detached watcher.
    ///
    /// The watcher waits for the process and delivers signals requested through
    /// the handle. When the process exits it drops `keep_alive`, publishes the
    /// exit state and then runs `on_exit`.
    pub fn supervise<F, Fut>(self, keep_alive: Option<TempPath>, on_exit: F) -> (ProcessHandle, JoinHandle<()>)
    where
        F: FnOnce(ExitState) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let RunningProcess { mut child, label } = self;
        let pid = child.id();
        let (tx, rx) = watch::channel(ExitState::Running);
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<Signal>();

        let task = tokio::spawn(async move {
            let state = loop {
                tokio::select! {
                    status = child.wait() => break match status {
                        Ok(status) => ExitState::Exited(Some(status)),
                        Err(e) => {
                            warn!("Failed to wait for mount process of {label}: {e}");
                            ExitState::Exited(None)
                        }
                    },
                    Some(signal) = signal_rx.recv() => send_signal(&child, signal, &label),
                }
            };
            drop(keep_alive);
            tx.send_replace(state);
            on_exit(state).await;
        });

        (
            ProcessHandle {
                pid,
                signals: signal_tx,
                exit: rx,
            },
            task,
        )
    }
}

// `Child::id` is `None` once the child has been reaped.
fn send_signal(child: &Child, signal: Signal, label: &str) {
    let Some(pid) = child.id().and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    match kill(Pid::from_raw(pid), signal) {
        Ok(()) => debug!("Sent {signal:?} to mount process of {label} (pid {pid})"),
        Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to send {signal:?} to mount process of {label}: {e}"),
    }
}

impl ProcessHandle {
    pub fn has_exited(&self) -> bool {
        !matches!(*self.exit.borrow(), ExitState::Running)
    }

    /// Waits for the watcher to observe the exit.
    pub async fn wait(&mut self) -> ExitState {
        match self.exit.wait_for(|s| *s != ExitState::Running).await {
            Ok(state) => *state,
            // watcher gone: the child was dropped with it
            Err(_) => ExitState::Exited(None),
        }
    }

    /// SIGTERM, wait, and SIGKILL if the process outlives `timeout`.
    /// A process that is already gone counts as terminated.
    pub async fn terminate(&mut self, timeout: Duration) -> ExitState {
        if self.has_exited() {
            return self.wait().await;
        }

        // a closed channel means the watcher already saw the exit
        let _ = self.signals.send(Signal::SIGTERM);
        if let Ok(state) = tokio::time::timeout(timeout, self.wait()).await {
            return state;
        }

        warn!(
            "Process {:?} ignored SIGTERM for {timeout:?}, sending SIGKILL",
            self.pid
        );
        let _ = self.signals.send(Signal::SIGKILL);
        self.wait().await
    }
}
