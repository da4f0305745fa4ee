//! Launching worker processes.
//!
//! The supervisor does not care how a worker runs. A [`WorkerLauncher`] turns
//! a [`WorkerEnv`] into a [`WorkerProcess`]: a pair of message queues, an exit
//! notification and a way to ask for termination. [`ProcessLauncher`] backs
//! this with a real child process; [`crate::memory::MemoryLauncher`] keeps
//! everything in memory.

use crate::error::SupervisorError;
use crate::exit::WorkerExit;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::path::PathBuf;
use std::process::Stdio;
use switchboard_protocol::{framing, WorkerEnv};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

/// A started worker, seen from the controller.
pub struct WorkerProcess {
    /// OS process id, if the worker runs as a process.
    pub pid: Option<u32>,
    /// Controller → worker messages. Dropping every sender disconnects the
    /// worker's control channel.
    pub outbound: mpsc::UnboundedSender<String>,
    /// Worker → controller messages. All of them are delivered before `exit`
    /// resolves.
    pub inbound: mpsc::UnboundedReceiver<String>,
    pub exit: oneshot::Receiver<WorkerExit>,
    /// Each message asks the worker to terminate.
    pub terminate: mpsc::UnboundedSender<()>,
}

pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, env: &WorkerEnv) -> Result<WorkerProcess, SupervisorError>;
}

/// Runs each worker as a child process of a program that understands the
/// worker environment variables, normally the current executable.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Launches workers by re-executing the running binary.
    pub fn current_exe() -> Result<Self, SupervisorError> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, env: &WorkerEnv) -> Result<WorkerProcess, SupervisorError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(env.to_vars())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            SupervisorError::Launch(format!("{}: {}", self.program.display(), e))
        })?;
        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SupervisorError::Launch("worker stdin is not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SupervisorError::Launch("worker stdout is not piped".to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (terminate_tx, terminate_rx) = mpsc::unbounded_channel();

        let worker_id = env.worker_id;
        tokio::spawn(write_control_pipe(worker_id, stdin, outbound_rx));
        let reader = tokio::spawn(read_control_pipe(worker_id, stdout, inbound_tx));
        tokio::spawn(async move {
            let status = wait_for_exit(child, terminate_rx).await;
            // Everything the worker wrote is queued before the exit is reported.
            let _ = reader.await;
            let _ = exit_tx.send(status);
        });

        Ok(WorkerProcess {
            pid,
            outbound: outbound_tx,
            inbound: inbound_rx,
            exit: exit_rx,
            terminate: terminate_tx,
        })
    }
}

async fn write_control_pipe(worker_id: u32, stdin: ChildStdin, mut outbound: mpsc::UnboundedReceiver<String>) {
    let mut frames = FramedWrite::new(stdin, framing::codec());
    while let Some(message) = outbound.recv().await {
        if let Err(e) = frames.send(Bytes::from(message)).await {
            debug!(worker_id, "Control pipe write failed: {}", e);
            break;
        }
    }
    // Dropping the pipe closes the worker's stdin.
}

async fn read_control_pipe(worker_id: u32, stdout: ChildStdout, inbound: mpsc::UnboundedSender<String>) {
    let mut frames = FramedRead::new(stdout, framing::codec());
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(frame) => match String::from_utf8(frame.to_vec()) {
                Ok(message) => {
                    let _ = inbound.send(message);
                }
                Err(_) => debug!(worker_id, "Dropping non UTF-8 frame from worker"),
            },
            Err(e) => {
                debug!(worker_id, "Control pipe read failed: {}", e);
                break;
            }
        }
    }
}

async fn wait_for_exit(mut child: Child, mut terminate: mpsc::UnboundedReceiver<()>) -> WorkerExit {
    loop {
        tokio::select! {
            status = child.wait() => {
                return match status {
                    Ok(status) => WorkerExit::from(status),
                    Err(e) => {
                        warn!("Failed to collect worker exit status: {}", e);
                        WorkerExit::default()
                    }
                };
            }
            Some(()) = terminate.recv() => send_terminate(&mut child),
        }
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret != 0 {
        debug!(pid, "SIGTERM failed: {}", std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!("Kill failed: {}", e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn env() -> WorkerEnv {
        WorkerEnv {
            worker_id: 7,
            port: 8000,
            bind_address: "127.0.0.1".to_string(),
            no_tls: true,
            config_path: None,
        }
    }

    #[tokio::test]
    async fn test_exit_code_is_reported() {
        let launcher = ProcessLauncher::new("sh").with_args(["-c", "exit 3"]);
        let process = launcher.launch(&env()).unwrap();
        assert!(process.pid.is_some());
        assert_eq!(process.exit.await.unwrap(), WorkerExit::with_code(3));
    }

    #[tokio::test]
    async fn test_environment_is_passed() {
        let launcher = ProcessLauncher::new("sh").with_args(["-c", "test \"$SWITCHBOARD_WORKER_ID\" = 7"]);
        let process = launcher.launch(&env()).unwrap();
        assert_eq!(process.exit.await.unwrap(), WorkerExit::with_code(0));
    }

    #[tokio::test]
    async fn test_terminate_sends_sigterm() {
        let launcher = ProcessLauncher::new("sleep").with_args(["30"]);
        let process = launcher.launch(&env()).unwrap();
        process.terminate.send(()).unwrap();
        assert_eq!(process.exit.await.unwrap(), WorkerExit::with_signal(libc::SIGTERM));
    }

    #[tokio::test]
    async fn test_closing_outbound_closes_stdin() {
        // `cat` exits once its stdin is closed.
        let launcher = ProcessLauncher::new("cat");
        let process = launcher.launch(&env()).unwrap();
        drop(process.outbound);
        assert_eq!(process.exit.await.unwrap(), WorkerExit::with_code(0));
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_launch() {
        let launcher = ProcessLauncher::new("/nonexistent/switchboard-worker");
        assert!(matches!(launcher.launch(&env()), Err(SupervisorError::Launch(_))));
    }
}
