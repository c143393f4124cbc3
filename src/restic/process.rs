//! Child process launching.
//!
//! The launcher only pumps I/O: every output line and the final exit are
//! forwarded as [`ProcessEvent`]s to the scheduler loop, which owns all
//! interpretation. Children are never killed; cancellation sends `SIGINT`
//! so restic can release its repository lock.

use crate::error::{Result, WardenError};
use crate::restic::command::Invocation;
use std::fmt;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

/// How long output is still forwarded once the child has exited.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Which pipe a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// How a child process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// Normal exit with a status code.
    Code(i32),
    /// Terminated by a signal.
    Signal(i32),
    /// The exit status could not be collected.
    Lost(String),
}

impl From<std::process::ExitStatus> for ProcessExit {
    fn from(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signal(signal);
            }
        }
        Self::Lost(format!("{status}"))
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "{code}"),
            Self::Signal(signal) => write!(f, "signal {signal}"),
            Self::Lost(reason) => write!(f, "lost: {reason}"),
        }
    }
}

/// Output of the in-flight process, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Line { stream: StreamKind, line: String },
    /// Always the last event for a process.
    Exited { exit: ProcessExit, elapsed: Duration },
}

/// Starts child processes and interrupts them.
pub trait OperationLauncher: Send {
    /// Start `invocation`, forwarding its output and exit to `events`.
    ///
    /// Returns the child pid.
    ///
    /// # Errors
    ///
    /// Returns an error if the process could not be started.
    fn launch(
        &mut self,
        invocation: &Invocation,
        events: mpsc::Sender<ProcessEvent>,
    ) -> Result<u32>;

    /// Ask the process to stop cleanly.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal could not be delivered.
    fn interrupt(&mut self, pid: u32) -> Result<()>;
}

/// Launches real processes with `tokio::process`.
#[derive(Debug, Default)]
pub struct ProcessLauncher;

impl OperationLauncher for ProcessLauncher {
    fn launch(
        &mut self,
        invocation: &Invocation,
        events: mpsc::Sender<ProcessEvent>,
    ) -> Result<u32> {
        let mut command = tokio::process::Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        if let Some(env) = &invocation.env {
            command.env_clear().envs(env);
        }

        let started = Instant::now();
        let mut child = command.spawn().map_err(|e| {
            WardenError::Process(format!(
                "cannot start {}: {e}",
                invocation.program.display()
            ))
        })?;
        let pid = child
            .id()
            .ok_or_else(|| WardenError::Process("child exited before reporting a pid".to_owned()))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        tokio::spawn(async move {
            let mut out = tokio::spawn(forward_lines(stdout, StreamKind::Stdout, events.clone()));
            let mut err = tokio::spawn(forward_lines(stderr, StreamKind::Stderr, events.clone()));

            let exit = match child.wait().await {
                Ok(status) => ProcessExit::from(status),
                Err(e) => ProcessExit::Lost(e.to_string()),
            };
            let elapsed = started.elapsed();

            // A background grandchild may keep the pipes open past the exit.
            let drained = tokio::time::timeout(PIPE_DRAIN_TIMEOUT, async {
                let _ = (&mut out).await;
                let _ = (&mut err).await;
            })
            .await;
            if drained.is_err() {
                tracing::debug!(pid, "output pipes still open after exit, detaching");
                for pump in [out, err] {
                    if !pump.is_finished() {
                        pump.abort();
                        let _ = pump.await;
                    }
                }
            }

            if events.send(ProcessEvent::Exited { exit, elapsed }).await.is_err() {
                tracing::warn!(pid, "scheduler loop gone before process exit was reported");
            }
        });

        Ok(pid)
    }

    fn interrupt(&mut self, pid: u32) -> Result<()> {
        let raw = i32::try_from(pid)
            .map_err(|_| WardenError::Process(format!("pid {pid} out of range")))?;
        // SAFETY: plain signal delivery to a pid we spawned.
        let rc = unsafe { libc::kill(raw, libc::SIGINT) };
        if rc != 0 {
            return Err(WardenError::Process(format!(
                "cannot interrupt pid {pid}: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

/// Forward every line of `stream` until EOF. Invalid UTF-8 is replaced.
async fn forward_lines<R>(stream: Option<R>, kind: StreamKind, events: mpsc::Sender<ProcessEvent>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(stream) = stream else {
        return;
    };
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_owned();
                if events.send(ProcessEvent::Line { stream: kind, line }).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("cannot read child {kind:?}: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::scheduler::operation::OperationKind;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn shell(script: &str) -> Invocation {
        Invocation {
            kind: OperationKind::Backup,
            program: PathBuf::from("sh"),
            args: vec!["-c".to_owned(), script.to_owned()],
            env: None,
        }
    }

    async fn collect(mut rx: mpsc::Receiver<ProcessEvent>) -> Vec<ProcessEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let done = matches!(event, ProcessEvent::Exited { .. });
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    fn exit_of(events: &[ProcessEvent]) -> ProcessExit {
        match events.last() {
            Some(ProcessEvent::Exited { exit, .. }) => exit.clone(),
            other => panic!("expected exit event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn forwards_both_streams_then_exit() {
        let (tx, rx) = mpsc::channel(16);
        let mut launcher = ProcessLauncher;
        launcher
            .launch(&shell("echo out; echo err 1>&2; exit 3"), tx)
            .unwrap();
        let events = collect(rx).await;

        assert!(events.contains(&ProcessEvent::Line {
            stream: StreamKind::Stdout,
            line: "out".to_owned(),
        }));
        assert!(events.contains(&ProcessEvent::Line {
            stream: StreamKind::Stderr,
            line: "err".to_owned(),
        }));
        assert_eq!(exit_of(&events), ProcessExit::Code(3));
    }

    #[tokio::test]
    async fn explicit_env_replaces_inherited() {
        let (tx, rx) = mpsc::channel(16);
        let mut invocation = shell("echo \"${LC_ALL}:${HOME:-unset}\"");
        let mut env = BTreeMap::new();
        env.insert("LC_ALL".to_owned(), "C".to_owned());
        env.insert("PATH".to_owned(), "/usr/bin:/bin".to_owned());
        invocation.env = Some(env);

        ProcessLauncher.launch(&invocation, tx).unwrap();
        let events = collect(rx).await;
        assert_eq!(
            events.first(),
            Some(&ProcessEvent::Line {
                stream: StreamKind::Stdout,
                line: "C:unset".to_owned(),
            })
        );
    }

    #[tokio::test]
    async fn interrupt_delivers_sigint() {
        let (tx, rx) = mpsc::channel(16);
        let mut launcher = ProcessLauncher;
        let pid = launcher.launch(&shell("exec sleep 30"), tx).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        launcher.interrupt(pid).unwrap();

        let events = tokio::time::timeout(Duration::from_secs(5), collect(rx))
            .await
            .unwrap();
        assert_eq!(exit_of(&events), ProcessExit::Signal(libc::SIGINT));
    }

    #[tokio::test]
    async fn exit_is_reported_while_a_background_child_holds_the_pipes() {
        let (tx, rx) = mpsc::channel(16);
        ProcessLauncher
            .launch(&shell("echo started; sleep 20 & exit 0"), tx)
            .unwrap();

        let events = tokio::time::timeout(Duration::from_secs(5), collect(rx))
            .await
            .unwrap();
        assert_eq!(events.first(), Some(&ProcessEvent::Line {
            stream: StreamKind::Stdout,
            line: "started".to_owned(),
        }));
        assert_eq!(exit_of(&events), ProcessExit::Code(0));
    }

    #[tokio::test]
    async fn missing_program_fails_to_launch() {
        let (tx, _rx) = mpsc::channel(1);
        let mut invocation = shell("");
        invocation.program = PathBuf::from("/nonexistent/restic-binary");
        invocation.args.clear();
        let err = ProcessLauncher.launch(&invocation, tx).unwrap_err();
        assert!(matches!(err, WardenError::Process(_)));
    }

    #[test]
    fn exit_display() {
        assert_eq!(ProcessExit::Code(1).to_string(), "1");
        assert_eq!(ProcessExit::Signal(2).to_string(), "signal 2");
    }
}
