//! Shared test utilities used across unit test modules.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::config::ResticPaths;
use crate::error::{Result, WardenError};
use crate::restic::command::{CommandBuilder, Invocation, RetentionPolicy};
use crate::restic::process::{OperationLauncher, ProcessEvent, ProcessExit, StreamKind};
use crate::scheduler::operation::OperationKind;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Command builder over paths that do not exist (no hook, no exclude file).
pub fn command_builder() -> CommandBuilder {
    let root = std::env::temp_dir().join(format!("restic-warden-test-{}", std::process::id()));
    CommandBuilder::new(
        PathBuf::from("restic"),
        ResticPaths {
            files_from: root.join("bkp_include"),
            exclude_file: root.join("bkp_exclude"),
            password_file: root.join(".pw"),
            env_file: root.join("env.sh"),
            pre_backup_hook: root.join("pre_backup"),
        },
        RetentionPolicy::default(),
    )
}

enum Script {
    Run {
        stdout: Vec<String>,
        stderr: Vec<String>,
        exit: ProcessExit,
    },
    /// Stay running until interrupted.
    Hold,
    FailLaunch,
}

#[derive(Default)]
struct Inner {
    scripts: HashMap<OperationKind, VecDeque<Script>>,
    launched: Vec<OperationKind>,
    held: Option<mpsc::Sender<ProcessEvent>>,
}

/// Fake launcher replaying scripted output per operation kind.
///
/// Unscripted operations succeed silently. Clones share their script.
#[derive(Clone, Default)]
pub struct ScriptedLauncher {
    inner: Arc<Mutex<Inner>>,
    interrupts: Arc<AtomicUsize>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, kind: OperationKind, script: Script) {
        self.inner
            .lock()
            .unwrap()
            .scripts
            .entry(kind)
            .or_default()
            .push_back(script);
    }

    pub fn script(&self, kind: OperationKind, stdout: &[&str], stderr: &[&str], exit: ProcessExit) {
        self.push(
            kind,
            Script::Run {
                stdout: stdout.iter().map(|s| (*s).to_owned()).collect(),
                stderr: stderr.iter().map(|s| (*s).to_owned()).collect(),
                exit,
            },
        );
    }

    pub fn hold(&self, kind: OperationKind) {
        self.push(kind, Script::Hold);
    }

    pub fn fail_launch(&self, kind: OperationKind) {
        self.push(kind, Script::FailLaunch);
    }

    pub fn launched(&self) -> Vec<OperationKind> {
        self.inner.lock().unwrap().launched.clone()
    }

    pub fn interrupts(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.interrupts)
    }
}

impl OperationLauncher for ScriptedLauncher {
    fn launch(&mut self, invocation: &Invocation, events: mpsc::Sender<ProcessEvent>) -> Result<u32> {
        let mut inner = self.inner.lock().unwrap();
        let script = inner
            .scripts
            .get_mut(&invocation.kind)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Script::Run {
                stdout: Vec::new(),
                stderr: Vec::new(),
                exit: ProcessExit::Code(0),
            });

        match script {
            Script::FailLaunch => {
                return Err(WardenError::Process("scripted launch failure".to_owned()));
            }
            Script::Hold => inner.held = Some(events),
            Script::Run {
                stdout,
                stderr,
                exit,
            } => {
                for line in stdout {
                    let _ = events.try_send(ProcessEvent::Line {
                        stream: StreamKind::Stdout,
                        line,
                    });
                }
                for line in stderr {
                    let _ = events.try_send(ProcessEvent::Line {
                        stream: StreamKind::Stderr,
                        line,
                    });
                }
                let _ = events.try_send(ProcessEvent::Exited {
                    exit,
                    elapsed: Duration::from_millis(1_500),
                });
            }
        }
        inner.launched.push(invocation.kind);
        Ok(4242 + u32::try_from(inner.launched.len()).unwrap_or(0))
    }

    fn interrupt(&mut self, _pid: u32) -> Result<()> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        if let Some(events) = self.inner.lock().unwrap().held.take() {
            let _ = events.try_send(ProcessEvent::Exited {
                exit: ProcessExit::Signal(libc::SIGINT),
                elapsed: Duration::from_secs(2),
            });
        }
        Ok(())
    }
}
