//! Shared helpers for integration tests.

use restic_warden::config::ResticPaths;
use restic_warden::restic::{
    CommandBuilder, Invocation, OperationLauncher, ProcessEvent, ProcessExit, RetentionPolicy,
    StreamKind,
};
use restic_warden::scheduler::{
    BackupScheduler, OperationKind, SchedulerPolicy, SchedulerSettings, SchedulerState, StateStore,
};
use restic_warden::MemoryLog;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// One scripted process run: stderr lines, then the exit.
pub(crate) struct Run {
    pub stderr: Vec<&'static str>,
    pub exit: ProcessExit,
}

impl Run {
    pub(crate) fn fail(stderr: &[&'static str]) -> Self {
        Self {
            stderr: stderr.to_vec(),
            exit: ProcessExit::Code(1),
        }
    }
}

/// Launcher that replays queued runs per kind and records launch order.
/// Unscripted runs exit 0 with no output.
#[derive(Clone, Default)]
pub(crate) struct FakeRestic {
    runs: Arc<Mutex<HashMap<OperationKind, VecDeque<Run>>>>,
    launched: Arc<Mutex<Vec<(OperationKind, Vec<String>)>>>,
}

impl FakeRestic {
    pub(crate) fn queue(&self, kind: OperationKind, run: Run) {
        self.runs
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push_back(run);
    }

    pub(crate) fn kinds(&self) -> Vec<OperationKind> {
        self.launched.lock().unwrap().iter().map(|(k, _)| *k).collect()
    }

    pub(crate) fn args_of(&self, kind: OperationKind) -> Option<Vec<String>> {
        self.launched
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, args)| args.clone())
    }
}

impl OperationLauncher for FakeRestic {
    fn launch(
        &mut self,
        invocation: &Invocation,
        events: mpsc::Sender<ProcessEvent>,
    ) -> restic_warden::Result<u32> {
        let run = self
            .runs
            .lock()
            .unwrap()
            .get_mut(&invocation.kind)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Run {
                stderr: Vec::new(),
                exit: ProcessExit::Code(0),
            });
        for line in run.stderr {
            events
                .try_send(ProcessEvent::Line {
                    stream: StreamKind::Stderr,
                    line: line.to_owned(),
                })
                .unwrap();
        }
        events
            .try_send(ProcessEvent::Exited {
                exit: run.exit,
                elapsed: Duration::from_secs(3),
            })
            .unwrap();
        self.launched
            .lock()
            .unwrap()
            .push((invocation.kind, invocation.args.clone()));
        Ok(1000)
    }

    fn interrupt(&mut self, _pid: u32) -> restic_warden::Result<()> {
        Ok(())
    }
}

pub(crate) fn commands(root: &Path) -> CommandBuilder {
    CommandBuilder::new(
        "restic".into(),
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

pub(crate) fn settings() -> SchedulerSettings {
    SchedulerSettings {
        tick_every: Duration::from_secs(1800),
        poll_interval: Duration::from_millis(10),
        max_shutdown_wait: Duration::from_millis(100),
        stale_after_minutes: 30,
    }
}

/// Scheduler over a fake restic, persisting into `root/state.json`.
pub(crate) fn scheduler(
    root: &Path,
    restic: &FakeRestic,
    state: Option<SchedulerState>,
) -> (BackupScheduler<FakeRestic>, StateStore, MemoryLog) {
    let store = StateStore::open(root.join("state.json")).unwrap();
    let log = MemoryLog::new();
    let state = state.unwrap_or_else(|| SchedulerState::new(SchedulerPolicy::default()));
    let scheduler = BackupScheduler::new(
        state,
        Some(store.clone()),
        restic.clone(),
        commands(root),
        Box::new(log.clone()),
        settings(),
    );
    (scheduler, store, log)
}
