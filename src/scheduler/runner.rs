//! Scheduler event loop.
//!
//! One task owns the [`SchedulerState`], the [`OperationRunner`] and the
//! journal. It reacts to three inputs: timer ticks, process events and the
//! shutdown token. No state is shared with any other task, so no locking is
//! needed; the launcher's I/O pumps only send [`ProcessEvent`]s.

use crate::config::WardenConfig;
use crate::journal::OperationLog;
use crate::restic::command::CommandBuilder;
use crate::restic::process::{OperationLauncher, ProcessEvent, ProcessLauncher};
use crate::restic::runner::{Launch, OperationRunner};
use crate::scheduler::operation::CompletionEvent;
use crate::scheduler::persist::StateStore;
use crate::scheduler::state::SchedulerState;
use crate::status::StatusSnapshot;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Buffered process events between the I/O pumps and the loop.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Period between two ticks. The first tick fires immediately.
    pub tick_every: Duration,
    /// Delay between two checks while waiting for an interrupted process.
    pub poll_interval: Duration,
    /// Upper bound on that wait.
    pub max_shutdown_wait: Duration,
    /// Lock age (minutes) above which a lock is broken automatically.
    pub stale_after_minutes: u64,
}

impl SchedulerSettings {
    #[must_use]
    pub fn from_config(config: &WardenConfig) -> Self {
        Self {
            tick_every: Duration::from_secs(config.schedule.backup_every_n_minutes.max(1) * 60),
            poll_interval: Duration::from_millis(config.shutdown.poll_interval_ms.max(1)),
            max_shutdown_wait: Duration::from_secs(config.shutdown.max_wait_secs),
            stale_after_minutes: config.lock.stale_after_minutes,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&WardenConfig::default())
    }
}

/// Periodic backup scheduler.
pub struct BackupScheduler<L: OperationLauncher = ProcessLauncher> {
    state: SchedulerState,
    store: Option<StateStore>,
    runner: OperationRunner<L>,
    events: mpsc::Receiver<ProcessEvent>,
    log: Box<dyn OperationLog>,
    status_tx: watch::Sender<StatusSnapshot>,
    settings: SchedulerSettings,
    operation_started_at: Option<DateTime<Utc>>,
    stopping: bool,
}

impl<L: OperationLauncher> BackupScheduler<L> {
    /// Assemble a scheduler. `store` is `None` to run without persistence.
    pub fn new(
        state: SchedulerState,
        store: Option<StateStore>,
        launcher: L,
        commands: CommandBuilder,
        log: Box<dyn OperationLog>,
        settings: SchedulerSettings,
    ) -> Self {
        let (events_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let runner = OperationRunner::new(launcher, commands, settings.stale_after_minutes, events_tx);
        let (status_tx, _) = watch::channel(StatusSnapshot::capture(&state, None, settings.tick_every));
        Self {
            state,
            store,
            runner,
            events,
            log,
            status_tx,
            settings,
            operation_started_at: None,
            stopping: false,
        }
    }

    /// Receive a fresh [`StatusSnapshot`] after every phase or status change.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn into_state(self) -> SchedulerState {
        self.state
    }

    /// Handle a timer tick. Returns `true` if a cycle was started.
    ///
    /// A tick that arrives while an operation is in flight is dropped.
    pub fn tick(&mut self, now: DateTime<Utc>) -> bool {
        if self.stopping {
            return false;
        }
        let pre_backup = self.runner.pre_backup_available();
        if !self.state.want_to_run(pre_backup, now) {
            self.log.write(&format!(
                "Backup not launched. Current state is {}",
                self.state.phase()
            ));
            return false;
        }
        debug!(pre_backup, "cycle started");
        self.advance();
        true
    }

    /// Start queued operations until one is in flight or the queue is empty.
    fn advance(&mut self) {
        loop {
            let Some(kind) = self.state.next_operation() else {
                self.persist();
                self.publish();
                return;
            };

            self.operation_started_at = Some(Utc::now());
            self.persist();
            self.publish();

            match self.runner.execute(kind, self.log.as_mut()) {
                Ok(Launch::Started { pid }) => {
                    info!(%kind, pid, "operation started");
                    return;
                }
                Ok(Launch::Failed(event)) => {
                    self.finish(&event);
                }
                Err(e) => {
                    // Only reachable if the runner and the phase disagree.
                    error!(%kind, "cannot start operation: {e}");
                    return;
                }
            }
        }
    }

    /// Apply one event from the in-flight process.
    pub fn handle_event(&mut self, event: ProcessEvent) {
        match event {
            ProcessEvent::Line { stream, line } => {
                self.runner.observe(stream, &line, self.log.as_mut());
            }
            ProcessEvent::Exited { exit, elapsed } => {
                if let Some(completion) = self.runner.complete(&exit, elapsed, self.log.as_mut()) {
                    self.finish(&completion);
                    self.advance();
                }
            }
        }
    }

    fn finish(&mut self, event: &CompletionEvent) {
        info!(kind = %event.kind, status = %event.status, needs_unlock = event.needs_unlock, "operation finished");
        self.state.on_operation_finished(event);
        self.operation_started_at = None;
        if self.stopping {
            self.state.discard_pending();
        }
        self.persist();
        self.publish();
    }

    /// Run one cycle now and wait for its queue to drain.
    ///
    /// Returns `false` if the cycle was refused.
    pub async fn run_cycle(&mut self) -> bool {
        if !self.tick(Utc::now()) {
            return false;
        }
        while self.runner.is_busy() {
            match self.events.recv().await {
                Some(event) => self.handle_event(event),
                None => break,
            }
        }
        true
    }

    /// Tick every [`SchedulerSettings::tick_every`] until `cancel` fires, then
    /// shut down. Returns the final state.
    pub async fn run(mut self, cancel: CancellationToken) -> SchedulerState {
        info!(
            every_secs = self.settings.tick_every.as_secs(),
            phase = %self.state.phase(),
            "backup scheduler started"
        );
        self.log.write_section("Started");
        self.publish();

        let mut interval = tokio::time::interval(self.settings.tick_every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick(Utc::now());
                }
                Some(event) = self.events.recv() => self.handle_event(event),
            }
        }

        self.shutdown().await;
        self.state
    }

    /// Discard pending work, interrupt the operation in flight and wait
    /// (bounded) for it to exit. The child is never killed.
    pub async fn shutdown(&mut self) {
        self.stopping = true;
        self.state.discard_pending();

        if self.runner.interrupt() {
            self.log.write("Waiting for restic process to be finished");
            let deadline = Instant::now() + self.settings.max_shutdown_wait;
            while self.runner.is_busy() {
                if Instant::now() >= deadline {
                    warn!(
                        kind = ?self.runner.running_kind(),
                        "operation still running after shutdown wait, leaving it behind"
                    );
                    self.log
                        .error("Operation did not finish in time, it will be reported as failed on next start");
                    break;
                }
                match tokio::time::timeout(self.settings.poll_interval, self.events.recv()).await {
                    Ok(Some(event)) => self.handle_event(event),
                    Ok(None) => break,
                    Err(_) => debug!("still waiting for interrupted operation"),
                }
            }
        }

        self.persist();
        self.publish();
        self.log.write_section("Stopped");
        info!(phase = %self.state.phase(), "backup scheduler stopped");
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save(&self.state) {
            error!("cannot persist scheduler state: {e}");
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(StatusSnapshot::capture(
            &self.state,
            self.operation_started_at,
            self.settings.tick_every,
        ));
    }
}
