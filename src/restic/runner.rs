//! Operation runner: launches one operation at a time and turns its output
//! and exit into a single [`CompletionEvent`].

use crate::error::{Result, WardenError};
use crate::journal::OperationLog;
use crate::restic::classify::{Finding, OutputClassifier};
use crate::restic::command::CommandBuilder;
use crate::restic::process::{OperationLauncher, ProcessEvent, ProcessExit, ProcessLauncher, StreamKind};
use crate::scheduler::operation::{CompletionEvent, CompletionStatus, OperationKind};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc;

/// Outcome of [`OperationRunner::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum Launch {
    /// The process is running; its completion will arrive as events.
    Started { pid: u32 },
    /// The process could not be started. No events will follow.
    Failed(CompletionEvent),
}

struct InFlight {
    kind: OperationKind,
    pid: u32,
    started_at: DateTime<Utc>,
    classifier: OutputClassifier,
    interrupted: bool,
}

/// Drives the external process for each operation.
pub struct OperationRunner<L: OperationLauncher = ProcessLauncher> {
    launcher: L,
    commands: CommandBuilder,
    stale_after_minutes: u64,
    events: mpsc::Sender<ProcessEvent>,
    in_flight: Option<InFlight>,
}

impl<L: OperationLauncher> OperationRunner<L> {
    /// Events for launched processes are delivered on `events`.
    pub fn new(
        launcher: L,
        commands: CommandBuilder,
        stale_after_minutes: u64,
        events: mpsc::Sender<ProcessEvent>,
    ) -> Self {
        Self {
            launcher,
            commands,
            stale_after_minutes,
            events,
            in_flight: None,
        }
    }

    /// Whether the pre-backup hook should be part of the next cycle.
    #[must_use]
    pub fn pre_backup_available(&self) -> bool {
        self.commands.pre_backup_available()
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Kind of the operation in flight.
    #[must_use]
    pub fn running_kind(&self) -> Option<OperationKind> {
        self.in_flight.as_ref().map(|op| op.kind)
    }

    /// Start `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Busy`] if another operation is still in flight.
    /// A process that cannot be started is not an error: it is reported as
    /// [`Launch::Failed`] with an immediate failed completion.
    pub fn execute(&mut self, kind: OperationKind, log: &mut dyn OperationLog) -> Result<Launch> {
        if let Some(current) = &self.in_flight {
            return Err(WardenError::Busy(format!(
                "{} is running, cannot start {kind}",
                current.kind
            )));
        }

        log.write_section(&format!("Running restic {kind}!"));
        let invocation = self.commands.build(kind);
        tracing::debug!(%kind, command = %invocation.command_line(), "launching");

        let started_at = Utc::now();
        match self.launcher.launch(&invocation, self.events.clone()) {
            Ok(pid) => {
                self.in_flight = Some(InFlight {
                    kind,
                    pid,
                    started_at,
                    classifier: OutputClassifier::new(self.stale_after_minutes),
                    interrupted: false,
                });
                Ok(Launch::Started { pid })
            }
            Err(e) => {
                log.error(&e.to_string());
                let event = CompletionEvent::failed(
                    kind,
                    CompletionStatus::OperationFailed,
                    started_at,
                    Duration::ZERO,
                );
                log_outcome(log, &ProcessExit::Lost(e.to_string()), &event);
                Ok(Launch::Failed(event))
            }
        }
    }

    /// Journal one output line and classify it.
    ///
    /// Only stderr of restic operations is classified; hook output is logged
    /// as is.
    pub fn observe(&mut self, stream: StreamKind, line: &str, log: &mut dyn OperationLog) {
        match stream {
            StreamKind::Stdout => log.write(line),
            StreamKind::Stderr => log.error(line),
        }

        let Some(op) = self.in_flight.as_mut() else {
            return;
        };
        if stream != StreamKind::Stderr || !op.kind.is_restic() {
            return;
        }

        match op.classifier.observe(line) {
            Some(Finding::Lock { stale: false, age }) => {
                let age = age.map_or_else(|| "unknown".to_owned(), |a| a.to_string());
                log.write(&format!(
                    "The lock is too new ({age}). We expect {}+ minutes to unlock automatically.",
                    self.stale_after_minutes
                ));
            }
            Some(Finding::Lock { stale: true, age }) => {
                tracing::info!(kind = %op.kind, age = ?age, "stale repository lock detected");
            }
            Some(Finding::Timeout) => {
                tracing::debug!(kind = %op.kind, "network timeout reported");
            }
            None => {}
        }
    }

    /// Turn the process exit into the operation's completion.
    ///
    /// Returns `None` if nothing was in flight.
    pub fn complete(
        &mut self,
        exit: &ProcessExit,
        elapsed: Duration,
        log: &mut dyn OperationLog,
    ) -> Option<CompletionEvent> {
        let Some(op) = self.in_flight.take() else {
            tracing::warn!(%exit, "process exit with no operation in flight");
            return None;
        };

        let (status, needs_unlock) = if op.kind.is_restic() {
            op.classifier.verdict(exit)
        } else {
            match exit {
                ProcessExit::Code(0) => (CompletionStatus::Ok, false),
                _ => (CompletionStatus::OperationFailed, false),
            }
        };

        let mut event = if status == CompletionStatus::Ok {
            CompletionEvent::ok(op.kind, op.started_at, elapsed)
        } else {
            CompletionEvent::failed(op.kind, status, op.started_at, elapsed)
        };
        event.needs_unlock = needs_unlock;

        if op.interrupted {
            tracing::info!(kind = %op.kind, %status, "interrupted operation finished");
        }
        log_outcome(log, exit, &event);
        Some(event)
    }

    /// Send `SIGINT` to the operation in flight.
    ///
    /// Returns `true` while an operation is still in flight (whether or not
    /// this call delivered the signal); its completion must still be awaited.
    pub fn interrupt(&mut self) -> bool {
        let Some(op) = self.in_flight.as_mut() else {
            return false;
        };
        if !op.interrupted {
            match self.launcher.interrupt(op.pid) {
                Ok(()) => tracing::info!(kind = %op.kind, pid = op.pid, "interrupt sent"),
                Err(e) => tracing::warn!(kind = %op.kind, "cannot interrupt: {e}"),
            }
            op.interrupted = true;
        }
        true
    }
}

fn log_outcome(log: &mut dyn OperationLog, exit: &ProcessExit, event: &CompletionEvent) {
    log.write(&format!(
        "Process finished ({exit}) in {:.2} seconds with status: '{}'",
        event.duration.as_secs_f64(),
        event.status
    ));
}
