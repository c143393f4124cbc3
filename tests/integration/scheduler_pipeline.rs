//! End-to-end cycles through the scheduler with a scripted restic.

use crate::helpers::{FakeRestic, Run, scheduler};
use chrono::Utc;
use restic_warden::StatusSnapshot;
use restic_warden::scheduler::{
    CompletionStatus, CurrentPhase, OperationKind, SchedulerPolicy, SchedulerState,
};

const STALE_LOCK: [&str; 3] = [
    "repository 5e1c2d already locked exclusively by PID 311 on nas by backup (UID 1000, GID 1000)",
    "lock was created at 2024-05-01 03:00:00 (4h12m9.3s ago)",
    "the `unlock` command can be used to remove stale locks",
];

const FRESH_LOCK: [&str; 3] = [
    "repository 5e1c2d already locked by PID 311 on nas by backup (UID 1000, GID 1000)",
    "lock was created at 2024-05-01 03:00:00 (4m2s ago)",
    "the `unlock` command can be used to remove stale locks",
];

#[tokio::test]
async fn forget_follows_every_tenth_backup() {
    let dir = tempfile::tempdir().unwrap();
    let restic = FakeRestic::default();
    let (mut scheduler, _store, _log) = scheduler(dir.path(), &restic, None);

    for _ in 0..9 {
        assert!(scheduler.run_cycle().await);
    }
    assert_eq!(restic.kinds(), vec![OperationKind::Backup; 9]);
    assert_eq!(scheduler.state().backups_before_forget(), 1);

    scheduler.run_cycle().await;
    let kinds = restic.kinds();
    assert_eq!(kinds.len(), 11);
    assert_eq!(kinds[9], OperationKind::Backup);
    assert_eq!(kinds[10], OperationKind::Forget);
    assert_eq!(scheduler.state().backups_before_forget(), 10);
    assert_eq!(scheduler.state().forget_chronos().len(), 1);
    assert_eq!(scheduler.state().phase(), CurrentPhase::Idle);

    let forget = restic.args_of(OperationKind::Forget).unwrap();
    assert_eq!(&forget[..2], ["forget", "--prune"]);
    assert!(forget.windows(2).any(|w| w == ["--keep-last", "3"]));
}

#[tokio::test]
async fn stale_lock_on_forget_unlocks_and_retries_forget() {
    let dir = tempfile::tempdir().unwrap();
    let restic = FakeRestic::default();
    restic.queue(OperationKind::Forget, Run::fail(&STALE_LOCK));
    let state = SchedulerState::new(SchedulerPolicy {
        forget_every_n_backups: 1,
        history_capacity: 10,
    });
    let (mut scheduler, _store, _log) = scheduler(dir.path(), &restic, Some(state));

    scheduler.run_cycle().await;

    assert_eq!(
        restic.kinds(),
        vec![
            OperationKind::Backup,
            OperationKind::Forget,
            OperationKind::Unlock,
            OperationKind::Forget
        ]
    );
    assert_eq!(scheduler.state().status(), CompletionStatus::Ok);
    assert_eq!(scheduler.state().forget_chronos().len(), 1);
}

#[tokio::test]
async fn lock_that_survives_unlock_is_retried_only_once() {
    let dir = tempfile::tempdir().unwrap();
    let restic = FakeRestic::default();
    restic.queue(OperationKind::Backup, Run::fail(&STALE_LOCK));
    restic.queue(OperationKind::Backup, Run::fail(&STALE_LOCK));
    let (mut scheduler, _store, _log) = scheduler(dir.path(), &restic, None);

    scheduler.run_cycle().await;

    assert_eq!(
        restic.kinds(),
        vec![
            OperationKind::Backup,
            OperationKind::Unlock,
            OperationKind::Backup
        ]
    );
    assert_eq!(scheduler.state().status(), CompletionStatus::RepoLocked);
    assert_eq!(scheduler.state().phase(), CurrentPhase::Idle);
    assert!(scheduler.state().backup_chronos().is_empty());

    // The next tick starts over with a fresh retry budget.
    restic.queue(OperationKind::Backup, Run::fail(&STALE_LOCK));
    scheduler.run_cycle().await;
    assert_eq!(restic.kinds().len(), 6);
    assert_eq!(scheduler.state().status(), CompletionStatus::Ok);
}

#[tokio::test]
async fn fresh_lock_is_reported_without_unlock() {
    let dir = tempfile::tempdir().unwrap();
    let restic = FakeRestic::default();
    restic.queue(OperationKind::Backup, Run::fail(&FRESH_LOCK));
    let (mut scheduler, _store, log) = scheduler(dir.path(), &restic, None);

    scheduler.run_cycle().await;

    assert_eq!(restic.kinds(), vec![OperationKind::Backup]);
    assert_eq!(scheduler.state().status(), CompletionStatus::RepoLocked);
    assert!(scheduler.state().last_failed_at().is_some());
    assert!(log.contains("The lock is too new (4m)"));

    let snapshot = scheduler.subscribe().borrow().clone();
    assert!(snapshot.headline(Utc::now()).starts_with("Repository locked at "));
}

#[tokio::test]
async fn network_timeout_keeps_forget_countdown() {
    let dir = tempfile::tempdir().unwrap();
    let restic = FakeRestic::default();
    restic.queue(
        OperationKind::Backup,
        Run::fail(&["Fatal: unable to open repository: dial tcp 10.1.1.2:443: i/o timeout"]),
    );
    let (mut scheduler, _store, _log) = scheduler(dir.path(), &restic, None);

    scheduler.run_cycle().await;

    let state = scheduler.state();
    assert_eq!(state.status(), CompletionStatus::NoNetwork);
    assert_eq!(state.backups_before_forget(), 10);
    assert!(state.backup_chronos().is_empty());
    assert!(state.last_failed_at().is_some());
}

#[tokio::test]
async fn unknown_failure_is_generic_and_logged() {
    let dir = tempfile::tempdir().unwrap();
    let restic = FakeRestic::default();
    restic.queue(
        OperationKind::Backup,
        Run::fail(&["Fatal: wrong password or no key found"]),
    );
    let (mut scheduler, _store, log) = scheduler(dir.path(), &restic, None);

    scheduler.run_cycle().await;

    assert_eq!(scheduler.state().status(), CompletionStatus::OperationFailed);
    assert!(log.contains("! Fatal: wrong password or no key found"));
    assert!(log.contains("with status: 'operation_failed'"));
}

#[cfg(unix)]
#[tokio::test]
async fn failing_hook_does_not_block_backup() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let hook = dir.path().join("pre_backup");
    std::fs::write(&hook, "#!/bin/sh\nexit 3\n").unwrap();
    std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).unwrap();

    let restic = FakeRestic::default();
    restic.queue(
        OperationKind::PreBackup,
        Run {
            stderr: vec!["mysqldump: connection refused"],
            exit: restic_warden::restic::ProcessExit::Code(3),
        },
    );
    let (mut scheduler, _store, _log) = scheduler(dir.path(), &restic, None);

    scheduler.run_cycle().await;

    assert_eq!(
        restic.kinds(),
        vec![OperationKind::PreBackup, OperationKind::Backup]
    );
    let state = scheduler.state();
    assert!(state.pre_backup_failed());
    assert_eq!(state.status(), CompletionStatus::Ok);
    assert_eq!(state.backup_chronos().len(), 1);

    let snapshot = StatusSnapshot::capture(state, None, std::time::Duration::from_secs(1800));
    assert_eq!(
        snapshot.headline(Utc::now()),
        "Last backup was successful but pre-backup hook failed"
    );
}
