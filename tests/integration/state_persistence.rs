//! State file written by the scheduler and read back on the next start.

use crate::helpers::{FakeRestic, scheduler};
use chrono::Utc;
use restic_warden::scheduler::{
    CompletionStatus, CurrentPhase, OperationKind, SchedulerPolicy, StateRecord, StateStore,
};

#[tokio::test]
async fn every_cycle_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let restic = FakeRestic::default();
    let (mut scheduler, store, _log) = scheduler(dir.path(), &restic, None);

    scheduler.run_cycle().await;

    let record = store.read_record().unwrap();
    assert_eq!(record.current_operation, CurrentPhase::Idle);
    assert_eq!(record.current_status, CompletionStatus::Ok);
    assert_eq!(record.nb_backups_before_forget, Some(9));
    assert_eq!(record.prev_backup_chronos.len(), 1);
    assert_eq!(record.version.as_deref(), Some(env!("CARGO_PKG_VERSION")));
}

#[tokio::test]
async fn interrupted_run_is_reported_failed_and_not_resumed() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::open(dir.path().join("state.json")).unwrap();
    store
        .write_record(&StateRecord {
            current_operation: CurrentPhase::ForgetRunning,
            nb_backups_before_forget: Some(10),
            ..StateRecord::default()
        })
        .unwrap();

    let now = Utc::now();
    let state = store.load(SchedulerPolicy::default(), now);
    assert_eq!(state.phase(), CurrentPhase::Idle);
    assert_eq!(state.status(), CompletionStatus::OperationFailed);
    assert_eq!(state.last_failed_at(), Some(now));
    assert!(state.queue().is_empty());

    let restic = FakeRestic::default();
    let (mut scheduler, _store, _log) = scheduler(dir.path(), &restic, Some(state));
    assert!(scheduler.run_cycle().await);
    assert_eq!(restic.kinds(), vec![OperationKind::Backup]);
    assert_eq!(scheduler.state().status(), CompletionStatus::Ok);
}

#[tokio::test]
async fn history_stays_bounded_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let restic = FakeRestic::default();
    let (mut scheduler, store, _log) = scheduler(dir.path(), &restic, None);

    for _ in 0..12 {
        scheduler.run_cycle().await;
    }
    assert_eq!(scheduler.state().backup_chronos().len(), 10);

    let restored = store.load(
        SchedulerPolicy {
            forget_every_n_backups: 10,
            history_capacity: 4,
        },
        Utc::now(),
    );
    assert_eq!(restored.backup_chronos().len(), 4);
    assert_eq!(restored.phase(), CurrentPhase::JustLaunched);
    assert_eq!(restored.backups_before_forget(), 8);
}

#[test]
fn record_from_older_release_loads() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::open(dir.path().join("state.json")).unwrap();
    std::fs::write(
        store.path(),
        r#"{
            "current_operation": "idle",
            "current_status": "last_operation_failed",
            "nb_backups_before_forget": 3,
            "prev_backup_chronos": [["2024-05-01 10:00:00", 12.5], ["2024-05-01 09:30:00", 14.25]],
            "prev_forget_chronos": [],
            "last_failed_at": "2024-05-01 10:30:02",
            "tray_icon": "gray"
        }"#,
    )
    .unwrap();

    let state = store.load(SchedulerPolicy::default(), Utc::now());
    assert_eq!(state.phase(), CurrentPhase::JustLaunched);
    assert_eq!(state.status(), CompletionStatus::OperationFailed);
    assert_eq!(state.backups_before_forget(), 3);
    assert_eq!(state.backup_chronos().len(), 2);
    assert_eq!(
        state.backup_chronos().latest().map(|c| c.seconds()),
        Some(12.5)
    );
    assert!(state.last_failed_at().is_some());
}
