//! Configuration flowing into the scheduler.

use crate::helpers::{FakeRestic, Run, commands};
use restic_warden::scheduler::{
    BackupScheduler, OperationKind, SchedulerSettings, SchedulerState,
};
use restic_warden::{MemoryLog, WardenConfig};
use std::time::Duration;

#[test]
fn settings_follow_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
        [schedule]
        backup_every_n_minutes = 60
        forget_every_n_backups = 5

        [history]
        capacity = 3

        [shutdown]
        poll_interval_ms = 50
        max_wait_secs = 30
        "#,
    )
    .unwrap();

    let config = WardenConfig::load_or_default(&path).unwrap();
    let settings = SchedulerSettings::from_config(&config);
    assert_eq!(settings.tick_every, Duration::from_secs(3600));
    assert_eq!(settings.poll_interval, Duration::from_millis(50));
    assert_eq!(settings.max_shutdown_wait, Duration::from_secs(30));
    assert_eq!(settings.stale_after_minutes, 30);

    let policy = config.scheduler_policy();
    assert_eq!(policy.forget_every_n_backups, 5);
    assert_eq!(policy.history_capacity, 3);
}

#[tokio::test]
async fn lock_threshold_comes_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = WardenConfig::default();
    config.lock.stale_after_minutes = 3;

    let restic = FakeRestic::default();
    restic.queue(
        OperationKind::Backup,
        Run::fail(&[
            "lock was created at 2024-05-01 03:00:00 (4m2s ago)",
            "the `unlock` command can be used to remove stale locks",
        ]),
    );
    let mut scheduler = BackupScheduler::new(
        SchedulerState::new(config.scheduler_policy()),
        None,
        restic.clone(),
        commands(dir.path()),
        Box::new(MemoryLog::new()),
        SchedulerSettings::from_config(&config),
    );

    scheduler.run_cycle().await;
    assert_eq!(
        restic.kinds(),
        vec![
            OperationKind::Backup,
            OperationKind::Unlock,
            OperationKind::Backup
        ]
    );
}
