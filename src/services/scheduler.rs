//! Daily run scheduling.
//!
//! The service itself has no notion of time windows; this loop just sleeps
//! until the configured local wall-clock time, runs one pass, takes a
//! backup, and goes back to sleep. Individual run failures are logged and
//! never stop the loop.

use std::time::Duration;

use chrono::{DateTime, Local, NaiveTime};
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::ScheduleConfig;

use super::{BackupService, ScrapeService};

/// Run one scrape pass (plus backup) every day at the configured time.
pub async fn run_daily(
    scrape: &ScrapeService,
    backup: &BackupService,
    schedule: &ScheduleConfig,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    loop {
        let wait = until_next_run(Local::now(), schedule.hour, schedule.minute);
        info!(
            "next scrape run in {}h{:02}m",
            wait.as_secs() / 3600,
            (wait.as_secs() % 3600) / 60
        );

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => {
                info!("scheduler stopping");
                return Ok(());
            }
        }

        match scrape.run_once(shutdown.clone()).await {
            Ok(summary) => info!(
                persisted = summary.persisted,
                failed = summary.failed.len(),
                "scheduled run finished"
            ),
            Err(err) => error!("scheduled run failed: {err:#}"),
        }

        if let Err(err) = backup.create_dump().await {
            error!("scheduled backup failed: {err:#}");
        }
    }
}

/// Duration until the next local occurrence of `hour:minute`.
fn until_next_run(now: DateTime<Local>, hour: u32, minute: u32) -> Duration {
    let target_time =
        NaiveTime::from_hms_opt(hour.min(23), minute.min(59), 0).unwrap_or_default();
    let mut target = now.date_naive().and_time(target_time);
    if target <= now.naive_local() {
        target = target + chrono::Duration::days(1);
    }
    (target - now.naive_local())
        .to_std()
        .unwrap_or(Duration::from_secs(60))
}
