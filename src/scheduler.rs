//! Scheduled sync trigger: sleeps until the next configured time of day,
//! then invokes the orchestrator. An "already running" answer is skipped,
//! never queued.

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveTime, TimeZone};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::model::SyncTrigger;
use crate::sync::{Orchestrator, SyncError};

/// Time until the next scheduled run, given local wall-clock `now` and the
/// configured (hour, minute) slots. Always strictly positive.
pub fn next_run_delay(now: DateTime<Local>, times: &[(u32, u32)]) -> std::time::Duration {
    let mut best: Option<DateTime<Local>> = None;
    for &(hour, minute) in times {
        let Some(time) = NaiveTime::from_hms_opt(hour, minute, 0) else {
            continue;
        };
        for day_offset in 0..=1 {
            let date = (now + ChronoDuration::days(day_offset)).date_naive();
            let candidate = match Local.from_local_datetime(&date.and_time(time)) {
                chrono::LocalResult::Single(dt) => dt,
                chrono::LocalResult::Ambiguous(dt, _) => dt,
                chrono::LocalResult::None => continue,
            };
            if candidate > now && best.map(|b| candidate < b).unwrap_or(true) {
                best = Some(candidate);
            }
        }
    }
    let target = best.unwrap_or(now + ChronoDuration::days(1));
    (target - now)
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(60))
}

/// Run the scheduled-sync loop forever.
pub async fn run(orchestrator: Arc<Orchestrator>, times: Vec<(u32, u32)>) {
    loop {
        let delay = next_run_delay(Local::now(), &times);
        info!(delay_secs = delay.as_secs(), "next scheduled sync");
        tokio::time::sleep(delay).await;

        match orchestrator.run_sync(SyncTrigger::Scheduled).await {
            Ok(outcome) => {
                info!(
                    sync_id = %outcome.sync_id,
                    status = outcome.status.as_str(),
                    "scheduled sync finished"
                );
            }
            Err(SyncError::AlreadyRunning) => {
                warn!("scheduled sync skipped; a pass is already running");
            }
            Err(SyncError::Internal(err)) => {
                error!(?err, "scheduled sync failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn picks_the_next_slot_today() {
        let now = local(2025, 3, 10, 10, 0);
        let delay = next_run_delay(now, &[(2, 0), (14, 0)]);
        assert_eq!(delay.as_secs(), 4 * 3600);
    }

    #[test]
    fn rolls_over_to_tomorrow() {
        let now = local(2025, 3, 10, 15, 0);
        let delay = next_run_delay(now, &[(2, 0), (14, 0)]);
        assert_eq!(delay.as_secs(), 11 * 3600);
    }

    #[test]
    fn exact_slot_time_waits_a_full_day() {
        let now = local(2025, 3, 10, 14, 0);
        let delay = next_run_delay(now, &[(14, 0)]);
        assert_eq!(delay.as_secs(), 24 * 3600);
    }
}
