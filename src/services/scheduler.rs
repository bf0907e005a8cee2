use std::time::Duration;

use chrono::{NaiveDate, Timelike, Utc};
use tokio::time::sleep;

use crate::state::AppState;

/// Background loop running the daily charge jobs.
///
/// Each run happens in its own `tokio::spawn` so a failing job never stops
/// the loop.
pub async fn run_background_scheduler(state: AppState) {
    if state.db_pool.is_none() {
        tracing::warn!("Scheduler: no database pool configured, exiting");
        return;
    }
    tracing::info!(
        daily_hour_utc = state.config.scheduler_daily_hour_utc,
        "Background scheduler started"
    );

    let mut last_daily_run: Option<NaiveDate> = None;

    loop {
        sleep(Duration::from_secs(15)).await;

        let now_utc = Utc::now();
        let today = now_utc.date_naive();
        let run_hour = state.config.scheduler_daily_hour_utc;
        if !daily_run_due(last_daily_run, today, now_utc.hour(), run_hour) {
            continue;
        }
        last_daily_run = Some(today);
        tracing::info!("Scheduler: running daily jobs for {today}");

        let st = state.clone();
        tokio::spawn(async move {
            run_provision_reminders(&st, today).await;
        });
    }
}

fn daily_run_due(last_run: Option<NaiveDate>, today: NaiveDate, hour: u32, run_hour: u32) -> bool {
    last_run != Some(today) && hour >= run_hour.min(23)
}

async fn run_provision_reminders(state: &AppState, today: NaiveDate) {
    match crate::services::charge_provisions::remind_overdue_provisions(
        &state.store,
        &state.notifier,
        today,
    )
    .await
    {
        Ok(reminded) if reminded > 0 => {
            tracing::info!(reminded, "Scheduler: provision finalization reminders sent");
        }
        Ok(_) => {}
        Err(error) => {
            tracing::error!(%error, "Scheduler: provision reminder scan failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::daily_run_due;

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
    }

    #[test]
    fn runs_once_per_day_after_the_configured_hour() {
        let today = date("2026-03-01");
        assert!(!daily_run_due(None, today, 4, 6));
        assert!(daily_run_due(None, today, 6, 6));
        assert!(!daily_run_due(Some(today), today, 12, 6));
        assert!(daily_run_due(Some(date("2026-02-28")), today, 23, 6));
    }
}
