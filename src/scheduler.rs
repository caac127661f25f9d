//! Daily periodic compaction trigger: once per day at 06:00 JST, with a
//! 5-30 second random jitter applied once at process start (spec.md §6
//! `COMPACTION__PERIODICRUNENABLED`).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rand::Rng;
use sgarchive_compaction::CompactionEngine;
use sgarchive_objectstore::ObjectStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Spawn the scheduler loop. Returns a handle the caller can await during
/// shutdown; the loop itself exits as soon as `cancel` trips.
pub fn spawn<S: ObjectStore + 'static>(
    engine: Arc<CompactionEngine<S>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let jitter = Duration::from_secs(rand::rng().random_range(5..=30));
        info!(jitter_secs = jitter.as_secs(), "scheduler starting after initial jitter");
        tokio::select! {
            () = tokio::time::sleep(jitter) => {}
            () = cancel.cancelled() => return,
        }

        loop {
            let now = Utc::now();
            let next_run = match next_run_at(now) {
                Ok(next_run) => next_run,
                Err(error) => {
                    error!(%error, "failed to compute next scheduled run, retrying in 60s");
                    tokio::select! {
                        () = tokio::time::sleep(Duration::from_secs(60)) => continue,
                        () = cancel.cancelled() => return,
                    }
                }
            };
            let wait = (next_run - now).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = cancel.cancelled() => return,
            }
            if cancel.is_cancelled() {
                return;
            }

            info!("triggering scheduled compaction run");
            match engine.run(Utc::now(), &cancel).await {
                Ok(outcome) => info!(?outcome, "scheduled compaction run finished"),
                Err(error) => error!(%error, "scheduled compaction run failed"),
            }
        }
    })
}

/// The next 06:00 JST strictly after `now`.
fn next_run_at(now: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
    let jst_now = now.with_timezone(&chrono_tz::Asia::Tokyo);
    let today_six_am = jst_now
        .date_naive()
        .and_hms_opt(6, 0, 0)
        .ok_or_else(|| "06:00:00 is not a valid time".to_string())?;
    let candidate = chrono_tz::Asia::Tokyo
        .from_local_datetime(&today_six_am)
        .single()
        .ok_or_else(|| "ambiguous or nonexistent local JST time at 06:00".to_string())?
        .with_timezone(&Utc);

    if candidate > now {
        Ok(candidate)
    } else {
        Ok(candidate + ChronoDuration::days(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedules_later_today_when_before_six_am_jst() {
        let now = DateTime::parse_from_rfc3339("2023-11-14T00:00:00+09:00").unwrap().with_timezone(&Utc);
        let next = next_run_at(now).unwrap();
        assert_eq!(next.with_timezone(&chrono_tz::Asia::Tokyo).format("%Y-%m-%d %H:%M").to_string(), "2023-11-14 06:00");
    }

    #[test]
    fn schedules_tomorrow_when_after_six_am_jst() {
        let now = DateTime::parse_from_rfc3339("2023-11-14T07:00:00+09:00").unwrap().with_timezone(&Utc);
        let next = next_run_at(now).unwrap();
        assert_eq!(next.with_timezone(&chrono_tz::Asia::Tokyo).format("%Y-%m-%d %H:%M").to_string(), "2023-11-15 06:00");
    }
}
