//! Cron-driven trigger for buy runs.

use crate::error::AutobuyError;
use anyhow::{Context, Result};
use chrono::Utc;
use cron::Schedule;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Longest uninterrupted sleep while waiting, so shutdown is noticed quickly.
const WAIT_SLICE: Duration = Duration::from_secs(1);

/// Parse a cron expression.
///
/// Classic 5-field expressions (minute precision) are accepted and run at
/// second 0.
pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    let normalized = match expr.split_whitespace().count() {
        5 => format!("0 {}", expr.trim()),
        _ => expr.trim().to_string(),
    };
    Schedule::from_str(&normalized).with_context(|| format!("cannot parse cron \"{expr}\""))
}

/// Allows at most one run at a time.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

/// Held while a run is in progress; releases the slot on drop.
#[derive(Debug)]
pub struct FlightGuard {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn try_acquire(&self) -> Option<FlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| FlightGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

/// Spawn `job` unless a previous run still holds `flight`.
pub fn trigger<F, Fut>(flight: &SingleFlight, job: &Arc<F>, reason: &'static str) -> Option<JoinHandle<()>>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AutobuyError>> + Send + 'static,
{
    let Some(guard) = flight.try_acquire() else {
        warn!(reason, "Previous run still in progress, skipping this trigger");
        return None;
    };

    let job = Arc::clone(job);
    Some(tokio::spawn(async move {
        let _guard = guard;
        info!(reason, "Starting buy run");
        match job().await {
            Ok(()) => info!("Buy run finished"),
            Err(e) if e.is_benign() => info!(outcome = %e, "Buy run ended without orders"),
            Err(e) => error!(error = %e, "Buy run failed"),
        }
    }))
}

/// Run `job` on every occurrence of `schedule` until `shutdown` is set.
///
/// With `buy_on_launch` a run starts immediately. On shutdown the loop waits
/// for a run still in progress.
pub async fn run_scheduled<F, Fut>(
    schedule: Schedule,
    buy_on_launch: bool,
    shutdown: Arc<AtomicBool>,
    job: F,
) -> Result<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AutobuyError>> + Send + 'static,
{
    let flight = SingleFlight::default();
    let job = Arc::new(job);
    let mut in_flight: Option<JoinHandle<()>> = None;

    if buy_on_launch {
        in_flight = trigger(&flight, &job, "launch");
    }

    while !shutdown.load(Ordering::SeqCst) {
        let Some(next) = schedule.upcoming(Utc).next() else {
            warn!("Schedule has no upcoming runs, stopping");
            break;
        };
        info!(next_run = %next, "Waiting for next scheduled run");

        loop {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            let remaining = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(remaining.min(WAIT_SLICE)).await;
        }

        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        if let Some(handle) = trigger(&flight, &job, "schedule") {
            in_flight = Some(handle);
        }
    }

    if let Some(handle) = in_flight {
        if !handle.is_finished() {
            info!("Waiting for the running buy run to finish");
        }
        handle.await.context("buy run task panicked")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    #[test]
    fn test_parse_five_field_schedule() {
        let schedule = parse_schedule("0 12 1 * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 15, 8, 0, 0).unwrap();
        let next = schedule.after(&after).next().unwrap();

        assert_eq!(next.day(), 1);
        assert_eq!(next.month(), 4);
        assert_eq!(next.hour(), 12);
        assert_eq!(next.minute(), 0);
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn test_parse_six_field_schedule() {
        assert!(parse_schedule("30 0 9 * * *").is_ok());
    }

    #[test]
    fn test_parse_invalid_schedule() {
        assert!(parse_schedule("every day").is_err());
        assert!(parse_schedule("").is_err());
    }

    #[test]
    fn test_single_flight_guard() {
        let flight = SingleFlight::default();

        let guard = flight.try_acquire().unwrap();
        assert!(flight.is_busy());
        assert!(flight.try_acquire().is_none());

        drop(guard);
        assert!(!flight.is_busy());
        assert!(flight.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_overlapping_trigger_is_skipped() {
        let flight = SingleFlight::default();
        let release = Arc::new(Notify::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let job = {
            let release = release.clone();
            let runs = runs.clone();
            Arc::new(move || {
                let release = release.clone();
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    release.notified().await;
                    Ok(())
                }
            })
        };

        let first = trigger(&flight, &job, "test").unwrap();
        assert!(trigger(&flight, &job, "test").is_none());

        release.notify_one();
        first.await.unwrap();

        assert!(!flight.is_busy());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_run_releases_flight() {
        let flight = SingleFlight::default();
        let job = Arc::new(|| async { Err(AutobuyError::Broker("down".into())) });

        trigger(&flight, &job, "test").unwrap().await.unwrap();

        assert!(!flight.is_busy());
    }

    #[tokio::test]
    async fn test_buy_on_launch_runs_before_shutdown() {
        let runs = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(true));
        let schedule = parse_schedule("0 12 1 * *").unwrap();

        let counter = runs.clone();
        run_scheduled(schedule, true, shutdown, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_without_launch_runs_nothing() {
        let runs = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(true));
        let schedule = parse_schedule("0 12 1 * *").unwrap();

        let counter = runs.clone();
        run_scheduled(schedule, false, shutdown, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
