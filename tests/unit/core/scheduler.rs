//! Unit tests for scheduler tick classification and registration.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use fxpulse::core::scheduler::{classify_tick, Scheduler, TickDisposition};
use fxpulse::db::{JobStatus, MemStore};
use fxpulse::jobs::Job;

fn nominal() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

#[test]
fn on_time_tick_runs() {
    let fired = nominal() + chrono::Duration::milliseconds(50);
    assert_eq!(
        classify_tick(nominal(), fired, Duration::from_secs(60)),
        TickDisposition::Run
    );
}

#[test]
fn tick_at_the_grace_boundary_runs() {
    let fired = nominal() + chrono::Duration::seconds(60);
    assert_eq!(
        classify_tick(nominal(), fired, Duration::from_secs(60)),
        TickDisposition::Run
    );
}

#[test]
fn tick_beyond_grace_is_a_misfire() {
    let fired = nominal() + chrono::Duration::seconds(61);
    assert_eq!(
        classify_tick(nominal(), fired, Duration::from_secs(60)),
        TickDisposition::Misfire
    );
}

#[test]
fn early_wakeup_runs() {
    let fired = nominal() - chrono::Duration::milliseconds(5);
    assert_eq!(
        classify_tick(nominal(), fired, Duration::from_secs(60)),
        TickDisposition::Run
    );
}

#[test]
fn job_status_store_forms() {
    assert_eq!(JobStatus::Running.to_string(), "running");
    assert_eq!(JobStatus::Success.to_string(), "success");
    assert_eq!(JobStatus::Failed.to_string(), "failed");
}

struct NoopJob;

#[async_trait]
impl Job for NoopJob {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn run(&self, _now: DateTime<Utc>) -> fxpulse::Result<u64> {
        Ok(0)
    }
}

#[test]
fn register_rejects_invalid_cron() {
    let mut scheduler = Scheduler::new(Arc::new(MemStore::new()));
    let err = scheduler
        .register(
            Arc::new(NoopJob),
            "not a cron expression",
            Duration::from_secs(60),
            Duration::from_secs(120),
        )
        .unwrap_err();
    assert!(err.to_string().contains("invalid cron expression"));
}

#[test]
fn register_accepts_the_engine_schedules() {
    let mut scheduler = Scheduler::new(Arc::new(MemStore::new()));
    scheduler
        .register(
            Arc::new(NoopJob),
            fxpulse::core::scheduler::HOURLY_SCHEDULE,
            Duration::from_secs(60),
            Duration::from_secs(120),
        )
        .unwrap();
    scheduler
        .register(
            Arc::new(NoopJob),
            fxpulse::core::scheduler::DAILY_SCHEDULE,
            Duration::from_secs(300),
            Duration::from_secs(600),
        )
        .unwrap();
}
