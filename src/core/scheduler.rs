//! Cron-triggered job execution with an at-most-one-in-flight guard,
//! misfire grace, and job-log bookkeeping.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::watch;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::db::{JobStatus, Store};
use crate::error::{EngineError, Result};
use crate::jobs::Job;

/// Cron expressions use the six-field form with a leading seconds column.
pub const HOURLY_SCHEDULE: &str = "0 0 * * * *";
pub const DAILY_SCHEDULE: &str = "0 0 0 * * *";

pub const HOURLY_GRACE: Duration = Duration::from_secs(60);
pub const DAILY_GRACE: Duration = Duration::from_secs(300);
pub const HOURLY_DEADLINE: Duration = Duration::from_secs(120);
pub const DAILY_DEADLINE: Duration = Duration::from_secs(600);

/// Bounded wait for in-flight runs at shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

/// What to do with a tick that fired at `fired` for nominal time `nominal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDisposition {
    /// Execute, with the nominal time as the logical now.
    Run,
    /// Beyond the grace window; abandon and wait for the next tick.
    Misfire,
}

pub fn classify_tick(
    nominal: DateTime<Utc>,
    fired: DateTime<Utc>,
    grace: Duration,
) -> TickDisposition {
    let late = fired.signed_duration_since(nominal);
    let grace = chrono::Duration::milliseconds(grace.as_millis() as i64);
    if late <= grace {
        TickDisposition::Run
    } else {
        TickDisposition::Misfire
    }
}

struct JobSpec {
    job: Arc<dyn Job>,
    schedule: Schedule,
    grace: Duration,
    deadline: Duration,
}

/// Drives registered jobs from their cron schedules.
///
/// Each job gets its own tick loop and an ownership-based guard: a tick
/// that fires while the previous run is still in flight is dropped, not
/// queued. Every executed tick is recorded in the job log.
pub struct Scheduler {
    store: Arc<dyn Store>,
    specs: Vec<JobSpec>,
    shutdown_tx: watch::Sender<bool>,
    loop_handles: Mutex<Vec<JoinHandle<()>>>,
    inflight: Arc<Mutex<Vec<JoinHandle<()>>>>,
    shutdown_grace: Duration,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            specs: Vec::new(),
            shutdown_tx,
            loop_handles: Mutex::new(Vec::new()),
            inflight: Arc::new(Mutex::new(Vec::new())),
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }

    /// Register a job under a cron expression (six-field, UTC).
    pub fn register(
        &mut self,
        job: Arc<dyn Job>,
        cron_expr: &str,
        grace: Duration,
        deadline: Duration,
    ) -> Result<()> {
        let schedule = Schedule::from_str(cron_expr).map_err(|e| {
            EngineError::ConfigInvalid(format!("invalid cron expression '{cron_expr}': {e}"))
        })?;
        info!(job = job.name(), cron = cron_expr, "job registered");
        self.specs.push(JobSpec {
            job,
            schedule,
            grace,
            deadline,
        });
        Ok(())
    }

    /// Spawn one tick loop per registered job.
    pub async fn start(&self) {
        let mut handles = self.loop_handles.lock().await;
        for spec in &self.specs {
            let store = self.store.clone();
            let job = spec.job.clone();
            let schedule = spec.schedule.clone();
            let grace = spec.grace;
            let deadline = spec.deadline;
            let shutdown_rx = self.shutdown_tx.subscribe();
            let inflight = self.inflight.clone();

            handles.push(tokio::spawn(tick_loop(
                store, job, schedule, grace, deadline, shutdown_rx, inflight,
            )));
        }
        info!(jobs = self.specs.len(), "scheduler started");
    }

    /// Stop accepting ticks, then wait up to the shutdown grace for
    /// in-flight runs before aborting them.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let loops = std::mem::take(&mut *self.loop_handles.lock().await);
        for handle in loops {
            let _ = handle.await;
        }

        let inflight = std::mem::take(&mut *self.inflight.lock().await);
        if inflight.is_empty() {
            info!("scheduler stopped, no runs in flight");
            return;
        }

        info!(runs = inflight.len(), "waiting for in-flight job runs");
        let deadline = tokio::time::Instant::now() + self.shutdown_grace;
        for mut handle in inflight {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!("in-flight run exceeded shutdown grace, aborting");
                handle.abort();
            }
        }
        info!("scheduler stopped");
    }
}

#[allow(clippy::too_many_arguments)]
async fn tick_loop(
    store: Arc<dyn Store>,
    job: Arc<dyn Job>,
    schedule: Schedule,
    grace: Duration,
    deadline: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    inflight: Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    // At-most-one-in-flight: the run holds this guard until it finishes.
    let guard = Arc::new(Mutex::new(()));

    loop {
        let next = match schedule.upcoming(Utc).next() {
            Some(next) => next,
            None => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(60)) => {}
                    _ = shutdown_rx.changed() => break,
                }
                continue;
            }
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown_rx.changed() => break,
        }

        let fired = Utc::now();
        if classify_tick(next, fired, grace) == TickDisposition::Misfire {
            warn!(job = job.name(), nominal = %next, fired = %fired,
                "tick beyond misfire grace, abandoned");
            continue;
        }

        match guard.clone().try_lock_owned() {
            Err(_) => {
                warn!(job = job.name(), nominal = %next,
                    "previous run still in flight, tick dropped");
            }
            Ok(permit) => {
                let handle = tokio::spawn(run_once(
                    store.clone(),
                    job.clone(),
                    next, // logical now is the nominal tick time
                    deadline,
                    permit,
                ));
                let mut inflight = inflight.lock().await;
                inflight.retain(|h| !h.is_finished());
                inflight.push(handle);
            }
        }
    }
}

async fn run_once(
    store: Arc<dyn Store>,
    job: Arc<dyn Job>,
    logical_now: DateTime<Utc>,
    deadline: Duration,
    _permit: OwnedMutexGuard<()>,
) {
    let handle = match store.begin_job(job.name()).await {
        Ok(h) => h,
        Err(e) => {
            // Without a working store the job would fail anyway; skip the
            // run and let the next tick retry.
            error!(job = job.name(), error = %e, "could not open job-log row, run skipped");
            return;
        }
    };

    let started = tokio::time::Instant::now();
    let outcome = tokio::time::timeout(deadline, job.run(logical_now)).await;
    let (status, error_message, records) = match &outcome {
        Ok(Ok(records)) => (JobStatus::Success, None, Some(*records)),
        Ok(Err(e)) => (JobStatus::Failed, Some(e.to_string()), None),
        Err(_) => (
            JobStatus::Failed,
            Some(format!(
                "deadline of {}s exceeded, run cancelled",
                deadline.as_secs()
            )),
            None,
        ),
    };

    if let Err(e) = store
        .end_job(&handle, status, error_message.as_deref(), records)
        .await
    {
        error!(job = job.name(), error = %e, "could not finalize job-log row");
    }

    let duration_ms = started.elapsed().as_millis() as u64;
    match status {
        JobStatus::Success => {
            info!(job = job.name(), duration_ms, records, "job run succeeded");
        }
        _ => {
            error!(job = job.name(), duration_ms, error = ?error_message, "job run failed");
        }
    }
}
