// Supervisor: starts one job runner per query job and drains them on shutdown

use crate::db::QueryExecutor;
use crate::errors::StartupError;
use crate::models::{InFlightPolicy, QueryJob, StopReason};
use crate::scheduler::runner::{JobRunner, RunnerState};
use crate::scheduler::shutdown::ShutdownController;
use crate::sink::ValueSink;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, instrument, warn};

/// How the supervisor's run ended once shutdown was requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every runner returned within the grace period
    Drained,
    /// These runners were still executing when the grace period ran out and
    /// have been aborted
    GraceExceeded { stuck: Vec<String> },
}

impl ShutdownOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            ShutdownOutcome::Drained => 0,
            ShutdownOutcome::GraceExceeded { .. } => 1,
        }
    }
}

/// Names of runners that have not returned yet
#[derive(Clone, Default)]
struct AliveSet(Arc<Mutex<BTreeSet<String>>>);

impl AliveSet {
    fn enter(&self, name: &str) -> AliveGuard {
        self.lock().insert(name.to_string());
        AliveGuard {
            name: name.to_string(),
            set: self.clone(),
        }
    }

    fn snapshot(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Removes its runner from the alive set when the task ends, panics included
struct AliveGuard {
    name: String,
    set: AliveSet,
}

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.name);
    }
}

/// Owns the set of job runners and coordinates their shutdown
pub struct Supervisor {
    sink: Arc<dyn ValueSink>,
    in_flight: InFlightPolicy,
}

impl Supervisor {
    pub fn new(sink: Arc<dyn ValueSink>, in_flight: InFlightPolicy) -> Self {
        Self { sink, in_flight }
    }

    /// Start every job and block until all of them have returned.
    ///
    /// Startup is all-or-nothing: jobs are resolved against `handles`, each
    /// referenced database is health-checked and every metric is registered
    /// before the first runner is spawned. Any failure there returns a
    /// [`StartupError`] and no runner starts.
    ///
    /// Runners that stop on their own (failed ticks) do not end the run; it
    /// ends only after `shutdown` has been triggered and the runners drained,
    /// or the grace period elapsed and the remaining runners were aborted.
    /// No runner is executing once this returns.
    #[instrument(skip_all, fields(jobs = jobs.len()))]
    pub async fn run(
        &self,
        jobs: Vec<QueryJob>,
        handles: &HashMap<String, Arc<dyn QueryExecutor>>,
        shutdown: &ShutdownController,
    ) -> Result<ShutdownOutcome, StartupError> {
        let runners = self.prepare(jobs, handles).await?;

        let token = shutdown.token();
        let alive = AliveSet::default();
        let states: Vec<(String, watch::Receiver<RunnerState>)> = runners
            .iter()
            .map(|runner| (runner.job().name.clone(), runner.watch_state()))
            .collect();
        let mut set = JoinSet::new();
        for runner in runners {
            let guard = alive.enter(&runner.job().name);
            let child = token.clone();
            set.spawn(async move {
                let _guard = guard;
                runner.run(child).await
            });
        }
        info!(runners = set.len(), "All job runners started");

        Ok(self
            .drive_shutdown(&mut set, &alive, &states, shutdown)
            .await)
    }

    /// Resolve, check and register every job. Nothing is spawned here.
    async fn prepare(
        &self,
        jobs: Vec<QueryJob>,
        handles: &HashMap<String, Arc<dyn QueryExecutor>>,
    ) -> Result<Vec<JobRunner>, StartupError> {
        if jobs.is_empty() {
            return Err(StartupError::NoJobs);
        }

        let mut resolved = Vec::with_capacity(jobs.len());
        for job in jobs {
            let handle = handles
                .get(&job.database)
                .cloned()
                .ok_or_else(|| StartupError::UnknownDatabase {
                    metric: job.name.clone(),
                    database: job.database.clone(),
                })?;
            resolved.push((Arc::new(job), handle));
        }

        let databases: BTreeSet<&str> = resolved
            .iter()
            .map(|(job, _)| job.database.as_str())
            .collect();
        for database in databases {
            handles[database]
                .health_check()
                .await
                .map_err(|source| StartupError::DatabaseUnreachable {
                    database: database.to_string(),
                    source,
                })?;
        }

        for (job, _) in &resolved {
            self.sink.register(&job.descriptor()).map_err(|e| {
                error!(metric = %job.name, error = %e, "Failed to register metric");
                e
            })?;
        }

        Ok(resolved
            .into_iter()
            .map(|(job, handle)| JobRunner::new(job, handle, self.sink.clone(), self.in_flight))
            .collect())
    }

    /// Reap runners until shutdown is requested, then drain within the grace period.
    ///
    /// Runners still alive when the grace period ends are aborted and reaped
    /// before returning, so none of them observes a value afterwards.
    async fn drive_shutdown(
        &self,
        set: &mut JoinSet<StopReason>,
        alive: &AliveSet,
        states: &[(String, watch::Receiver<RunnerState>)],
        shutdown: &ShutdownController,
    ) -> ShutdownOutcome {
        let token = shutdown.token();

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                joined = set.join_next(), if !set.is_empty() => {
                    if let Some(joined) = joined {
                        reap(joined);
                    }
                    if set.is_empty() {
                        warn!("Every job runner has stopped, waiting for shutdown signal");
                    }
                }
            }
        }

        let grace = shutdown.grace_period();
        info!(
            remaining = set.len(),
            grace_period_ms = grace.as_millis() as u64,
            "Draining job runners"
        );

        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = set.join_next().await {
                reap(joined);
            }
        })
        .await;

        match drained {
            Ok(()) => {
                info!("All job runners stopped within grace period");
                ShutdownOutcome::Drained
            }
            Err(_) => {
                let stuck = alive.snapshot();
                warn!(
                    stuck = ?stuck,
                    grace_period_ms = grace.as_millis() as u64,
                    "Grace period exceeded, aborting remaining job runners"
                );
                for (name, state) in states.iter().filter(|(name, _)| stuck.contains(name)) {
                    let current = *state.borrow();
                    warn!(metric = %name, state = ?current, "Job runner still busy");
                }

                // An aborted task only stops at its next await point, so a runner
                // inside a blocking call keeps going until that call returns.
                set.abort_all();
                while let Some(joined) = set.join_next().await {
                    match joined {
                        Err(e) if e.is_cancelled() => {}
                        other => reap(other),
                    }
                }
                info!(aborted = stuck.len(), "Remaining job runners reaped");
                ShutdownOutcome::GraceExceeded { stuck }
            }
        }
    }
}

fn reap(joined: Result<StopReason, JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Job runner panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ShutdownOutcome::Drained.exit_code(), 0);
        let outcome = ShutdownOutcome::GraceExceeded {
            stuck: vec!["orders_total".to_string()],
        };
        assert_eq!(outcome.exit_code(), 1);
    }

    #[test]
    fn test_alive_guard_removes_on_drop() {
        let alive = AliveSet::default();
        let first = alive.enter("orders_total");
        let _second = alive.enter("orders_avg_price");
        assert_eq!(alive.snapshot(), vec!["orders_avg_price", "orders_total"]);

        drop(first);
        assert_eq!(alive.snapshot(), vec!["orders_avg_price"]);
    }
}
