// Per-query polling loop

use crate::db::QueryExecutor;
use crate::errors::QueryError;
use crate::models::{InFlightPolicy, MetricValue, QueryJob, StopReason};
use crate::sink::ValueSink;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace};

/// Lifecycle of a job runner: `Idle → Waiting → Executing → Waiting → … → Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Waiting,
    Executing,
    Stopped,
}

/// Owns the polling loop of one query job.
///
/// At most one execution of the job is in flight at any time. Cancellation is
/// only observed while waiting for the next tick, unless the in-flight policy
/// is [`InFlightPolicy::Abort`]. The current [`RunnerState`] is published on a
/// watch channel so it stays observable after `run` takes the runner.
pub struct JobRunner {
    job: Arc<QueryJob>,
    executor: Arc<dyn QueryExecutor>,
    sink: Arc<dyn ValueSink>,
    in_flight: InFlightPolicy,
    state: watch::Sender<RunnerState>,
}

impl JobRunner {
    pub fn new(
        job: Arc<QueryJob>,
        executor: Arc<dyn QueryExecutor>,
        sink: Arc<dyn ValueSink>,
        in_flight: InFlightPolicy,
    ) -> Self {
        let (state, _) = watch::channel(RunnerState::Idle);
        Self {
            job,
            executor,
            sink,
            in_flight,
            state,
        }
    }

    pub fn job(&self) -> &QueryJob {
        &self.job
    }

    pub fn watch_state(&self) -> watch::Receiver<RunnerState> {
        self.state.subscribe()
    }

    /// Run the loop until cancellation or the first failed tick.
    ///
    /// The first tick fires one full interval after the call. Ticks missed
    /// while a slow query runs are skipped rather than replayed.
    #[instrument(skip_all, fields(metric = %self.job.name, database = %self.job.database))]
    pub async fn run(self, token: CancellationToken) -> StopReason {
        info!(
            interval_ms = self.job.interval.as_millis() as u64,
            "Monitoring metric"
        );

        let mut ticker = interval_at(Instant::now() + self.job.interval, self.job.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let reason = loop {
            self.transition(RunnerState::Waiting);
            tokio::select! {
                biased;
                _ = token.cancelled() => break StopReason::Cancelled,
                _ = ticker.tick() => {}
            }

            self.transition(RunnerState::Executing);
            let Some(value) = self.execute(&token).await else {
                break StopReason::Aborted;
            };

            match value.result {
                Ok(result) => {
                    self.sink.observe(&value.job, result);
                    debug!(value = result, observed_at = %value.observed_at, "Evaluated metric");
                }
                Err(e) => {
                    error!(error = %e, "Executing statement failed, metric will no longer be updated");
                    break StopReason::Failed;
                }
            }
        };

        self.transition(RunnerState::Stopped);
        info!(reason = ?reason, "Stopped monitoring metric");
        reason
    }

    /// One tick. `None` means the query was dropped on cancellation.
    async fn execute(&self, token: &CancellationToken) -> Option<MetricValue> {
        let result = match self.in_flight {
            InFlightPolicy::Finish => self.query().await,
            InFlightPolicy::Abort => tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                result = self.query() => result,
            },
        };
        Some(MetricValue::now(self.job.name.as_str(), result))
    }

    async fn query(&self) -> Result<f64, QueryError> {
        let query = self.executor.query_scalar(&self.job.statement);
        match self.job.timeout {
            Some(timeout) => tokio::time::timeout(timeout, query)
                .await
                .map_err(|_| QueryError::Timeout(timeout))?,
            None => query.await,
        }
    }

    fn transition(&self, next: RunnerState) {
        let previous = self.state.send_replace(next);
        trace!(from = ?previous, to = ?next, "Runner state change");
    }
}
