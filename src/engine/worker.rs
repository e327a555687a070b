//! Async worker loops: the scheduling sweep, the delivery worker, and
//! the analysis worker.
//!
//! The engine core is synchronous; the daemon wraps it in a tokio mutex
//! and drives it on three cadences. Workers claim jobs under the lock,
//! do provider I/O outside it, then re-lock to settle the job.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{Local, Utc};
use opentelemetry::KeyValue;
use tokio::sync::{Mutex, Notify};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::event::EventKind;
use crate::llm::Analyzer;
use crate::model::*;
use crate::storage::queue::FailOutcome;
use crate::telemetry::{jobs as job_spans, metrics};
use crate::transport::Transport;

use super::Engine;

/// Cadence settings for the daemon loops.
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// How long an idle worker sleeps before polling the queue again.
    pub poll_interval: Duration,
    /// Interval between scheduling sweeps.
    pub sweep_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

/// The long-running daemon: owns the engine and runs all loops until
/// [`Daemon::shutdown`] is called.
#[derive(Clone)]
pub struct Daemon {
    engine: Arc<Mutex<Engine>>,
    transport: Arc<dyn Transport>,
    analyzer: Arc<dyn Analyzer>,
    config: WorkerConfig,
    shutdown: Arc<Notify>,
    stopping: Arc<AtomicBool>,
}

impl Daemon {
    pub fn new(
        engine: Engine,
        transport: Arc<dyn Transport>,
        analyzer: Arc<dyn Analyzer>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            transport,
            analyzer,
            config,
            shutdown: Arc::new(Notify::new()),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared handle to the engine, for webhook handlers and tests.
    pub fn engine(&self) -> Arc<Mutex<Engine>> {
        Arc::clone(&self.engine)
    }

    /// Signal all loops to stop after their current iteration.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    fn stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Run all loops to completion. Returns once shutdown has been
    /// signalled and every loop has drained its current iteration.
    pub async fn run(&self) {
        let sweep = {
            let daemon = self.clone();
            tokio::spawn(async move { daemon.sweep_loop().await })
        };
        let delivery = {
            let daemon = self.clone();
            tokio::spawn(async move { daemon.job_loop(JobKind::Delivery).await })
        };
        let analysis = {
            let daemon = self.clone();
            tokio::spawn(async move { daemon.job_loop(JobKind::Analysis).await })
        };

        let _ = tokio::join!(sweep, delivery, analysis);
        info!("daemon stopped");
    }

    // -----------------------------------------------------------------------
    // Loops
    // -----------------------------------------------------------------------

    async fn sweep_loop(&self) {
        loop {
            if self.stopping() {
                return;
            }

            let now = Local::now();
            {
                let mut engine = self.engine.lock().await;
                match engine.sweep(now) {
                    Ok(outcome) => info!(
                        scheduled = outcome.scheduled,
                        completed = outcome.completed,
                        errors = outcome.errors,
                        "sweep complete"
                    ),
                    Err(err) => warn!(error = %err, "sweep failed"),
                }
                if let Err(err) = engine.check_visits(now, self.transport.as_ref()).await {
                    warn!(error = %err, "visit reminder pass failed");
                }
            }

            tokio::select! {
                _ = self.shutdown.notified() => return,
                _ = sleep(self.config.sweep_interval) => {}
            }
        }
    }

    async fn job_loop(&self, kind: JobKind) {
        loop {
            if self.stopping() {
                return;
            }

            let worked = match kind {
                JobKind::Delivery => self.process_next_delivery().await,
                JobKind::Analysis => self.process_next_analysis().await,
            };

            match worked {
                // Drain the queue before sleeping.
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => warn!(kind = kind.as_str(), error = %err, "worker iteration failed"),
            }

            tokio::select! {
                _ = self.shutdown.notified() => return,
                _ = sleep(self.config.poll_interval) => {}
            }
        }
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    /// Claim and execute one due delivery job. Returns whether a job was
    /// claimed.
    pub async fn process_next_delivery(&self) -> Result<bool> {
        let now = Utc::now();
        let job = {
            let mut engine = self.engine.lock().await;
            engine.claim_job(JobKind::Delivery, now)?
        };
        let Some(job) = job else {
            return Ok(false);
        };

        let span = job_spans::start_job_span("delivery", &job.id.0);
        job_spans::record_state_transition(&span, "scheduled", "running");

        let payload: DeliveryPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                // Unparseable payload never succeeds; burn its retries.
                self.settle_failure(&job, None, &Error::Other(err.to_string()))
                    .await?;
                return Ok(true);
            }
        };

        // The period may have been cancelled or superseded since the
        // sweep enqueued this. A stale job completes without sending.
        // Lookup failures settle through the retry path so the claimed
        // job cannot wedge in RUNNING.
        let fresh = {
            let engine = self.engine.lock().await;
            engine.period(payload.period_id).and_then(|period| {
                let patient = engine.patient(payload.patient_id)?;
                Ok(period.status == PeriodStatus::Active
                    && patient.current_period_id == Some(period.id))
            })
        };
        let fresh = match fresh {
            Ok(fresh) => fresh,
            Err(err) => {
                job_spans::record_state_transition(&span, "running", "failed");
                self.settle_failure(&job, Some(&payload), &err).await?;
                return Ok(true);
            }
        };
        if !fresh {
            info!(job_id = %job.id, period_id = %payload.period_id,
                  "period no longer current, skipping delivery");
            self.settle_success(&job, "delivery").await?;
            return Ok(true);
        }

        for question in &payload.questions {
            if let Err(err) = self.transport.send(&payload.phone, question).await {
                job_spans::record_state_transition(&span, "running", "failed");
                self.settle_failure(&job, Some(&payload), &err).await?;
                return Ok(true);
            }
        }

        job_spans::record_state_transition(&span, "running", "completed");
        self.settle_success(&job, "delivery").await?;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Analysis
    // -----------------------------------------------------------------------

    /// Claim and execute one due analysis job. Returns whether a job was
    /// claimed.
    pub async fn process_next_analysis(&self) -> Result<bool> {
        let now = Utc::now();
        let job = {
            let mut engine = self.engine.lock().await;
            engine.claim_job(JobKind::Analysis, now)?
        };
        let Some(job) = job else {
            return Ok(false);
        };

        let span = job_spans::start_job_span("analysis", &job.id.0);
        job_spans::record_state_transition(&span, "scheduled", "running");

        let payload: AnalysisPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                self.settle_analysis_failure(&job, None, &Error::Other(err.to_string()))
                    .await?;
                return Ok(true);
            }
        };

        let result = {
            let mut engine = self.engine.lock().await;
            engine
                .process_answer(
                    payload.answer_id,
                    self.analyzer.as_ref(),
                    self.transport.as_ref(),
                )
                .await
        };

        match result {
            Ok(_) => {
                job_spans::record_state_transition(&span, "running", "completed");
                self.settle_success(&job, "analysis").await?;
            }
            Err(err) => {
                job_spans::record_state_transition(&span, "running", "failed");
                self.settle_analysis_failure(&job, Some(&payload), &err)
                    .await?;
            }
        }
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Settlement
    // -----------------------------------------------------------------------

    async fn settle_success(&self, job: &Job, kind: &'static str) -> Result<()> {
        let mut engine = self.engine.lock().await;
        engine.complete_job(job.id)?;
        metrics::job_state_transitions().add(
            1,
            &[
                KeyValue::new("kind", kind),
                KeyValue::new("from", "running"),
                KeyValue::new("to", "completed"),
            ],
        );
        Ok(())
    }

    async fn settle_failure(
        &self,
        job: &Job,
        payload: Option<&DeliveryPayload>,
        err: &Error,
    ) -> Result<()> {
        let mut engine = self.engine.lock().await;
        match engine.fail_job(job.id, &err.to_string(), Utc::now())? {
            FailOutcome::Retry { run_at } => {
                warn!(job_id = %job.id, error = %err, retry_at = %run_at, "delivery failed, will retry");
                record_transition("delivery", "scheduled");
            }
            FailOutcome::Dead => {
                warn!(job_id = %job.id, error = %err, "delivery job dead after retries");
                record_transition("delivery", "dead");
                if let Some(payload) = payload {
                    engine.record_event(EventKind::DeliveryFailed {
                        patient_id: payload.patient_id,
                        period_id: payload.period_id,
                        day_number: payload.day_number,
                        slot: payload.slot,
                        error: err.to_string(),
                    })?;
                }
            }
        }
        Ok(())
    }

    async fn settle_analysis_failure(
        &self,
        job: &Job,
        payload: Option<&AnalysisPayload>,
        err: &Error,
    ) -> Result<()> {
        let mut engine = self.engine.lock().await;
        match engine.fail_job(job.id, &err.to_string(), Utc::now())? {
            FailOutcome::Retry { run_at } => {
                warn!(job_id = %job.id, error = %err, retry_at = %run_at, "analysis failed, will retry");
                record_transition("analysis", "scheduled");
            }
            FailOutcome::Dead => {
                warn!(job_id = %job.id, error = %err, "analysis job dead after retries");
                record_transition("analysis", "dead");
                if let Some(payload) = payload {
                    engine.record_event(EventKind::AnalysisFailed {
                        answer_id: payload.answer_id,
                        error: err.to_string(),
                    })?;
                }
            }
        }
        Ok(())
    }
}

fn record_transition(kind: &'static str, to: &'static str) {
    metrics::job_state_transitions().add(
        1,
        &[
            KeyValue::new("kind", kind),
            KeyValue::new("from", "running"),
            KeyValue::new("to", to),
        ],
    );
}
