//! Job queue operations: delayed delivery, dedup, claim, retry, dead-letter.
//!
//! Dedup is the partial unique index on `(kind, dedup_key)` over non-dead
//! jobs — re-enqueueing a live or completed key is a structural no-op,
//! which is what makes hourly re-sweeps safe. Retry backoff doubles from
//! one second; exhaustion goes dead and releases the key.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{Error, Result};
use crate::model::*;

use super::care::{bad_column, parse_uuid};
use super::{Storage, TxContext};

/// Outcome of a job failure: retry later or give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Retry { run_at: DateTime<Utc> },
    Dead,
}

/// How long a RUNNING job may sit unsettled before it is considered
/// abandoned (worker crashed between claim and settle) and becomes
/// claimable again.
pub const VISIBILITY_TIMEOUT: Duration = Duration::minutes(5);

impl TxContext<'_> {
    /// Enqueue if no live job holds this key. Returns the new job id, or
    /// None when deduplicated.
    pub fn enqueue_job(
        &mut self,
        kind: JobKind,
        dedup_key: &str,
        payload: &serde_json::Value,
        run_at: DateTime<Utc>,
    ) -> Result<Option<JobId>> {
        enqueue_job_on(self.tx, kind, dedup_key, payload, run_at)
    }
}

impl Storage {
    pub fn enqueue_job(
        &mut self,
        kind: JobKind,
        dedup_key: &str,
        payload: &serde_json::Value,
        run_at: DateTime<Utc>,
    ) -> Result<Option<JobId>> {
        enqueue_job_on(&self.conn, kind, dedup_key, payload, run_at)
    }

    /// Claim the next due job of a kind: oldest `run_at` first, flipped to
    /// RUNNING atomically. Returns None when nothing is due.
    ///
    /// RUNNING jobs whose `updated_at` is older than [`VISIBILITY_TIMEOUT`]
    /// are treated as abandoned and reclaimed — claiming bumps `attempts`,
    /// so a job that keeps wedging its worker still dead-letters.
    pub fn claim_due_job(&mut self, kind: JobKind, now: DateTime<Utc>) -> Result<Option<Job>> {
        let tx = self.conn.transaction()?;
        let stale_before = (now - VISIBILITY_TIMEOUT).to_rfc3339();

        let job = tx
            .query_row(
                "SELECT * FROM jobs
                 WHERE kind = ?1
                   AND ((state = 'scheduled' AND run_at <= ?2)
                     OR (state = 'running' AND updated_at <= ?3))
                 ORDER BY run_at ASC, created_at ASC
                 LIMIT 1",
                params![kind.as_str(), now.to_rfc3339(), stale_before],
                row_to_job,
            )
            .optional()?;

        let Some(job) = job else {
            return Ok(None);
        };

        let n = tx.execute(
            "UPDATE jobs SET state = 'running', attempts = attempts + 1, updated_at = ?1
             WHERE id = ?2
               AND ((state = 'scheduled' AND run_at <= ?3)
                 OR (state = 'running' AND updated_at <= ?4))",
            params![
                now.to_rfc3339(),
                job.id.0.to_string(),
                now.to_rfc3339(),
                stale_before
            ],
        )?;
        if n == 0 {
            // Raced by another worker on the same storage handle.
            return Ok(None);
        }

        tx.commit()?;
        self.get_job(job.id).map(Some)
    }

    pub fn get_job(&self, id: JobId) -> Result<Job> {
        self.conn
            .query_row(
                "SELECT * FROM jobs WHERE id = ?1",
                params![id.0.to_string()],
                row_to_job,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("job {id}")))
    }

    pub fn list_jobs(&self, kind: JobKind, state: JobState) -> Result<Vec<Job>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM jobs WHERE kind = ?1 AND state = ?2 ORDER BY run_at ASC",
        )?;
        let jobs = stmt
            .query_map(params![kind.as_str(), state.as_str()], row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Retire a running job as done. Its dedup key stays occupied.
    pub fn complete_job(&mut self, id: JobId) -> Result<()> {
        let n = self.conn.execute(
            "UPDATE jobs SET state = 'completed', updated_at = ?1
             WHERE id = ?2 AND state = 'running'",
            params![Utc::now().to_rfc3339(), id.0.to_string()],
        )?;
        if n == 0 {
            return Err(Error::InvalidTransition {
                entity: "job",
                from: "?".to_string(),
                to: "completed".to_string(),
            });
        }
        Ok(())
    }

    /// Record a failure: reschedule with exponential backoff while
    /// attempts remain, otherwise dead-letter.
    pub fn fail_job(&mut self, id: JobId, error: &str, now: DateTime<Utc>) -> Result<FailOutcome> {
        let job = self.get_job(id)?;
        if job.state != JobState::Running {
            return Err(Error::InvalidTransition {
                entity: "job",
                from: job.state.as_str().to_string(),
                to: "scheduled".to_string(),
            });
        }

        if job.attempts >= job.max_attempts {
            self.conn.execute(
                "UPDATE jobs SET state = 'dead', last_error = ?1, updated_at = ?2
                 WHERE id = ?3 AND state = 'running'",
                params![error, now.to_rfc3339(), id.0.to_string()],
            )?;
            return Ok(FailOutcome::Dead);
        }

        // 1s, 2s, 4s, ...
        let backoff = Duration::seconds(1i64 << (job.attempts.saturating_sub(1).min(30)));
        let run_at = now + backoff;
        self.conn.execute(
            "UPDATE jobs SET state = 'scheduled', run_at = ?1, last_error = ?2, updated_at = ?3
             WHERE id = ?4 AND state = 'running'",
            params![
                run_at.to_rfc3339(),
                error,
                now.to_rfc3339(),
                id.0.to_string()
            ],
        )?;
        Ok(FailOutcome::Retry { run_at })
    }
}

// ---------------------------------------------------------------------------
// Inner functions
// ---------------------------------------------------------------------------

fn enqueue_job_on(
    conn: &Connection,
    kind: JobKind,
    dedup_key: &str,
    payload: &serde_json::Value,
    run_at: DateTime<Utc>,
) -> Result<Option<JobId>> {
    let id = JobId::new();
    let now = Utc::now().to_rfc3339();

    let n = conn.execute(
        "INSERT INTO jobs (id, kind, dedup_key, payload, state, attempts, max_attempts,
                           run_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'scheduled', 0, ?5, ?6, ?7, ?7)
         ON CONFLICT (kind, dedup_key) WHERE state != 'dead' DO NOTHING",
        params![
            id.0.to_string(),
            kind.as_str(),
            dedup_key,
            serde_json::to_string(payload).unwrap_or_default(),
            DEFAULT_MAX_ATTEMPTS,
            run_at.to_rfc3339(),
            now,
        ],
    )?;

    if n == 0 {
        // Dedup hit — a live job already holds this key.
        return Ok(None);
    }
    Ok(Some(id))
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    let payload: String = row.get(3)?;
    Ok(Job {
        id: parse_uuid(row.get(0)?, JobId)?,
        kind: JobKind::from_str(&row.get::<_, String>(1)?).ok_or_else(|| bad_column("kind"))?,
        dedup_key: row.get(2)?,
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        state: JobState::from_str(&row.get::<_, String>(4)?)
            .ok_or_else(|| bad_column("job state"))?,
        attempts: row.get::<_, i64>(5)? as u32,
        max_attempts: row.get::<_, i64>(6)? as u32,
        run_at: row
            .get::<_, String>(7)?
            .parse()
            .map_err(|_| bad_column("run_at"))?,
        last_error: row.get(8)?,
        created_at: row
            .get::<_, String>(9)?
            .parse()
            .map_err(|_| bad_column("created_at"))?,
        updated_at: row
            .get::<_, String>(10)?
            .parse()
            .map_err(|_| bad_column("updated_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn enqueue_is_idempotent_per_key() {
        let mut storage = Storage::in_memory().unwrap();
        let now = Utc::now();

        let first = storage
            .enqueue_job(JobKind::Delivery, "p:1:morning", &json!({}), now)
            .unwrap();
        assert!(first.is_some());

        let second = storage
            .enqueue_job(JobKind::Delivery, "p:1:morning", &json!({}), now)
            .unwrap();
        assert!(second.is_none());

        // Same key, different kind — separate queue, no dedup.
        let other_kind = storage
            .enqueue_job(JobKind::Analysis, "p:1:morning", &json!({}), now)
            .unwrap();
        assert!(other_kind.is_some());
    }

    #[test]
    fn completed_job_still_occupies_its_key() {
        let mut storage = Storage::in_memory().unwrap();
        let now = Utc::now();

        let id = storage
            .enqueue_job(JobKind::Delivery, "k", &json!({}), now)
            .unwrap()
            .unwrap();
        let claimed = storage.claim_due_job(JobKind::Delivery, now).unwrap();
        assert_eq!(claimed.unwrap().id, id);
        storage.complete_job(id).unwrap();

        assert!(
            storage
                .enqueue_job(JobKind::Delivery, "k", &json!({}), now)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn abandoned_running_job_is_reclaimed_after_visibility_timeout() {
        let mut storage = Storage::in_memory().unwrap();
        let now = Utc::now();

        let id = storage
            .enqueue_job(JobKind::Delivery, "k", &json!({}), now)
            .unwrap()
            .unwrap();
        let claimed = storage.claim_due_job(JobKind::Delivery, now).unwrap().unwrap();
        assert_eq!(claimed.id, id);

        // Worker died without settling: invisible inside the window.
        assert!(
            storage
                .claim_due_job(JobKind::Delivery, now + Duration::minutes(1))
                .unwrap()
                .is_none()
        );

        // Past the window the job is claimable again, with the extra
        // attempt on record.
        let reclaimed = storage
            .claim_due_job(
                JobKind::Delivery,
                now + VISIBILITY_TIMEOUT + Duration::seconds(1),
            )
            .unwrap()
            .expect("stale running job should be reclaimable");
        assert_eq!(reclaimed.id, id);
        assert_eq!(reclaimed.state, JobState::Running);
        assert_eq!(reclaimed.attempts, 2);
    }

    #[test]
    fn failed_job_retries_then_goes_dead() {
        let mut storage = Storage::in_memory().unwrap();
        let now = Utc::now();

        let id = storage
            .enqueue_job(JobKind::Delivery, "k", &json!({}), now)
            .unwrap()
            .unwrap();

        let mut clock = now;
        for attempt in 1..=DEFAULT_MAX_ATTEMPTS {
            // Advance past any backoff so the retry is claimable.
            clock += Duration::seconds(60);
            let job = storage
                .claim_due_job(JobKind::Delivery, clock)
                .unwrap()
                .expect("job should be claimable");
            assert_eq!(job.attempts, attempt);

            let outcome = storage.fail_job(id, "send failed", clock).unwrap();
            if attempt < DEFAULT_MAX_ATTEMPTS {
                assert!(matches!(outcome, FailOutcome::Retry { .. }));
            } else {
                assert_eq!(outcome, FailOutcome::Dead);
            }
        }

        // Dead job releases the key.
        assert!(
            storage
                .enqueue_job(JobKind::Delivery, "k", &json!({}), now)
                .unwrap()
                .is_some()
        );
    }
}
