//! SQLite storage layer.
//!
//! Single source of truth for all follow-up state: patients, periods,
//! day logs, question templates, answers, alerts, tasks, visits, the job
//! queue, and the event feed. WAL mode for concurrent read access. All
//! writes go through the engine.
//!
//! Every cross-entity invariant is a database constraint, not an
//! in-process check: one ACTIVE period per patient and one answer per
//! question template are partial/plain unique indexes, and queue dedup
//! is a partial unique index over non-dead jobs.

pub mod alerts;
pub mod care;
pub mod queue;

use chrono::Utc;
use rusqlite::{Connection, params};

use crate::error::Result;
use crate::event::{Event, EventKind};

/// Storage backend. Owns the SQLite connection.
pub struct Storage {
    pub(crate) conn: Connection,
}

/// Handle for performing storage operations within a transaction.
///
/// Methods delegate to the same SQL logic as `Storage`, but execute
/// against the transaction's connection. Either all operations commit
/// together or none do.
pub struct TxContext<'a> {
    pub(crate) tx: &'a Connection,
}

impl TxContext<'_> {
    pub fn record_event(&mut self, kind: EventKind) -> Result<Event> {
        record_event_on(self.tx, kind)
    }
}

impl Storage {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut storage = Self { conn };
        storage.init()?;
        Ok(storage)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut storage = Self { conn };
        storage.init()?;
        Ok(storage)
    }

    fn init(&mut self) -> Result<()> {
        // WAL mode for concurrent readers
        self.conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        self.conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS staff (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                phone       TEXT NOT NULL,
                role        TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS patients (
                id                  TEXT PRIMARY KEY,
                name                TEXT NOT NULL,
                phone               TEXT NOT NULL,
                status              TEXT NOT NULL DEFAULT 'active',
                tracker_id          TEXT REFERENCES staff(id),
                doctor_id           TEXT REFERENCES staff(id),
                current_period_id   TEXT,
                created_at          TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_patient_phone ON patients(phone);

            CREATE TABLE IF NOT EXISTS periods (
                id              TEXT PRIMARY KEY,
                patient_id      TEXT NOT NULL REFERENCES patients(id),
                start_date      TEXT NOT NULL,
                duration_days   INTEGER NOT NULL,
                status          TEXT NOT NULL DEFAULT 'active',
                morning_time    TEXT,
                afternoon_time  TEXT,
                evening_time    TEXT,
                auto_complete   INTEGER NOT NULL DEFAULT 1,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_one_active_period
                ON periods(patient_id) WHERE status = 'active';

            CREATE TABLE IF NOT EXISTS day_logs (
                period_id           TEXT NOT NULL REFERENCES periods(id),
                day_number          INTEGER NOT NULL,
                morning_answered    INTEGER NOT NULL DEFAULT 0,
                afternoon_answered  INTEGER NOT NULL DEFAULT 0,
                evening_answered    INTEGER NOT NULL DEFAULT 0,
                status              TEXT NOT NULL DEFAULT 'pending',
                PRIMARY KEY (period_id, day_number)
            );

            CREATE TABLE IF NOT EXISTS question_templates (
                id              TEXT PRIMARY KEY,
                period_id       TEXT NOT NULL REFERENCES periods(id),
                day_number      INTEGER NOT NULL,
                slot            TEXT NOT NULL,
                ord             INTEGER NOT NULL DEFAULT 0,
                question_text   TEXT NOT NULL,
                response_type   TEXT NOT NULL DEFAULT 'text',
                is_required     INTEGER NOT NULL DEFAULT 1,
                ai_prompt       TEXT,
                UNIQUE (period_id, day_number, slot, ord)
            );

            CREATE INDEX IF NOT EXISTS idx_templates_day
                ON question_templates(period_id, day_number);

            CREATE TABLE IF NOT EXISTS answers (
                id              TEXT PRIMARY KEY,
                patient_id      TEXT NOT NULL REFERENCES patients(id),
                period_id       TEXT NOT NULL REFERENCES periods(id),
                template_id     TEXT NOT NULL REFERENCES question_templates(id),
                day_number      INTEGER NOT NULL,
                slot            TEXT NOT NULL,
                text_content    TEXT,
                media_url       TEXT,
                is_processed    INTEGER NOT NULL DEFAULT 0,
                risk_level      TEXT NOT NULL DEFAULT 'low',
                ai_analysis     TEXT,
                answered_at     TEXT NOT NULL,
                created_at      TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_one_answer_per_template
                ON answers(template_id);
            CREATE INDEX IF NOT EXISTS idx_answers_patient
                ON answers(patient_id, answered_at);

            CREATE TABLE IF NOT EXISTS alerts (
                id              TEXT PRIMARY KEY,
                patient_id      TEXT NOT NULL REFERENCES patients(id),
                answer_id       TEXT REFERENCES answers(id),
                alert_type      TEXT NOT NULL,
                risk_level      TEXT NOT NULL,
                status          TEXT NOT NULL DEFAULT 'new',
                title           TEXT NOT NULL,
                description     TEXT,
                triggered_by    TEXT NOT NULL DEFAULT 'system',
                resolved_by     TEXT REFERENCES staff(id),
                resolved_at     TEXT,
                metadata        TEXT NOT NULL DEFAULT 'null',
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_alerts_patient ON alerts(patient_id, status);

            CREATE TABLE IF NOT EXISTS tasks (
                id              TEXT PRIMARY KEY,
                patient_id      TEXT NOT NULL REFERENCES patients(id),
                assignee_id     TEXT NOT NULL REFERENCES staff(id),
                alert_id        TEXT REFERENCES alerts(id),
                task_type       TEXT NOT NULL,
                priority        INTEGER NOT NULL DEFAULT 5,
                status          TEXT NOT NULL DEFAULT 'pending',
                due_at          TEXT NOT NULL,
                completed_at    TEXT,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_alert ON tasks(alert_id)
                WHERE alert_id IS NOT NULL;
            CREATE INDEX IF NOT EXISTS idx_tasks_assignee ON tasks(assignee_id, status);

            CREATE TABLE IF NOT EXISTS visits (
                id              TEXT PRIMARY KEY,
                patient_id      TEXT NOT NULL REFERENCES patients(id),
                scheduled_on    TEXT NOT NULL,
                note            TEXT,
                status          TEXT NOT NULL DEFAULT 'scheduled',
                reminded        INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id              TEXT PRIMARY KEY,
                kind            TEXT NOT NULL,
                dedup_key       TEXT NOT NULL,
                payload         TEXT NOT NULL DEFAULT '{}',
                state           TEXT NOT NULL DEFAULT 'scheduled',
                attempts        INTEGER NOT NULL DEFAULT 0,
                max_attempts    INTEGER NOT NULL DEFAULT 3,
                run_at          TEXT NOT NULL,
                last_error      TEXT,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_job_dedup
                ON jobs(kind, dedup_key) WHERE state != 'dead';
            CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs(kind, run_at)
                WHERE state = 'scheduled';

            CREATE TABLE IF NOT EXISTS events (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp   TEXT NOT NULL,
                kind        TEXT NOT NULL
            );
            ",
        )?;

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Execute a closure within a SQLite transaction.
    ///
    /// The transaction commits if the closure returns Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut TxContext) -> Result<T>,
    {
        let tx = self.conn.transaction()?;
        let mut ctx = TxContext { tx: &tx };
        let result = f(&mut ctx)?;
        tx.commit()?;
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Record an event and return it with its sequence number.
    pub fn record_event(&mut self, kind: EventKind) -> Result<Event> {
        record_event_on(&self.conn, kind)
    }

    /// Get events after a sequence number, in feed order.
    pub fn events_since(&self, since_seq: u64) -> Result<Vec<Event>> {
        let mut stmt = self
            .conn
            .prepare("SELECT seq, timestamp, kind FROM events WHERE seq > ?1 ORDER BY seq ASC")?;

        let events = stmt
            .query_map(params![since_seq as i64], |row| {
                let kind_str: String = row.get(2)?;
                Ok(Event {
                    seq: row.get::<_, i64>(0)? as u64,
                    timestamp: row
                        .get::<_, String>(1)?
                        .parse()
                        .unwrap_or_else(|_| Utc::now()),
                    kind: serde_json::from_str(&kind_str)
                        .unwrap_or(EventKind::Unknown { raw: kind_str }),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(events)
    }
}

fn record_event_on(conn: &Connection, kind: EventKind) -> Result<Event> {
    let now = Utc::now();

    conn.execute(
        "INSERT INTO events (timestamp, kind) VALUES (?1, ?2)",
        params![
            now.to_rfc3339(),
            serde_json::to_string(&kind).unwrap_or_default(),
        ],
    )?;

    let seq = conn.last_insert_rowid();

    Ok(Event {
        seq: seq as u64,
        timestamp: now,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_event_json_returns_unknown_variant() {
        let storage = Storage::in_memory().unwrap();

        storage
            .conn
            .execute(
                "INSERT INTO events (timestamp, kind) VALUES (?1, ?2)",
                params![Utc::now().to_rfc3339(), "this is not valid json {{{"],
            )
            .unwrap();

        let events = storage.events_since(0).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0].kind {
            EventKind::Unknown { raw } => {
                assert_eq!(raw, "this is not valid json {{{");
            }
            other => panic!("expected Unknown, got {:?}", other),
        }
    }
}
