//! Alert and task persistence plus tracker stat queries.
//!
//! The multi-row consistency rules (resolve auto-completes tasks,
//! escalation cancels then creates) live in the engine; this module only
//! provides the guarded single-statement pieces they compose inside one
//! transaction.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{Error, Result};
use crate::model::*;

use super::care::{bad_column, parse_uuid};
use super::{Storage, TxContext};

impl TxContext<'_> {
    pub fn insert_alert(&mut self, alert: &Alert) -> Result<()> {
        insert_alert_on(self.tx, alert)
    }

    pub fn insert_task(&mut self, task: &Task) -> Result<()> {
        insert_task_on(self.tx, task)
    }

    /// Guarded status write: applies only when the row is still in `from`.
    pub fn update_alert_status(
        &mut self,
        id: AlertId,
        from: AlertStatus,
        to: AlertStatus,
    ) -> Result<()> {
        update_alert_status_on(self.tx, id, from, to)
    }

    pub fn stamp_alert_resolution(
        &mut self,
        id: AlertId,
        resolved_by: Option<StaffId>,
        resolved_at: DateTime<Utc>,
    ) -> Result<()> {
        self.tx.execute(
            "UPDATE alerts SET resolved_by = ?1, resolved_at = ?2 WHERE id = ?3",
            params![
                resolved_by.map(|id| id.0.to_string()),
                resolved_at.to_rfc3339(),
                id.0.to_string()
            ],
        )?;
        Ok(())
    }

    /// Complete every non-completed task linked to an alert. Returns the
    /// ids that changed.
    pub fn complete_open_tasks_for_alert(
        &mut self,
        alert_id: AlertId,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskId>> {
        let ids = task_ids_on(
            self.tx,
            alert_id,
            "status NOT IN ('completed', 'cancelled')",
        )?;
        self.tx.execute(
            "UPDATE tasks SET status = 'completed', completed_at = ?1, updated_at = ?1
             WHERE alert_id = ?2 AND status NOT IN ('completed', 'cancelled')",
            params![now.to_rfc3339(), alert_id.0.to_string()],
        )?;
        Ok(ids)
    }

    /// Cancel every PENDING task linked to an alert. Returns the ids that
    /// changed.
    pub fn cancel_pending_tasks_for_alert(
        &mut self,
        alert_id: AlertId,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskId>> {
        let ids = task_ids_on(self.tx, alert_id, "status = 'pending'")?;
        self.tx.execute(
            "UPDATE tasks SET status = 'cancelled', updated_at = ?1
             WHERE alert_id = ?2 AND status = 'pending'",
            params![now.to_rfc3339(), alert_id.0.to_string()],
        )?;
        Ok(ids)
    }
}

impl Storage {
    pub fn get_alert(&self, id: AlertId) -> Result<Alert> {
        self.conn
            .query_row(
                "SELECT * FROM alerts WHERE id = ?1",
                params![id.0.to_string()],
                row_to_alert,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("alert {id}")))
    }

    pub fn list_alerts(
        &self,
        status: Option<AlertStatus>,
        patient_id: Option<PatientId>,
        limit: i64,
    ) -> Result<Vec<Alert>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM alerts
             WHERE (?1 IS NULL OR status = ?1)
               AND (?2 IS NULL OR patient_id = ?2)
             ORDER BY created_at DESC
             LIMIT ?3",
        )?;

        let alerts = stmt
            .query_map(
                params![
                    status.map(|s| s.as_str()),
                    patient_id.map(|id| id.0.to_string()),
                    limit
                ],
                row_to_alert,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(alerts)
    }

    pub fn get_task(&self, id: TaskId) -> Result<Task> {
        self.conn
            .query_row(
                "SELECT * FROM tasks WHERE id = ?1",
                params![id.0.to_string()],
                row_to_task,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("task {id}")))
    }

    pub fn list_tasks_for_alert(&self, alert_id: AlertId) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM tasks WHERE alert_id = ?1 ORDER BY created_at ASC",
        )?;
        let tasks = stmt
            .query_map(params![alert_id.0.to_string()], row_to_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    pub fn list_tasks_for_assignee(
        &self,
        assignee_id: StaffId,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM tasks
             WHERE assignee_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY priority DESC, due_at ASC",
        )?;
        let tasks = stmt
            .query_map(
                params![assignee_id.0.to_string(), status.map(|s| s.as_str())],
                row_to_task,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Staff-driven task status change, guarded on the current status.
    pub fn update_task_status(
        &mut self,
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let completed_at = if to == TaskStatus::Completed {
            Some(now.clone())
        } else {
            None
        };
        let n = self.conn.execute(
            "UPDATE tasks SET status = ?1, updated_at = ?2,
                    completed_at = COALESCE(?3, completed_at)
             WHERE id = ?4 AND status = ?5",
            params![to.as_str(), now, completed_at, id.0.to_string(), from.as_str()],
        )?;
        if n == 0 {
            return Err(Error::InvalidTransition {
                entity: "task",
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// Alert metrics over one tracker's patients: counts by status, open
    /// counts by risk, and mean reaction time in minutes across alerts
    /// that are no longer NEW.
    pub fn tracker_stats(&self, tracker_id: StaffId) -> Result<TrackerStats> {
        let mut stats = TrackerStats::default();

        let mut stmt = self.conn.prepare(
            "SELECT a.status, COUNT(*) FROM alerts a
             JOIN patients p ON p.id = a.patient_id
             WHERE p.tracker_id = ?1
             GROUP BY a.status",
        )?;
        let rows = stmt
            .query_map(params![tracker_id.0.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (status, n) in rows {
            if let Some(status) = AlertStatus::from_str(&status) {
                stats.by_status.push((status, n as u64));
            }
        }

        let mut stmt = self.conn.prepare(
            "SELECT a.risk_level, COUNT(*) FROM alerts a
             JOIN patients p ON p.id = a.patient_id
             WHERE p.tracker_id = ?1 AND a.status != 'resolved'
             GROUP BY a.risk_level",
        )?;
        let rows = stmt
            .query_map(params![tracker_id.0.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (risk, n) in rows {
            if let Some(risk) = RiskLevel::from_str(&risk) {
                stats.open_by_risk.push((risk, n as u64));
            }
        }

        // Timestamps are RFC 3339 text; average in Rust rather than
        // trusting SQLite's date parsing with fractional seconds.
        let mut stmt = self.conn.prepare(
            "SELECT a.created_at, a.updated_at FROM alerts a
             JOIN patients p ON p.id = a.patient_id
             WHERE p.tracker_id = ?1 AND a.status != 'new'",
        )?;
        let spans = stmt
            .query_map(params![tracker_id.0.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut total_minutes = 0.0;
        let mut counted = 0u64;
        for (created, updated) in spans {
            let (Ok(created), Ok(updated)) = (
                created.parse::<DateTime<Utc>>(),
                updated.parse::<DateTime<Utc>>(),
            ) else {
                continue;
            };
            total_minutes += (updated - created).num_seconds() as f64 / 60.0;
            counted += 1;
        }
        if counted > 0 {
            stats.avg_reaction_minutes = Some(total_minutes / counted as f64);
        }

        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// Inner functions
// ---------------------------------------------------------------------------

fn insert_alert_on(conn: &Connection, alert: &Alert) -> Result<()> {
    conn.execute(
        "INSERT INTO alerts (id, patient_id, answer_id, alert_type, risk_level, status,
                             title, description, triggered_by, resolved_by, resolved_at,
                             metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            alert.id.0.to_string(),
            alert.patient_id.0.to_string(),
            alert.answer_id.map(|id| id.0.to_string()),
            alert.alert_type.as_str(),
            alert.risk_level.as_str(),
            alert.status.as_str(),
            alert.title,
            alert.description,
            alert.triggered_by.as_str(),
            alert.resolved_by.map(|id| id.0.to_string()),
            alert.resolved_at.map(|t| t.to_rfc3339()),
            serde_json::to_string(&alert.metadata).unwrap_or_default(),
            alert.created_at.to_rfc3339(),
            alert.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn insert_task_on(conn: &Connection, task: &Task) -> Result<()> {
    conn.execute(
        "INSERT INTO tasks (id, patient_id, assignee_id, alert_id, task_type, priority,
                            status, due_at, completed_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            task.id.0.to_string(),
            task.patient_id.0.to_string(),
            task.assignee_id.0.to_string(),
            task.alert_id.map(|id| id.0.to_string()),
            task.task_type.as_str(),
            task.priority,
            task.status.as_str(),
            task.due_at.to_rfc3339(),
            task.completed_at.map(|t| t.to_rfc3339()),
            task.created_at.to_rfc3339(),
            task.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn update_alert_status_on(
    conn: &Connection,
    id: AlertId,
    from: AlertStatus,
    to: AlertStatus,
) -> Result<()> {
    let n = conn.execute(
        "UPDATE alerts SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        params![
            to.as_str(),
            Utc::now().to_rfc3339(),
            id.0.to_string(),
            from.as_str()
        ],
    )?;
    if n == 0 {
        return Err(Error::InvalidTransition {
            entity: "alert",
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        });
    }
    Ok(())
}

fn task_ids_on(conn: &Connection, alert_id: AlertId, predicate: &str) -> Result<Vec<TaskId>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id FROM tasks WHERE alert_id = ?1 AND {predicate}"
    ))?;
    let ids = stmt
        .query_map(params![alert_id.0.to_string()], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<std::result::Result<Vec<String>, _>>()?;

    ids.into_iter()
        .map(|s| {
            s.parse()
                .map(TaskId)
                .map_err(|e: uuid::Error| Error::Other(format!("bad task id: {e}")))
        })
        .collect()
}

fn row_to_alert(row: &rusqlite::Row) -> rusqlite::Result<Alert> {
    let metadata: String = row.get(11)?;
    Ok(Alert {
        id: parse_uuid(row.get(0)?, AlertId)?,
        patient_id: parse_uuid(row.get(1)?, PatientId)?,
        answer_id: row
            .get::<_, Option<String>>(2)?
            .map(|s| parse_uuid(s, AnswerId))
            .transpose()?,
        alert_type: AlertType::from_str(&row.get::<_, String>(3)?)
            .ok_or_else(|| bad_column("alert_type"))?,
        risk_level: RiskLevel::from_str(&row.get::<_, String>(4)?)
            .ok_or_else(|| bad_column("risk_level"))?,
        status: AlertStatus::from_str(&row.get::<_, String>(5)?)
            .ok_or_else(|| bad_column("alert status"))?,
        title: row.get(6)?,
        description: row.get(7)?,
        triggered_by: TriggeredBy::from_str(&row.get::<_, String>(8)?)
            .ok_or_else(|| bad_column("triggered_by"))?,
        resolved_by: row
            .get::<_, Option<String>>(9)?
            .map(|s| parse_uuid(s, StaffId))
            .transpose()?,
        resolved_at: row
            .get::<_, Option<String>>(10)?
            .and_then(|s| s.parse().ok()),
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        created_at: row
            .get::<_, String>(12)?
            .parse()
            .map_err(|_| bad_column("created_at"))?,
        updated_at: row
            .get::<_, String>(13)?
            .parse()
            .map_err(|_| bad_column("updated_at"))?,
    })
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: parse_uuid(row.get(0)?, TaskId)?,
        patient_id: parse_uuid(row.get(1)?, PatientId)?,
        assignee_id: parse_uuid(row.get(2)?, StaffId)?,
        alert_id: row
            .get::<_, Option<String>>(3)?
            .map(|s| parse_uuid(s, AlertId))
            .transpose()?,
        task_type: TaskType::from_str(&row.get::<_, String>(4)?)
            .ok_or_else(|| bad_column("task_type"))?,
        priority: row.get::<_, i64>(5)? as u8,
        status: TaskStatus::from_str(&row.get::<_, String>(6)?)
            .ok_or_else(|| bad_column("task status"))?,
        due_at: row
            .get::<_, String>(7)?
            .parse()
            .map_err(|_| bad_column("due_at"))?,
        completed_at: row
            .get::<_, Option<String>>(8)?
            .and_then(|s| s.parse().ok()),
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
