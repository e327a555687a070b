//! Care entities: patients, staff, periods, day logs, templates, answers,
//! visits.
//!
//! Inner `*_on` functions accept `&Connection` so the same SQL runs in
//! both auto-commit mode and inside a transaction.

use chrono::{NaiveDate, NaiveTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{Error, Result};
use crate::model::*;

use super::{Storage, TxContext};

impl TxContext<'_> {
    pub fn insert_staff(&mut self, staff: &StaffUser) -> Result<()> {
        insert_staff_on(self.tx, staff)
    }

    pub fn insert_patient(&mut self, patient: &Patient) -> Result<()> {
        insert_patient_on(self.tx, patient)
    }

    pub fn set_current_period(
        &mut self,
        patient_id: PatientId,
        period_id: Option<PeriodId>,
    ) -> Result<()> {
        set_current_period_on(self.tx, patient_id, period_id)
    }

    pub fn insert_period(&mut self, period: &Period) -> Result<()> {
        insert_period_on(self.tx, period)
    }

    pub fn update_period_status(&mut self, id: PeriodId, status: PeriodStatus) -> Result<()> {
        update_period_status_on(self.tx, id, status)
    }

    pub fn insert_day_log(&mut self, log: &DayLog) -> Result<()> {
        insert_day_log_on(self.tx, log)
    }

    pub fn mark_slot_answered(
        &mut self,
        period_id: PeriodId,
        day_number: i64,
        slot: TimeSlot,
    ) -> Result<DayStatus> {
        mark_slot_answered_on(self.tx, period_id, day_number, slot)
    }

    pub fn mark_day_missed(&mut self, period_id: PeriodId, day_number: i64) -> Result<()> {
        self.tx.execute(
            "UPDATE day_logs SET status = 'missed'
             WHERE period_id = ?1 AND day_number = ?2 AND status = 'pending'",
            params![period_id.0.to_string(), day_number],
        )?;
        Ok(())
    }

    pub fn insert_template(&mut self, template: &QuestionTemplate) -> Result<()> {
        insert_template_on(self.tx, template)
    }

    pub fn insert_answer(&mut self, answer: &Answer) -> Result<()> {
        insert_answer_on(self.tx, answer)
    }
}

impl Storage {
    // -----------------------------------------------------------------------
    // Staff
    // -----------------------------------------------------------------------

    pub fn insert_staff(&mut self, staff: &StaffUser) -> Result<()> {
        insert_staff_on(&self.conn, staff)
    }

    pub fn get_staff(&self, id: StaffId) -> Result<StaffUser> {
        self.conn
            .query_row(
                "SELECT id, name, phone, role FROM staff WHERE id = ?1",
                params![id.0.to_string()],
                row_to_staff,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("staff {id}")))
    }

    // -----------------------------------------------------------------------
    // Patients
    // -----------------------------------------------------------------------

    pub fn get_patient(&self, id: PatientId) -> Result<Patient> {
        self.conn
            .query_row(
                "SELECT * FROM patients WHERE id = ?1",
                params![id.0.to_string()],
                row_to_patient,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("patient {id}")))
    }

    /// Exact match on the canonicalized phone. Substring matching would
    /// risk cross-patient bleed on overlapping digit suffixes.
    pub fn find_patient_by_phone(&self, phone: &str) -> Result<Option<Patient>> {
        Ok(self
            .conn
            .query_row(
                "SELECT * FROM patients WHERE phone = ?1",
                params![phone],
                row_to_patient,
            )
            .optional()?)
    }

    pub fn set_current_period(
        &mut self,
        patient_id: PatientId,
        period_id: Option<PeriodId>,
    ) -> Result<()> {
        set_current_period_on(&self.conn, patient_id, period_id)
    }

    // -----------------------------------------------------------------------
    // Periods
    // -----------------------------------------------------------------------

    pub fn get_period(&self, id: PeriodId) -> Result<Period> {
        self.conn
            .query_row(
                "SELECT * FROM periods WHERE id = ?1",
                params![id.0.to_string()],
                row_to_period,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("period {id}")))
    }

    /// Active periods of active patients — the sweep's working set.
    pub fn list_active_periods(&self) -> Result<Vec<(Period, Patient)>> {
        let mut stmt = self.conn.prepare(
            "SELECT pe.*, pa.* FROM periods pe
             JOIN patients pa ON pa.id = pe.patient_id
             WHERE pe.status = 'active' AND pa.status = 'active'
             ORDER BY pe.created_at ASC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                let period = row_to_period(row)?;
                let patient = row_to_patient_offset(row, 11)?;
                Ok((period, patient))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub fn update_period_status(&mut self, id: PeriodId, status: PeriodStatus) -> Result<()> {
        update_period_status_on(&self.conn, id, status)
    }

    // -----------------------------------------------------------------------
    // Day logs
    // -----------------------------------------------------------------------

    pub fn get_day_log(&self, period_id: PeriodId, day_number: i64) -> Result<DayLog> {
        self.conn
            .query_row(
                "SELECT * FROM day_logs WHERE period_id = ?1 AND day_number = ?2",
                params![period_id.0.to_string(), day_number],
                row_to_day_log,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("day log {period_id}/{day_number}")))
    }

    pub fn count_day_logs(&self, period_id: PeriodId) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM day_logs WHERE period_id = ?1",
            params![period_id.0.to_string()],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Day numbers before `before_day` that are still pending with no
    /// answered slot — candidates for MISSED.
    pub fn pending_days_before(&self, period_id: PeriodId, before_day: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT day_number FROM day_logs
             WHERE period_id = ?1 AND day_number < ?2 AND status = 'pending'
               AND morning_answered = 0 AND afternoon_answered = 0 AND evening_answered = 0
             ORDER BY day_number ASC",
        )?;
        let days = stmt
            .query_map(params![period_id.0.to_string(), before_day], |row| {
                row.get(0)
            })?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(days)
    }

    // -----------------------------------------------------------------------
    // Question templates
    // -----------------------------------------------------------------------

    pub fn insert_template(&mut self, template: &QuestionTemplate) -> Result<()> {
        insert_template_on(&self.conn, template)
    }

    pub fn get_template(&self, id: TemplateId) -> Result<QuestionTemplate> {
        self.conn
            .query_row(
                "SELECT * FROM question_templates WHERE id = ?1",
                params![id.0.to_string()],
                row_to_template,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("template {id}")))
    }

    /// Templates for one day, ordered by slot rank then `ord`.
    ///
    /// The sort happens here, through [`TimeSlot::rank`] — the text column
    /// would sort 'afternoon' before 'morning'.
    pub fn list_templates_for_day(
        &self,
        period_id: PeriodId,
        day_number: i64,
    ) -> Result<Vec<QuestionTemplate>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM question_templates
             WHERE period_id = ?1 AND day_number = ?2",
        )?;

        let mut templates = stmt
            .query_map(params![period_id.0.to_string(), day_number], row_to_template)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        templates.sort_by_key(|t| (t.slot.rank(), t.ord));
        Ok(templates)
    }

    pub fn count_templates(&self, period_id: PeriodId) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM question_templates WHERE period_id = ?1",
            params![period_id.0.to_string()],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    // -----------------------------------------------------------------------
    // Answers
    // -----------------------------------------------------------------------

    pub fn get_answer(&self, id: AnswerId) -> Result<Answer> {
        self.conn
            .query_row(
                "SELECT * FROM answers WHERE id = ?1",
                params![id.0.to_string()],
                row_to_answer,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("answer {id}")))
    }

    /// Template ids that already have an answer in this period.
    pub fn answered_template_ids(&self, period_id: PeriodId) -> Result<Vec<TemplateId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT template_id FROM answers WHERE period_id = ?1")?;
        let ids = stmt
            .query_map(params![period_id.0.to_string()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        ids.into_iter()
            .map(|s| {
                s.parse()
                    .map(TemplateId)
                    .map_err(|e: uuid::Error| Error::Other(format!("bad template id: {e}")))
            })
            .collect()
    }

    /// Most recent answers for a patient with their question texts,
    /// newest first. Bounded context for the analyzer.
    pub fn recent_answers(
        &self,
        patient_id: PatientId,
        limit: u32,
    ) -> Result<Vec<(Answer, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.*, t.question_text FROM answers a
             JOIN question_templates t ON t.id = a.template_id
             WHERE a.patient_id = ?1
             ORDER BY a.answered_at DESC
             LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![patient_id.0.to_string(), limit], |row| {
                let answer = row_to_answer(row)?;
                let question: String = row.get(13)?;
                Ok((answer, question))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Apply the one-time analysis result to an answer.
    pub fn set_answer_analysis(
        &mut self,
        id: AnswerId,
        risk: RiskLevel,
        analysis: &serde_json::Value,
    ) -> Result<()> {
        let n = self.conn.execute(
            "UPDATE answers SET is_processed = 1, risk_level = ?1, ai_analysis = ?2
             WHERE id = ?3 AND is_processed = 0",
            params![
                risk.as_str(),
                serde_json::to_string(analysis).unwrap_or_default(),
                id.0.to_string(),
            ],
        )?;
        if n == 0 {
            return Err(Error::Conflict(format!("answer {id} already processed")));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Visits
    // -----------------------------------------------------------------------

    pub fn insert_visit(&mut self, visit: &Visit) -> Result<()> {
        self.conn.execute(
            "INSERT INTO visits (id, patient_id, scheduled_on, note, status, reminded)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                visit.id.0.to_string(),
                visit.patient_id.0.to_string(),
                visit.scheduled_on.to_string(),
                visit.note,
                visit.status.as_str(),
                visit.reminded,
            ],
        )?;
        Ok(())
    }

    /// Scheduled visits on any of the given dates that have not been
    /// reminded yet, paired with the patient's phone.
    pub fn visits_needing_reminder(&self, dates: &[NaiveDate]) -> Result<Vec<(Visit, String)>> {
        let mut out = Vec::new();
        for date in dates {
            let mut stmt = self.conn.prepare(
                "SELECT v.*, p.phone FROM visits v
                 JOIN patients p ON p.id = v.patient_id
                 WHERE v.scheduled_on = ?1 AND v.status = 'scheduled' AND v.reminded = 0",
            )?;
            let rows = stmt
                .query_map(params![date.to_string()], |row| {
                    let visit = row_to_visit(row)?;
                    let phone: String = row.get(6)?;
                    Ok((visit, phone))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            out.extend(rows);
        }
        Ok(out)
    }

    pub fn mark_visit_reminded(&mut self, id: VisitId) -> Result<()> {
        self.conn.execute(
            "UPDATE visits SET reminded = 1 WHERE id = ?1",
            params![id.0.to_string()],
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Inner functions — accept &Connection so they work with both
// Connection (auto-commit) and Transaction (deref to Connection).
// ---------------------------------------------------------------------------

fn insert_staff_on(conn: &Connection, staff: &StaffUser) -> Result<()> {
    conn.execute(
        "INSERT INTO staff (id, name, phone, role) VALUES (?1, ?2, ?3, ?4)",
        params![
            staff.id.0.to_string(),
            staff.name,
            staff.phone,
            staff.role.as_str(),
        ],
    )?;
    Ok(())
}

fn insert_patient_on(conn: &Connection, patient: &Patient) -> Result<()> {
    conn.execute(
        "INSERT INTO patients (id, name, phone, status, tracker_id, doctor_id, current_period_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            patient.id.0.to_string(),
            patient.name,
            patient.phone,
            patient.status.as_str(),
            patient.tracker_id.map(|id| id.0.to_string()),
            patient.doctor_id.map(|id| id.0.to_string()),
            patient.current_period_id.map(|id| id.0.to_string()),
            patient.created_at.to_rfc3339(),
        ],
    )
    .map_err(|e| constraint_to_conflict(e, "patient phone already registered"))?;
    Ok(())
}

fn set_current_period_on(
    conn: &Connection,
    patient_id: PatientId,
    period_id: Option<PeriodId>,
) -> Result<()> {
    conn.execute(
        "UPDATE patients SET current_period_id = ?1 WHERE id = ?2",
        params![
            period_id.map(|id| id.0.to_string()),
            patient_id.0.to_string()
        ],
    )?;
    Ok(())
}

fn insert_period_on(conn: &Connection, period: &Period) -> Result<()> {
    conn.execute(
        "INSERT INTO periods (id, patient_id, start_date, duration_days, status,
                              morning_time, afternoon_time, evening_time,
                              auto_complete, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            period.id.0.to_string(),
            period.patient_id.0.to_string(),
            period.start_date.to_string(),
            period.duration_days,
            period.status.as_str(),
            period.schedule.morning.map(format_time),
            period.schedule.afternoon.map(format_time),
            period.schedule.evening.map(format_time),
            period.auto_complete,
            period.created_at.to_rfc3339(),
            period.updated_at.to_rfc3339(),
        ],
    )
    .map_err(|e| constraint_to_conflict(e, "patient already has an active period"))?;
    Ok(())
}

fn update_period_status_on(conn: &Connection, id: PeriodId, status: PeriodStatus) -> Result<()> {
    let n = conn.execute(
        "UPDATE periods SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = 'active'",
        params![
            status.as_str(),
            Utc::now().to_rfc3339(),
            id.0.to_string()
        ],
    )?;
    if n == 0 {
        return Err(Error::InvalidTransition {
            entity: "period",
            from: "terminal".to_string(),
            to: status.as_str().to_string(),
        });
    }
    Ok(())
}

fn insert_day_log_on(conn: &Connection, log: &DayLog) -> Result<()> {
    conn.execute(
        "INSERT INTO day_logs (period_id, day_number, morning_answered,
                               afternoon_answered, evening_answered, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            log.period_id.0.to_string(),
            log.day_number,
            log.morning_answered,
            log.afternoon_answered,
            log.evening_answered,
            log.status.as_str(),
        ],
    )?;
    Ok(())
}

/// Set a slot's answered flag and recompute the day status: all three
/// slots answered → COMPLETED, anything answered → PARTIAL.
fn mark_slot_answered_on(
    conn: &Connection,
    period_id: PeriodId,
    day_number: i64,
    slot: TimeSlot,
) -> Result<DayStatus> {
    let column = match slot {
        TimeSlot::Morning => "morning_answered",
        TimeSlot::Afternoon => "afternoon_answered",
        TimeSlot::Evening => "evening_answered",
    };
    conn.execute(
        &format!(
            "UPDATE day_logs SET {column} = 1 WHERE period_id = ?1 AND day_number = ?2"
        ),
        params![period_id.0.to_string(), day_number],
    )?;

    let log = conn
        .query_row(
            "SELECT * FROM day_logs WHERE period_id = ?1 AND day_number = ?2",
            params![period_id.0.to_string(), day_number],
            row_to_day_log,
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("day log {period_id}/{day_number}")))?;

    let status = if log.morning_answered && log.afternoon_answered && log.evening_answered {
        DayStatus::Completed
    } else {
        DayStatus::Partial
    };
    conn.execute(
        "UPDATE day_logs SET status = ?1 WHERE period_id = ?2 AND day_number = ?3",
        params![status.as_str(), period_id.0.to_string(), day_number],
    )?;

    Ok(status)
}

fn insert_template_on(conn: &Connection, template: &QuestionTemplate) -> Result<()> {
    conn.execute(
        "INSERT INTO question_templates (id, period_id, day_number, slot, ord,
                                         question_text, response_type, is_required, ai_prompt)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            template.id.0.to_string(),
            template.period_id.0.to_string(),
            template.day_number,
            template.slot.as_str(),
            template.ord,
            template.question_text,
            template.response_type.as_str(),
            template.is_required,
            template.ai_prompt,
        ],
    )
    .map_err(|e| constraint_to_conflict(e, "duplicate template for (period, day, slot, ord)"))?;
    Ok(())
}

fn insert_answer_on(conn: &Connection, answer: &Answer) -> Result<()> {
    conn.execute(
        "INSERT INTO answers (id, patient_id, period_id, template_id, day_number, slot,
                              text_content, media_url, is_processed, risk_level,
                              ai_analysis, answered_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            answer.id.0.to_string(),
            answer.patient_id.0.to_string(),
            answer.period_id.0.to_string(),
            answer.template_id.0.to_string(),
            answer.day_number,
            answer.slot.as_str(),
            answer.text_content,
            answer.media_url,
            answer.is_processed,
            answer.risk_level.as_str(),
            answer
                .ai_analysis
                .as_ref()
                .map(|v| serde_json::to_string(v).unwrap_or_default()),
            answer.answered_at.to_rfc3339(),
            answer.created_at.to_rfc3339(),
        ],
    )
    .map_err(|e| constraint_to_conflict(e, "question already answered"))?;
    Ok(())
}

/// Map a unique/constraint violation to a domain conflict; pass other
/// storage errors through.
pub(crate) fn constraint_to_conflict(e: rusqlite::Error, what: &str) -> Error {
    match &e {
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::Conflict(what.to_string())
        }
        _ => Error::Storage(e),
    }
}

// ---------------------------------------------------------------------------
// Row parsing helpers
// ---------------------------------------------------------------------------

pub(crate) fn parse_uuid<T>(s: String, wrap: fn(uuid::Uuid) -> T) -> rusqlite::Result<T> {
    s.parse().map(wrap).map_err(|e: uuid::Error| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn bad_column(what: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        format!("unparseable {what}").into(),
    )
}

fn format_time(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

fn parse_time(s: &str) -> rusqlite::Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| bad_column("time"))
}

fn row_to_staff(row: &rusqlite::Row) -> rusqlite::Result<StaffUser> {
    Ok(StaffUser {
        id: parse_uuid(row.get(0)?, StaffId)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        role: StaffRole::from_str(&row.get::<_, String>(3)?).ok_or_else(|| bad_column("role"))?,
    })
}

fn row_to_patient(row: &rusqlite::Row) -> rusqlite::Result<Patient> {
    row_to_patient_offset(row, 0)
}

fn row_to_patient_offset(row: &rusqlite::Row, base: usize) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: parse_uuid(row.get(base)?, PatientId)?,
        name: row.get(base + 1)?,
        phone: row.get(base + 2)?,
        status: PatientStatus::from_str(&row.get::<_, String>(base + 3)?)
            .ok_or_else(|| bad_column("patient status"))?,
        tracker_id: row
            .get::<_, Option<String>>(base + 4)?
            .map(|s| parse_uuid(s, StaffId))
            .transpose()?,
        doctor_id: row
            .get::<_, Option<String>>(base + 5)?
            .map(|s| parse_uuid(s, StaffId))
            .transpose()?,
        current_period_id: row
            .get::<_, Option<String>>(base + 6)?
            .map(|s| parse_uuid(s, PeriodId))
            .transpose()?,
        created_at: row
            .get::<_, String>(base + 7)?
            .parse()
            .map_err(|_| bad_column("created_at"))?,
    })
}

fn row_to_period(row: &rusqlite::Row) -> rusqlite::Result<Period> {
    Ok(Period {
        id: parse_uuid(row.get(0)?, PeriodId)?,
        patient_id: parse_uuid(row.get(1)?, PatientId)?,
        start_date: row
            .get::<_, String>(2)?
            .parse::<NaiveDate>()
            .map_err(|_| bad_column("start_date"))?,
        duration_days: row.get::<_, i64>(3)? as u16,
        status: PeriodStatus::from_str(&row.get::<_, String>(4)?)
            .ok_or_else(|| bad_column("period status"))?,
        schedule: SlotSchedule {
            morning: row
                .get::<_, Option<String>>(5)?
                .map(|s| parse_time(&s))
                .transpose()?,
            afternoon: row
                .get::<_, Option<String>>(6)?
                .map(|s| parse_time(&s))
                .transpose()?,
            evening: row
                .get::<_, Option<String>>(7)?
                .map(|s| parse_time(&s))
                .transpose()?,
        },
        auto_complete: row.get(8)?,
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

fn row_to_day_log(row: &rusqlite::Row) -> rusqlite::Result<DayLog> {
    Ok(DayLog {
        period_id: parse_uuid(row.get(0)?, PeriodId)?,
        day_number: row.get(1)?,
        morning_answered: row.get(2)?,
        afternoon_answered: row.get(3)?,
        evening_answered: row.get(4)?,
        status: DayStatus::from_str(&row.get::<_, String>(5)?)
            .ok_or_else(|| bad_column("day status"))?,
    })
}

fn row_to_template(row: &rusqlite::Row) -> rusqlite::Result<QuestionTemplate> {
    Ok(QuestionTemplate {
        id: parse_uuid(row.get(0)?, TemplateId)?,
        period_id: parse_uuid(row.get(1)?, PeriodId)?,
        day_number: row.get(2)?,
        slot: TimeSlot::from_str(&row.get::<_, String>(3)?).ok_or_else(|| bad_column("slot"))?,
        ord: row.get(4)?,
        question_text: row.get(5)?,
        response_type: ResponseType::from_str(&row.get::<_, String>(6)?)
            .ok_or_else(|| bad_column("response_type"))?,
        is_required: row.get(7)?,
        ai_prompt: row.get(8)?,
    })
}

fn row_to_answer(row: &rusqlite::Row) -> rusqlite::Result<Answer> {
    let analysis: Option<String> = row.get(10)?;
    Ok(Answer {
        id: parse_uuid(row.get(0)?, AnswerId)?,
        patient_id: parse_uuid(row.get(1)?, PatientId)?,
        period_id: parse_uuid(row.get(2)?, PeriodId)?,
        template_id: parse_uuid(row.get(3)?, TemplateId)?,
        day_number: row.get(4)?,
        slot: TimeSlot::from_str(&row.get::<_, String>(5)?).ok_or_else(|| bad_column("slot"))?,
        text_content: row.get(6)?,
        media_url: row.get(7)?,
        is_processed: row.get(8)?,
        risk_level: RiskLevel::from_str(&row.get::<_, String>(9)?)
            .ok_or_else(|| bad_column("risk_level"))?,
        ai_analysis: analysis.and_then(|s| serde_json::from_str(&s).ok()),
        answered_at: row
            .get::<_, String>(11)?
            .parse()
            .map_err(|_| bad_column("answered_at"))?,
        created_at: row
            .get::<_, String>(12)?
            .parse()
            .map_err(|_| bad_column("created_at"))?,
    })
}

fn row_to_visit(row: &rusqlite::Row) -> rusqlite::Result<Visit> {
    Ok(Visit {
        id: parse_uuid(row.get(0)?, VisitId)?,
        patient_id: parse_uuid(row.get(1)?, PatientId)?,
        scheduled_on: row
            .get::<_, String>(2)?
            .parse::<NaiveDate>()
            .map_err(|_| bad_column("scheduled_on"))?,
        note: row.get(3)?,
        status: VisitStatus::from_str(&row.get::<_, String>(4)?)
            .ok_or_else(|| bad_column("visit status"))?,
        reminded: row.get(5)?,
    })
}
