//! Broadcast record store: CRUD plus the schedule lifecycle.
//!
//! Lifecycle: `draft → scheduled → active → sent | failed`, with `draft`
//! reachable again via cancel-schedule. A recurring broadcast cycles
//! `scheduled → active → sent → scheduled` each time its next occurrence is
//! recomputed. "Due" means: one-shot `scheduled_at`, or `next_occurrence_at`
//! while a recurrence is attached.

use chrono::{Local, NaiveDateTime};

use funnelcast_core::error::{FunnelcastError, Result};
use funnelcast_core::types::{
    AudienceRule, BroadcastBody, BroadcastStatus, MediaKind, MediaRef, RecurrenceRule, UrlButton,
};

use crate::{BotDb, ts_from_text, ts_to_text};

/// One operator-authored campaign.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub id: i64,
    pub name: String,
    pub body: BroadcastBody,
    pub audience: AudienceRule,
    pub status: BroadcastStatus,
    pub is_scheduled: bool,
    pub scheduled_at: Option<NaiveDateTime>,
    pub is_recurring: bool,
    pub recurrence: Option<RecurrenceRule>,
    pub next_occurrence_at: Option<NaiveDateTime>,
    pub created_at: Option<NaiveDateTime>,
    pub sent_at: Option<NaiveDateTime>,
    pub recipients_reached: i64,
}

impl Broadcast {
    /// The timestamp the scheduler compares against "now".
    pub fn due_at(&self) -> Option<NaiveDateTime> {
        if self.is_recurring {
            self.next_occurrence_at
        } else {
            self.scheduled_at
        }
    }
}

/// Shared SELECT column list for broadcast queries.
const BROADCAST_SELECT: &str = "SELECT b.id, b.name, b.body_text, b.media_kind, b.media_location, \
     b.buttons, b.audience_filter, b.audience_stages, b.status, b.is_scheduled, b.scheduled_at, \
     b.is_recurring, b.next_occurrence_at, b.created_at, b.sent_at, b.recipients_reached, \
     r.weekdays, r.time_of_day \
     FROM broadcasts b \
     LEFT JOIN recurrence_rules r ON b.id = r.broadcast_id AND r.is_active = 1";

fn row_to_broadcast(row: &rusqlite::Row) -> rusqlite::Result<Broadcast> {
    let media_kind: Option<String> = row.get(3)?;
    let media_location: Option<String> = row.get(4)?;
    let media = match (media_kind.as_deref().and_then(MediaKind::parse), media_location) {
        (Some(kind), Some(location)) => Some(MediaRef { kind, location }),
        _ => None,
    };

    let buttons: Vec<UrlButton> = row
        .get::<_, String>(5)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();

    let audience_filter: String = row.get(6)?;
    let audience_stages: Option<String> = row.get(7)?;

    let weekdays: Option<String> = row.get(16)?;
    let time_of_day: Option<String> = row.get(17)?;
    let recurrence = match (weekdays, time_of_day) {
        (Some(days), Some(time)) => RecurrenceRule::parse(&days, &time).ok(),
        _ => None,
    };

    Ok(Broadcast {
        id: row.get(0)?,
        name: row.get(1)?,
        body: BroadcastBody {
            text: row.get(2)?,
            media,
            buttons,
        },
        audience: AudienceRule::from_columns(&audience_filter, audience_stages.as_deref()),
        status: row
            .get::<_, String>(8)
            .ok()
            .and_then(|s| BroadcastStatus::parse(&s))
            .unwrap_or(BroadcastStatus::Draft),
        is_scheduled: row.get::<_, i64>(9)? != 0,
        scheduled_at: row.get::<_, Option<String>>(10)?.and_then(|s| ts_from_text(&s)),
        is_recurring: row.get::<_, i64>(11)? != 0,
        recurrence,
        next_occurrence_at: row
            .get::<_, Option<String>>(12)?
            .and_then(|s| ts_from_text(&s)),
        created_at: row.get::<_, String>(13).ok().and_then(|s| ts_from_text(&s)),
        sent_at: row.get::<_, Option<String>>(14)?.and_then(|s| ts_from_text(&s)),
        recipients_reached: row.get(15)?,
    })
}

impl BotDb {
    /// Insert a new broadcast in `draft`.
    pub fn create_broadcast(
        &self,
        name: &str,
        body: &BroadcastBody,
        audience: &AudienceRule,
    ) -> Result<i64> {
        if name.trim().is_empty() {
            return Err(FunnelcastError::Db("broadcast name must not be empty".into()));
        }
        let buttons = serde_json::to_string(&body.buttons)
            .map_err(|e| FunnelcastError::Db(format!("Serialize buttons: {e}")))?;
        let (filter, stages) = audience.to_columns();
        let now = ts_to_text(Local::now().naive_local());

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO broadcasts
             (name, body_text, media_kind, media_location, buttons,
              audience_filter, audience_stages, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'draft', ?8)",
            rusqlite::params![
                name,
                body.text,
                body.media.as_ref().map(|m| m.kind.as_str()),
                body.media.as_ref().map(|m| m.location.as_str()),
                buttons,
                filter,
                stages,
                now,
            ],
        )
        .map_err(|e| FunnelcastError::Db(format!("Create broadcast: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_broadcast(&self, id: i64) -> Result<Option<Broadcast>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{BROADCAST_SELECT} WHERE b.id = ?1"))
            .map_err(|e| FunnelcastError::Db(format!("Get broadcast: {e}")))?;
        Ok(stmt.query_row(rusqlite::params![id], row_to_broadcast).ok())
    }

    pub fn list_broadcasts(&self) -> Result<Vec<Broadcast>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{BROADCAST_SELECT} ORDER BY b.created_at DESC"))
            .map_err(|e| FunnelcastError::Db(format!("List broadcasts: {e}")))?;
        let rows = stmt
            .query_map([], row_to_broadcast)
            .map_err(|e| FunnelcastError::Db(format!("List broadcasts: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Every armed broadcast, earliest due first, so one tick processes
    /// same-tick arrivals deterministically and the longest-overdue record
    /// never waits behind a fresher one.
    pub fn list_due(&self) -> Result<Vec<Broadcast>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{BROADCAST_SELECT}
                 WHERE b.is_scheduled = 1 AND b.status = 'scheduled'
                   AND COALESCE(b.next_occurrence_at, b.scheduled_at) IS NOT NULL
                 ORDER BY COALESCE(b.next_occurrence_at, b.scheduled_at) ASC"
            ))
            .map_err(|e| FunnelcastError::Db(format!("List due: {e}")))?;
        let rows = stmt
            .query_map([], row_to_broadcast)
            .map_err(|e| FunnelcastError::Db(format!("List due: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Arm a one-shot send at the given local time.
    pub fn schedule_once(&self, id: i64, due: NaiveDateTime) -> Result<bool> {
        let rows = self
            .conn()?
            .execute(
                "UPDATE broadcasts
                 SET is_scheduled = 1, scheduled_at = ?1, status = 'scheduled'
                 WHERE id = ?2",
                rusqlite::params![ts_to_text(due), id],
            )
            .map_err(|e| FunnelcastError::Db(format!("Schedule broadcast: {e}")))?;
        Ok(rows > 0)
    }

    /// Disarm a pending one-shot send; the broadcast returns to `draft`
    /// with no due timestamp.
    pub fn cancel_schedule(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn()?
            .execute(
                "UPDATE broadcasts
                 SET is_scheduled = 0, scheduled_at = NULL, status = 'draft'
                 WHERE id = ?1",
                rusqlite::params![id],
            )
            .map_err(|e| FunnelcastError::Db(format!("Cancel schedule: {e}")))?;
        Ok(rows > 0)
    }

    /// Unconditional status overwrite.
    pub fn mark_status(&self, id: i64, status: BroadcastStatus) -> Result<bool> {
        let rows = self
            .conn()?
            .execute(
                "UPDATE broadcasts SET status = ?1 WHERE id = ?2",
                rusqlite::params![status.as_str(), id],
            )
            .map_err(|e| FunnelcastError::Db(format!("Mark status: {e}")))?;
        Ok(rows > 0)
    }

    /// Attach (or replace) the weekly recurrence and arm the broadcast at
    /// the given initial next occurrence.
    pub fn attach_recurrence(
        &self,
        id: i64,
        rule: &RecurrenceRule,
        next_occurrence: NaiveDateTime,
    ) -> Result<bool> {
        let next = ts_to_text(next_occurrence);
        let conn = self.conn()?;
        let rows = conn
            .execute(
                "UPDATE broadcasts
                 SET is_recurring = 1, is_scheduled = 1, status = 'scheduled',
                     next_occurrence_at = ?1
                 WHERE id = ?2",
                rusqlite::params![next, id],
            )
            .map_err(|e| FunnelcastError::Db(format!("Attach recurrence: {e}")))?;
        if rows == 0 {
            return Ok(false);
        }
        conn.execute(
            "INSERT OR REPLACE INTO recurrence_rules
             (broadcast_id, weekdays, time_of_day, next_occurrence_at, is_active)
             VALUES (?1, ?2, ?3, ?4, 1)",
            rusqlite::params![id, rule.days_spec(), rule.time_spec(), next],
        )
        .map_err(|e| FunnelcastError::Db(format!("Attach recurrence: {e}")))?;
        Ok(true)
    }

    /// Remove the recurrence. The broadcast is no longer pending, so its
    /// status becomes `sent`.
    pub fn detach_recurrence(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM recurrence_rules WHERE broadcast_id = ?1",
            rusqlite::params![id],
        )
        .map_err(|e| FunnelcastError::Db(format!("Detach recurrence: {e}")))?;
        let rows = conn
            .execute(
                "UPDATE broadcasts
                 SET is_recurring = 0, is_scheduled = 0, status = 'sent',
                     next_occurrence_at = NULL
                 WHERE id = ?1",
                rusqlite::params![id],
            )
            .map_err(|e| FunnelcastError::Db(format!("Detach recurrence: {e}")))?;
        Ok(rows > 0)
    }

    /// Persist a freshly computed next occurrence and re-arm the broadcast.
    pub fn rearm_recurrence(&self, id: i64, next_occurrence: NaiveDateTime) -> Result<bool> {
        let next = ts_to_text(next_occurrence);
        let conn = self.conn()?;
        conn.execute(
            "UPDATE recurrence_rules SET next_occurrence_at = ?1 WHERE broadcast_id = ?2",
            rusqlite::params![next, id],
        )
        .map_err(|e| FunnelcastError::Db(format!("Rearm recurrence: {e}")))?;
        let rows = conn
            .execute(
                "UPDATE broadcasts
                 SET next_occurrence_at = ?1, is_scheduled = 1, status = 'scheduled'
                 WHERE id = ?2",
                rusqlite::params![next, id],
            )
            .map_err(|e| FunnelcastError::Db(format!("Rearm recurrence: {e}")))?;
        Ok(rows > 0)
    }

    /// Record the outcome of a delivery run for operator visibility.
    pub fn update_run_stats(&self, id: i64, recipients_reached: i64) -> Result<()> {
        let now = ts_to_text(Local::now().naive_local());
        self.conn()?
            .execute(
                "UPDATE broadcasts SET sent_at = ?1, recipients_reached = ?2 WHERE id = ?3",
                rusqlite::params![now, recipients_reached, id],
            )
            .map_err(|e| FunnelcastError::Db(format!("Update run stats: {e}")))?;
        Ok(())
    }

    /// Operator helper: reset run stats ahead of firing a finished
    /// broadcast again.
    pub fn resend(&self, id: i64) -> Result<bool> {
        let now = ts_to_text(Local::now().naive_local());
        let rows = self
            .conn()?
            .execute(
                "UPDATE broadcasts SET sent_at = ?1, recipients_reached = 0 WHERE id = ?2",
                rusqlite::params![now, id],
            )
            .map_err(|e| FunnelcastError::Db(format!("Resend: {e}")))?;
        Ok(rows > 0)
    }

    /// Delete a broadcast; its recurrence rule goes with it.
    pub fn delete_broadcast(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn()?
            .execute(
                "DELETE FROM broadcasts WHERE id = ?1",
                rusqlite::params![id],
            )
            .map_err(|e| FunnelcastError::Db(format!("Delete broadcast: {e}")))?;
        Ok(rows > 0)
    }
}
