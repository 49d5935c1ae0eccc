//! User store and the funnel state machine.
//!
//! The stage column models "furthest point reached": `advance` only ever
//! moves a user to an equal-or-higher priority stage. Equal priority is a
//! permitted re-apply, so repeating the same step is idempotent.

use chrono::{Local, NaiveDateTime};

use funnelcast_core::error::{FunnelcastError, Result};
use funnelcast_core::stage::FunnelStage;

use crate::{BotDb, ts_from_text, ts_to_text};

/// A known bot user.
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: i64,
    pub username: Option<String>,
    pub joined_at: Option<NaiveDateTime>,
    pub last_activity: Option<NaiveDateTime>,
    /// Referral tag from the deep link that brought the user in. Set once.
    pub acquisition_tag: Option<String>,
    pub stage: Option<FunnelStage>,
    /// Free-form operator label ("active", "vip", ...). Display only:
    /// independent of the funnel stage and never consulted by audience
    /// rules.
    pub subscription_status: Option<String>,
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        user_id: row.get(0)?,
        username: row.get(1)?,
        joined_at: row.get::<_, String>(2).ok().and_then(|s| ts_from_text(&s)),
        last_activity: row.get::<_, String>(3).ok().and_then(|s| ts_from_text(&s)),
        acquisition_tag: row.get(4)?,
        stage: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| FunnelStage::from_display(&s)),
        subscription_status: row.get(6)?,
    })
}

const USER_SELECT: &str = "SELECT user_id, username, joined_at, last_activity, acquisition_tag, \
     stage, subscription_status FROM users";

impl BotDb {
    /// First-contact upsert. A repeat /start refreshes last-activity only;
    /// the acquisition tag and stage are never reset.
    pub fn upsert_user(
        &self,
        user_id: i64,
        username: Option<&str>,
        acquisition_tag: Option<&str>,
    ) -> Result<()> {
        let now = ts_to_text(Local::now().naive_local());
        self.conn()?
            .execute(
                "INSERT INTO users (user_id, username, joined_at, last_activity, acquisition_tag)
                 VALUES (?1, ?2, ?3, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET last_activity = excluded.last_activity",
                rusqlite::params![user_id, username, now, acquisition_tag],
            )
            .map_err(|e| FunnelcastError::Db(format!("Upsert user: {e}")))?;
        Ok(())
    }

    /// Refresh last-activity for an existing user.
    pub fn touch_activity(&self, user_id: i64) -> Result<()> {
        let now = ts_to_text(Local::now().naive_local());
        self.conn()?
            .execute(
                "UPDATE users SET last_activity = ?1 WHERE user_id = ?2",
                rusqlite::params![now, user_id],
            )
            .map_err(|e| FunnelcastError::Db(format!("Touch activity: {e}")))?;
        Ok(())
    }

    pub fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{USER_SELECT} WHERE user_id = ?1"))
            .map_err(|e| FunnelcastError::Db(format!("Get user: {e}")))?;
        Ok(stmt
            .query_row(rusqlite::params![user_id], row_to_user)
            .ok())
    }

    /// Current funnel stage, if any.
    pub fn stage_of(&self, user_id: i64) -> Result<Option<FunnelStage>> {
        let conn = self.conn()?;
        let stored: Option<Option<String>> = conn
            .query_row(
                "SELECT stage FROM users WHERE user_id = ?1",
                rusqlite::params![user_id],
                |row| row.get(0),
            )
            .ok();
        Ok(stored
            .flatten()
            .and_then(|s| FunnelStage::from_display(&s)))
    }

    /// Monotonic stage advancement. Maps the action to its target stage and
    /// applies it only if the target priority is >= the stored one. Returns
    /// false for unknown actions, unknown users, and rejected transitions.
    pub fn advance(&self, user_id: i64, action: &str) -> Result<bool> {
        let Some(target) = FunnelStage::from_action(action) else {
            tracing::warn!("Unknown funnel action '{action}' (user {user_id})");
            return Ok(false);
        };

        if let Some(current) = self.stage_of(user_id)? {
            if target.priority() < current.priority() {
                tracing::warn!(
                    "Funnel stage for user {user_id} kept at '{}' (priority {}); '{}' (priority {}) is behind it",
                    current.display(),
                    current.priority(),
                    target.display(),
                    target.priority()
                );
                return Ok(false);
            }
        }

        self.write_stage(user_id, target)
    }

    /// Operator override: set a stage without the priority check.
    pub fn set_stage_unchecked(&self, user_id: i64, stage: FunnelStage) -> Result<bool> {
        self.write_stage(user_id, stage)
    }

    /// Operator-facing free-form label, separate from the funnel stage.
    pub fn set_subscription_status(&self, user_id: i64, status: Option<&str>) -> Result<bool> {
        let rows = self
            .conn()?
            .execute(
                "UPDATE users SET subscription_status = ?1 WHERE user_id = ?2",
                rusqlite::params![status, user_id],
            )
            .map_err(|e| FunnelcastError::Db(format!("Set subscription status: {e}")))?;
        Ok(rows > 0)
    }

    fn write_stage(&self, user_id: i64, stage: FunnelStage) -> Result<bool> {
        let now = ts_to_text(Local::now().naive_local());
        let rows = self
            .conn()?
            .execute(
                "UPDATE users SET stage = ?1, last_activity = ?2 WHERE user_id = ?3",
                rusqlite::params![stage.display(), now, user_id],
            )
            .map_err(|e| FunnelcastError::Db(format!("Write stage: {e}")))?;
        Ok(rows > 0)
    }

    /// Every known recipient id.
    pub fn all_user_ids(&self) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT user_id FROM users ORDER BY joined_at DESC")
            .map_err(|e| FunnelcastError::Db(format!("List users: {e}")))?;
        let rows = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| FunnelcastError::Db(format!("List users: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Recipient ids whose stored stage display name matches.
    pub fn user_ids_by_stage(&self, stage_display: &str) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT user_id FROM users WHERE stage = ?1 ORDER BY joined_at DESC")
            .map_err(|e| FunnelcastError::Db(format!("Users by stage: {e}")))?;
        let rows = stmt
            .query_map(rusqlite::params![stage_display], |row| row.get(0))
            .map_err(|e| FunnelcastError::Db(format!("Users by stage: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn users_count(&self) -> Result<i64> {
        self.conn()?
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .map_err(|e| FunnelcastError::Db(format!("Count users: {e}")))
    }

    /// Signup counts per acquisition tag, most popular first.
    pub fn tag_stats(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT acquisition_tag, COUNT(*) FROM users
                 WHERE acquisition_tag IS NOT NULL
                 GROUP BY acquisition_tag ORDER BY COUNT(*) DESC",
            )
            .map_err(|e| FunnelcastError::Db(format!("Tag stats: {e}")))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| FunnelcastError::Db(format!("Tag stats: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Explicit operator deletion; users are never removed otherwise.
    pub fn delete_user(&self, user_id: i64) -> Result<bool> {
        let rows = self
            .conn()?
            .execute(
                "DELETE FROM users WHERE user_id = ?1",
                rusqlite::params![user_id],
            )
            .map_err(|e| FunnelcastError::Db(format!("Delete user: {e}")))?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_preserves_acquisition_tag() {
        let db = BotDb::open_in_memory().unwrap();
        db.upsert_user(100, Some("alice"), Some("summer_promo")).unwrap();
        // Second first-contact with a different tag must not overwrite
        db.upsert_user(100, Some("alice"), Some("other_tag")).unwrap();

        let user = db.get_user(100).unwrap().unwrap();
        assert_eq!(user.acquisition_tag.as_deref(), Some("summer_promo"));
        assert_eq!(db.users_count().unwrap(), 1);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let db = BotDb::open_in_memory().unwrap();
        db.upsert_user(7, None, None).unwrap();

        // No stored stage yet: first write is unconditional
        assert!(db.advance(7, "tariffs_viewed").unwrap());
        assert_eq!(db.stage_of(7).unwrap(), Some(FunnelStage::ViewedTariffs));

        // Lower priority is rejected, store unchanged
        assert!(!db.advance(7, "captcha_passed").unwrap());
        assert_eq!(db.stage_of(7).unwrap(), Some(FunnelStage::ViewedTariffs));

        // Equal priority re-applies
        assert!(db.advance(7, "tariffs_viewed").unwrap());

        // Higher priority advances
        assert!(db.advance(7, "clothes_payment_clicked").unwrap());
        assert_eq!(
            db.stage_of(7).unwrap(),
            Some(FunnelStage::ClickedClothesPayment)
        );
    }

    #[test]
    fn test_advance_unknown_action_and_user() {
        let db = BotDb::open_in_memory().unwrap();
        db.upsert_user(7, None, None).unwrap();
        assert!(!db.advance(7, "made_up_action").unwrap());
        assert_eq!(db.stage_of(7).unwrap(), None);
        // Unknown user: nothing to update
        assert!(!db.advance(999, "start").unwrap());
    }

    #[test]
    fn test_subscription_status_is_independent_of_stage() {
        let db = BotDb::open_in_memory().unwrap();
        db.upsert_user(7, None, None).unwrap();
        db.advance(7, "tariffs_viewed").unwrap();
        assert!(db.set_subscription_status(7, Some("vip")).unwrap());

        let user = db.get_user(7).unwrap().unwrap();
        assert_eq!(user.subscription_status.as_deref(), Some("vip"));
        assert_eq!(user.stage, Some(FunnelStage::ViewedTariffs));
    }

    #[test]
    fn test_operator_override_skips_priority() {
        let db = BotDb::open_in_memory().unwrap();
        db.upsert_user(7, None, None).unwrap();
        db.advance(7, "tech_payment_clicked").unwrap();
        assert!(db.set_stage_unchecked(7, FunnelStage::Started).unwrap());
        assert_eq!(db.stage_of(7).unwrap(), Some(FunnelStage::Started));
    }

    #[test]
    fn test_tag_stats() {
        let db = BotDb::open_in_memory().unwrap();
        db.upsert_user(1, None, Some("a")).unwrap();
        db.upsert_user(2, None, Some("a")).unwrap();
        db.upsert_user(3, None, Some("b")).unwrap();
        db.upsert_user(4, None, None).unwrap();

        let stats = db.tag_stats().unwrap();
        assert_eq!(stats, vec![("a".to_string(), 2), ("b".to_string(), 1)]);
    }
}
