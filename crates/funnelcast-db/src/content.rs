//! Typed content slots.
//!
//! Every piece of operator-editable copy the funnel sends lives in a named
//! slot: one validated record per slot instead of a free-form settings bag.
//! Validation happens at write time so handlers can trust what they read.

use chrono::Local;
use serde::{Deserialize, Serialize};

use funnelcast_core::error::{FunnelcastError, Result};
use funnelcast_core::types::{MediaKind, MediaRef, UrlButton};

use crate::{BotDb, ts_to_text};

/// The closed set of content slots the funnel can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentSlot {
    /// Greeting after /start for subscribed users.
    Welcome,
    /// Shown to users who are not yet members of the gate channel.
    SubscribePrompt,
    /// Human-verification prompt with its confirm button.
    Captcha,
    Answers,
    PrivateLesson,
    Tariffs,
    ClothesTariff,
    TechTariff,
    ClothesPayment,
    TechPayment,
}

impl ContentSlot {
    pub const ALL: [ContentSlot; 10] = [
        ContentSlot::Welcome,
        ContentSlot::SubscribePrompt,
        ContentSlot::Captcha,
        ContentSlot::Answers,
        ContentSlot::PrivateLesson,
        ContentSlot::Tariffs,
        ContentSlot::ClothesTariff,
        ContentSlot::TechTariff,
        ContentSlot::ClothesPayment,
        ContentSlot::TechPayment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContentSlot::Welcome => "welcome",
            ContentSlot::SubscribePrompt => "subscribe_prompt",
            ContentSlot::Captcha => "captcha",
            ContentSlot::Answers => "answers",
            ContentSlot::PrivateLesson => "private_lesson",
            ContentSlot::Tariffs => "tariffs",
            ContentSlot::ClothesTariff => "clothes_tariff",
            ContentSlot::TechTariff => "tech_tariff",
            ContentSlot::ClothesPayment => "clothes_payment",
            ContentSlot::TechPayment => "tech_payment",
        }
    }

    fn default_text(self) -> &'static str {
        match self {
            ContentSlot::Welcome => "Welcome! Pick where to start 👇",
            ContentSlot::SubscribePrompt => {
                "To continue, subscribe to our channel first, then press /start again."
            }
            ContentSlot::Captcha => "Quick check: press the button below to confirm you are human.",
            ContentSlot::Answers => "Here are the answers to the most common questions.",
            ContentSlot::PrivateLesson => "Your private lesson is ready 🎓",
            ContentSlot::Tariffs => "Our tariffs. Pick a direction:",
            ContentSlot::ClothesTariff => "Clothes tariff details:",
            ContentSlot::TechTariff => "Tech tariff details:",
            ContentSlot::ClothesPayment => "Payment details for the clothes tariff:",
            ContentSlot::TechPayment => "Payment details for the tech tariff:",
        }
    }
}

/// One slot's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub text: String,
    #[serde(default)]
    pub media: Option<MediaRef>,
    #[serde(default)]
    pub buttons: Vec<UrlButton>,
    /// Label for the slot's action button where one exists (captcha confirm).
    #[serde(default)]
    pub action_label: Option<String>,
}

impl ContentRecord {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media: None,
            buttons: Vec::new(),
            action_label: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(FunnelcastError::Config("content text must not be empty".into()));
        }
        for button in &self.buttons {
            if button.text.trim().is_empty() {
                return Err(FunnelcastError::Config("button text must not be empty".into()));
            }
            if !button.url.starts_with("http://") && !button.url.starts_with("https://") {
                return Err(FunnelcastError::Config(format!(
                    "button url '{}' must be http(s)",
                    button.url
                )));
            }
        }
        Ok(())
    }
}

impl BotDb {
    /// Write a slot's content. Invalid records are rejected here so reads
    /// never have to re-check.
    pub fn set_content(&self, slot: ContentSlot, record: &ContentRecord) -> Result<()> {
        record.validate()?;
        let buttons = serde_json::to_string(&record.buttons)
            .map_err(|e| FunnelcastError::Db(format!("Serialize buttons: {e}")))?;
        let now = ts_to_text(Local::now().naive_local());
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO content_slots
                 (slot, body_text, media_kind, media_location, buttons, action_label, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    slot.as_str(),
                    record.text,
                    record.media.as_ref().map(|m| m.kind.as_str()),
                    record.media.as_ref().map(|m| m.location.as_str()),
                    buttons,
                    record.action_label,
                    now,
                ],
            )
            .map_err(|e| FunnelcastError::Db(format!("Set content: {e}")))?;
        Ok(())
    }

    pub fn get_content(&self, slot: ContentSlot) -> Result<Option<ContentRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT body_text, media_kind, media_location, buttons, action_label
                 FROM content_slots WHERE slot = ?1",
            )
            .map_err(|e| FunnelcastError::Db(format!("Get content: {e}")))?;
        Ok(stmt
            .query_row(rusqlite::params![slot.as_str()], |row| {
                let media_kind: Option<String> = row.get(1)?;
                let media_location: Option<String> = row.get(2)?;
                let media = match (
                    media_kind.as_deref().and_then(MediaKind::parse),
                    media_location,
                ) {
                    (Some(kind), Some(location)) => Some(MediaRef { kind, location }),
                    _ => None,
                };
                let buttons: Vec<UrlButton> = row
                    .get::<_, String>(3)
                    .ok()
                    .and_then(|s| serde_json::from_str(&s).ok())
                    .unwrap_or_default();
                Ok(ContentRecord {
                    text: row.get(0)?,
                    media,
                    buttons,
                    action_label: row.get(4)?,
                })
            })
            .ok())
    }

    /// Seed placeholder copy for any slot the operator has not filled yet,
    /// so a fresh install can run the whole funnel out of the box.
    pub fn ensure_default_content(&self) -> Result<()> {
        for slot in ContentSlot::ALL {
            if self.get_content(slot)?.is_none() {
                let mut record = ContentRecord::text(slot.default_text());
                if slot == ContentSlot::Captcha {
                    record.action_label = Some("✅ I'm human".into());
                }
                self.set_content(slot, &record)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_round_trip() {
        let db = BotDb::open_in_memory().unwrap();
        let record = ContentRecord {
            text: "Our tariffs:".into(),
            media: Some(MediaRef {
                kind: MediaKind::Video,
                location: "BAACAgIAAxkBAAIB".into(),
            }),
            buttons: vec![UrlButton {
                text: "Site".into(),
                url: "https://example.com".into(),
            }],
            action_label: None,
        };
        db.set_content(ContentSlot::Tariffs, &record).unwrap();
        assert_eq!(db.get_content(ContentSlot::Tariffs).unwrap(), Some(record));
    }

    #[test]
    fn test_validation_rejects_bad_records() {
        let db = BotDb::open_in_memory().unwrap();
        assert!(db.set_content(ContentSlot::Welcome, &ContentRecord::text("  ")).is_err());

        let bad_button = ContentRecord {
            text: "hello".into(),
            media: None,
            buttons: vec![UrlButton {
                text: "go".into(),
                url: "javascript:alert(1)".into(),
            }],
            action_label: None,
        };
        assert!(db.set_content(ContentSlot::Welcome, &bad_button).is_err());
    }

    #[test]
    fn test_defaults_do_not_overwrite_operator_copy() {
        let db = BotDb::open_in_memory().unwrap();
        db.set_content(ContentSlot::Welcome, &ContentRecord::text("custom hello"))
            .unwrap();
        db.ensure_default_content().unwrap();

        assert_eq!(
            db.get_content(ContentSlot::Welcome).unwrap().unwrap().text,
            "custom hello"
        );
        // Unfilled slots got seeded
        for slot in ContentSlot::ALL {
            assert!(db.get_content(slot).unwrap().is_some());
        }
        // Captcha seed carries its confirm button label
        assert!(db
            .get_content(ContentSlot::Captcha)
            .unwrap()
            .unwrap()
            .action_label
            .is_some());
    }
}
