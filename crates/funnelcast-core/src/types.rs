//! Broadcast data model: message bodies, audience rules, lifecycle status,
//! and the weekly recurrence rule.

use serde::{Deserialize, Serialize};

use crate::error::{FunnelcastError, Result};

/// An inline button linking out to a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlButton {
    pub text: String,
    pub url: String,
}

/// Media attachment kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
    Document,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(MediaKind::Photo),
            "video" => Some(MediaKind::Video),
            "document" => Some(MediaKind::Document),
            _ => None,
        }
    }
}

/// A media attachment: an HTTP(S) URL or a platform file id, the Bot API
/// accepts either in the same field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub location: String,
}

/// What actually gets sent to one recipient: text (or caption when media is
/// attached) plus optional URL buttons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastBody {
    pub text: String,
    #[serde(default)]
    pub media: Option<MediaRef>,
    #[serde(default)]
    pub buttons: Vec<UrlButton>,
}

impl BroadcastBody {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media: None,
            buttons: Vec::new(),
        }
    }
}

/// Who receives a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudienceRule {
    /// Every known user.
    All,
    /// Users whose stored stage display name is in the set.
    ByStages(Vec<String>),
}

impl AudienceRule {
    /// Build from the stored (filter, stages) column pair. An unknown
    /// filter value falls back to `All`.
    pub fn from_columns(filter: &str, stages: Option<&str>) -> Self {
        match filter {
            "status" => {
                let stages: Vec<String> = stages
                    .unwrap_or_default()
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if stages.is_empty() {
                    AudienceRule::All
                } else {
                    AudienceRule::ByStages(stages)
                }
            }
            _ => AudienceRule::All,
        }
    }

    /// Storage form: (filter, stages).
    pub fn to_columns(&self) -> (&'static str, Option<String>) {
        match self {
            AudienceRule::All => ("all", None),
            AudienceRule::ByStages(stages) => ("status", Some(stages.join(","))),
        }
    }
}

/// Broadcast lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastStatus {
    Draft,
    Scheduled,
    Active,
    Sent,
    Failed,
}

impl BroadcastStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BroadcastStatus::Draft => "draft",
            BroadcastStatus::Scheduled => "scheduled",
            BroadcastStatus::Active => "active",
            BroadcastStatus::Sent => "sent",
            BroadcastStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(BroadcastStatus::Draft),
            "scheduled" => Some(BroadcastStatus::Scheduled),
            "active" => Some(BroadcastStatus::Active),
            "sent" => Some(BroadcastStatus::Sent),
            "failed" => Some(BroadcastStatus::Failed),
            _ => None,
        }
    }
}

/// Weekly recurrence: fire on each listed weekday at the given local time.
/// Weekday numbering is Monday = 0 .. Sunday = 6.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub weekdays: Vec<u8>,
    pub hour: u8,
    pub minute: u8,
}

impl RecurrenceRule {
    /// Parse the operator-entered forms: days as "1,3", time as "09:00".
    /// Rejected input leaves the broadcast untouched upstream; nothing is
    /// ever coerced to a guessed value.
    pub fn parse(days: &str, time: &str) -> Result<Self> {
        let weekdays: Vec<u8> = days
            .split(',')
            .map(|d| {
                d.trim()
                    .parse::<u8>()
                    .map_err(|_| FunnelcastError::Schedule(format!("bad weekday '{d}'")))
            })
            .collect::<Result<_>>()?;
        if weekdays.is_empty() {
            return Err(FunnelcastError::Schedule("empty weekday set".into()));
        }
        if let Some(bad) = weekdays.iter().find(|d| **d > 6) {
            return Err(FunnelcastError::Schedule(format!(
                "weekday {bad} out of range 0-6"
            )));
        }

        let (h, m) = time
            .split_once(':')
            .ok_or_else(|| FunnelcastError::Schedule(format!("bad time '{time}'")))?;
        let hour: u8 = h
            .trim()
            .parse()
            .map_err(|_| FunnelcastError::Schedule(format!("bad hour '{h}'")))?;
        let minute: u8 = m
            .trim()
            .parse()
            .map_err(|_| FunnelcastError::Schedule(format!("bad minute '{m}'")))?;
        if hour > 23 || minute > 59 {
            return Err(FunnelcastError::Schedule(format!(
                "time {hour:02}:{minute:02} out of range"
            )));
        }

        Ok(Self {
            weekdays,
            hour,
            minute,
        })
    }

    /// Storage form of the weekday set ("1,3").
    pub fn days_spec(&self) -> String {
        self.weekdays
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Storage form of the time-of-day ("09:00").
    pub fn time_spec(&self) -> String {
        format!("{:02}:{:02}", self.hour, self.minute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recurrence_parse_valid() {
        let rule = RecurrenceRule::parse("1,3", "09:00").unwrap();
        assert_eq!(rule.weekdays, vec![1, 3]);
        assert_eq!(rule.hour, 9);
        assert_eq!(rule.minute, 0);
        assert_eq!(rule.days_spec(), "1,3");
        assert_eq!(rule.time_spec(), "09:00");
    }

    #[test]
    fn test_recurrence_parse_rejects_malformed() {
        assert!(RecurrenceRule::parse("", "09:00").is_err());
        assert!(RecurrenceRule::parse("7", "09:00").is_err());
        assert!(RecurrenceRule::parse("1,x", "09:00").is_err());
        assert!(RecurrenceRule::parse("1", "9am").is_err());
        assert!(RecurrenceRule::parse("1", "24:00").is_err());
        assert!(RecurrenceRule::parse("1", "10:60").is_err());
    }

    #[test]
    fn test_audience_rule_columns_round_trip() {
        let rule = AudienceRule::ByStages(vec!["Viewed tariffs".into(), "Passed captcha".into()]);
        let (filter, stages) = rule.to_columns();
        assert_eq!(
            AudienceRule::from_columns(filter, stages.as_deref()),
            rule
        );

        assert_eq!(AudienceRule::from_columns("all", None), AudienceRule::All);
        // Unknown filter values fall back to the whole audience
        assert_eq!(
            AudienceRule::from_columns("something_new", None),
            AudienceRule::All
        );
        // "status" with no stage list degrades to All as well
        assert_eq!(
            AudienceRule::from_columns("status", Some(" , ")),
            AudienceRule::All
        );
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            BroadcastStatus::Draft,
            BroadcastStatus::Scheduled,
            BroadcastStatus::Active,
            BroadcastStatus::Sent,
            BroadcastStatus::Failed,
        ] {
            assert_eq!(BroadcastStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BroadcastStatus::parse("bogus"), None);
    }
}
