//! The funnel-stage enumeration.
//!
//! A user's stage records the furthest milestone reached in the guided
//! sequence, not the most recent action: stored stages only ever move to an
//! equal-or-higher priority. The whole mapping lives here as a closed enum
//! so an unknown action or a priority typo is a compile-time impossibility
//! rather than a silent dictionary miss.

use serde::{Deserialize, Serialize};

/// Ordered funnel milestones. The discriminant is the stage priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FunnelStage {
    Started = 1,
    CaptchaPassed = 2,
    ViewedAnswers = 3,
    ViewedPrivateLesson = 4,
    ViewedTariffs = 5,
    ViewedClothesTariff = 6,
    ViewedTechTariff = 7,
    ClickedTechPayment = 8,
    ClickedClothesPayment = 9,
}

impl FunnelStage {
    /// All stages in priority order.
    pub const ALL: [FunnelStage; 9] = [
        FunnelStage::Started,
        FunnelStage::CaptchaPassed,
        FunnelStage::ViewedAnswers,
        FunnelStage::ViewedPrivateLesson,
        FunnelStage::ViewedTariffs,
        FunnelStage::ViewedClothesTariff,
        FunnelStage::ViewedTechTariff,
        FunnelStage::ClickedTechPayment,
        FunnelStage::ClickedClothesPayment,
    ];

    /// Stage priority; strictly increasing along the funnel.
    pub fn priority(self) -> u8 {
        self as u8
    }

    /// Map an interaction event name to its target stage.
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "start" => Some(FunnelStage::Started),
            "captcha_passed" => Some(FunnelStage::CaptchaPassed),
            "answers_viewed" => Some(FunnelStage::ViewedAnswers),
            "private_lesson_viewed" => Some(FunnelStage::ViewedPrivateLesson),
            "tariffs_viewed" => Some(FunnelStage::ViewedTariffs),
            "clothes_tariff_viewed" => Some(FunnelStage::ViewedClothesTariff),
            "tech_tariff_viewed" => Some(FunnelStage::ViewedTechTariff),
            "tech_payment_clicked" => Some(FunnelStage::ClickedTechPayment),
            "clothes_payment_clicked" => Some(FunnelStage::ClickedClothesPayment),
            _ => None,
        }
    }

    /// Operator-facing display name. This is also what the user store
    /// persists and what by-stage audience rules match against.
    pub fn display(self) -> &'static str {
        match self {
            FunnelStage::Started => "Pressed start",
            FunnelStage::CaptchaPassed => "Passed captcha",
            FunnelStage::ViewedAnswers => "Viewed answers",
            FunnelStage::ViewedPrivateLesson => "Viewed private lesson",
            FunnelStage::ViewedTariffs => "Viewed tariffs",
            FunnelStage::ViewedClothesTariff => "Viewed clothes tariff",
            FunnelStage::ViewedTechTariff => "Viewed tech tariff",
            FunnelStage::ClickedTechPayment => "Clicked tech payment",
            FunnelStage::ClickedClothesPayment => "Clicked clothes payment",
        }
    }

    /// Reverse lookup from a stored display name.
    pub fn from_display(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.display() == name)
    }
}
