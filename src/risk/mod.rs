//! Submission-time decisions derived from the risk questionnaire and the
//! selected assets: priority, impact, risk and whether peer review applies.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ImpactError, Result};

/// Questions in the risk questionnaire.
pub const QUESTION_COUNT: usize = 5;
/// Total score at or above which peer review is required.
pub const PEER_REVIEW_THRESHOLD: u32 = 7;
/// Above this many selected assets the impact is High.
pub const HIGH_IMPACT_ASSET_COUNT: usize = 5;
/// At or below this many selected assets a Low risk gives Low impact.
pub const LOW_IMPACT_ASSET_COUNT: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Minor,
    Standard,
    Major,
    Emergency,
}

impl ChangeType {
    pub fn parse(value: &str) -> Option<ChangeType> {
        match value.trim().to_ascii_lowercase().as_str() {
            "minor" => Some(ChangeType::Minor),
            "standard" | "normal" => Some(ChangeType::Standard),
            "major" => Some(ChangeType::Major),
            "emergency" => Some(ChangeType::Emergency),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn parse(value: &str) -> Option<RiskLevel> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            _ => None,
        }
    }

    /// Band of a questionnaire total: 5-6 Low, 7-11 Medium, 12-15 High.
    pub fn from_total(total: u32) -> Option<RiskLevel> {
        match total {
            5..=6 => Some(RiskLevel::Low),
            7..=11 => Some(RiskLevel::Medium),
            12..=15 => Some(RiskLevel::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    /// Numeric value used by the service desk.
    pub fn value(self) -> u8 {
        match self {
            Priority::Low => 1,
            Priority::Medium => 2,
            Priority::High => 3,
            Priority::Urgent => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    Low,
    Medium,
    High,
}

impl Impact {
    pub fn value(self) -> u8 {
        match self {
            Impact::Low => 1,
            Impact::Medium => 2,
            Impact::High => 3,
        }
    }
}

macro_rules! display_as_debug {
    ($($t:ty),*) => {$(
        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    )*};
}

display_as_debug!(ChangeType, RiskLevel, Priority, Impact);

/// Outcome of the risk questionnaire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub total_score: u32,
    /// `None` when the total falls outside the questionnaire's range
    pub level: Option<RiskLevel>,
}

impl RiskAssessment {
    /// Score five answers, each 1 to 3.
    pub fn from_answers(answers: &[u8]) -> Result<Self> {
        if answers.len() != QUESTION_COUNT {
            return Err(ImpactError::Validation(format!(
                "Risk assessment needs {} answers, got {}",
                QUESTION_COUNT,
                answers.len()
            )));
        }
        if let Some((i, bad)) = answers.iter().enumerate().find(|(_, a)| !(1..=3).contains(*a)) {
            return Err(ImpactError::Validation(format!(
                "Answer {} scored {}; answers score 1 to 3",
                i + 1,
                bad
            )));
        }
        let total = answers.iter().map(|a| u32::from(*a)).sum();
        Ok(Self::from_total(total))
    }

    pub fn from_total(total_score: u32) -> Self {
        Self {
            total_score,
            level: RiskLevel::from_total(total_score),
        }
    }

    /// An assessment whose level was chosen directly rather than banded.
    pub fn with_level(total_score: u32, level: Option<RiskLevel>) -> Self {
        Self { total_score, level }
    }
}

/// Fields set on the change at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub priority: Priority,
    pub impact: Impact,
    /// 1 Low, 2 Medium, 3 High
    pub risk: u8,
    pub peer_review_required: bool,
}

pub fn decide(change_type: &ChangeType, assessment: &RiskAssessment, selected_asset_count: usize) -> Decision {
    let level = assessment.level;

    let priority = if *change_type == ChangeType::Emergency {
        Priority::Urgent
    } else {
        match level {
            Some(RiskLevel::Low) => Priority::Low,
            Some(RiskLevel::High) => Priority::High,
            Some(RiskLevel::Medium) | None => Priority::Medium,
        }
    };

    // High is checked first and wins over Low.
    let impact = if level == Some(RiskLevel::High) || selected_asset_count > HIGH_IMPACT_ASSET_COUNT {
        Impact::High
    } else if level == Some(RiskLevel::Low) && selected_asset_count <= LOW_IMPACT_ASSET_COUNT {
        Impact::Low
    } else {
        Impact::Medium
    };

    let risk = match level {
        Some(RiskLevel::Low) => 1,
        Some(RiskLevel::High) => 3,
        Some(RiskLevel::Medium) | None => 2,
    };

    Decision {
        priority,
        impact,
        risk,
        peer_review_required: assessment.total_score >= PEER_REVIEW_THRESHOLD,
    }
}

/// Peer reviewers, or the explicit "nobody qualifies" state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reviewers", rename_all = "snake_case")]
pub enum ReviewerSelection {
    Reviewers(Vec<u64>),
    NoneIdentified,
}

impl ReviewerSelection {
    pub fn reviewers(&self) -> &[u64] {
        match self {
            ReviewerSelection::Reviewers(ids) => ids,
            ReviewerSelection::NoneIdentified => &[],
        }
    }
}

/// Union of implementer, approvers and asset owners, minus the requester,
/// deduplicated in that order.
pub fn select_peer_reviewers(
    requester: Option<u64>,
    implementer: Option<u64>,
    approvers: &[u64],
    owners: &[u64],
) -> ReviewerSelection {
    let mut reviewers: Vec<u64> = Vec::new();
    let candidates = implementer.into_iter().chain(approvers.iter().copied()).chain(owners.iter().copied());
    for id in candidates {
        if id == 0 || Some(id) == requester || reviewers.contains(&id) {
            continue;
        }
        reviewers.push(id);
    }

    if reviewers.is_empty() {
        ReviewerSelection::NoneIdentified
    } else {
        ReviewerSelection::Reviewers(reviewers)
    }
}
