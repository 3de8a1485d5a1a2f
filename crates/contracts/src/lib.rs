use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub mod period;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Visitor,
    Moderator,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Visitor => "visitor",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }

    /// Privileged traffic (moderation staff) is never counted as a view.
    pub fn is_privileged(self) -> bool {
        matches!(self, Role::Moderator | Role::Admin)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "visitor" => Some(Role::Visitor),
            "moderator" => Some(Role::Moderator),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseKind {
    Case,
    Memory,
}

impl CaseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CaseKind::Case => "case",
            CaseKind::Memory => "memory",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "case" => Some(CaseKind::Case),
            "memory" => Some(CaseKind::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Draft,
    Published,
}

impl CaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CaseStatus::Draft => "draft",
            CaseStatus::Published => "published",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(CaseStatus::Draft),
            "published" => Some(CaseStatus::Published),
            _ => None,
        }
    }
}

/// A view event as submitted by the recorder, before it gains an event id.
///
/// `occurred_at` is stamped when the event is accepted by the dedup check,
/// not when the background writer eventually persists it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewViewEvent {
    pub path: String,
    pub target_id: Option<Ulid>,
    pub visitor_signature: String,
    pub user_agent_raw: String,
    pub occurred_at: DateTime<Utc>,
}

/// Case record as served by the content-read surface and joined into the
/// most-viewed report. Writes to this table belong to the moderation CRUD
/// service, not this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseRecord {
    pub case_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person_name: Option<String>,
    pub kind: CaseKind,
    pub status: CaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

impl CaseRecord {
    /// Display title for reports: memory records are listed under the
    /// remembered person's name when one is set.
    pub fn display_title(&self) -> &str {
        match (self.kind, self.person_name.as_deref()) {
            (CaseKind::Memory, Some(name)) if !name.is_empty() => name,
            _ => self.title.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewTotals {
    pub today: i64,
    pub week: i64,
    pub month: i64,
    pub quarter: i64,
    pub half_year: i64,
    pub all_time: i64,
}

/// One row of the most-viewed report. Targets that no longer resolve in the
/// case store are labeled unknown rather than dropped, so the view counts
/// stay consistent with the raw aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopularTarget {
    pub target_id: String,
    pub views: i64,
    pub title: String,
    pub kind: CaseKind,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: i64,
}
