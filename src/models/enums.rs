//! String-backed enums shared by the entity models.
//!
//! Stored as text columns so the schema stays portable between Postgres and
//! sqlite; the variants are the closed vocabularies of the domain.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// External system a calendar originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum CalendarProvider {
    #[sea_orm(string_value = "internal")]
    Internal,
    #[sea_orm(string_value = "google")]
    Google,
    #[sea_orm(string_value = "microsoft")]
    Microsoft,
    #[sea_orm(string_value = "apple")]
    Apple,
    #[sea_orm(string_value = "ics")]
    Ics,
}

impl CalendarProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarProvider::Internal => "internal",
            CalendarProvider::Google => "google",
            CalendarProvider::Microsoft => "microsoft",
            CalendarProvider::Apple => "apple",
            CalendarProvider::Ics => "ics",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "internal" => Some(CalendarProvider::Internal),
            "google" => Some(CalendarProvider::Google),
            "microsoft" => Some(CalendarProvider::Microsoft),
            "apple" => Some(CalendarProvider::Apple),
            "ics" => Some(CalendarProvider::Ics),
            _ => None,
        }
    }
}

/// What role a calendar plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum CalendarKind {
    #[sea_orm(string_value = "personal")]
    Personal,
    #[sea_orm(string_value = "resource")]
    Resource,
    #[sea_orm(string_value = "virtual")]
    Virtual,
    #[sea_orm(string_value = "bundle")]
    Bundle,
}

/// Provider-visible event status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

/// Canonical RSVP status; adapter tables map provider-native strings here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum RsvpStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "accepted")]
    Accepted,
    #[sea_orm(string_value = "declined")]
    Declined,
}

/// CalendarSync lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum CalendarSyncStatus {
    #[sea_orm(string_value = "not_started")]
    NotStarted,
    #[sea_orm(string_value = "in_progress")]
    InProgress,
    #[sea_orm(string_value = "success")]
    Success,
    #[sea_orm(string_value = "failed")]
    Failed,
}

/// WebhookEvent processing outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum WebhookProcessingStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processed")]
    Processed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "ignored")]
    Ignored,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_round_trips_through_strings() {
        for provider in [
            CalendarProvider::Internal,
            CalendarProvider::Google,
            CalendarProvider::Microsoft,
            CalendarProvider::Apple,
            CalendarProvider::Ics,
        ] {
            assert_eq!(CalendarProvider::parse(provider.as_str()), Some(provider));
        }
        assert_eq!(CalendarProvider::parse("exchange"), None);
    }
}
