//! User document and membership plan types.

pub mod repository;
pub mod service;

use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};

/// Price applied when an upgrade request carries no override.
pub const DEFAULT_MONTHLY_PRICE: f64 = 29.99;
pub const DEFAULT_YEARLY_PRICE: f64 = 129.99;

/// Realm-level role mirrored into the local record.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
    sqlx::Type,
)]
#[sqlx(type_name = "role", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[default]
    User,
    PremiumUser,
    Admin,
    TeamManager,
}

impl Role {
    /// Name in the provider role catalog.
    pub fn name(self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::PremiumUser => "PREMIUM_USER",
            Role::Admin => "ADMIN",
            Role::TeamManager => "TEAM_MANAGER",
        }
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
    sqlx::Type,
)]
#[sqlx(type_name = "membership_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipStatus {
    Active,
    #[default]
    Inactive,
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
    sqlx::Type,
)]
#[sqlx(type_name = "membership_badge")]
pub enum MembershipBadge {
    #[default]
    Basic,
    Premium,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanDuration {
    Monthly,
    Yearly,
}

impl PlanDuration {
    fn months(self) -> Months {
        match self {
            PlanDuration::Monthly => Months::new(1),
            PlanDuration::Yearly => Months::new(12),
        }
    }

    pub fn default_price(self) -> f64 {
        match self {
            PlanDuration::Monthly => DEFAULT_MONTHLY_PRICE,
            PlanDuration::Yearly => DEFAULT_YEARLY_PRICE,
        }
    }
}

/// Embedded premium plan, stored as JSON on the user document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPlan {
    pub price: f64,
    pub duration: PlanDuration,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_active: bool,
}

impl SubscriptionPlan {
    /// Build an active plan starting on `start_date`.
    ///
    /// End dates use calendar arithmetic with end-of-month clamping, so
    /// 2024-01-31 plus one month lands on 2024-02-29.
    pub fn new(
        duration: PlanDuration,
        price: Option<f64>,
        start_date: NaiveDate,
    ) -> Result<Self> {
        let end_date = start_date
            .checked_add_months(duration.months())
            .ok_or(ServerError::Internal {
                details: "plan end date out of range".into(),
            })?;

        Ok(Self {
            price: price.unwrap_or(duration.default_price()),
            duration,
            start_date,
            end_date,
            is_active: true,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub email: bool,
    pub sms: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            email: true,
            sms: false,
        }
    }
}

/// The user document as stored.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    /// Provider identity id. Unique, never rewritten.
    pub external_id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub membership_status: MembershipStatus,
    pub membership_badge: MembershipBadge,
    pub selected_team_ids: Vec<String>,
    /// Derived from the selected teams; only written together with
    /// `selected_team_ids` when teams are the source.
    pub selected_sports: Vec<String>,
    #[sqlx(json)]
    pub notification_preferences: NotificationPreferences,
    pub managed_team_id: Option<String>,
    #[sqlx(json(nullable))]
    pub subscription: Option<SubscriptionPlan>,
    pub payment_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_monthly_plan_clamps_to_month_end() {
        let plan = SubscriptionPlan::new(
            PlanDuration::Monthly,
            None,
            date(2024, 1, 31),
        )
        .unwrap();

        assert_eq!(plan.end_date, date(2024, 2, 29));
        assert_eq!(plan.price, 29.99);
        assert!(plan.is_active);
    }

    #[test]
    fn test_yearly_plan_from_leap_day() {
        let plan = SubscriptionPlan::new(
            PlanDuration::Yearly,
            None,
            date(2024, 2, 29),
        )
        .unwrap();

        assert_eq!(plan.end_date, date(2025, 2, 28));
        assert_eq!(plan.price, 129.99);
    }

    #[test]
    fn test_price_override_wins() {
        let plan = SubscriptionPlan::new(
            PlanDuration::Monthly,
            Some(9.99),
            date(2026, 6, 15),
        )
        .unwrap();

        assert_eq!(plan.price, 9.99);
        assert_eq!(plan.end_date, date(2026, 7, 15));
    }
}
