//! Postgres persistence for the user document.

use sqlx::types::Json;
use sqlx::{Pool, Postgres};

use crate::error::{Result, ServerError};
use crate::team::unique_violation;
use crate::user::{
    MembershipBadge, MembershipStatus, NotificationPreferences, Role,
    SubscriptionPlan, User,
};

const COLUMNS: &str = r#"id, external_id, username, email, role,
    membership_status, membership_badge, selected_team_ids, selected_sports,
    notification_preferences, managed_team_id, subscription, payment_ref,
    created_at"#;

#[derive(Clone)]
pub struct UserRepository {
    pool: Pool<Postgres>,
}

impl UserRepository {
    /// Create a new [`UserRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO users (id, external_id, username, email, role,
                membership_status, membership_badge, selected_team_ids,
                selected_sports, notification_preferences, managed_team_id,
                subscription, payment_ref, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                        $13, $14)"#,
        )
        .bind(&user.id)
        .bind(&user.external_id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.role)
        .bind(user.membership_status)
        .bind(user.membership_badge)
        .bind(&user.selected_team_ids)
        .bind(&user.selected_sports)
        .bind(Json(&user.notification_preferences))
        .bind(&user.managed_team_id)
        .bind(user.subscription.as_ref().map(Json))
        .bind(&user.payment_ref)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|err| unique_violation(err, "user"))?;

        Ok(())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {COLUMNS} FROM users WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Whether the username or the email is already taken.
    pub async fn exists_username_or_email(
        &self,
        username: &str,
        email: &str,
    ) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS (
                SELECT 1 FROM users WHERE username = $1 OR email = $2
            )"#,
        )
        .bind(username)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    pub async fn list_all(&self) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {COLUMNS} FROM users ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    /// Partial profile update; absent fields keep their stored value.
    pub async fn update_profile(
        &self,
        id: &str,
        username: Option<&str>,
        email: Option<&str>,
        notification_preferences: Option<&NotificationPreferences>,
    ) -> Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"UPDATE users SET
                username = COALESCE($1, username),
                email = COALESCE($2, email),
                notification_preferences =
                    COALESCE($3, notification_preferences)
                WHERE id = $4
                RETURNING {COLUMNS}"#
        ))
        .bind(username)
        .bind(email)
        .bind(notification_preferences.map(Json))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| unique_violation(err, "user"))?
        .ok_or(ServerError::NotFound("user"))?;

        Ok(user)
    }

    /// Write the team selection and its derived sports in one statement, so
    /// no reader ever observes one without the other.
    pub async fn set_teams_and_sports(
        &self,
        id: &str,
        team_ids: &[String],
        sports: &[String],
    ) -> Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"UPDATE users
                SET selected_team_ids = $1, selected_sports = $2
                WHERE id = $3
                RETURNING {COLUMNS}"#
        ))
        .bind(team_ids)
        .bind(sports)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ServerError::NotFound("user"))?;

        Ok(user)
    }

    /// Independent sport preferences, valid only while no teams are selected.
    pub async fn set_sport_preferences(
        &self,
        id: &str,
        sports: &[String],
    ) -> Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"UPDATE users SET selected_sports = $1
                WHERE id = $2
                RETURNING {COLUMNS}"#
        ))
        .bind(sports)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ServerError::NotFound("user"))?;

        Ok(user)
    }

    pub async fn set_membership(
        &self,
        id: &str,
        status: MembershipStatus,
        badge: MembershipBadge,
        role: Role,
        plan: &SubscriptionPlan,
    ) -> Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"UPDATE users SET membership_status = $1,
                membership_badge = $2, role = $3, subscription = $4
                WHERE id = $5
                RETURNING {COLUMNS}"#
        ))
        .bind(status)
        .bind(badge)
        .bind(role)
        .bind(Json(plan))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ServerError::NotFound("user"))?;

        Ok(user)
    }

    pub async fn set_role(
        &self,
        id: &str,
        role: Role,
        managed_team_id: Option<&str>,
    ) -> Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"UPDATE users SET role = $1,
                managed_team_id = COALESCE($2, managed_team_id)
                WHERE id = $3
                RETURNING {COLUMNS}"#
        ))
        .bind(role)
        .bind(managed_team_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ServerError::NotFound("user"))?;

        Ok(user)
    }

    pub async fn set_payment(
        &self,
        id: &str,
        payment_ref: &str,
    ) -> Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"UPDATE users SET payment_ref = $1
                WHERE id = $2
                RETURNING {COLUMNS}"#
        ))
        .bind(payment_ref)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ServerError::NotFound("user"))?;

        Ok(user)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query(r#"DELETE FROM users WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ServerError::NotFound("user"));
        }
        Ok(())
    }
}
