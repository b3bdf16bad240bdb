use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::router::Valid;
use crate::user::service::CreateAccount;
use crate::user::{NotificationPreferences, Role, User};

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    #[validate(length(
        min = 2,
        max = 30,
        message = "Username must be 2 to 30 characters long."
    ))]
    pub username: String,
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(length(
        min = 8,
        max = 255,
        message = "Password must contain at least 8 characters."
    ))]
    pub password: String,
    pub role: Option<Role>,
    #[serde(default)]
    pub team_ids: Vec<String>,
    pub notification_preferences: Option<NotificationPreferences>,
    pub managed_team_id: Option<String>,
}

/// Handler to create an account.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<(StatusCode, Json<User>)> {
    let user = state
        .accounts
        .create_account(CreateAccount {
            username: body.username.to_lowercase(),
            email: body.email,
            password: body.password,
            role: body.role.unwrap_or_default(),
            team_ids: body.team_ids,
            notification_preferences: body
                .notification_preferences
                .unwrap_or_default(),
            managed_team_id: body.managed_team_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

#[cfg(test)]
pub(super) mod tests {
    use http_body_util::BodyExt;
    use serde_json::json;
    use sqlx::{Pool, Postgres};

    use super::*;
    use crate::*;

    fn body(username: &str, teams: &[&str]) -> String {
        json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": "s3cret-enough",
            "teamIds": teams,
        })
        .to_string()
    }

    #[sqlx::test(
        migrations = "./migrations",
        fixtures(path = "../../fixtures", scripts("teams"))
    )]
    async fn test_create_handler(pool: Pool<Postgres>) {
        let app = app(router::state(pool));

        let response =
            make_request(app, Method::POST, "/create", "", body("carol", &["T1", "T3"]))
                .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let user: user::User = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(user.username, "carol");
        assert_eq!(user.selected_sports, vec!["S1"]);
        assert!(!user.external_id.is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_create_rejects_malformed_email(pool: Pool<Postgres>) {
        let app = app(router::state(pool));

        let response = make_request(
            app,
            Method::POST,
            "/create",
            "",
            json!({
                "username": "carol",
                "email": "not-an-email",
                "password": "s3cret-enough",
            })
            .to_string(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_create_rejects_too_many_teams(pool: Pool<Postgres>) {
        let app = app(router::state(pool));

        let response = make_request(
            app,
            Method::POST,
            "/create",
            "",
            body("carol", &["T1", "T2", "T3", "T4"]),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
