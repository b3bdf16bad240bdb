//! Update profile data. Allow-listed fields only.

use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::router::Valid;
use crate::token::AuthContext;
use crate::user::service::ProfileUpdate;
use crate::user::{NotificationPreferences, User};

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    #[validate(length(
        min = 2,
        max = 30,
        message = "Username must be 2 to 30 characters long."
    ))]
    pub username: Option<String>,
    #[validate(email(message = "Email must be formatted."))]
    pub email: Option<String>,
    pub notification_preferences: Option<NotificationPreferences>,
}

pub async fn handler(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(context): Extension<AuthContext>,
    Valid(body): Valid<Body>,
) -> Result<Json<User>> {
    context.authorize(&user.external_id)?;

    let user = state
        .accounts
        .update_profile(
            &user.id,
            ProfileUpdate {
                username: body.username.map(|name| name.to_lowercase()),
                email: body.email,
                notification_preferences: body.notification_preferences,
            },
        )
        .await?;

    Ok(Json(user))
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use serde_json::json;
    use sqlx::{Pool, Postgres};

    use crate::*;

    #[sqlx::test(
        migrations = "./migrations",
        fixtures(path = "../../../fixtures", scripts("teams", "users"))
    )]
    async fn test_patch_me(pool: Pool<Postgres>) {
        let app = app(router::state(pool));

        let response = make_request(
            app,
            Method::PATCH,
            "/users/@me",
            &token::tests::mint("kc-alice", &[], 600),
            json!({ "email": "new@example.com" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let user: user::User = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(user.email, "new@example.com");
        assert_eq!(user.username, "alice");
    }
}
