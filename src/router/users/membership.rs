//! Premium membership upgrade.

use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::router::Valid;
use crate::token::AuthContext;
use crate::user::{PlanDuration, User};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    pub duration: PlanDuration,
    #[validate(range(min = 0.0, message = "Price cannot be negative."))]
    pub price: Option<f64>,
}

/// The caller's own token is re-validated against the provider before the
/// upgrade runs, so the raw header travels along.
pub async fn handler(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(context): Extension<AuthContext>,
    headers: HeaderMap,
    Valid(body): Valid<Body>,
) -> Result<Json<User>> {
    context.authorize(&user.external_id)?;

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .ok_or(ServerError::Unauthenticated)?;
    let token = bearer.strip_prefix("Bearer ").unwrap_or(bearer);

    let user = state
        .accounts
        .upgrade_membership(
            &user.external_id,
            body.duration,
            body.price,
            token,
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
    async fn test_upgrade_me(pool: Pool<Postgres>) {
        let app = app(router::state(pool));

        let response = make_request(
            app,
            Method::POST,
            "/users/u-alice/membership",
            &token::tests::mint("kc-alice", &[], 600),
            json!({ "duration": "Monthly" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let user: user::User = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(user.membership_badge, user::MembershipBadge::Premium);
        assert_eq!(user.subscription.unwrap().price, 29.99);
    }
}
