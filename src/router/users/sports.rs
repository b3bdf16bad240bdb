//! Independent sport-category preferences.

use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::router::Valid;
use crate::token::AuthContext;
use crate::user::User;

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    pub sport_category_ids: Vec<String>,
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
        .update_sport_preferences(&user.id, body.sport_category_ids)
        .await?;

    Ok(Json(user))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use sqlx::{Pool, Postgres};

    use crate::*;

    #[sqlx::test(
        migrations = "./migrations",
        fixtures(path = "../../../fixtures", scripts("teams", "users"))
    )]
    async fn test_put_sports_rejected_with_teams(pool: Pool<Postgres>) {
        let app = app(router::state(pool));

        // alice follows teams, so the independent path is closed.
        let response = make_request(
            app.clone(),
            Method::PUT,
            "/users/u-alice/sports",
            &token::tests::mint("kc-alice", &[], 600),
            json!({ "sportCategoryIds": ["S1"] }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = make_request(
            app,
            Method::PUT,
            "/users/u-bob/sports",
            &token::tests::mint("kc-bob", &[], 600),
            json!({ "sportCategoryIds": ["S1", "S2"] }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
