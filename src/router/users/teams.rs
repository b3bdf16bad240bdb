//! Selected teams of a user.

use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::router::Valid;
use crate::team::Team;
use crate::token::AuthContext;
use crate::user::User;

pub async fn get_handler(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<Vec<Team>>> {
    context.authorize(&user.external_id)?;

    Ok(Json(state.accounts.get_teams(&user.id).await?))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    pub team_ids: Vec<String>,
}

/// Replace the team selection; `selected_sports` follows.
pub async fn update_handler(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(context): Extension<AuthContext>,
    Valid(body): Valid<Body>,
) -> Result<Json<User>> {
    context.authorize(&user.external_id)?;

    let user = state
        .accounts
        .update_selected_teams(&user.id, body.team_ids)
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
    async fn test_put_teams_recomputes_sports(pool: Pool<Postgres>) {
        let app = app(router::state(pool));

        let response = make_request(
            app,
            Method::PUT,
            "/users/u-alice/teams",
            &token::tests::mint("kc-alice", &[], 600),
            json!({ "teamIds": ["T2"] }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let user: user::User = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(user.selected_team_ids, vec!["T2"]);
        assert_eq!(user.selected_sports, vec!["S2"]);
    }

    #[sqlx::test(
        migrations = "./migrations",
        fixtures(path = "../../../fixtures", scripts("teams", "users"))
    )]
    async fn test_put_teams_enforces_cap(pool: Pool<Postgres>) {
        let app = app(router::state(pool));

        let response = make_request(
            app,
            Method::PUT,
            "/users/u-alice/teams",
            &token::tests::mint("kc-alice", &[], 600),
            json!({ "teamIds": ["T1", "T2", "T3", "T4"] }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[sqlx::test(
        migrations = "./migrations",
        fixtures(path = "../../../fixtures", scripts("teams", "users"))
    )]
    async fn test_put_teams_for_someone_else(pool: Pool<Postgres>) {
        let app = app(router::state(pool));

        let response = make_request(
            app,
            Method::PUT,
            "/users/u-alice/teams",
            &token::tests::mint("kc-bob", &[], 600),
            json!({ "teamIds": ["T1"] }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[sqlx::test(
        migrations = "./migrations",
        fixtures(path = "../../../fixtures", scripts("teams", "users"))
    )]
    async fn test_get_teams_of_someone_else(pool: Pool<Postgres>) {
        let app = app(router::state(pool));

        let response = make_request(
            app.clone(),
            Method::GET,
            "/users/u-alice/teams",
            &token::tests::mint("kc-bob", &[], 600),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = make_request(
            app,
            Method::GET,
            "/users/u-alice/teams",
            &token::tests::mint("kc-alice", &[], 600),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
