//! Sport-category and team administration.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::router::Valid;
use crate::sport::{CategoryNode, SportCategory};
use crate::team::Team;

/// `GET /sports/hierarchy`: the whole category tree.
pub async fn hierarchy(
    State(state): State<AppState>,
) -> Result<Json<Vec<CategoryNode>>> {
    Ok(Json(state.sports.hierarchy().await?))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CategoryBody {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub parent_category_id: Option<String>,
}

pub async fn create_category(
    State(state): State<AppState>,
    Valid(body): Valid<CategoryBody>,
) -> Result<(StatusCode, Json<SportCategory>)> {
    let category = state
        .sports
        .insert(
            &body.name,
            body.description.as_deref(),
            body.parent_category_id.as_deref(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(category)))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CategoryUpdate {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

pub async fn update_category(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Valid(body): Valid<CategoryUpdate>,
) -> Result<Json<SportCategory>> {
    let category = state
        .sports
        .update(&id, body.name.as_deref(), body.description.as_deref())
        .await?;

    Ok(Json(category))
}

pub async fn delete_category(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.sports.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TeamBody {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub sport_category_id: String,
    #[validate(length(max = 100))]
    pub location: Option<String>,
}

pub async fn create_team(
    State(state): State<AppState>,
    Valid(body): Valid<TeamBody>,
) -> Result<(StatusCode, Json<Team>)> {
    let team = state
        .teams
        .insert(
            &body.name,
            &body.sport_category_id,
            body.location.as_deref(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(team)))
}

/// `GET /sports/{id}/teams`: teams registered under one category.
pub async fn teams_by_category(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Team>>> {
    Ok(Json(state.teams.find_by_category(&id).await?))
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use serde_json::json;
    use sqlx::{Pool, Postgres};

    use super::*;
    use crate::*;

    #[sqlx::test(
        migrations = "./migrations",
        fixtures(path = "../../fixtures", scripts("teams"))
    )]
    async fn test_hierarchy_is_public(pool: Pool<Postgres>) {
        let app = app(router::state(pool));

        let response = make_request(
            app,
            Method::GET,
            "/sports/hierarchy",
            "",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let tree: Vec<CategoryNode> =
            serde_json::from_slice(&bytes).unwrap();
        assert!(!tree.is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_category_creation_requires_admin(pool: Pool<Postgres>) {
        let app = app(router::state(pool));

        let body = json!({ "name": "Ball sports" }).to_string();
        let response = make_request(
            app.clone(),
            Method::POST,
            "/sports",
            &token::tests::mint("kc-someone", &[], 600),
            body.clone(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = make_request(
            app,
            Method::POST,
            "/sports",
            &token::tests::mint("kc-admin", &["ADMIN"], 600),
            body,
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
