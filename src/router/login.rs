use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::router::Valid;
use crate::user::User;

pub const TOKEN_TYPE: &str = "Bearer";

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(length(min = 2, max = 30))]
    pub username: String,
    #[validate(length(min = 1, message = "Password is required."))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub token_type: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    pub user: User,
}

/// Handler to authenticate a user through the provider password grant.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    let (bundle, user) = state
        .accounts
        .login(&body.username.to_lowercase(), &body.password)
        .await?;

    Ok(Json(Response {
        token_type: TOKEN_TYPE.to_owned(),
        access_token: bundle.access_token,
        refresh_token: bundle.refresh_token,
        expires_in: bundle.expires_in,
        user,
    }))
}
