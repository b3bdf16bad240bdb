//! Read a user profile.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Serialize;

use crate::AppState;
use crate::error::Result;
use crate::token::AuthContext;
use crate::user::User;

pub async fn handler(
    Extension(user): Extension<User>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<User>> {
    context.authorize(&user.external_id)?;
    Ok(Json(user))
}

#[derive(Debug, Serialize)]
pub struct Existence {
    pub exists: bool,
}

/// Public username lookup, `GET /users/exists/{username}`.
pub async fn exists(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<Existence>> {
    Ok(Json(Existence {
        exists: state.accounts.exists(&username).await?,
    }))
}
