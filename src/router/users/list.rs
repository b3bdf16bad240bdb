//! List every account. Administrators only.

use axum::extract::State;
use axum::{Extension, Json};

use crate::error::{Result, ServerError};
use crate::token::AuthContext;
use crate::user::User;
use crate::AppState;

pub async fn handler(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<Vec<User>>> {
    if !context.is_admin() {
        return Err(ServerError::Forbidden);
    }

    Ok(Json(state.accounts.list().await?))
}
