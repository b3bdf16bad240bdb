//! Role grants. Administrators only.

use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::router::Valid;
use crate::token::AuthContext;
use crate::user::User;

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GestionnaireBody {
    #[validate(length(min = 1))]
    pub team_id: String,
}

pub async fn gestionnaire(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(context): Extension<AuthContext>,
    Valid(body): Valid<GestionnaireBody>,
) -> Result<Json<User>> {
    if !context.is_admin() {
        return Err(ServerError::Forbidden);
    }

    let user = state
        .accounts
        .assign_gestionnaire(&user.id, &body.team_id)
        .await?;

    Ok(Json(user))
}

pub async fn admin(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<User>> {
    if !context.is_admin() {
        return Err(ServerError::Forbidden);
    }

    Ok(Json(state.accounts.assign_admin(&user.id).await?))
}
