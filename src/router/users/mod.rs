//! Users-related HTTP API.
mod delete;
mod get;
mod list;
mod membership;
mod payment;
mod roles;
mod sports;
mod teams;
mod update;

use axum::extract::{Path, Request, State};
use axum::http::header;
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Router, middleware};

use crate::token::AuthContext;
use crate::user::User;
use crate::{AppState, ServerError};

const ME_ROUTE: &str = "@me";

/// Custom middleware for authentification.
///
/// Decodes the caller's bearer into an [`AuthContext`] and resolves the
/// target user (`@me` maps to the token subject). Handlers decide what the
/// caller may do with the target.
async fn auth(
    State(state): State<AppState>,
    user_id: Option<Path<String>>,
    mut req: Request,
    next: middleware::Next,
) -> Result<Response, ServerError> {
    let bearer = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .ok_or(ServerError::Unauthenticated)?;
    let context = state.token.decode(bearer)?;

    let target = match user_id.map(|Path(user_id)| user_id) {
        Some(user_id) if user_id != ME_ROUTE => {
            state.accounts.get_profile(&user_id).await?
        },
        _ => state.accounts.get_by_external_id(&context.subject).await?,
    };

    req.extensions_mut().insert::<AuthContext>(context);
    req.extensions_mut().insert::<User>(target);
    Ok(next.run(req).await)
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        // `GET /users` goes to `list`. Admin only.
        .route("/", get(list::handler))
        .route("/{user_id}", get(get::handler).delete(delete::handler))
        .route(
            "/@me",
            get(get::handler)
                .patch(update::handler)
                .delete(delete::handler),
        )
        .route(
            "/{user_id}/teams",
            get(teams::get_handler).put(teams::update_handler),
        )
        .route("/{user_id}/sports", put(sports::handler))
        .route("/{user_id}/membership", post(membership::handler))
        .route("/{user_id}/roles/gestionnaire", post(roles::gestionnaire))
        .route("/{user_id}/roles/admin", post(roles::admin))
        .route("/{user_id}/payment", post(payment::handler))
        .route_layer(middleware::from_fn_with_state(state, auth))
        // Public username availability check, registered after the layer.
        .route("/exists/{username}", get(get::exists))
}
