//! HTTP surface. Handlers are thin adapters over the account orchestrator.

pub mod create;
pub mod login;
pub mod sports;
pub mod status;
pub mod users;

use axum::Json;
use axum::extract::{FromRequest, Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::AppState;
use crate::error::ServerError;
use crate::token::AuthContext;

/// JSON body extractor running `validator` rules before the handler.
pub struct Valid<T>(pub T);

impl<S, T> FromRequest<S> for Valid<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ServerError;

    async fn from_request(
        req: Request,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<T>::from_request(req, state).await?;
        body.validate()?;
        Ok(Valid(body))
    }
}

/// Gate for administrative routes outside the `/users` scope.
pub async fn require_admin(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let bearer = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .ok_or(ServerError::Unauthenticated)?;

    let context = state.token.decode(bearer)?;
    if !context.is_admin() {
        return Err(ServerError::Forbidden);
    }

    req.extensions_mut().insert::<AuthContext>(context);
    Ok(next.run(req).await)
}

#[cfg(test)]
pub(crate) fn state(pool: sqlx::PgPool) -> AppState {
    use std::sync::Arc;

    use crate::keycloak::mock::MockProvider;

    state_with_provider(pool, Arc::new(MockProvider::default()))
}

#[cfg(test)]
pub(crate) fn state_with_provider(
    pool: sqlx::PgPool,
    provider: std::sync::Arc<dyn crate::keycloak::IdentityProvider>,
) -> AppState {
    use std::sync::Arc;

    use crate::events::EventPublisher;
    use crate::saga::RetryPolicy;
    use crate::sport::SportCategoryRepository;
    use crate::team::TeamRepository;
    use crate::token::TokenDecoder;
    use crate::user::repository::UserRepository;
    use crate::user::service::AccountService;
    use crate::{config, database};

    AppState {
        config: Arc::new(config::Configuration::default()),
        db: database::Database {
            postgres: pool.clone(),
        },
        accounts: AccountService::new(
            UserRepository::new(pool.clone()),
            TeamRepository::new(pool.clone()),
            SportCategoryRepository::new(pool.clone()),
            provider,
            EventPublisher::default(),
            RetryPolicy::immediate(),
        ),
        sports: SportCategoryRepository::new(pool.clone()),
        teams: TeamRepository::new(pool),
        token: TokenDecoder::new(crate::token::tests::CLIENT_ID),
    }
}
