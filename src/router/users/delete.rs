//! Delete an account, provider first.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Extension;

use crate::AppState;
use crate::error::Result;
use crate::token::AuthContext;
use crate::user::User;

pub async fn handler(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(context): Extension<AuthContext>,
) -> Result<StatusCode> {
    state.accounts.delete_account(&user.id, &context).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use sqlx::{Pool, Postgres};

    use crate::*;

    #[sqlx::test(
        migrations = "./migrations",
        fixtures(path = "../../../fixtures", scripts("teams", "users"))
    )]
    async fn test_delete_someone_else_is_forbidden(pool: Pool<Postgres>) {
        let app = app(router::state(pool));

        let response = make_request(
            app.clone(),
            Method::DELETE,
            "/users/u-alice",
            &token::tests::mint("kc-bob", &[], 600),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = make_request(
            app,
            Method::DELETE,
            "/users/@me",
            &token::tests::mint("kc-alice", &[], 600),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
