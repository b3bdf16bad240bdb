//! Link an external payment reference to the account.

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
    #[validate(length(min = 1, max = 100))]
    pub payment_ref: String,
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
        .link_payment(&user.id, &body.payment_ref)
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
    async fn test_link_payment(pool: Pool<Postgres>) {
        let app = app(router::state(pool));

        let response = make_request(
            app,
            Method::POST,
            "/users/u-alice/payment",
            &token::tests::mint("kc-alice", &[], 600),
            json!({ "paymentRef": "pay_0042" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let user: user::User = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(user.payment_ref.as_deref(), Some("pay_0042"));
    }
}
