//! User-account and membership-management API backed by an OIDC identity
//! provider, with saga-style dual-write consistency.

#[forbid(unsafe_code)]
#[deny(missing_docs, unused_mut)]
mod database;
pub mod error;
mod events;
mod keycloak;
mod router;
mod saga;
mod sport;
mod team;
pub mod telemetry;
mod token;
mod user;

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::{get, patch, post};
use axum::{Router, middleware as AxumMiddleware};
use error::ServerError;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    token: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(axum::body::Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub db: database::Database,
    pub accounts: user::service::AccountService,
    pub sports: sport::SportCategoryRepository,
    pub teams: team::TeamRepository,
    pub token: token::TokenDecoder,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::PUT, Method::DELETE, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    let sports_router = Router::new()
        // `POST /sports`, `PATCH /sports/:ID`, `DELETE /sports/:ID` are
        // administrative.
        .route("/", post(router::sports::create_category))
        .route(
            "/{id}",
            patch(router::sports::update_category)
                .delete(router::sports::delete_category),
        )
        .route_layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            router::require_admin,
        ))
        // Reads stay public.
        .route("/hierarchy", get(router::sports::hierarchy))
        .route("/{id}/teams", get(router::sports::teams_by_category));

    let teams_router = Router::new()
        .route("/", post(router::sports::create_team))
        .route_layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            router::require_admin,
        ));

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `POST /create` goes to `create`.
        .route("/create", post(router::create::handler))
        // `POST /login` goes to `login`.
        .route("/login", post(router::login::handler))
        .nest("/users", router::users::router(state.clone()))
        .nest("/sports", sports_router)
        .nest("/teams", teams_router)
        .with_state(state)
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>>
{
    // read configuration file. let it in memory.
    let config = config::Configuration::default().read()?;

    let db = match config.postgres {
        Some(ref config) => {
            database::Database::new(
                &config.address,
                &config
                    .username
                    .clone()
                    .unwrap_or(database::DEFAULT_CREDENTIALS.into()),
                &config
                    .password
                    .clone()
                    .unwrap_or(database::DEFAULT_CREDENTIALS.into()),
                &config
                    .database
                    .clone()
                    .unwrap_or(database::DEFAULT_DATABASE_NAME.into()),
                config.pool_size.unwrap_or(database::DEFAULT_POOL_SIZE),
            )
            .await?
        },
        None => {
            tracing::error!("missing `postgres` entry on `config.yaml` file");
            std::process::exit(0);
        },
    };

    // execute migrations scripts on start.
    sqlx::migrate!().run(&db.postgres).await?;

    // handle the identity provider.
    let Some(keycloak) = config.keycloak.clone() else {
        tracing::error!("missing `keycloak` entry on `config.yaml` file");
        std::process::exit(0);
    };
    let token = token::TokenDecoder::new(&keycloak.client_id);
    let provider: Arc<dyn keycloak::IdentityProvider> =
        Arc::new(keycloak::Keycloak::new(keycloak)?);

    // handle the event bus.
    let events = if let Some(cfg) = &config.amqp {
        events::EventPublisher::new(cfg).await?
    } else {
        events::EventPublisher::default()
    };

    let accounts = user::service::AccountService::new(
        user::repository::UserRepository::new(db.postgres.clone()),
        team::TeamRepository::new(db.postgres.clone()),
        sport::SportCategoryRepository::new(db.postgres.clone()),
        provider,
        events,
        saga::RetryPolicy::default(),
    );

    Ok(AppState {
        sports: sport::SportCategoryRepository::new(db.postgres.clone()),
        teams: team::TeamRepository::new(db.postgres.clone()),
        config,
        db,
        accounts,
        token,
    })
}
