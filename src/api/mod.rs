use crate::{
    api::handlers::health,
    cli::telemetry,
    credentials::{CredentialConfig, CredentialService, PgStore, SessionCodec, SessionConfig},
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::get,
    Extension, Router,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Instrument, Span};
use ulid::Ulid;

pub mod email;
pub mod handlers;

const SCHEMA: &str = include_str!("../../sql/schema.sql");

/// Services shared with request handlers through an `Extension`.
pub struct AppState {
    pub credentials: CredentialService,
    pub sessions: SessionCodec,
}

impl AppState {
    /// Build the credential service on top of PostgreSQL.
    ///
    /// # Errors
    /// Returns an error if the pepper is empty or the session key is invalid.
    pub fn new(
        pool: PgPool,
        config: CredentialConfig,
        session_config: &SessionConfig,
    ) -> Result<Self> {
        let credentials = CredentialService::new(Arc::new(PgStore::new(pool)), config)?;
        let sessions =
            SessionCodec::new(session_config).context("Invalid session configuration")?;
        Ok(Self {
            credentials,
            sessions,
        })
    }
}

/// Router with the service routes and the request tracing layers.
pub fn router(pool: PgPool, state: Arc<AppState>) -> Router {
    Router::new().route("/health", get(health::health)).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(Extension(state))
            .layer(Extension(pool)),
    )
}

/// Apply the bundled schema. Every statement is idempotent.
///
/// # Errors
/// Returns an error if any statement fails.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "MIGRATE"
    );
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .instrument(span)
        .await
        .context("Failed to apply database schema")?;
    Ok(())
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: String,
    migrate_schema: bool,
    config: CredentialConfig,
    session_config: SessionConfig,
    email_config: email::EmailWorkerConfig,
) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    if migrate_schema {
        migrate(&pool).await?;
        info!("Database schema applied");
    }

    let state = Arc::new(AppState::new(pool.clone(), config, &session_config)?);

    email::spawn_outbox_worker(pool.clone(), Arc::new(email::LogEmailSender), email_config);

    let app = router(pool, state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    telemetry::shutdown_tracer();

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
