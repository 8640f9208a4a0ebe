//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API server on its own.
//!
//! ## Intended use
//! Useful for development and debugging when you only want the HTTP surface
//! (with OpenAPI/Swagger UI). The workspace's main `caresched-run` binary is
//! the production entry point.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{router, AppState};
use caresched_core::{db, CoreConfig};

/// # Environment Variables
/// - `CARESCHED_REST_ADDR`: Server address (default: "0.0.0.0:3000")
/// - `DATABASE_URL`: SQLite database (default: "sqlite://caresched.db")
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the database cannot be opened or its schema created, or
/// - the HTTP server fails to bind or fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?)
                .add_directive("caresched_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("CARESCHED_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://caresched.db".into());

    tracing::info!("-- Starting CareSched REST API on {}", addr);

    let cfg = Arc::new(CoreConfig::new(database_url)?);
    let pool = db::connect(&cfg).await?;
    db::ensure_schema(&pool).await?;

    let app = router(AppState::new(pool, cfg));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
