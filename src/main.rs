//! Main entry point for the CareSched scheduling service.
//!
//! Opens the database, runs the schema bootstrap, then serves the REST API
//! (with OpenAPI/Swagger UI) until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{router, AppState};
use caresched_core::{db, CoreConfig};

/// # Environment Variables
/// - `CARESCHED_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `DATABASE_URL`: SQLite database (default: "sqlite://caresched.db")
/// - `CARESCHED_SWEEP_INTERVAL_SECS`: TTL sweep cadence (default: 3600)
///
/// # Returns
/// * `Ok(())` - If the server starts and runs successfully
/// * `Err(anyhow::Error)` - If startup or runtime fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("caresched=info".parse()?)
                .add_directive("caresched_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("CARESCHED_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://caresched.db".into());
    let sweep_interval = std::env::var("CARESCHED_SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3600u64);

    tracing::info!("++ Starting CareSched REST on {}", rest_addr);

    let cfg = Arc::new(CoreConfig::new(database_url)?);
    let pool = db::connect(&cfg).await?;
    db::ensure_schema(&pool).await?;

    let state = AppState::new(pool, cfg);
    let app = router(state.clone());

    // Background TTL sweeper: intents and blocks expire on the clock even if
    // nobody calls the admin endpoint.
    let sweeper = {
        let state = state.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(sweep_interval));
            loop {
                ticker.tick().await;
                let now = chrono::Utc::now();
                if let Err(e) = state.intents.expire_due_intents(now).await {
                    tracing::warn!(error = %e, "intent sweep failed");
                }
                if let Err(e) = state.blocks.expire_due_blocks(now).await {
                    tracing::warn!(error = %e, "block sweep failed");
                }
            }
        })
    };

    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app).await?;

    sweeper.abort();
    Ok(())
}
