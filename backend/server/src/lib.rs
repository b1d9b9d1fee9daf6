//! Backend of a green-investment platform: founders raise money for sustainability projects,
//! investors fund them, and meeting feedback decides whether the money stays.
//!
//!
//!
//! # General Infrastructure
//! - One axum server, JSON over HTTP
//! - Redis holds every document, see [`database`] for the key layout
//! - Bill photos are analysed by Gemini, see [`bills`]
//!
//!
//!
//! # Money Flow
//!
//! - Funding adds to a project's raised amount, and with a named investor moves the amount out of
//!   their available funds into an investment entry
//! - A refund returns every investment entry to its investor and resets the project
//! - Each phase of a project collects likes and dislikes from investor meetings
//! - A dislike that drops a phase below 50% satisfaction refunds the project automatically
//!
//! Funding and refunds on one project are serialised by [`ledger::ProjectLocks`], and every
//! multi-document write is a single [`store::WriteBatch`].
//!
//!
//!
//! # Notes
//!
//! ## Users
//! There is no authentication. The `x-user-id` header selects the user, defaulting to the demo user
//! created at startup.
//!
//! ## Legacy paths
//! The mobile client calls everything under `/login`, so the API router is mounted there too.
//!
//!
//!
//! # Setup
//!
//! Run locally against a Redis instance.
//! ```sh
//! REDIS_URL=redis://127.0.0.1:6379 RUST_LOG=info cargo run -p greenfund
//! ```
//!
//! Smoke test a running server.
//! ```sh
//! cargo run -p tester -- http://localhost:8000
//! ```
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! ```
use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderName, Method, header::CONTENT_TYPE},
    routing::{get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

pub mod bills;
pub mod config;
pub mod database;
pub mod documents;
pub mod error;
pub mod feedback;
pub mod green;
pub mod ledger;
pub mod memory;
pub mod models;
pub mod refund;
pub mod repository;
pub mod routes;
pub mod state;
pub mod store;
pub mod user;
pub mod utils;

use routes::*;
use state::State;
use user::USER_HEADER;

/// Bill photos arrive base64 encoded inside the JSON body.
const BODY_LIMIT: usize = 50 * 1024 * 1024;

fn api() -> Router<Arc<State>> {
    Router::new()
        .route("/project", post(create_project_handler))
        .route("/project/fund", post(fund_handler))
        .route("/project/{name}", get(project_handler))
        .route("/project/{name}/phases/{index}/like", post(like_handler))
        .route("/project/{name}/phases/{index}/dislike", post(dislike_handler))
        .route("/refund/{name}", post(refund_handler))
        .route("/allprojects", get(all_projects_handler))
        .route("/founder", post(create_founder_handler))
        .route("/founder/{name}", get(founder_handler))
        .route("/investor", post(create_investor_handler))
        .route("/investor/{key}", get(investor_handler))
        .route("/investor/id/{id}", get(investor_by_id_handler))
        .route("/meeting", post(create_meeting_handler))
        .route("/analyze-bills", post(analyze_bills_handler))
        .route("/incrementinv", post(increment_invested_handler))
        .route("/incrementtrips", post(increment_trips_handler))
        .route("/getinvested", get(invested_handler))
        .route("/getsteps", get(steps_count_handler))
        .route("/gettrips", get(trips_handler))
        .route("/green/updateSteps", post(update_steps_handler))
        .route("/green/updateCarbonFootprint", post(update_carbon_handler))
        .route("/green/getSteps", get(steps_handler))
        .route("/green/getCarbonFootprint", get(carbon_handler))
}

pub fn router(state: Arc<State>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(USER_HEADER)])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/", get(health_handler))
        .merge(api())
        .nest("/login", api())
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = State::new().await.inspect_err(|e| error!("{e:#}"))?;

    info!("Starting server...");

    let app = router(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
