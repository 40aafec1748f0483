//! fairq-api — REST API for the fairq controller.
//!
//! Provides axum route handlers for job submission and lifecycle, the
//! per-factor priority report consumed by the `fairq prio` CLI, and the
//! reconfig trigger.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/priority/factors` | Per-factor breakdown of pending jobs |
//! | POST | `/api/v1/jobs` | Submit a job (priority assigned on the way in) |
//! | GET | `/api/v1/jobs` | List all jobs |
//! | GET | `/api/v1/jobs/{id}` | Get one job |
//! | POST | `/api/v1/jobs/{id}/hold` | User-hold a job (priority 0) |
//! | POST | `/api/v1/jobs/{id}/release` | Release a hold and reprice |
//! | POST | `/api/v1/jobs/{id}/priority` | Admin override (disables repricing) |
//! | POST | `/api/v1/reconfig` | Flag the decay loop to re-read tuning |
//! | GET | `/api/v1/associations` | Share tree with usage |

pub mod handlers;

use std::sync::Arc;
use std::sync::atomic::AtomicU32;

use axum::Router;
use axum::routing::{get, post};
use tokio::sync::RwLock;

use fairq_assoc::AssocStore;
use fairq_facade::PriorityPlugin;
use fairq_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub plugin: Arc<PriorityPlugin>,
    pub store: StateStore,
    pub assoc: Arc<RwLock<AssocStore>>,
    /// Most recent priority handed out, fed back into the decrement
    /// backend.
    pub last_prio: Arc<AtomicU32>,
}

/// Build the complete API router.
pub fn build_router(
    plugin: Arc<PriorityPlugin>,
    store: StateStore,
    assoc: Arc<RwLock<AssocStore>>,
) -> Router {
    let state = ApiState {
        plugin,
        store,
        assoc,
        last_prio: Arc::new(AtomicU32::new(u32::MAX / 2)),
    };

    let api_routes = Router::new()
        .route("/priority/factors", get(handlers::priority_factors))
        .route("/jobs", get(handlers::list_jobs).post(handlers::submit_job))
        .route("/jobs/{id}", get(handlers::get_job))
        .route("/jobs/{id}/hold", post(handlers::hold_job))
        .route("/jobs/{id}/release", post(handlers::release_job))
        .route("/jobs/{id}/priority", post(handlers::override_priority))
        .route("/reconfig", post(handlers::reconfig))
        .route("/associations", get(handlers::list_associations))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
