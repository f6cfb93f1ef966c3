use crate::bridge::{PollContext, PollController};
use crate::engine::MeasurementEngine;
use crate::engine::attributes::{CURRENT_VALUE_ATTR, CYCLIC_ATTR};
use axum::Router;
use axum::routing::{get, post, put};
use std::sync::Arc;
use tokio::sync::Mutex;

pub mod handlers;
pub mod responses;

/// Shared handles the HTTP surface works through.
#[derive(Clone)]
pub struct ApiState {
    pub engine: MeasurementEngine,
    pub controller: PollController,
    pub poll: Arc<Mutex<PollContext>>,
}

impl ApiState {
    pub fn new(engine: MeasurementEngine, poll: PollContext) -> Self {
        Self {
            engine,
            controller: poll.controller(),
            poll: Arc::new(Mutex::new(poll)),
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::get_health))
        .route("/api/range", get(handlers::get_range))
        .route("/api/range/last", get(handlers::get_last_range))
        .route(
            "/api/commands",
            get(handlers::get_commands).post(handlers::post_command),
        )
        .route("/api/events", get(handlers::get_events))
        .route("/api/events/activate", put(handlers::put_activate))
        .route("/api/events/delay", put(handlers::put_delay))
        .route("/api/power/suspend", post(handlers::post_suspend))
        .route("/api/power/resume", post(handlers::post_resume))
        .route(
            &format!("/sys/{CURRENT_VALUE_ATTR}"),
            get(handlers::show_current_value).put(handlers::store_current_value),
        )
        .route(
            &format!("/sys/{CYCLIC_ATTR}"),
            get(handlers::show_cyclic).put(handlers::store_cyclic),
        )
        .with_state(state)
}
