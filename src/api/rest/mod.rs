pub mod drivers;
pub mod rides;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::services::ServeDir;

use crate::models::driver::DriverStatus;
use crate::models::ride::RideState;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(drivers::router())
        .merge(rides::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/simulation/start", post(start_simulation))
        .route("/simulation/stop", post(stop_simulation))
        .route("/ws/fleet", get(ws::fleet_feed))
        .route("/ws/rides", get(ws::ride_feed))
        .route("/ws/rider", get(ws::rider_feed))
        .with_state(state)
        .fallback_service(ServeDir::new("static"))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    simulation_running: bool,
    drivers: usize,
    available_drivers: usize,
    ride_state: RideState,
    ride_state_text: &'static str,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let drivers = state.fleet.snapshot();
    let available_drivers = drivers
        .iter()
        .filter(|driver| driver.status == DriverStatus::Available)
        .count();
    let ride_state = state
        .booking
        .current()
        .map_or(RideState::Idle, |ride| ride.state);

    Json(HealthResponse {
        status: "ok",
        simulation_running: state.fleet.is_running(),
        drivers: drivers.len(),
        available_drivers,
        ride_state,
        ride_state_text: ride_state.display_text(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}

async fn start_simulation(State(state): State<Arc<AppState>>) -> StatusCode {
    state.fleet.start();
    StatusCode::NO_CONTENT
}

async fn stop_simulation(State(state): State<Arc<AppState>>) -> StatusCode {
    state.fleet.stop();
    StatusCode::NO_CONTENT
}
