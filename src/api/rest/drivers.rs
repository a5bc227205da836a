use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::is_valid;
use crate::models::driver::{Driver, DriverStatus, GeoPoint, VehicleType};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", get(list_drivers).post(create_driver))
        .route("/drivers/nearest", get(nearest_driver))
        .route("/drivers/:id", get(get_driver).delete(remove_driver))
        .route("/drivers/:id/status", patch(update_driver_status))
}

#[derive(Deserialize)]
pub struct CreateDriverRequest {
    pub name: String,
    pub location: GeoPoint,
    #[serde(default)]
    pub vehicle_type: VehicleType,
    pub rating: Option<f64>,
    pub status: Option<DriverStatus>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DriverStatus,
}

#[derive(Deserialize)]
pub struct NearestQuery {
    pub lat: f64,
    pub lng: f64,
}

async fn create_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDriverRequest>,
) -> Result<Json<Driver>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    if !is_valid(&payload.location) {
        return Err(AppError::BadRequest("location is out of range".to_string()));
    }

    let mut driver = Driver::new(payload.name, payload.location, payload.vehicle_type)
        .with_status(payload.status.unwrap_or(DriverStatus::Available));
    if let Some(rating) = payload.rating {
        driver.rating = rating.clamp(0.0, 5.0);
    }

    state.fleet.add_driver(driver.clone());
    Ok(Json(driver))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<Driver>> {
    Json(state.fleet.snapshot())
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    state
        .fleet
        .driver(id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("driver {} not found", id)))
}

async fn remove_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.fleet.remove_driver(id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("driver {} not found", id)))
    }
}

async fn update_driver_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Driver>, AppError> {
    if !state.fleet.set_status(id, payload.status) {
        return Err(AppError::NotFound(format!("driver {} not found", id)));
    }

    state
        .fleet
        .driver(id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("driver {} not found", id)))
}

async fn nearest_driver(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NearestQuery>,
) -> Result<Json<Driver>, AppError> {
    let to = GeoPoint::new(query.lat, query.lng);
    if !is_valid(&to) {
        return Err(AppError::BadRequest("location is out of range".to_string()));
    }

    state
        .fleet
        .nearest_available(&to)
        .map(Json)
        .ok_or_else(|| AppError::NotFound("no available drivers".to_string()))
}
