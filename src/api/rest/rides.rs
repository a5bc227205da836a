use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post, put};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::booking::RideDetails;
use crate::engine::location::LocationProvider;
use crate::engine::pricing::{price, quote_all, FareQuote};
use crate::error::{AppError, BookingError};
use crate::geo::is_valid;
use crate::models::driver::{GeoPoint, VehicleType};
use crate::models::ride::{RideRequest, RideState};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/fares/quote", post(quote_fares))
        .route("/rider/location", get(get_rider_location).put(update_rider_location))
        .route("/rides", post(request_ride))
        .route("/rides/current", get(current_ride).delete(cancel_ride))
        .route("/rides/:id/driver", put(assign_driver))
        .route("/rides/:id/state", patch(progress_ride))
}

#[derive(Deserialize)]
pub struct QuoteRequest {
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub vehicle_type: Option<VehicleType>,
}

#[derive(Deserialize)]
pub struct CreateRideRequest {
    /// Falls back to the rider's current location.
    pub pickup: Option<GeoPoint>,
    pub pickup_address: String,
    pub dropoff: GeoPoint,
    pub dropoff_address: String,
    #[serde(default)]
    pub vehicle_type: VehicleType,
}

#[derive(Deserialize)]
pub struct AssignDriverRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct ProgressRideRequest {
    pub state: RideState,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

/// A ride plus the derived fields clients render.
#[derive(Serialize)]
pub struct RideView {
    #[serde(flatten)]
    pub ride: RideRequest,
    pub state_text: &'static str,
    pub can_cancel: bool,
    /// Seconds from request to completion; absent until completed.
    pub duration_seconds: Option<i64>,
}

impl From<RideRequest> for RideView {
    fn from(ride: RideRequest) -> Self {
        Self {
            state_text: ride.state.display_text(),
            can_cancel: ride.state.can_cancel(),
            duration_seconds: ride.duration().map(|duration| duration.num_seconds()),
            ride,
        }
    }
}

async fn quote_fares(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<QuoteRequest>,
) -> Result<Json<Vec<FareQuote>>, AppError> {
    if !is_valid(&payload.pickup) || !is_valid(&payload.dropoff) {
        return Err(AppError::BadRequest("location is out of range".to_string()));
    }

    let quotes = quote_all(&state.fares, &payload.pickup, &payload.dropoff)
        .into_iter()
        .filter(|quote| {
            payload
                .vehicle_type
                .is_none_or(|vehicle_type| vehicle_type == quote.vehicle_type)
        })
        .collect();

    Ok(Json(quotes))
}

async fn get_rider_location(State(state): State<Arc<AppState>>) -> Json<Option<GeoPoint>> {
    Json(state.rider_location.current())
}

async fn update_rider_location(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<GeoPoint>, AppError> {
    state.rider_location.update(payload.location)?;
    Ok(Json(payload.location))
}

async fn request_ride(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRideRequest>,
) -> Result<Json<RideView>, AppError> {
    let pickup = payload
        .pickup
        .or_else(|| state.rider_location.current())
        .ok_or_else(|| AppError::BadRequest("pickup location is unknown".to_string()))?;

    let estimated_fare = price(&state.fares, &pickup, &payload.dropoff, payload.vehicle_type);

    let ride = state
        .booking
        .request_ride(RideDetails {
            pickup,
            pickup_address: payload.pickup_address,
            dropoff: payload.dropoff,
            dropoff_address: payload.dropoff_address,
            estimated_fare,
        })
        .await?;

    Ok(Json(ride.into()))
}

async fn current_ride(State(state): State<Arc<AppState>>) -> Json<Option<RideView>> {
    Json(state.booking.current().map(RideView::from))
}

/// No current ride is a no-op; a ride past pickup cannot be cancelled.
async fn cancel_ride(State(state): State<Arc<AppState>>) -> Result<StatusCode, AppError> {
    if let Some(ride) = state.booking.current() {
        if !ride.state.can_cancel() {
            return Err(BookingError::InvalidTransition {
                from: ride.state,
                to: RideState::Cancelled,
            }
            .into());
        }
    }

    state.booking.cancel_ride().await;
    Ok(StatusCode::NO_CONTENT)
}

async fn assign_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignDriverRequest>,
) -> Result<Json<RideView>, AppError> {
    let driver = state
        .fleet
        .driver(payload.driver_id)
        .ok_or_else(|| AppError::NotFound(format!("driver {} not found", payload.driver_id)))?;

    if !state.booking.assign_driver(driver, id) {
        return Err(BookingError::RideNotFound(id).into());
    }

    state
        .booking
        .current()
        .map(|ride| Json(ride.into()))
        .ok_or_else(|| BookingError::RideNotFound(id).into())
}

async fn progress_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProgressRideRequest>,
) -> Result<Json<RideView>, AppError> {
    let ride = state.booking.progress_ride(id, payload.state)?;
    Ok(Json(ride.into()))
}
