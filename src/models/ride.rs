use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::{Driver, GeoPoint};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RideState {
    Idle,
    Searching,
    Assigned,
    DriverEnRoute,
    Arrived,
    InProgress,
    Completed,
    Cancelled,
}

impl RideState {
    /// States that block a new booking.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RideState::Searching
                | RideState::Assigned
                | RideState::DriverEnRoute
                | RideState::Arrived
                | RideState::InProgress
        )
    }

    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            RideState::Searching | RideState::Assigned | RideState::DriverEnRoute
        )
    }

    /// The single forward step allowed by external progression.
    pub fn next(&self) -> Option<RideState> {
        match self {
            RideState::Assigned => Some(RideState::DriverEnRoute),
            RideState::DriverEnRoute => Some(RideState::Arrived),
            RideState::Arrived => Some(RideState::InProgress),
            RideState::InProgress => Some(RideState::Completed),
            _ => None,
        }
    }

    pub fn display_text(&self) -> &'static str {
        match self {
            RideState::Idle => "Ready to book",
            RideState::Searching => "Searching for drivers...",
            RideState::Assigned => "Driver assigned",
            RideState::DriverEnRoute => "Driver en route",
            RideState::Arrived => "Driver arrived",
            RideState::InProgress => "Ride in progress",
            RideState::Completed => "Ride completed",
            RideState::Cancelled => "Ride cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideRequest {
    pub id: Uuid,
    pub pickup: GeoPoint,
    pub pickup_address: String,
    pub dropoff: GeoPoint,
    pub dropoff_address: String,
    pub state: RideState,
    pub estimated_fare: Decimal,
    /// Snapshot taken at assignment; fleet movement does not update it.
    pub assigned_driver: Option<Driver>,
    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RideRequest {
    pub fn new(
        pickup: GeoPoint,
        pickup_address: impl Into<String>,
        dropoff: GeoPoint,
        dropoff_address: impl Into<String>,
        estimated_fare: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            pickup,
            pickup_address: pickup_address.into(),
            dropoff,
            dropoff_address: dropoff_address.into(),
            state: RideState::Searching,
            estimated_fare,
            assigned_driver: None,
            requested_at: Utc::now(),
            accepted_at: None,
            completed_at: None,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.completed_at
            .map(|completed_at| completed_at - self.requested_at)
    }
}
