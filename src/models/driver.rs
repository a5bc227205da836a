use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DriverStatus {
    Available,
    Busy,
    Offline,
}

impl DriverStatus {
    pub const ALL: [DriverStatus; 3] = [
        DriverStatus::Available,
        DriverStatus::Busy,
        DriverStatus::Offline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DriverStatus::Available => "available",
            DriverStatus::Busy => "busy",
            DriverStatus::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    #[default]
    Sedan,
    Suv,
    Luxury,
    Electric,
}

impl VehicleType {
    pub const ALL: [VehicleType; 4] = [
        VehicleType::Sedan,
        VehicleType::Suv,
        VehicleType::Luxury,
        VehicleType::Electric,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            VehicleType::Sedan => "Sedan",
            VehicleType::Suv => "SUV",
            VehicleType::Luxury => "Luxury",
            VehicleType::Electric => "Electric",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub location: GeoPoint,
    pub status: DriverStatus,
    pub vehicle_type: VehicleType,
    pub rating: f64,
    /// Seconds until pickup; only set on the copy attached to a ride.
    pub eta_seconds: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    pub fn new(name: impl Into<String>, location: GeoPoint, vehicle_type: VehicleType) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            location,
            status: DriverStatus::Available,
            vehicle_type,
            rating: 4.5,
            eta_seconds: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: DriverStatus) -> Self {
        self.status = status;
        self
    }
}
