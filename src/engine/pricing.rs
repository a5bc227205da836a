use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::geo::distance_m;
use crate::models::driver::{GeoPoint, VehicleType};

const FARE_SCALE: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct FareConfig {
    pub base_fare: Decimal,
    pub per_km_rate: Decimal,
    pub minimum_fare: Decimal,
    pub sedan_multiplier: Decimal,
    pub suv_multiplier: Decimal,
    pub luxury_multiplier: Decimal,
    pub electric_multiplier: Decimal,
}

impl Default for FareConfig {
    fn default() -> Self {
        Self {
            base_fare: Decimal::new(250, 2),
            per_km_rate: Decimal::new(120, 2),
            minimum_fare: Decimal::new(500, 2),
            sedan_multiplier: Decimal::new(10, 1),
            suv_multiplier: Decimal::new(13, 1),
            luxury_multiplier: Decimal::new(18, 1),
            electric_multiplier: Decimal::new(11, 1),
        }
    }
}

impl FareConfig {
    pub fn multiplier(&self, vehicle_type: VehicleType) -> Decimal {
        match vehicle_type {
            VehicleType::Sedan => self.sedan_multiplier,
            VehicleType::Suv => self.suv_multiplier,
            VehicleType::Luxury => self.luxury_multiplier,
            VehicleType::Electric => self.electric_multiplier,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FareQuote {
    pub vehicle_type: VehicleType,
    pub vehicle_name: &'static str,
    pub distance_km: f64,
    pub fare: Decimal,
}

/// Trip price rounded half-up to two decimal places, never below the minimum fare.
pub fn price(
    config: &FareConfig,
    pickup: &GeoPoint,
    dropoff: &GeoPoint,
    vehicle_type: VehicleType,
) -> Decimal {
    let distance_km = Decimal::from_f64(distance_m(pickup, dropoff) / 1000.0).unwrap_or(Decimal::ZERO);

    let fare = (config.base_fare + distance_km * config.per_km_rate) * config.multiplier(vehicle_type);
    let mut fare = fare
        .max(config.minimum_fare)
        .round_dp_with_strategy(FARE_SCALE, RoundingStrategy::MidpointAwayFromZero);
    fare.rescale(FARE_SCALE);
    fare
}

/// Prices the trip for every vehicle type.
pub fn quote_all(config: &FareConfig, pickup: &GeoPoint, dropoff: &GeoPoint) -> Vec<FareQuote> {
    let distance_km = distance_m(pickup, dropoff) / 1000.0;

    VehicleType::ALL
        .iter()
        .map(|vehicle_type| FareQuote {
            vehicle_type: *vehicle_type,
            vehicle_name: vehicle_type.display_name(),
            distance_km,
            fare: price(config, pickup, dropoff, *vehicle_type),
        })
        .collect()
}
