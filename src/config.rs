use std::env;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::engine::pricing::FareConfig;
use crate::error::AppError;
use crate::models::driver::GeoPoint;

pub const DEFAULT_CENTER: GeoPoint = GeoPoint::new(51.4816, -3.1791);

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub simulation: SimulationConfig,
    pub booking: BookingConfig,
    pub fares: FareConfig,
}

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Reference point for spawning and for the confinement radius.
    pub center: GeoPoint,
    pub tick_interval: Duration,
    pub driver_speed_mps: f64,
    pub spawn_radius_m: f64,
    pub direction_change_probability: f64,
    pub max_heading_change_deg: f64,
    pub driver_count: usize,
    pub busy_probability: f64,
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            center: DEFAULT_CENTER,
            tick_interval: Duration::from_millis(1_500),
            driver_speed_mps: 15.0,
            spawn_radius_m: 3_000.0,
            direction_change_probability: 0.10,
            max_heading_change_deg: 45.0,
            driver_count: 8,
            busy_probability: 0.30,
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Rejects values the simulator cannot run with: a zero tick, a center
    /// off the map, and negative or non-finite distances, speeds and angles.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.tick_interval.is_zero() {
            return Err(AppError::Internal(
                "invalid SIM_TICK_INTERVAL_SECS: must be > 0".to_string(),
            ));
        }
        if !crate::geo::is_valid(&self.center) {
            return Err(AppError::Internal(
                "invalid SIM_CENTER_LAT/SIM_CENTER_LNG: out of range".to_string(),
            ));
        }

        let magnitudes = [
            ("SIM_DRIVER_SPEED_MPS", self.driver_speed_mps),
            ("SIM_SPAWN_RADIUS_M", self.spawn_radius_m),
            ("SIM_MAX_HEADING_CHANGE_DEG", self.max_heading_change_deg),
        ];
        for (key, value) in magnitudes {
            if !value.is_finite() || value < 0.0 {
                return Err(AppError::Internal(format!(
                    "invalid {key}: {value} must be finite and >= 0"
                )));
            }
        }

        for (key, value) in [
            ("SIM_DIRECTION_CHANGE_PROBABILITY", self.direction_change_probability),
            ("SIM_BUSY_PROBABILITY", self.busy_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(AppError::Internal(format!(
                    "invalid {key}: {value} is not a probability"
                )));
            }
        }

        Ok(())
    }

    /// Distance covered by an available driver in one tick.
    pub fn step_distance_m(&self) -> f64 {
        self.driver_speed_mps * self.tick_interval.as_secs_f64()
    }
}

#[derive(Debug, Clone)]
pub struct BookingConfig {
    pub search_window: Duration,
    pub assignment_delay: Duration,
    pub cancel_grace: Duration,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            search_window: Duration::from_secs(3),
            assignment_delay: Duration::from_secs(2),
            cancel_grace: Duration::from_millis(500),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let sim_defaults = SimulationConfig::default();
        let booking_defaults = BookingConfig::default();
        let fare_defaults = FareConfig::default();

        let simulation = SimulationConfig {
            center: GeoPoint::new(
                parse_or_default("SIM_CENTER_LAT", sim_defaults.center.lat)?,
                parse_or_default("SIM_CENTER_LNG", sim_defaults.center.lng)?,
            ),
            tick_interval: secs_or_default("SIM_TICK_INTERVAL_SECS", sim_defaults.tick_interval)?,
            driver_speed_mps: parse_or_default("SIM_DRIVER_SPEED_MPS", sim_defaults.driver_speed_mps)?,
            spawn_radius_m: parse_or_default("SIM_SPAWN_RADIUS_M", sim_defaults.spawn_radius_m)?,
            direction_change_probability: probability_or_default(
                "SIM_DIRECTION_CHANGE_PROBABILITY",
                sim_defaults.direction_change_probability,
            )?,
            max_heading_change_deg: parse_or_default(
                "SIM_MAX_HEADING_CHANGE_DEG",
                sim_defaults.max_heading_change_deg,
            )?,
            driver_count: parse_or_default("SIM_DRIVER_COUNT", sim_defaults.driver_count)?,
            busy_probability: probability_or_default(
                "SIM_BUSY_PROBABILITY",
                sim_defaults.busy_probability,
            )?,
            seed: parse_optional("SIM_SEED")?,
        };

        simulation.validate()?;

        let booking = BookingConfig {
            search_window: secs_or_default(
                "BOOKING_SEARCH_WINDOW_SECS",
                booking_defaults.search_window,
            )?,
            assignment_delay: secs_or_default(
                "BOOKING_ASSIGNMENT_DELAY_SECS",
                booking_defaults.assignment_delay,
            )?,
            cancel_grace: secs_or_default("BOOKING_CANCEL_GRACE_SECS", booking_defaults.cancel_grace)?,
        };

        let fares = FareConfig {
            base_fare: parse_or_default::<Decimal>("FARE_BASE", fare_defaults.base_fare)?,
            per_km_rate: parse_or_default::<Decimal>("FARE_PER_KM", fare_defaults.per_km_rate)?,
            minimum_fare: parse_or_default::<Decimal>("FARE_MINIMUM", fare_defaults.minimum_fare)?,
            sedan_multiplier: parse_or_default("FARE_MULTIPLIER_SEDAN", fare_defaults.sedan_multiplier)?,
            suv_multiplier: parse_or_default("FARE_MULTIPLIER_SUV", fare_defaults.suv_multiplier)?,
            luxury_multiplier: parse_or_default(
                "FARE_MULTIPLIER_LUXURY",
                fare_defaults.luxury_multiplier,
            )?,
            electric_multiplier: parse_or_default(
                "FARE_MULTIPLIER_ELECTRIC",
                fare_defaults.electric_multiplier,
            )?,
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            simulation,
            booking,
            fares,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_optional(key)?.unwrap_or(default))
}

fn parse_optional<T>(key: &str) -> Result<Option<T>, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(None),
    }
}

fn secs_or_default(key: &str, default: Duration) -> Result<Duration, AppError> {
    match parse_optional::<f64>(key)? {
        Some(secs) => Duration::try_from_secs_f64(secs)
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        None => Ok(default),
    }
}

fn probability_or_default(key: &str, default: f64) -> Result<f64, AppError> {
    let value = parse_or_default(key, default)?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(AppError::Internal(format!(
            "invalid {key}: {value} is not a probability"
        )))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            simulation: SimulationConfig::default(),
            booking: BookingConfig::default(),
            fares: FareConfig::default(),
        }
    }
}
