use std::sync::Arc;

use crate::config::Config;
use crate::engine::booking::BookingOrchestrator;
use crate::engine::fleet::FleetSimulator;
use crate::engine::location::ManualLocationProvider;
use crate::engine::pricing::FareConfig;
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub fleet: Arc<FleetSimulator>,
    pub booking: Arc<BookingOrchestrator>,
    pub rider_location: ManualLocationProvider,
    pub fares: FareConfig,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let metrics = Metrics::new();
        let fleet = Arc::new(FleetSimulator::new(
            config.simulation.clone(),
            metrics.clone(),
        ));
        Self::with_fleet(config, fleet, metrics)
    }

    /// Wires the booking side around an already built fleet.
    pub fn with_fleet(config: &Config, fleet: Arc<FleetSimulator>, metrics: Metrics) -> Self {
        let booking = Arc::new(BookingOrchestrator::new(
            config.booking.clone(),
            fleet.clone(),
            metrics.clone(),
        ));

        Self {
            fleet,
            booking,
            rider_location: ManualLocationProvider::new(Some(config.simulation.center)),
            fares: config.fares.clone(),
            metrics,
        }
    }
}
