use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::models::driver::{Driver, DriverStatus};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub ride_requests_total: IntCounterVec,
    pub booking_latency_seconds: HistogramVec,
    pub fleet_ticks_total: IntCounter,
    pub drivers_by_status: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let ride_requests_total = IntCounterVec::new(
            Opts::new("ride_requests_total", "Total ride requests by outcome"),
            &["outcome"],
        )
        .expect("valid ride_requests_total metric");

        let booking_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "booking_latency_seconds",
                "Time from ride request to final booking outcome in seconds",
            ),
            &["outcome"],
        )
        .expect("valid booking_latency_seconds metric");

        let fleet_ticks_total = IntCounter::new("fleet_ticks_total", "Fleet movement ticks run")
            .expect("valid fleet_ticks_total metric");

        let drivers_by_status = IntGaugeVec::new(
            Opts::new("drivers_by_status", "Current number of drivers per status"),
            &["status"],
        )
        .expect("valid drivers_by_status metric");

        registry
            .register(Box::new(ride_requests_total.clone()))
            .expect("register ride_requests_total");
        registry
            .register(Box::new(booking_latency_seconds.clone()))
            .expect("register booking_latency_seconds");
        registry
            .register(Box::new(fleet_ticks_total.clone()))
            .expect("register fleet_ticks_total");
        registry
            .register(Box::new(drivers_by_status.clone()))
            .expect("register drivers_by_status");

        Self {
            registry,
            ride_requests_total,
            booking_latency_seconds,
            fleet_ticks_total,
            drivers_by_status,
        }
    }

    pub fn record_fleet(&self, drivers: &[Driver]) {
        for status in DriverStatus::ALL {
            let count = drivers.iter().filter(|driver| driver.status == status).count();
            self.drivers_by_status
                .with_label_values(&[status.as_str()])
                .set(count as i64);
        }
    }

    pub fn record_booking(&self, outcome: &str, elapsed_secs: f64) {
        self.ride_requests_total.with_label_values(&[outcome]).inc();
        self.booking_latency_seconds
            .with_label_values(&[outcome])
            .observe(elapsed_secs);
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
