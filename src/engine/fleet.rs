use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SimulationConfig;
use crate::geo::{destination, distance_m, normalize_bearing, random_point};
use crate::models::driver::{Driver, DriverStatus, GeoPoint, VehicleType};
use crate::observability::metrics::Metrics;

pub const DRIVER_NAMES: [&str; 10] = [
    "James Wilson",
    "Sarah Thompson",
    "Michael Brown",
    "Emma Davies",
    "David Evans",
    "Sophie Williams",
    "Robert Jones",
    "Emily Taylor",
    "Daniel Smith",
    "Oliver Jackson",
];

/// Owns every driver record and moves the available ones on a fixed tick.
///
/// The fleet lives inside a `watch` channel: each mutation happens under the
/// channel's write lock and publishes the whole snapshot in the same step, so
/// subscribers never observe a half-applied tick.
pub struct FleetSimulator {
    config: SimulationConfig,
    drivers_tx: watch::Sender<Vec<Driver>>,
    headings: DashMap<Uuid, f64>,
    rng: Mutex<StdRng>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    metrics: Metrics,
}

impl FleetSimulator {
    /// Builds the simulator with a freshly spawned fleet of `driver_count` drivers.
    pub fn new(config: SimulationConfig, metrics: Metrics) -> Self {
        let fleet = Self::empty(config, metrics);
        {
            let mut rng = lock(&fleet.rng);
            let drivers: Vec<Driver> = (0..fleet.config.driver_count)
                .map(|index| spawn_driver(&mut *rng, &fleet.config, index))
                .collect();
            for driver in &drivers {
                fleet.headings.insert(driver.id, rng.gen_range(0.0..360.0));
            }
            fleet.drivers_tx.send_modify(|current| {
                *current = drivers;
                fleet.metrics.record_fleet(current);
            });
        }
        info!(drivers = fleet.config.driver_count, "fleet spawned");
        fleet
    }

    /// Builds the simulator with no drivers.
    pub fn empty(config: SimulationConfig, metrics: Metrics) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (drivers_tx, _initial_rx) = watch::channel(Vec::new());

        Self {
            config,
            drivers_tx,
            headings: DashMap::new(),
            rng: Mutex::new(rng),
            ticker: Mutex::new(None),
            metrics,
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Starts the periodic tick, replacing any ticker already running.
    pub fn start(self: &Arc<Self>) {
        let mut ticker = lock(&self.ticker);
        if let Some(previous) = ticker.take() {
            previous.abort();
        }

        let fleet = Arc::downgrade(self);
        let period = self.config.tick_interval;
        *ticker = Some(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(fleet) = fleet.upgrade() else {
                    break;
                };
                fleet.tick();
            }
        }));

        info!(interval_ms = period.as_millis() as u64, "fleet simulation started");
    }

    /// Stops the periodic tick. Ticks run synchronously between awaits, so
    /// aborting never interrupts a tick half way through.
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.ticker).take() {
            handle.abort();
            info!("fleet simulation stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.ticker)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn snapshot(&self) -> Vec<Driver> {
        self.drivers_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Driver>> {
        self.drivers_tx.subscribe()
    }

    /// Fleet feed; the current snapshot is yielded first.
    pub fn changes(&self) -> WatchStream<Vec<Driver>> {
        WatchStream::new(self.subscribe())
    }

    pub fn driver(&self, id: Uuid) -> Option<Driver> {
        self.drivers_tx
            .borrow()
            .iter()
            .find(|driver| driver.id == id)
            .cloned()
    }

    pub fn add_driver(&self, driver: Driver) {
        let heading = lock(&self.rng).gen_range(0.0..360.0);
        self.headings.insert(driver.id, heading);

        let driver_id = driver.id;
        self.drivers_tx.send_modify(|drivers| {
            drivers.push(driver);
            self.metrics.record_fleet(drivers);
        });
        debug!(driver_id = %driver_id, "driver added");
    }

    /// Returns false when no driver has `id`.
    pub fn remove_driver(&self, id: Uuid) -> bool {
        let removed = self.drivers_tx.send_if_modified(|drivers| {
            let before = drivers.len();
            drivers.retain(|driver| driver.id != id);
            let removed = drivers.len() != before;
            if removed {
                self.metrics.record_fleet(drivers);
            }
            removed
        });
        self.headings.remove(&id);
        removed
    }

    /// Returns false when no driver has `id`.
    pub fn set_status(&self, id: Uuid, status: DriverStatus) -> bool {
        let updated = self.drivers_tx.send_if_modified(|drivers| {
            let Some(driver) = drivers.iter_mut().find(|driver| driver.id == id) else {
                return false;
            };
            driver.status = status;
            driver.updated_at = Utc::now();
            self.metrics.record_fleet(drivers);
            true
        });

        if updated {
            debug!(driver_id = %id, status = status.as_str(), "driver status changed");
        }
        updated
    }

    /// Closest available driver; the first one scanned wins on exact ties.
    pub fn nearest_available(&self, to: &GeoPoint) -> Option<Driver> {
        self.drivers_tx
            .borrow()
            .iter()
            .filter(|driver| driver.status == DriverStatus::Available)
            .map(|driver| (distance_m(&driver.location, to), driver))
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, driver)| driver.clone())
    }

    /// Advances every available driver one step and publishes once.
    pub fn tick(&self) {
        let step_m = self.config.step_distance_m();
        let mut rng = lock(&self.rng);
        let mut moved = 0usize;

        self.drivers_tx.send_modify(|drivers| {
            let now = Utc::now();
            for driver in drivers
                .iter_mut()
                .filter(|driver| driver.status == DriverStatus::Available)
            {
                self.advance(&mut *rng, driver, step_m);
                driver.updated_at = now;
                moved += 1;
            }
        });

        self.metrics.fleet_ticks_total.inc();
        debug!(moved, "fleet tick");
    }

    fn advance<R: Rng + ?Sized>(&self, rng: &mut R, driver: &mut Driver, step_m: f64) {
        let mut heading = self
            .headings
            .get(&driver.id)
            .map(|heading| *heading)
            .unwrap_or_else(|| rng.gen_range(0.0..360.0));

        let swing = self.config.max_heading_change_deg.abs();
        if swing.is_finite() && rng.gen_bool(chance(self.config.direction_change_probability)) {
            heading = normalize_bearing(heading + rng.gen_range(-swing..=swing));
        }

        let next = destination(&driver.location, step_m, heading);

        // The move still happens; the driver turns back on the following tick.
        if distance_m(&self.config.center, &next) > self.config.spawn_radius_m {
            heading = normalize_bearing(heading + 180.0);
        }

        driver.location = next;
        self.headings.insert(driver.id, heading);
    }
}

impl Drop for FleetSimulator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// `gen_bool` panics outside [0, 1].
fn chance(probability: f64) -> f64 {
    if probability.is_nan() { 0.0 } else { probability.clamp(0.0, 1.0) }
}

fn spawn_driver<R: Rng + ?Sized>(rng: &mut R, config: &SimulationConfig, index: usize) -> Driver {
    let mut id_bytes = [0u8; 16];
    rng.fill(&mut id_bytes);

    let name = DRIVER_NAMES
        .choose(rng)
        .map(|name| name.to_string())
        .unwrap_or_else(|| format!("Driver {}", index + 1));
    let vehicle_type = VehicleType::ALL
        .choose(rng)
        .copied()
        .unwrap_or_default();
    let status = if rng.gen_bool(chance(config.busy_probability)) {
        DriverStatus::Busy
    } else {
        DriverStatus::Available
    };

    Driver {
        id: uuid::Builder::from_random_bytes(id_bytes).into_uuid(),
        name,
        location: random_point(rng, &config.center, config.spawn_radius_m),
        status,
        vehicle_type,
        rating: rng.gen_range(4.0..=5.0),
        eta_seconds: None,
        updated_at: Utc::now(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_stream::StreamExt;

    use super::{DRIVER_NAMES, FleetSimulator};
    use crate::config::SimulationConfig;
    use crate::geo::{destination, distance_m};
    use crate::models::driver::{Driver, DriverStatus, GeoPoint, VehicleType};
    use crate::observability::metrics::Metrics;

    fn config() -> SimulationConfig {
        SimulationConfig {
            direction_change_probability: 0.0,
            seed: Some(42),
            ..SimulationConfig::default()
        }
    }

    fn driver_at(location: GeoPoint, status: DriverStatus) -> Driver {
        Driver::new("test-driver", location, VehicleType::Sedan).with_status(status)
    }

    #[test]
    fn spawned_fleet_respects_configuration() {
        let config = SimulationConfig {
            driver_count: 50,
            ..config()
        };
        let center = config.center;
        let radius = config.spawn_radius_m;
        let fleet = FleetSimulator::new(config, Metrics::new());
        let drivers = fleet.snapshot();

        assert_eq!(drivers.len(), 50);
        for driver in &drivers {
            assert!(distance_m(&center, &driver.location) <= radius);
            assert!((4.0..=5.0).contains(&driver.rating));
            assert!(DRIVER_NAMES.contains(&driver.name.as_str()));
            assert_ne!(driver.status, DriverStatus::Offline);
            assert!(driver.eta_seconds.is_none());
        }
    }

    #[test]
    fn nearest_available_skips_busy_and_offline_drivers() {
        let fleet = FleetSimulator::empty(config(), Metrics::new());
        let pickup = fleet.config().center;

        let busy = driver_at(destination(&pickup, 10.0, 0.0), DriverStatus::Busy);
        let offline = driver_at(destination(&pickup, 20.0, 0.0), DriverStatus::Offline);
        let available = driver_at(destination(&pickup, 900.0, 90.0), DriverStatus::Available);
        let farther = driver_at(destination(&pickup, 1_500.0, 180.0), DriverStatus::Available);
        let available_id = available.id;

        for driver in [busy, offline, available, farther] {
            fleet.add_driver(driver);
        }

        let nearest = fleet.nearest_available(&pickup).expect("an available driver");
        assert_eq!(nearest.id, available_id);
        assert_eq!(nearest.status, DriverStatus::Available);
    }

    #[test]
    fn nearest_available_is_none_without_available_drivers() {
        let fleet = FleetSimulator::empty(config(), Metrics::new());
        let center = fleet.config().center;
        assert!(fleet.nearest_available(&center).is_none());

        fleet.add_driver(driver_at(center, DriverStatus::Busy));
        fleet.add_driver(driver_at(center, DriverStatus::Offline));
        assert!(fleet.nearest_available(&center).is_none());
    }

    #[test]
    fn tick_moves_only_available_drivers() {
        let fleet = FleetSimulator::empty(config(), Metrics::new());
        let center = fleet.config().center;
        let step = fleet.config().step_distance_m();

        let moving = driver_at(center, DriverStatus::Available);
        let parked = driver_at(center, DriverStatus::Busy);
        let (moving_id, parked_id) = (moving.id, parked.id);
        fleet.add_driver(moving);
        fleet.add_driver(parked);

        fleet.tick();

        let moved = fleet.driver(moving_id).expect("moving driver");
        let still = fleet.driver(parked_id).expect("parked driver");
        assert!((distance_m(&center, &moved.location) - step).abs() < 1e-6);
        assert_eq!(still.location, center);
    }

    #[test]
    fn driver_past_radius_moves_out_once_then_turns_back() {
        let fleet = FleetSimulator::empty(config(), Metrics::new());
        let center = fleet.config().center;
        let radius = fleet.config().spawn_radius_m;

        let edge = driver_at(destination(&center, radius - 5.0, 0.0), DriverStatus::Available);
        let id = edge.id;
        fleet.add_driver(edge);
        fleet.headings.insert(id, 0.0);

        fleet.tick();
        let outside = distance_m(&center, &fleet.driver(id).expect("driver").location);
        assert!(outside > radius);
        let heading = *fleet.headings.get(&id).expect("heading");
        assert!((heading - 180.0).abs() < 1e-9);

        fleet.tick();
        let back = distance_m(&center, &fleet.driver(id).expect("driver").location);
        assert!(back < outside);
    }

    fn assert_turns_stay_within_swing(start_heading: f64) {
        let config = SimulationConfig {
            direction_change_probability: 1.0,
            ..config()
        };
        let swing = config.max_heading_change_deg;
        let fleet = FleetSimulator::empty(config, Metrics::new());
        let driver = driver_at(fleet.config().center, DriverStatus::Available);
        let id = driver.id;
        fleet.add_driver(driver);
        fleet.headings.insert(id, start_heading);

        let mut previous = start_heading;
        let mut turned = false;
        for _ in 0..50 {
            fleet.tick();
            let heading = *fleet.headings.get(&id).expect("heading");
            assert!((0.0..360.0).contains(&heading), "heading {heading} out of range");

            let delta = (heading - previous).rem_euclid(360.0);
            let turn = delta.min(360.0 - delta);
            assert!(turn <= swing + 1e-9, "turned {turn} from {previous} to {heading}");
            turned |= turn > 1e-9;
            previous = heading;
        }
        assert!(turned);
    }

    #[test]
    fn heading_changes_stay_within_max_swing() {
        assert_turns_stay_within_swing(10.0);
    }

    #[test]
    fn heading_changes_wrap_around_north() {
        assert_turns_stay_within_swing(2.0);
    }

    #[test]
    fn unusable_simulation_values_do_not_panic() {
        let config = SimulationConfig {
            driver_count: 5,
            spawn_radius_m: f64::INFINITY,
            max_heading_change_deg: f64::INFINITY,
            direction_change_probability: f64::NAN,
            busy_probability: 2.0,
            ..config()
        };
        let center = config.center;
        let fleet = FleetSimulator::new(config, Metrics::new());

        for driver in fleet.snapshot() {
            assert_eq!(driver.location, center);
            assert_eq!(driver.status, DriverStatus::Busy);
        }

        let driver = driver_at(center, DriverStatus::Available);
        let id = driver.id;
        fleet.add_driver(driver);
        fleet.headings.insert(id, 90.0);
        fleet.tick();

        let heading = *fleet.headings.get(&id).expect("heading");
        assert_eq!(heading, 90.0);
        assert_ne!(fleet.driver(id).expect("driver").location, center);
    }

    #[test]
    fn mutations_publish_snapshots() {
        let fleet = FleetSimulator::empty(config(), Metrics::new());
        let mut rx = fleet.subscribe();
        rx.borrow_and_update();

        let driver = driver_at(fleet.config().center, DriverStatus::Available);
        let id = driver.id;
        fleet.add_driver(driver);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 1);

        assert!(fleet.set_status(id, DriverStatus::Offline));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update()[0].status, DriverStatus::Offline);

        assert!(fleet.remove_driver(id));
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_empty());
    }

    #[test]
    fn unknown_ids_are_silent_no_ops() {
        let fleet = FleetSimulator::empty(config(), Metrics::new());
        let mut rx = fleet.subscribe();
        rx.borrow_and_update();

        let ghost = uuid::Uuid::new_v4();
        assert!(!fleet.set_status(ghost, DriverStatus::Busy));
        assert!(!fleet.remove_driver(ghost));
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn new_subscriber_receives_current_snapshot_first() {
        let fleet = FleetSimulator::empty(config(), Metrics::new());
        fleet.add_driver(driver_at(fleet.config().center, DriverStatus::Available));

        let mut changes = fleet.changes();
        let first = changes.next().await.expect("current snapshot");
        assert_eq!(first.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_does_not_duplicate_the_ticker() {
        let metrics = Metrics::new();
        let fleet = Arc::new(FleetSimulator::empty(config(), metrics.clone()));
        let period = fleet.config().tick_interval;

        fleet.start();
        fleet.start();
        assert!(fleet.is_running());

        tokio::time::sleep(period * 3 + period / 2).await;
        assert_eq!(metrics.fleet_ticks_total.get(), 3);

        fleet.stop();
        fleet.stop();
        assert!(!fleet.is_running());

        tokio::time::sleep(period * 4).await;
        assert_eq!(metrics.fleet_ticks_total.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn running_fleet_publishes_every_tick() {
        let fleet = Arc::new(FleetSimulator::empty(config(), Metrics::new()));
        fleet.add_driver(driver_at(fleet.config().center, DriverStatus::Available));
        let mut rx = fleet.subscribe();
        rx.borrow_and_update();

        fleet.start();
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("tick within two seconds")
            .expect("sender alive");
        fleet.stop();
    }
}
