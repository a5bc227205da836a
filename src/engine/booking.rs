use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::BookingConfig;
use crate::engine::fleet::FleetSimulator;
use crate::error::BookingError;
use crate::geo::{distance_m, is_valid};
use crate::models::driver::{Driver, DriverStatus, GeoPoint};
use crate::models::ride::{RideRequest, RideState};
use crate::observability::metrics::Metrics;

/// Owns the current ride and runs the search/assign protocol against the fleet.
///
/// Every write to the current ride happens inside the ride channel's write
/// lock. Commands that take over the ride (cancel, override, progression, a new
/// request) bump `generation`; an in-flight request re-reads it under the same
/// lock after each wait and gives up with [`BookingError::Superseded`] if it
/// changed.
pub struct BookingOrchestrator {
    config: BookingConfig,
    fleet: Arc<FleetSimulator>,
    ride_tx: watch::Sender<Option<RideRequest>>,
    generation: AtomicU64,
    metrics: Metrics,
}

pub struct RideDetails {
    pub pickup: GeoPoint,
    pub pickup_address: String,
    pub dropoff: GeoPoint,
    pub dropoff_address: String,
    pub estimated_fare: Decimal,
}

impl BookingOrchestrator {
    pub fn new(config: BookingConfig, fleet: Arc<FleetSimulator>, metrics: Metrics) -> Self {
        let (ride_tx, _initial_rx) = watch::channel(None);

        Self {
            config,
            fleet,
            ride_tx,
            generation: AtomicU64::new(0),
            metrics,
        }
    }

    pub fn current(&self) -> Option<RideRequest> {
        self.ride_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<RideRequest>> {
        self.ride_tx.subscribe()
    }

    /// Ride feed; the current ride (or `None`) is yielded first.
    pub fn changes(&self) -> WatchStream<Option<RideRequest>> {
        WatchStream::new(self.subscribe())
    }

    /// Books a ride, resolving once a driver is assigned or the booking fails.
    pub async fn request_ride(&self, details: RideDetails) -> Result<RideRequest, BookingError> {
        let started = Instant::now();
        let result = self.run_booking(details).await;

        let outcome = match &result {
            Ok(_) => "assigned",
            Err(BookingError::BookingInProgress) => "in_progress",
            Err(BookingError::InvalidLocation) => "invalid_location",
            Err(BookingError::NoDriversAvailable) => "no_drivers",
            Err(_) => "superseded",
        };
        self.metrics
            .record_booking(outcome, started.elapsed().as_secs_f64());

        result
    }

    async fn run_booking(&self, details: RideDetails) -> Result<RideRequest, BookingError> {
        let ride = RideRequest::new(
            details.pickup,
            details.pickup_address,
            details.dropoff,
            details.dropoff_address,
            details.estimated_fare,
        );
        let ride_id = ride.id;
        let pickup = ride.pickup;
        let generation = self.open(ride)?;

        info!(ride_id = %ride_id, "ride requested; searching for drivers");
        sleep(self.config.search_window).await;

        if !self.is_current(generation) {
            warn!(ride_id = %ride_id, "booking superseded during search");
            return Err(BookingError::Superseded);
        }

        let Some(candidate) = self.fleet.nearest_available(&pickup) else {
            self.commit(generation, |ride| ride.state = RideState::Cancelled)?;
            warn!(ride_id = %ride_id, "no drivers available");
            return Err(BookingError::NoDriversAvailable);
        };

        sleep(self.config.assignment_delay).await;

        let speed = self.fleet.config().driver_speed_mps;
        let assigned = self.commit(generation, |ride| {
            let mut driver = candidate;
            let distance = distance_m(&pickup, &driver.location);
            driver.eta_seconds = (speed > 0.0).then(|| distance / speed);
            driver.status = DriverStatus::Busy;
            self.fleet.set_status(driver.id, DriverStatus::Busy);

            ride.assigned_driver = Some(driver);
            ride.state = RideState::Assigned;
            ride.accepted_at = Some(Utc::now());
        });

        match &assigned {
            Ok(ride) => info!(
                ride_id = %ride.id,
                driver_id = ?ride.assigned_driver.as_ref().map(|driver| driver.id),
                "driver assigned"
            ),
            Err(_) => warn!(ride_id = %ride_id, "booking superseded during assignment"),
        }
        assigned
    }

    /// Marks the current ride cancelled, releases its driver and clears it
    /// after the grace period.
    pub async fn cancel_ride(&self) {
        let mut cancelled = None;
        self.ride_tx.send_if_modified(|current| {
            let Some(ride) = current.as_mut() else {
                return false;
            };
            self.generation.fetch_add(1, Ordering::SeqCst);
            if let Some(driver) = &ride.assigned_driver {
                self.fleet.set_status(driver.id, DriverStatus::Available);
            }
            ride.state = RideState::Cancelled;
            cancelled = Some(ride.id);
            true
        });

        let Some(ride_id) = cancelled else {
            return;
        };
        info!(ride_id = %ride_id, "ride cancelled");

        sleep(self.config.cancel_grace).await;

        // A ride booked during the grace period is left alone.
        self.ride_tx.send_if_modified(|current| {
            let stale = current
                .as_ref()
                .is_some_and(|ride| ride.id == ride_id && ride.state == RideState::Cancelled);
            if stale {
                *current = None;
            }
            stale
        });
    }

    /// Puts `driver` on the current ride if its id is `ride_id`. Returns false
    /// on mismatch.
    pub fn assign_driver(&self, mut driver: Driver, ride_id: Uuid) -> bool {
        let driver_id = driver.id;
        let assigned = self.ride_tx.send_if_modified(|current| {
            let Some(ride) = current.as_mut().filter(|ride| ride.id == ride_id) else {
                return false;
            };
            self.generation.fetch_add(1, Ordering::SeqCst);

            if let Some(previous) = ride.assigned_driver.as_ref().filter(|previous| previous.id != driver_id) {
                self.fleet.set_status(previous.id, DriverStatus::Available);
            }
            self.fleet.set_status(driver_id, DriverStatus::Busy);
            driver.status = DriverStatus::Busy;

            ride.assigned_driver = Some(driver);
            ride.state = RideState::Assigned;
            ride.accepted_at = Some(Utc::now());
            true
        });

        if assigned {
            info!(ride_id = %ride_id, driver_id = %driver_id, "driver assigned manually");
        }
        assigned
    }

    /// Moves the current ride one step along Assigned → … → Completed.
    pub fn progress_ride(&self, ride_id: Uuid, next: RideState) -> Result<RideRequest, BookingError> {
        let mut outcome = Err(BookingError::RideNotFound(ride_id));
        self.ride_tx.send_if_modified(|current| {
            let Some(ride) = current.as_mut().filter(|ride| ride.id == ride_id) else {
                return false;
            };
            if ride.state.next() != Some(next) {
                outcome = Err(BookingError::InvalidTransition {
                    from: ride.state,
                    to: next,
                });
                return false;
            }

            self.generation.fetch_add(1, Ordering::SeqCst);
            ride.state = next;
            if next == RideState::Completed {
                ride.completed_at = Some(Utc::now());
                if let Some(driver) = &ride.assigned_driver {
                    self.fleet.set_status(driver.id, DriverStatus::Available);
                }
            }
            outcome = Ok(ride.clone());
            true
        });

        if let Ok(ride) = &outcome {
            info!(ride_id = %ride.id, state = ?ride.state, "ride progressed");
        }
        outcome
    }

    fn open(&self, ride: RideRequest) -> Result<u64, BookingError> {
        let mut outcome = Err(BookingError::BookingInProgress);
        self.ride_tx.send_if_modified(|current| {
            if current.as_ref().is_some_and(|existing| existing.state.is_active()) {
                return false;
            }
            if !is_valid(&ride.pickup) || !is_valid(&ride.dropoff) {
                outcome = Err(BookingError::InvalidLocation);
                return false;
            }

            outcome = Ok(self.generation.fetch_add(1, Ordering::SeqCst) + 1);
            *current = Some(ride);
            true
        });
        outcome
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Applies `apply` to the current ride unless `generation` went stale.
    fn commit<F>(&self, generation: u64, apply: F) -> Result<RideRequest, BookingError>
    where
        F: FnOnce(&mut RideRequest),
    {
        let mut committed = None;
        self.ride_tx.send_if_modified(|current| {
            if !self.is_current(generation) {
                return false;
            }
            let Some(ride) = current.as_mut() else {
                return false;
            };
            apply(ride);
            committed = Some(ride.clone());
            true
        });
        committed.ok_or(BookingError::Superseded)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rust_decimal::Decimal;
    use tokio_stream::StreamExt;
    use uuid::Uuid;

    use super::{BookingOrchestrator, RideDetails};
    use crate::config::{BookingConfig, SimulationConfig};
    use crate::engine::fleet::FleetSimulator;
    use crate::error::BookingError;
    use crate::geo::{destination, distance_m};
    use crate::models::driver::{Driver, DriverStatus, GeoPoint, VehicleType};
    use crate::models::ride::RideState;
    use crate::observability::metrics::Metrics;

    const PICKUP: GeoPoint = GeoPoint::new(51.4816, -3.1791);
    const DROPOFF: GeoPoint = GeoPoint::new(51.4637, -3.1633);

    fn details() -> RideDetails {
        RideDetails {
            pickup: PICKUP,
            pickup_address: "Cardiff Central Station".to_string(),
            dropoff: DROPOFF,
            dropoff_address: "Cardiff Bay".to_string(),
            estimated_fare: Decimal::new(850, 2),
        }
    }

    fn setup(drivers: Vec<Driver>) -> (Arc<FleetSimulator>, Arc<BookingOrchestrator>) {
        let metrics = Metrics::new();
        let config = SimulationConfig {
            seed: Some(1),
            ..SimulationConfig::default()
        };
        let fleet = Arc::new(FleetSimulator::empty(config, metrics.clone()));
        for driver in drivers {
            fleet.add_driver(driver);
        }
        let booking = Arc::new(BookingOrchestrator::new(
            BookingConfig::default(),
            fleet.clone(),
            metrics,
        ));
        (fleet, booking)
    }

    fn nearby_driver(distance: f64) -> Driver {
        Driver::new("Emma Davies", destination(&PICKUP, distance, 45.0), VehicleType::Sedan)
    }

    #[tokio::test(start_paused = true)]
    async fn successful_request_assigns_nearest_driver() {
        let near = nearby_driver(300.0);
        let far = nearby_driver(1_200.0);
        let near_id = near.id;
        let (fleet, booking) = setup(vec![far, near]);

        let ride = booking.request_ride(details()).await.unwrap();

        assert_eq!(ride.state, RideState::Assigned);
        assert!(ride.accepted_at.is_some());
        let driver = ride.assigned_driver.expect("assigned driver");
        assert_eq!(driver.id, near_id);
        let expected_eta = distance_m(&PICKUP, &driver.location) / 15.0;
        assert!((driver.eta_seconds.unwrap() - expected_eta).abs() < 1e-9);
        assert_eq!(fleet.driver(near_id).unwrap().status, DriverStatus::Busy);
        assert_eq!(booking.current().unwrap().id, ride.id);
    }

    #[tokio::test(start_paused = true)]
    async fn second_request_conflicts_while_searching_or_assigned() {
        let (_fleet, booking) = setup(vec![nearby_driver(300.0)]);

        let in_flight = tokio::spawn({
            let booking = booking.clone();
            async move { booking.request_ride(details()).await }
        });
        tokio::task::yield_now().await;
        assert_eq!(booking.current().unwrap().state, RideState::Searching);

        let conflict = booking.request_ride(details()).await;
        assert_eq!(conflict.unwrap_err(), BookingError::BookingInProgress);

        in_flight.await.unwrap().unwrap();
        let conflict = booking.request_ride(details()).await;
        assert_eq!(conflict.unwrap_err(), BookingError::BookingInProgress);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_location_is_rejected() {
        let (_fleet, booking) = setup(vec![nearby_driver(300.0)]);
        let bad = RideDetails {
            pickup: GeoPoint::new(200.0, -3.1791),
            ..details()
        };

        let result = booking.request_ride(bad).await;

        assert_eq!(result.unwrap_err(), BookingError::InvalidLocation);
        assert!(booking.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_fleet_cancels_the_request() {
        let (_fleet, booking) = setup(vec![nearby_driver(300.0).with_status(DriverStatus::Busy)]);

        let result = booking.request_ride(details()).await;

        assert_eq!(result.unwrap_err(), BookingError::NoDriversAvailable);
        assert_eq!(booking.current().unwrap().state, RideState::Cancelled);

        // a cancelled ride no longer blocks booking
        assert!(!booking.current().unwrap().state.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_search_wins() {
        let driver = nearby_driver(300.0);
        let driver_id = driver.id;
        let (fleet, booking) = setup(vec![driver]);

        let in_flight = tokio::spawn({
            let booking = booking.clone();
            async move { booking.request_ride(details()).await }
        });
        tokio::task::yield_now().await;

        booking.cancel_ride().await;

        assert_eq!(in_flight.await.unwrap().unwrap_err(), BookingError::Superseded);
        assert!(booking.current().is_none());
        assert_eq!(fleet.driver(driver_id).unwrap().status, DriverStatus::Available);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_assignment_delay_is_not_overwritten() {
        let driver = nearby_driver(300.0);
        let driver_id = driver.id;
        let (fleet, booking) = setup(vec![driver]);
        let mut rides = booking.subscribe();

        let in_flight = tokio::spawn({
            let booking = booking.clone();
            async move { booking.request_ride(details()).await }
        });
        tokio::time::sleep(Duration::from_millis(3_500)).await;

        booking.cancel_ride().await;
        assert_eq!(in_flight.await.unwrap().unwrap_err(), BookingError::Superseded);

        assert!(booking.current().is_none());
        assert!(rides.borrow_and_update().is_none());
        assert_eq!(fleet.driver(driver_id).unwrap().status, DriverStatus::Available);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_an_assigned_ride_releases_the_driver() {
        let (fleet, booking) = setup(vec![nearby_driver(300.0)]);
        let ride = booking.request_ride(details()).await.unwrap();
        let driver_id = ride.assigned_driver.unwrap().id;

        let cancelling = tokio::spawn({
            let booking = booking.clone();
            async move { booking.cancel_ride().await }
        });
        tokio::task::yield_now().await;

        assert_eq!(booking.current().unwrap().state, RideState::Cancelled);
        assert_eq!(fleet.driver(driver_id).unwrap().status, DriverStatus::Available);

        cancelling.await.unwrap();
        assert!(booking.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_without_a_ride_is_a_no_op() {
        let (_fleet, booking) = setup(Vec::new());
        let mut rides = booking.subscribe();
        rides.borrow_and_update();

        booking.cancel_ride().await;

        assert!(!rides.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn grace_period_keeps_a_newer_ride() {
        let (_fleet, booking) = setup(vec![nearby_driver(300.0)]);
        booking.request_ride(details()).await.unwrap();

        let cancelling = tokio::spawn({
            let booking = booking.clone();
            async move { booking.cancel_ride().await }
        });
        tokio::task::yield_now().await;

        let rebooking = tokio::spawn({
            let booking = booking.clone();
            async move { booking.request_ride(details()).await }
        });
        tokio::task::yield_now().await;
        let newer = booking.current().unwrap();
        assert_eq!(newer.state, RideState::Searching);

        cancelling.await.unwrap();
        assert_eq!(booking.current().unwrap().id, newer.id);

        let rebooked = rebooking.await.unwrap().unwrap();
        assert_eq!(rebooked.id, newer.id);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_assignment_overrides_the_driver() {
        let first = nearby_driver(300.0);
        let second = nearby_driver(900.0);
        let second_id = second.id;
        let (fleet, booking) = setup(vec![first, second.clone()]);
        let ride = booking.request_ride(details()).await.unwrap();
        let first_id = ride.assigned_driver.as_ref().unwrap().id;

        assert!(!booking.assign_driver(second.clone(), Uuid::new_v4()));
        assert_eq!(fleet.driver(second_id).unwrap().status, DriverStatus::Available);

        assert!(booking.assign_driver(second, ride.id));
        let current = booking.current().unwrap();
        assert_eq!(current.state, RideState::Assigned);
        assert_eq!(current.assigned_driver.unwrap().id, second_id);
        assert_eq!(fleet.driver(second_id).unwrap().status, DriverStatus::Busy);
        assert_eq!(fleet.driver(first_id).unwrap().status, DriverStatus::Available);
    }

    #[tokio::test(start_paused = true)]
    async fn progression_completes_and_releases_the_driver() {
        let (fleet, booking) = setup(vec![nearby_driver(300.0)]);
        let ride = booking.request_ride(details()).await.unwrap();
        let driver_id = ride.assigned_driver.as_ref().unwrap().id;

        let skipped = booking.progress_ride(ride.id, RideState::InProgress);
        assert_eq!(
            skipped.unwrap_err(),
            BookingError::InvalidTransition {
                from: RideState::Assigned,
                to: RideState::InProgress,
            }
        );

        for state in [
            RideState::DriverEnRoute,
            RideState::Arrived,
            RideState::InProgress,
        ] {
            booking.progress_ride(ride.id, state).unwrap();
            assert_eq!(fleet.driver(driver_id).unwrap().status, DriverStatus::Busy);
        }

        let completed = booking.progress_ride(ride.id, RideState::Completed).unwrap();
        assert!(completed.completed_at.is_some());
        assert!(completed.duration().is_some());
        assert_eq!(fleet.driver(driver_id).unwrap().status, DriverStatus::Available);

        let other = Uuid::new_v4();
        assert_eq!(
            booking.progress_ride(other, RideState::Completed).unwrap_err(),
            BookingError::RideNotFound(other)
        );
    }

    #[tokio::test]
    async fn new_subscriber_sees_the_latest_ride_state() {
        let (_fleet, booking) = setup(Vec::new());
        let mut changes = booking.changes();

        assert!(changes.next().await.expect("initial value").is_none());
    }
}
