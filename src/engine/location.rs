use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::error::BookingError;
use crate::geo::is_valid;
use crate::models::driver::GeoPoint;

/// Source of the rider's current position.
pub trait LocationProvider: Send + Sync {
    fn current(&self) -> Option<GeoPoint>;

    /// Position feed; the latest known position is yielded first.
    fn changes(&self) -> WatchStream<Option<GeoPoint>>;
}

/// Location provider fed by explicit updates, e.g. from the HTTP API.
pub struct ManualLocationProvider {
    location_tx: watch::Sender<Option<GeoPoint>>,
}

impl ManualLocationProvider {
    pub fn new(initial: Option<GeoPoint>) -> Self {
        let (location_tx, _initial_rx) = watch::channel(initial);
        Self { location_tx }
    }

    pub fn update(&self, location: GeoPoint) -> Result<(), BookingError> {
        if !is_valid(&location) {
            return Err(BookingError::InvalidLocation);
        }
        self.location_tx.send_replace(Some(location));
        Ok(())
    }
}

impl LocationProvider for ManualLocationProvider {
    fn current(&self) -> Option<GeoPoint> {
        *self.location_tx.borrow()
    }

    fn changes(&self) -> WatchStream<Option<GeoPoint>> {
        WatchStream::new(self.location_tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use tokio_stream::StreamExt;

    use super::{LocationProvider, ManualLocationProvider};
    use crate::error::BookingError;
    use crate::models::driver::GeoPoint;

    #[tokio::test]
    async fn updates_replace_the_current_location() {
        let provider = ManualLocationProvider::new(None);
        assert!(provider.current().is_none());

        let castle = GeoPoint::new(51.4822, -3.1812);
        provider.update(castle).unwrap();
        assert_eq!(provider.current(), Some(castle));

        let mut changes = provider.changes();
        assert_eq!(changes.next().await, Some(Some(castle)));
    }

    #[test]
    fn rejects_out_of_range_locations() {
        let provider = ManualLocationProvider::new(None);
        let result = provider.update(GeoPoint::new(200.0, 0.0));

        assert_eq!(result, Err(BookingError::InvalidLocation));
        assert!(provider.current().is_none());
    }
}
