//! Booking pool.
//!
//! Pending bookings grouped by pool key (time slot, location). The pool
//! validates and stores new requests and performs the atomic bulk
//! transition the assignment engine relies on.

use crate::error::DispatchError;
use crate::model::{Booking, BookingId, BookingStatus, Direction, UserId};
use crate::store::{BookingFilter, BulkUpdateOutcome, Store};
use std::sync::Arc;
use tracing::{debug, info};

/// The pool of pending ride requests.
#[derive(Clone)]
pub struct BookingPool {
    store: Arc<dyn Store>,
}

impl BookingPool {
    /// Create a pool over a durable store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create a pending booking dated now.
    ///
    /// The booking's location is copied from the rider's record so the
    /// pool key is materialized at submit time.
    ///
    /// # Errors
    ///
    /// `Validation` for a bad direction or empty time slot, `NotFound`
    /// for an unknown rider.
    pub async fn submit(
        &self,
        rider_id: &str,
        direction: &str,
        time: &str,
    ) -> Result<Booking, DispatchError> {
        let direction = Direction::parse(direction)?;
        if time.trim().is_empty() {
            return Err(DispatchError::Validation("time slot is required".into()));
        }

        let rider = self
            .store
            .find_user_by_id(rider_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("rider {rider_id}")))?;

        let location = rider.location.clone().unwrap_or_default();
        let booking = Booking::new(rider.id, direction, time, location);

        let stored = self.store.insert_booking(booking).await?;
        info!(
            booking = %stored.id,
            rider = %stored.rider_id,
            time = %stored.time,
            location = %stored.location,
            "Booking submitted"
        );
        Ok(stored)
    }

    /// All pending bookings for a pool key. Order carries no meaning;
    /// selection fairness is the assignment engine's concern.
    pub async fn query_pending(
        &self,
        time: &str,
        location: &str,
    ) -> Result<Vec<Booking>, DispatchError> {
        self.store
            .query_bookings(&BookingFilter::pending_pool(time, location))
            .await
    }

    /// Atomically transition a set of bookings `pending -> assigned`,
    /// recording the driver.
    ///
    /// # Errors
    ///
    /// `Conflict` if any booking in the set is no longer pending; in that
    /// case none of the set is mutated.
    pub async fn mark_assigned(
        &self,
        booking_ids: &[BookingId],
        driver_id: &UserId,
    ) -> Result<(), DispatchError> {
        let outcome = self
            .store
            .conditional_bulk_update(
                booking_ids,
                BookingStatus::Pending,
                BookingStatus::Assigned,
                Some(driver_id.clone()),
            )
            .await?;

        match outcome {
            BulkUpdateOutcome::Applied => {
                debug!(driver = %driver_id, count = booking_ids.len(), "Bookings assigned");
                Ok(())
            }
            BulkUpdateOutcome::Conflict => Err(DispatchError::Conflict(
                "a selected booking was concurrently claimed".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::User;
    use crate::store::MemoryStore;

    fn pool_with_rider() -> (BookingPool, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.put_user(User::rider("r-1", "Avery", "North Gate"));
        (BookingPool::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_submit_creates_pending() {
        let (pool, _) = pool_with_rider();

        let booking = pool.submit("r-1", "coming", "14:00").await.unwrap();
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.location, "North Gate");
        assert!(booking.driver_id.is_none());

        let pending = pool.query_pending("14:00", "North Gate").await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_direction() {
        let (pool, _) = pool_with_rider();
        assert!(matches!(
            pool.submit("r-1", "upward", "14:00").await,
            Err(DispatchError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_time() {
        let (pool, _) = pool_with_rider();
        assert!(matches!(
            pool.submit("r-1", "coming", "  ").await,
            Err(DispatchError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_unknown_rider() {
        let (pool, _) = pool_with_rider();
        assert!(matches!(
            pool.submit("ghost", "coming", "14:00").await,
            Err(DispatchError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_assigned_conflict_is_all_or_nothing() {
        let (pool, _) = pool_with_rider();
        let a = pool.submit("r-1", "coming", "14:00").await.unwrap();
        let b = pool.submit("r-1", "coming", "14:00").await.unwrap();

        let driver = "d-1".to_string();
        pool.mark_assigned(&[b.id.clone()], &driver).await.unwrap();

        let err = pool
            .mark_assigned(&[a.id.clone(), b.id.clone()], &"d-2".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));

        // The non-contended booking stays pending.
        let pending = pool.query_pending("14:00", "North Gate").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a.id);
    }
}
