//! Durable store abstraction.
//!
//! The core treats persistence as an external collaborator behind the
//! [`Store`] trait. [`MemoryStore`] is the in-process implementation used
//! by the bundled server and by tests; any database-backed implementation
//! only needs to honor the same contract, in particular the all-or-nothing
//! semantics of [`Store::conditional_bulk_update`].

use crate::error::DispatchError;
use crate::model::{Booking, BookingId, BookingStatus, Role, User, UserId};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Equality filter for booking queries.
#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub time: Option<String>,
    pub location: Option<String>,
    pub status: Option<BookingStatus>,
    pub rider_id: Option<UserId>,
    pub driver_id: Option<UserId>,
}

impl BookingFilter {
    /// Filter for the pending bookings of one pool key.
    #[must_use]
    pub fn pending_pool(time: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            time: Some(time.into()),
            location: Some(location.into()),
            status: Some(BookingStatus::Pending),
            ..Self::default()
        }
    }

    /// Restrict to one rider.
    #[must_use]
    pub fn with_rider(mut self, rider_id: impl Into<UserId>) -> Self {
        self.rider_id = Some(rider_id.into());
        self
    }

    /// Restrict to one driver.
    #[must_use]
    pub fn with_driver(mut self, driver_id: impl Into<UserId>) -> Self {
        self.driver_id = Some(driver_id.into());
        self
    }

    /// Restrict to one status.
    #[must_use]
    pub fn with_status(mut self, status: BookingStatus) -> Self {
        self.status = Some(status);
        self
    }

    fn matches(&self, booking: &Booking) -> bool {
        self.time.as_deref().map_or(true, |t| t == booking.time)
            && self
                .location
                .as_deref()
                .map_or(true, |l| l == booking.location)
            && self.status.map_or(true, |s| s == booking.status)
            && self
                .rider_id
                .as_deref()
                .map_or(true, |r| r == booking.rider_id)
            && self
                .driver_id
                .as_deref()
                .map_or(true, |d| booking.driver_id.as_deref() == Some(d))
    }
}

/// Outcome of a conditional bulk update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkUpdateOutcome {
    /// Every booking matched the expected status and was updated.
    Applied,
    /// At least one booking no longer matched; nothing was mutated.
    Conflict,
}

/// Durable-store operations consumed by the core.
#[async_trait]
pub trait Store: Send + Sync {
    /// Look up a single user.
    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, DispatchError>;

    /// Look up a set of users. Unknown ids are skipped.
    async fn find_users_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, DispatchError>;

    /// All users with a given role.
    async fn find_users_by_role(&self, role: Role) -> Result<Vec<User>, DispatchError>;

    /// Set the durable presence flag. Only the presence registry calls this.
    async fn set_user_active(&self, id: &str, active: bool) -> Result<(), DispatchError>;

    /// Persist a new booking.
    async fn insert_booking(&self, booking: Booking) -> Result<Booking, DispatchError>;

    /// Query bookings by equality filter.
    async fn query_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, DispatchError>;

    /// Transition every booking in `ids` from `expected` status to
    /// `new_status`, recording `driver_id`, atomically. If any booking is
    /// missing or no longer in `expected` status, nothing is mutated and
    /// [`BulkUpdateOutcome::Conflict`] is returned.
    async fn conditional_bulk_update(
        &self,
        ids: &[BookingId],
        expected: BookingStatus,
        new_status: BookingStatus,
        driver_id: Option<UserId>,
    ) -> Result<BulkUpdateOutcome, DispatchError>;
}

/// In-memory store.
///
/// Bookings sit behind a single mutex so the conditional bulk update is a
/// genuine check-and-set; user records are independent and live in a
/// concurrent map.
#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<UserId, User>,
    bookings: Mutex<HashMap<BookingId, Booking>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user record.
    pub fn put_user(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    fn bookings_lock(&self) -> std::sync::MutexGuard<'_, HashMap<BookingId, Booking>> {
        self.bookings.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, DispatchError> {
        Ok(self.users.get(id).map(|u| u.clone()))
    }

    async fn find_users_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, DispatchError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.users.get(id).map(|u| u.clone()))
            .collect())
    }

    async fn find_users_by_role(&self, role: Role) -> Result<Vec<User>, DispatchError> {
        Ok(self
            .users
            .iter()
            .filter(|u| u.role == role)
            .map(|u| u.clone())
            .collect())
    }

    async fn set_user_active(&self, id: &str, active: bool) -> Result<(), DispatchError> {
        match self.users.get_mut(id) {
            Some(mut user) => {
                user.is_active = active;
                Ok(())
            }
            None => Err(DispatchError::NotFound(format!("user {id}"))),
        }
    }

    async fn insert_booking(&self, booking: Booking) -> Result<Booking, DispatchError> {
        self.bookings_lock()
            .insert(booking.id.clone(), booking.clone());
        Ok(booking)
    }

    async fn query_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, DispatchError> {
        Ok(self
            .bookings_lock()
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect())
    }

    async fn conditional_bulk_update(
        &self,
        ids: &[BookingId],
        expected: BookingStatus,
        new_status: BookingStatus,
        driver_id: Option<UserId>,
    ) -> Result<BulkUpdateOutcome, DispatchError> {
        let mut bookings = self.bookings_lock();

        // Check phase: all-or-nothing.
        for id in ids {
            match bookings.get(id) {
                Some(b) if b.status == expected => {}
                _ => {
                    debug!(booking = %id, "Conditional update conflict");
                    return Ok(BulkUpdateOutcome::Conflict);
                }
            }
        }

        for id in ids {
            if let Some(b) = bookings.get_mut(id) {
                b.status = new_status;
                b.driver_id = driver_id.clone();
            }
        }

        Ok(BulkUpdateOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Direction;

    fn pending(time: &str, location: &str) -> Booking {
        Booking::new("r-1", Direction::Coming, time, location)
    }

    #[tokio::test]
    async fn test_user_lookup() {
        let store = MemoryStore::new();
        store.put_user(User::rider("r-1", "Avery", "North Gate"));
        store.put_user(User::driver("d-1", "Dana", "Blue van", 3));

        let rider = store.find_user_by_id("r-1").await.unwrap().unwrap();
        assert_eq!(rider.role, Role::Rider);
        assert!(store.find_user_by_id("ghost").await.unwrap().is_none());

        let drivers = store.find_users_by_role(Role::Driver).await.unwrap();
        assert_eq!(drivers.len(), 1);
        assert_eq!(drivers[0].id, "d-1");
    }

    #[tokio::test]
    async fn test_set_user_active() {
        let store = MemoryStore::new();
        store.put_user(User::rider("r-1", "Avery", "North Gate"));

        store.set_user_active("r-1", true).await.unwrap();
        assert!(store.find_user_by_id("r-1").await.unwrap().unwrap().is_active);

        assert!(matches!(
            store.set_user_active("ghost", true).await,
            Err(DispatchError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_query_by_pool_key() {
        let store = MemoryStore::new();
        store.insert_booking(pending("14:00", "North Gate")).await.unwrap();
        store.insert_booking(pending("14:00", "North Gate")).await.unwrap();
        store.insert_booking(pending("15:00", "North Gate")).await.unwrap();
        store.insert_booking(pending("14:00", "Dorms")).await.unwrap();

        let filter = BookingFilter::pending_pool("14:00", "North Gate");
        assert_eq!(store.query_bookings(&filter).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_bulk_update_applies_all() {
        let store = MemoryStore::new();
        let a = store.insert_booking(pending("14:00", "g")).await.unwrap();
        let b = store.insert_booking(pending("14:00", "g")).await.unwrap();

        let outcome = store
            .conditional_bulk_update(
                &[a.id.clone(), b.id.clone()],
                BookingStatus::Pending,
                BookingStatus::Assigned,
                Some("d-1".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(outcome, BulkUpdateOutcome::Applied);

        let assigned = store
            .query_bookings(&BookingFilter::default().with_driver("d-1"))
            .await
            .unwrap();
        assert_eq!(assigned.len(), 2);
        assert!(assigned.iter().all(|b| b.status == BookingStatus::Assigned));
    }

    #[tokio::test]
    async fn test_bulk_update_conflict_mutates_nothing() {
        let store = MemoryStore::new();
        let a = store.insert_booking(pending("14:00", "g")).await.unwrap();
        let b = store.insert_booking(pending("14:00", "g")).await.unwrap();

        // Claim `b` first, as a concurrent assignment would.
        store
            .conditional_bulk_update(
                &[b.id.clone()],
                BookingStatus::Pending,
                BookingStatus::Assigned,
                Some("d-2".to_string()),
            )
            .await
            .unwrap();

        let outcome = store
            .conditional_bulk_update(
                &[a.id.clone(), b.id.clone()],
                BookingStatus::Pending,
                BookingStatus::Assigned,
                Some("d-1".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(outcome, BulkUpdateOutcome::Conflict);

        // `a` must be untouched and `b` still owned by d-2.
        let all = store.query_bookings(&BookingFilter::default()).await.unwrap();
        let a_now = all.iter().find(|x| x.id == a.id).unwrap();
        let b_now = all.iter().find(|x| x.id == b.id).unwrap();
        assert_eq!(a_now.status, BookingStatus::Pending);
        assert_eq!(b_now.driver_id.as_deref(), Some("d-2"));
    }
}
