//! Assignment engine.
//!
//! Selects up to `capacity` pending bookings from a pool and transitions
//! them to the driver atomically. Selection is uniform random by default
//! (the domain has no priority ordering among pending riders); FIFO is
//! available as a configured alternative.

use crate::error::DispatchError;
use crate::model::{Booking, BookingStatus, Role, User};
use crate::pool::BookingPool;
use crate::store::Store;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How candidates are picked from the pool when it exceeds capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPolicy {
    /// Unweighted random sample without replacement.
    #[default]
    Random,
    /// Oldest booking first.
    Fifo,
}

/// Outcome of a successful assignment.
#[derive(Debug, Clone)]
pub struct AssignmentResult {
    /// The resolved driver.
    pub driver: User,
    /// Bookings now carrying the driver, in selection order.
    pub bookings: Vec<Booking>,
    /// Rider records for the assigned set, for the caller to fan out.
    pub riders: Vec<User>,
}

impl AssignmentResult {
    fn empty(driver: User) -> Self {
        Self {
            driver,
            bookings: Vec::new(),
            riders: Vec::new(),
        }
    }

    /// Rider ids of the assigned set.
    #[must_use]
    pub fn rider_ids(&self) -> Vec<String> {
        self.bookings.iter().map(|b| b.rider_id.clone()).collect()
    }
}

/// The assignment engine.
#[derive(Clone)]
pub struct AssignmentEngine {
    store: Arc<dyn Store>,
    pool: BookingPool,
    policy: SelectionPolicy,
}

impl AssignmentEngine {
    /// Create an engine with the given selection policy.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, pool: BookingPool, policy: SelectionPolicy) -> Self {
        Self { store, pool, policy }
    }

    /// Assign up to `driver.capacity` pending bookings from the pool at
    /// `(time, location)` to the driver.
    ///
    /// The select-then-transition sequence can lose a race to a concurrent
    /// assignment on the same pool key; one full retry is made before the
    /// conflict is surfaced.
    ///
    /// # Errors
    ///
    /// `NotFound` if the id is unknown or not a driver; `Conflict` if both
    /// the attempt and its retry lost a race.
    pub async fn assign(
        &self,
        driver_id: &str,
        time: &str,
        location: &str,
    ) -> Result<AssignmentResult, DispatchError> {
        let driver = self
            .store
            .find_user_by_id(driver_id)
            .await?
            .filter(|u| u.role == Role::Driver)
            .ok_or_else(|| DispatchError::NotFound(format!("driver {driver_id}")))?;

        let capacity = driver.capacity as usize;
        if capacity == 0 {
            debug!(driver = %driver.id, "Driver has no capacity; empty assignment");
            return Ok(AssignmentResult::empty(driver));
        }

        // One retry tolerates a single lost race without amplifying load
        // under contention.
        for attempt in 0..2 {
            let candidates = self.pool.query_pending(time, location).await?;
            if candidates.is_empty() {
                return Ok(AssignmentResult::empty(driver));
            }

            let mut selected = self.select(candidates, capacity);
            let ids: Vec<_> = selected.iter().map(|b| b.id.clone()).collect();

            match self.pool.mark_assigned(&ids, &driver.id).await {
                Ok(()) => {
                    for booking in &mut selected {
                        booking.status = BookingStatus::Assigned;
                        booking.driver_id = Some(driver.id.clone());
                    }

                    let rider_ids: Vec<_> =
                        selected.iter().map(|b| b.rider_id.clone()).collect();
                    let riders = self.store.find_users_by_ids(&rider_ids).await?;

                    info!(
                        driver = %driver.id,
                        time = %time,
                        location = %location,
                        assigned = selected.len(),
                        "Assignment complete"
                    );

                    return Ok(AssignmentResult {
                        driver,
                        bookings: selected,
                        riders,
                    });
                }
                Err(DispatchError::Conflict(_)) if attempt == 0 => {
                    warn!(
                        driver = %driver.id,
                        time = %time,
                        location = %location,
                        "Assignment lost a race; retrying selection"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(DispatchError::Conflict(
            "assignment conflicted after retry".into(),
        ))
    }

    fn select(&self, mut candidates: Vec<Booking>, capacity: usize) -> Vec<Booking> {
        match self.policy {
            SelectionPolicy::Random => {
                candidates.shuffle(&mut rand::thread_rng());
            }
            SelectionPolicy::Fifo => {
                candidates.sort_by_key(|b| b.created_at);
            }
        }
        candidates.truncate(capacity);
        candidates
    }
}
