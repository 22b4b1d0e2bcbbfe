//! Domain records for the dispatch core.
//!
//! `User` and `Booking` are owned by the durable store; the types here are
//! the in-process representation, serialized as-is into event payloads and
//! API responses (field names are part of the client surface).

use crate::error::DispatchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A user identity.
pub type UserId = String;

/// A booking identity.
pub type BookingId = String;

/// Current unix time in milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_id(prefix: &str) -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64;
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{:x}", timestamp.wrapping_add(counter))
}

/// Generate a unique booking ID.
#[must_use]
pub fn generate_booking_id() -> BookingId {
    generate_id("bk")
}

/// Generate a unique connection ID.
#[must_use]
pub fn generate_connection_id() -> String {
    generate_id("conn")
}

/// The three actor roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Rider,
    Driver,
    Operator,
}

impl Role {
    /// All roles, in a fixed order. Role-keyed behavior maps over this
    /// instead of growing conditional chains.
    pub const ALL: [Role; 3] = [Role::Rider, Role::Driver, Role::Operator];

    /// Wire name of the role.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Rider => "rider",
            Role::Driver => "driver",
            Role::Operator => "operator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of travel for a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Coming,
    Leaving,
}

impl Direction {
    /// Parse a direction from its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Validation`] for anything other than the
    /// two allowed values.
    pub fn parse(value: &str) -> Result<Self, DispatchError> {
        match value {
            "coming" => Ok(Direction::Coming),
            "leaving" => Ok(Direction::Leaving),
            other => Err(DispatchError::Validation(format!(
                "direction must be 'coming' or 'leaving', got '{other}'"
            ))),
        }
    }

    /// Wire name of the direction.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Coming => "coming",
            Direction::Leaving => "leaving",
        }
    }
}

/// Booking lifecycle status. Transitions are monotonic:
/// `pending -> assigned -> completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Assigned,
    Completed,
}

impl BookingStatus {
    /// Wire name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Assigned => "assigned",
            BookingStatus::Completed => "completed",
        }
    }
}

/// A user record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Identity.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Actor role.
    pub role: Role,
    /// Rider pickup location. `None` for drivers and operators.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Vehicle description. Only meaningful for drivers.
    #[serde(rename = "vehicleDescriptor", skip_serializing_if = "Option::is_none")]
    pub vehicle_descriptor: Option<String>,
    /// Maximum bookings per assignment. Only meaningful for drivers.
    #[serde(default)]
    pub capacity: u32,
    /// Whether the user currently holds at least one open connection.
    /// Mutated only by the presence registry.
    #[serde(rename = "isActive", default)]
    pub is_active: bool,
}

impl User {
    /// Create a rider at a pickup location.
    #[must_use]
    pub fn rider(id: impl Into<UserId>, name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: Role::Rider,
            location: Some(location.into()),
            vehicle_descriptor: None,
            capacity: 0,
            is_active: false,
        }
    }

    /// Create a driver with a vehicle and capacity.
    #[must_use]
    pub fn driver(
        id: impl Into<UserId>,
        name: impl Into<String>,
        vehicle: impl Into<String>,
        capacity: u32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: Role::Driver,
            location: None,
            vehicle_descriptor: Some(vehicle.into()),
            capacity,
            is_active: false,
        }
    }

    /// Create an operator.
    #[must_use]
    pub fn operator(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: Role::Operator,
            location: None,
            vehicle_descriptor: None,
            capacity: 0,
            is_active: false,
        }
    }
}

/// One rider's request for one direction of travel at one time slot.
///
/// Invariant: `driver_id` is `Some` exactly when `status != Pending`.
/// Bookings are never deleted, only status-transitioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    /// Identity.
    pub id: BookingId,
    /// Rider who submitted the booking. Immutable.
    #[serde(rename = "riderId")]
    pub rider_id: UserId,
    /// Assigned driver. Set only by the assignment engine.
    #[serde(rename = "driverId")]
    pub driver_id: Option<UserId>,
    /// Direction of travel.
    pub direction: Direction,
    /// Time slot, e.g. `14:00`.
    pub time: String,
    /// Pickup location, copied from the rider record at submit time.
    pub location: String,
    /// Creation time, unix milliseconds.
    #[serde(rename = "createdAt")]
    pub created_at: u64,
    /// Lifecycle status.
    pub status: BookingStatus,
}

impl Booking {
    /// Create a new pending booking dated now.
    #[must_use]
    pub fn new(
        rider_id: impl Into<UserId>,
        direction: Direction,
        time: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_booking_id(),
            rider_id: rider_id.into(),
            driver_id: None,
            direction,
            time: time.into(),
            location: location.into(),
            created_at: now_millis(),
            status: BookingStatus::Pending,
        }
    }

    /// The pool key this booking belongs to while pending.
    #[must_use]
    pub fn pool_key(&self) -> (&str, &str) {
        (&self.time, &self.location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_ids() {
        let a = generate_booking_id();
        let b = generate_booking_id();
        assert_ne!(a, b);
        assert!(a.starts_with("bk_"));
        assert!(generate_connection_id().starts_with("conn_"));
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!(Direction::parse("coming").unwrap(), Direction::Coming);
        assert_eq!(Direction::parse("leaving").unwrap(), Direction::Leaving);
        assert!(matches!(
            Direction::parse("sideways"),
            Err(DispatchError::Validation(_))
        ));
    }

    #[test]
    fn test_new_booking_is_pending() {
        let booking = Booking::new("r-1", Direction::Coming, "14:00", "North Gate");
        assert_eq!(booking.status, BookingStatus::Pending);
        assert!(booking.driver_id.is_none());
        assert_eq!(booking.pool_key(), ("14:00", "North Gate"));
    }

    #[test]
    fn test_booking_wire_field_names() {
        let booking = Booking::new("r-1", Direction::Leaving, "08:30", "Dorms");
        let json = serde_json::to_value(&booking).unwrap();
        assert_eq!(json["riderId"], "r-1");
        assert_eq!(json["direction"], "leaving");
        assert_eq!(json["status"], "pending");
        assert!(json["createdAt"].is_u64());
    }

    #[test]
    fn test_user_wire_field_names() {
        let driver = User::driver("d-1", "Dana", "Blue van", 3);
        let json = serde_json::to_value(&driver).unwrap();
        assert_eq!(json["role"], "driver");
        assert_eq!(json["vehicleDescriptor"], "Blue van");
        assert_eq!(json["isActive"], false);
    }
}
