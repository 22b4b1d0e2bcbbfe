//! Typed payloads for the five server-emitted events.
//!
//! The payload shapes (field names and nesting) are consumed by the
//! operator dashboard and the rider/driver clients. Each type serializes to
//! exactly the documented shape; changing a field name here is a breaking
//! protocol change.

use crate::frames::Frame;
use serde::Serialize;

/// A payload that can be wrapped into an [`Frame::Event`].
pub trait EventPayload: Serialize {
    /// Wire name of the event.
    const NAME: &'static str;

    /// Wrap the payload into an event frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be represented as JSON.
    fn into_frame(self) -> Result<Frame, serde_json::Error>
    where
        Self: Sized,
    {
        Ok(Frame::event(Self::NAME, serde_json::to_value(self)?))
    }
}

/// `booking-created` - sent to operators when a rider submits a booking.
///
/// Generic over the record types so the domain crate can embed its own
/// `Booking`/`User` without a dependency cycle.
#[derive(Debug, Clone, Serialize)]
pub struct BookingCreated<B, U> {
    /// The freshly stored booking.
    pub booking: B,
    /// The rider who submitted it.
    pub rider: U,
}

impl<B: Serialize, U: Serialize> EventPayload for BookingCreated<B, U> {
    const NAME: &'static str = "booking-created";
}

/// Driver summary embedded in `driver-assigned`.
#[derive(Debug, Clone, Serialize)]
pub struct DriverInfo {
    /// Driver display name.
    pub name: String,
    /// Free-form vehicle description shown to the rider.
    #[serde(rename = "vehicleDescriptor")]
    pub vehicle_descriptor: String,
}

/// `driver-assigned` - sent to each assigned rider individually.
#[derive(Debug, Clone, Serialize)]
pub struct DriverAssigned {
    pub driver: DriverInfo,
    /// Time slot of the assigned booking.
    pub time: String,
}

impl EventPayload for DriverAssigned {
    const NAME: &'static str = "driver-assigned";
}

/// `new-assignment` - sent to the assigned driver with the full rider
/// records for the assigned set.
#[derive(Debug, Clone, Serialize)]
pub struct NewAssignment<U> {
    pub students: Vec<U>,
}

impl<U: Serialize> EventPayload for NewAssignment<U> {
    const NAME: &'static str = "new-assignment";
}

/// `pool-updated` - sent to operators summarizing an assignment outcome.
#[derive(Debug, Clone, Serialize)]
pub struct PoolUpdated {
    pub time: String,
    pub location: String,
    #[serde(rename = "driverId")]
    pub driver_id: String,
    #[serde(rename = "assignedRiderIds")]
    pub assigned_rider_ids: Vec<String>,
}

impl EventPayload for PoolUpdated {
    const NAME: &'static str = "pool-updated";
}

/// `presence-changed` - sent to operators on every online/offline edge.
#[derive(Debug, Clone, Serialize)]
pub struct PresenceChanged {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "isActive")]
    pub is_active: bool,
}

impl EventPayload for PresenceChanged {
    const NAME: &'static str = "presence-changed";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_driver_assigned_shape() {
        let frame = DriverAssigned {
            driver: DriverInfo {
                name: "Dana".to_string(),
                vehicle_descriptor: "Blue van".to_string(),
            },
            time: "14:00".to_string(),
        }
        .into_frame()
        .unwrap();

        match frame {
            Frame::Event { event, payload } => {
                assert_eq!(event, "driver-assigned");
                assert_eq!(payload["driver"]["name"], "Dana");
                assert_eq!(payload["driver"]["vehicleDescriptor"], "Blue van");
                assert_eq!(payload["time"], "14:00");
            }
            other => panic!("expected event frame, got {other:?}"),
        }
    }

    #[test]
    fn test_pool_updated_shape() {
        let frame = PoolUpdated {
            time: "14:00".to_string(),
            location: "North Gate".to_string(),
            driver_id: "d-1".to_string(),
            assigned_rider_ids: vec!["r-1".to_string(), "r-2".to_string()],
        }
        .into_frame()
        .unwrap();

        match frame {
            Frame::Event { event, payload } => {
                assert_eq!(event, "pool-updated");
                assert_eq!(payload["driverId"], "d-1");
                assert_eq!(payload["assignedRiderIds"], json!(["r-1", "r-2"]));
            }
            other => panic!("expected event frame, got {other:?}"),
        }
    }

    #[test]
    fn test_presence_changed_shape() {
        let frame = PresenceChanged {
            user_id: "u-1".to_string(),
            is_active: true,
        }
        .into_frame()
        .unwrap();

        match frame {
            Frame::Event { event, payload } => {
                assert_eq!(event, "presence-changed");
                assert_eq!(payload["userId"], "u-1");
                assert_eq!(payload["isActive"], true);
            }
            other => panic!("expected event frame, got {other:?}"),
        }
    }

    #[test]
    fn test_booking_created_generic_records() {
        let frame = BookingCreated {
            booking: json!({"id": "b-1", "status": "pending"}),
            rider: json!({"id": "r-1", "name": "Avery"}),
        }
        .into_frame()
        .unwrap();

        match frame {
            Frame::Event { event, payload } => {
                assert_eq!(event, "booking-created");
                assert_eq!(payload["booking"]["id"], "b-1");
                assert_eq!(payload["rider"]["name"], "Avery");
            }
            other => panic!("expected event frame, got {other:?}"),
        }
    }
}
