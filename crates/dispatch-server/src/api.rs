//! HTTP API: booking submission, driver assignment, dashboard snapshot.
//!
//! These handlers drive the core components and fan the resulting events
//! out to the affected parties. Fanout failures never fail the business
//! operation; once the store accepted the mutation the request succeeds.

use crate::handlers::AppState;
use crate::metrics;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dispatch_core::{Booking, BookingFilter, BookingStatus, DispatchError, Role, User};
use dispatch_protocol::events::{
    BookingCreated, DriverAssigned, DriverInfo, NewAssignment, PoolUpdated,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Request body for `POST /api/bookings`.
#[derive(Debug, Deserialize)]
pub struct NewBookingRequest {
    #[serde(rename = "riderId")]
    pub rider_id: String,
    pub direction: String,
    pub time: String,
}

/// Request body for `POST /api/assignments`.
#[derive(Debug, Deserialize)]
pub struct AssignDriverRequest {
    #[serde(rename = "driverId")]
    pub driver_id: String,
    pub time: String,
    pub location: String,
}

/// Response body for `POST /api/assignments`.
#[derive(Debug, Serialize)]
pub struct AssignDriverResponse {
    pub success: bool,
    #[serde(rename = "assignedBookings")]
    pub assigned_bookings: Vec<Booking>,
}

/// Response body for `GET /api/dashboard-data`.
#[derive(Debug, Serialize)]
pub struct DashboardData {
    pub riders: Vec<User>,
    pub drivers: Vec<User>,
    pub bookings: Vec<Booking>,
}

/// API error wrapper mapping the core taxonomy onto status codes.
pub struct ApiError(DispatchError);

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DispatchError::Validation(_) => StatusCode::BAD_REQUEST,
            DispatchError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::Conflict(_) => StatusCode::CONFLICT,
            DispatchError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        metrics::record_error(match &self.0 {
            DispatchError::Validation(_) => "validation",
            DispatchError::Unauthenticated(_) => "unauthenticated",
            DispatchError::NotFound(_) => "not_found",
            DispatchError::Conflict(_) => "conflict",
            DispatchError::Store(_) => "store",
        });
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

/// `POST /api/bookings` - submit a booking and alert the operator
/// dashboard.
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewBookingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = state
        .pool
        .submit(&req.rider_id, &req.direction, &req.time)
        .await?;
    metrics::record_booking();

    let rider = state
        .store
        .find_user_by_id(&booking.rider_id)
        .await?
        .ok_or_else(|| DispatchError::NotFound(format!("rider {}", booking.rider_id)))?;

    state.fanout.event_to_role(
        Role::Operator,
        BookingCreated {
            booking: booking.clone(),
            rider,
        },
    );

    Ok((StatusCode::CREATED, Json(booking)))
}

/// `POST /api/assignments` - assign a driver to a pool and notify the
/// riders, the driver and the operator dashboard.
pub async fn assign_driver(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AssignDriverRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .engine
        .assign(&req.driver_id, &req.time, &req.location)
        .await
        .map_err(|e| {
            if matches!(e, DispatchError::Conflict(_)) {
                metrics::record_assignment_conflict();
            }
            e
        })?;
    metrics::record_assignment(result.bookings.len());

    let vehicle = result.driver.vehicle_descriptor.clone().unwrap_or_default();
    for booking in &result.bookings {
        state.fanout.event_to_user(
            &booking.rider_id,
            DriverAssigned {
                driver: DriverInfo {
                    name: result.driver.name.clone(),
                    vehicle_descriptor: vehicle.clone(),
                },
                time: booking.time.clone(),
            },
        );
    }

    state.fanout.event_to_user(
        &result.driver.id,
        NewAssignment {
            students: result.riders.clone(),
        },
    );

    state.fanout.event_to_role(
        Role::Operator,
        PoolUpdated {
            time: req.time.clone(),
            location: req.location.clone(),
            driver_id: result.driver.id.clone(),
            assigned_rider_ids: result.rider_ids(),
        },
    );

    debug!(
        driver = %result.driver.id,
        time = %req.time,
        location = %req.location,
        assigned = result.bookings.len(),
        "Assignment fanned out"
    );

    Ok(Json(AssignDriverResponse {
        success: true,
        assigned_bookings: result.bookings,
    }))
}

/// `GET /api/dashboard-data` - snapshot for the operator dashboard.
pub async fn dashboard_data(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let riders = state.store.find_users_by_role(Role::Rider).await?;
    let drivers = state.store.find_users_by_role(Role::Driver).await?;
    let bookings = state
        .store
        .query_bookings(&BookingFilter::default().with_status(BookingStatus::Pending))
        .await?;

    Ok(Json(DashboardData {
        riders,
        drivers,
        bookings,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use dispatch_core::MemoryStore;
    use dispatch_protocol::Frame;
    use std::sync::Arc as StdArc;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn state_with_pool() -> Arc<AppState> {
        let store = StdArc::new(MemoryStore::new());
        store.put_user(User::driver("d-1", "Dana", "Blue van", 3));
        store.put_user(User::operator("op-1", "Olive"));
        for i in 0..5 {
            store.put_user(User::rider(
                format!("r-{i}"),
                format!("Rider {i}"),
                "North Gate",
            ));
        }
        Arc::new(AppState::with_store(Config::default(), store))
    }

    fn events(rx: &mut UnboundedReceiver<StdArc<Frame>>) -> Vec<(String, serde_json::Value)> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Frame::Event { event, payload } = frame.as_ref() {
                out.push((event.clone(), payload.clone()));
            }
        }
        out
    }

    async fn submit(state: &Arc<AppState>, rider: &str) {
        create_booking(
            State(state.clone()),
            Json(NewBookingRequest {
                rider_id: rider.to_string(),
                direction: "coming".to_string(),
                time: "14:00".to_string(),
            }),
        )
        .await
        .map(|_| ())
        .map_err(|_| ())
        .unwrap();
    }

    #[tokio::test]
    async fn test_booking_created_reaches_operator() {
        let state = state_with_pool();
        let mut op_rx = state.fanout.register("op-conn", "op-1", Role::Operator);

        submit(&state, "r-0").await;

        let received = events(&mut op_rx);
        assert_eq!(received.len(), 1);
        let (event, payload) = &received[0];
        assert_eq!(event, "booking-created");
        assert_eq!(payload["rider"]["id"], "r-0");
        assert_eq!(payload["booking"]["status"], "pending");
    }

    #[tokio::test]
    async fn test_assignment_scenario_fanout() {
        let state = state_with_pool();
        for i in 0..5 {
            submit(&state, &format!("r-{i}")).await;
        }

        // Register after the submissions so only assignment events arrive.
        let mut op_rx = state.fanout.register("op-conn", "op-1", Role::Operator);
        let mut driver_rx = state.fanout.register("d-conn", "d-1", Role::Driver);
        let mut rider_rxs: Vec<_> = (0..5)
            .map(|i| {
                state
                    .fanout
                    .register(&format!("r-conn-{i}"), &format!("r-{i}"), Role::Rider)
            })
            .collect();

        let response = assign_driver(
            State(state.clone()),
            Json(AssignDriverRequest {
                driver_id: "d-1".to_string(),
                time: "14:00".to_string(),
                location: "North Gate".to_string(),
            }),
        )
        .await
        .map_err(|_| ())
        .unwrap();
        let _ = response;

        // Operator sees a pool-updated summary with 3 assigned riders.
        let op_events = events(&mut op_rx);
        assert_eq!(op_events.len(), 1);
        let (event, payload) = &op_events[0];
        assert_eq!(event, "pool-updated");
        assert_eq!(payload["driverId"], "d-1");
        assert_eq!(payload["assignedRiderIds"].as_array().unwrap().len(), 3);

        // The driver gets the full rider roster.
        let driver_events = events(&mut driver_rx);
        assert_eq!(driver_events.len(), 1);
        let (event, payload) = &driver_events[0];
        assert_eq!(event, "new-assignment");
        assert_eq!(payload["students"].as_array().unwrap().len(), 3);

        // Exactly the 3 assigned riders hear about their driver.
        let mut assigned_riders = 0;
        for rx in &mut rider_rxs {
            for (event, payload) in events(rx) {
                assert_eq!(event, "driver-assigned");
                assert_eq!(payload["driver"]["name"], "Dana");
                assert_eq!(payload["driver"]["vehicleDescriptor"], "Blue van");
                assert_eq!(payload["time"], "14:00");
                assigned_riders += 1;
            }
        }
        assert_eq!(assigned_riders, 3);

        // Two bookings remain pending for the key.
        let pending = state.pool.query_pending("14:00", "North Gate").await.unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test]
    async fn test_assign_wrong_role_is_not_found() {
        let state = state_with_pool();
        submit(&state, "r-0").await;

        let err = assign_driver(
            State(state.clone()),
            Json(AssignDriverRequest {
                driver_id: "r-1".to_string(),
                time: "14:00".to_string(),
                location: "North Gate".to_string(),
            }),
        )
        .await
        .map(|_| ())
        .unwrap_err();
        assert_eq!(
            err.into_response().status(),
            StatusCode::NOT_FOUND
        );

        // Nothing was mutated.
        let pending = state.pool.query_pending("14:00", "North Gate").await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_bad_direction_is_bad_request() {
        let state = state_with_pool();
        let err = create_booking(
            State(state),
            Json(NewBookingRequest {
                rider_id: "r-0".to_string(),
                direction: "sideways".to_string(),
                time: "14:00".to_string(),
            }),
        )
        .await
        .map(|_| ())
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_dashboard_data_snapshot() {
        let state = state_with_pool();
        submit(&state, "r-0").await;
        submit(&state, "r-1").await;

        let response = dashboard_data(State(state)).await.map_err(|_| ()).unwrap();
        let body = axum::body::to_bytes(response.into_response().into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["riders"].as_array().unwrap().len(), 5);
        assert_eq!(json["drivers"].as_array().unwrap().len(), 1);
        assert_eq!(json["bookings"].as_array().unwrap().len(), 2);
    }
}
