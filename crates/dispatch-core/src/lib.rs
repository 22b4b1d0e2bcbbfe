//! # dispatch-core
//!
//! Booking coordination core for the Dispatch realtime server.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **BookingPool** - pending ride requests keyed by (time, location)
//! - **AssignmentEngine** - bounded-capacity driver assignment
//! - **Fanout** - targeted and role-wide event delivery
//! - **PresenceRegistry** - counter-based online/offline tracking
//! - **Store** - durable-store abstraction with an in-memory implementation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │ BookingPool │◀────│  Assignment  │     │   Fanout    │
//! └─────────────┘     │    Engine    │     └─────────────┘
//!        │            └──────────────┘            ▲
//!        ▼                   │                    │
//! ┌─────────────┐            ▼             ┌─────────────┐
//! │    Store    │◀─────────────────────────│  Presence   │
//! └─────────────┘                          └─────────────┘
//! ```

pub mod assign;
pub mod error;
pub mod fanout;
pub mod model;
pub mod pool;
pub mod presence;
pub mod store;

pub use assign::{AssignmentEngine, AssignmentResult, SelectionPolicy};
pub use error::DispatchError;
pub use fanout::{ConnectionId, Fanout, FanoutStats};
pub use model::{Booking, BookingId, BookingStatus, Direction, Role, User, UserId};
pub use pool::BookingPool;
pub use presence::PresenceRegistry;
pub use store::{BookingFilter, BulkUpdateOutcome, MemoryStore, Store};
