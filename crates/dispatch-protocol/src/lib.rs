//! # dispatch-protocol
//!
//! Wire protocol for the Dispatch realtime channel.
//!
//! Clients talk to the server over a bidirectional frame stream:
//!
//! - **Frame** - the unit of communication (handshake, events, keepalive)
//! - **Events** - typed payloads for the five server-emitted events
//! - **Codec** - MessagePack serialization with length-prefixed framing
//!
//! The event payload field names are a compatibility surface shared with
//! dashboard and mobile clients; they are fixed by the types in [`events`]
//! and must not drift.

pub mod codec;
pub mod events;
pub mod frames;

pub use codec::{decode, decode_from, encode, ProtocolError};
pub use events::{
    BookingCreated, DriverAssigned, DriverInfo, EventPayload, NewAssignment, PoolUpdated,
    PresenceChanged,
};
pub use frames::{Frame, FrameType};
