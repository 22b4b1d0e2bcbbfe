//! Notification fanout.
//!
//! Maps user identities to their live connections and delivers event
//! frames to targeted users, whole roles, or everyone. Delivery is
//! fire-and-forget: each connection has its own unbounded outbound queue,
//! so one dead or slow recipient never blocks the rest, and an offline
//! recipient simply misses the event.

use crate::model::{Role, UserId};
use dashmap::{DashMap, DashSet};
use dispatch_protocol::events::EventPayload;
use dispatch_protocol::Frame;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

/// A live connection identifier.
pub type ConnectionId = String;

struct Registration {
    user_id: UserId,
    role: Role,
    tx: mpsc::UnboundedSender<Arc<Frame>>,
}

/// The fanout addressing table.
///
/// Constructed once and handed to every component that emits events; there
/// is deliberately no global instance.
#[derive(Default)]
pub struct Fanout {
    /// All live connections.
    connections: DashMap<ConnectionId, Registration>,
    /// Connections per user identity (a user may have several tabs).
    by_user: DashMap<UserId, DashSet<ConnectionId>>,
}

/// Fanout statistics.
#[derive(Debug, Clone)]
pub struct FanoutStats {
    /// Number of live connections.
    pub connection_count: usize,
    /// Number of distinct connected identities.
    pub user_count: usize,
}

impl Fanout {
    /// Create an empty fanout table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under a user identity.
    ///
    /// Returns the receiving end of the connection's outbound queue; the
    /// gateway drains it into the transport.
    pub fn register(
        &self,
        connection_id: &str,
        user_id: &str,
        role: Role,
    ) -> mpsc::UnboundedReceiver<Arc<Frame>> {
        let (tx, rx) = mpsc::unbounded_channel();

        self.connections.insert(
            connection_id.to_string(),
            Registration {
                user_id: user_id.to_string(),
                role,
                tx,
            },
        );
        self.by_user
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id.to_string());

        debug!(connection = %connection_id, user = %user_id, %role, "Connection registered");
        rx
    }

    /// Remove a connection from the addressing table.
    pub fn deregister(&self, connection_id: &str) {
        let Some((_, registration)) = self.connections.remove(connection_id) else {
            return;
        };

        if let Some(conns) = self.by_user.get(&registration.user_id) {
            conns.remove(connection_id);
            if conns.is_empty() {
                drop(conns);
                self.by_user.remove(&registration.user_id);
            }
        }

        debug!(connection = %connection_id, user = %registration.user_id, "Connection deregistered");
    }

    /// Deliver a frame to every connection of one user.
    ///
    /// Returns the number of connections reached; zero if the user is
    /// offline (the event is dropped, by design).
    pub fn notify_user(&self, user_id: &str, frame: Frame) -> usize {
        let Some(conns) = self.by_user.get(user_id) else {
            trace!(user = %user_id, "Notify: user offline, event dropped");
            return 0;
        };

        let frame = Arc::new(frame);
        let mut delivered = 0;
        for conn_id in conns.iter() {
            delivered += self.send_to(conn_id.key(), &frame);
        }
        delivered
    }

    /// Deliver a frame to every connection whose identity has `role`.
    pub fn notify_role(&self, role: Role, frame: Frame) -> usize {
        let frame = Arc::new(frame);
        let mut delivered = 0;
        for entry in self.connections.iter() {
            if entry.role != role {
                continue;
            }
            if entry.tx.send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                warn!(connection = %entry.key(), user = %entry.user_id, "Delivery failed; skipping connection");
            }
        }
        trace!(%role, delivered, "Role notification");
        delivered
    }

    /// Deliver a frame to every live connection.
    pub fn broadcast_all(&self, frame: Frame) -> usize {
        let frame = Arc::new(frame);
        let mut delivered = 0;
        for entry in self.connections.iter() {
            if entry.tx.send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                warn!(connection = %entry.key(), user = %entry.user_id, "Delivery failed; skipping connection");
            }
        }
        delivered
    }

    /// Serialize a typed payload and deliver it to one user.
    pub fn event_to_user<P: EventPayload>(&self, user_id: &str, payload: P) -> usize {
        match payload.into_frame() {
            Ok(frame) => self.notify_user(user_id, frame),
            Err(e) => {
                error!(event = P::NAME, error = %e, "Failed to serialize event payload");
                0
            }
        }
    }

    /// Serialize a typed payload and deliver it to a whole role.
    pub fn event_to_role<P: EventPayload>(&self, role: Role, payload: P) -> usize {
        match payload.into_frame() {
            Ok(frame) => self.notify_role(role, frame),
            Err(e) => {
                error!(event = P::NAME, error = %e, "Failed to serialize event payload");
                0
            }
        }
    }

    /// Number of live connections for a user.
    #[must_use]
    pub fn connection_count(&self, user_id: &str) -> usize {
        self.by_user.get(user_id).map_or(0, |c| c.len())
    }

    /// Table statistics.
    #[must_use]
    pub fn stats(&self) -> FanoutStats {
        FanoutStats {
            connection_count: self.connections.len(),
            user_count: self.by_user.len(),
        }
    }

    fn send_to(&self, connection_id: &str, frame: &Arc<Frame>) -> usize {
        match self.connections.get(connection_id) {
            Some(registration) => {
                if registration.tx.send(frame.clone()).is_ok() {
                    1
                } else {
                    // Receiver already dropped; the gateway will deregister
                    // this connection on its cleanup path.
                    warn!(connection = %connection_id, "Delivery failed; skipping connection");
                    0
                }
            }
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_protocol::events::PresenceChanged;

    fn presence_event(user: &str) -> PresenceChanged {
        PresenceChanged {
            user_id: user.to_string(),
            is_active: true,
        }
    }

    #[test]
    fn test_notify_user_targets_only_that_user() {
        let fanout = Fanout::new();
        let mut rx_a = fanout.register("c-1", "alice", Role::Rider);
        let mut rx_b = fanout.register("c-2", "bob", Role::Rider);

        let delivered = fanout.notify_user("alice", Frame::ping());
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_notify_user_reaches_all_tabs() {
        let fanout = Fanout::new();
        let mut rx_1 = fanout.register("c-1", "alice", Role::Rider);
        let mut rx_2 = fanout.register("c-2", "alice", Role::Rider);

        assert_eq!(fanout.notify_user("alice", Frame::ping()), 2);
        assert!(rx_1.try_recv().is_ok());
        assert!(rx_2.try_recv().is_ok());
    }

    #[test]
    fn test_offline_user_event_is_dropped() {
        let fanout = Fanout::new();
        assert_eq!(fanout.notify_user("ghost", Frame::ping()), 0);
    }

    #[test]
    fn test_notify_role_filters_by_role() {
        let fanout = Fanout::new();
        let mut op_rx = fanout.register("c-1", "olive", Role::Operator);
        let mut rider_rx = fanout.register("c-2", "alice", Role::Rider);

        let delivered = fanout.event_to_role(Role::Operator, presence_event("alice"));
        assert_eq!(delivered, 1);
        assert!(op_rx.try_recv().is_ok());
        assert!(rider_rx.try_recv().is_err());
    }

    #[test]
    fn test_delivery_isolation() {
        let fanout = Fanout::new();
        let rx_dead = fanout.register("c-1", "olive", Role::Operator);
        let mut rx_live = fanout.register("c-2", "omar", Role::Operator);

        // Simulate a failed connection whose receiver is gone.
        drop(rx_dead);

        let delivered = fanout.event_to_role(Role::Operator, presence_event("alice"));
        assert_eq!(delivered, 1);
        assert!(rx_live.try_recv().is_ok());
    }

    #[test]
    fn test_deregister_removes_addressing() {
        let fanout = Fanout::new();
        let _rx = fanout.register("c-1", "alice", Role::Rider);
        assert_eq!(fanout.connection_count("alice"), 1);

        fanout.deregister("c-1");
        assert_eq!(fanout.connection_count("alice"), 0);
        assert_eq!(fanout.stats().connection_count, 0);
        assert_eq!(fanout.stats().user_count, 0);
    }

    #[test]
    fn test_broadcast_all() {
        let fanout = Fanout::new();
        let mut rx_1 = fanout.register("c-1", "alice", Role::Rider);
        let mut rx_2 = fanout.register("c-2", "olive", Role::Operator);

        assert_eq!(fanout.broadcast_all(Frame::ping()), 2);
        assert!(rx_1.try_recv().is_ok());
        assert!(rx_2.try_recv().is_ok());
    }
}
