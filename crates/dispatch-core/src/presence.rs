//! Presence registry.
//!
//! A user is online as long as at least one connection is open, so the
//! registry keeps a per-user connection count rather than a boolean. The
//! durable `isActive` flag flips and operators are notified only on the
//! 0->1 and 1->0 edges; opening a second tab is silent.

use crate::error::DispatchError;
use crate::fanout::Fanout;
use crate::model::{Role, UserId};
use crate::store::Store;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dispatch_protocol::events::PresenceChanged;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tracks which user identities hold open connections.
#[derive(Clone)]
pub struct PresenceRegistry {
    counts: Arc<DashMap<UserId, usize>>,
    store: Arc<dyn Store>,
    fanout: Arc<Fanout>,
}

impl PresenceRegistry {
    /// Create a registry over the store and fanout handles.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, fanout: Arc<Fanout>) -> Self {
        Self {
            counts: Arc::new(DashMap::new()),
            store,
            fanout,
        }
    }

    /// Record an opened connection for a user.
    ///
    /// On the 0->1 edge the durable flag is set and a `presence-changed`
    /// event goes to the operator role. Returns whether this was the edge.
    ///
    /// # Errors
    ///
    /// Propagates store failures; the counter is incremented regardless,
    /// since the connection is open either way.
    pub async fn connection_opened(&self, user_id: &str) -> Result<bool, DispatchError> {
        let went_online = {
            let mut count = self.counts.entry(user_id.to_string()).or_insert(0);
            *count += 1;
            *count == 1
        };

        if !went_online {
            debug!(user = %user_id, "Additional connection for online user");
            return Ok(false);
        }

        self.mark(user_id, true).await?;
        Ok(true)
    }

    /// Record a closed connection for a user.
    ///
    /// On the 1->0 edge the durable flag is cleared and operators are
    /// notified. Returns whether this was the edge.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn connection_closed(&self, user_id: &str) -> Result<bool, DispatchError> {
        let went_offline = match self.counts.entry(user_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let count = entry.get_mut();
                *count = count.saturating_sub(1);
                if *count == 0 {
                    entry.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => {
                warn!(user = %user_id, "Close for untracked user; ignoring");
                false
            }
        };

        if !went_offline {
            return Ok(false);
        }

        self.mark(user_id, false).await?;
        Ok(true)
    }

    /// Number of open connections for a user.
    #[must_use]
    pub fn connection_count(&self, user_id: &str) -> usize {
        self.counts.get(user_id).map_or(0, |c| *c)
    }

    /// Whether a user currently holds any open connection.
    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.connection_count(user_id) > 0
    }

    async fn mark(&self, user_id: &str, is_active: bool) -> Result<(), DispatchError> {
        self.store.set_user_active(user_id, is_active).await?;

        debug!(user = %user_id, is_active, "Presence edge");
        self.fanout.event_to_role(
            Role::Operator,
            PresenceChanged {
                user_id: user_id.to_string(),
                is_active,
            },
        );
        Ok(())
    }
}
