//! Notification Hub - global connections by identity
//!
//! An identity may hold several global connections (one per tab). Each gets its own
//! notification queue, drained by that connection's writer task.

use crate::dtos::NotificationFrame;
use crate::entities::Identity;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, instrument, warn};

pub type ConnectionId = u64;

pub type NotificationSender = UnboundedSender<Arc<NotificationFrame>>;

/// Identity -> open global connections. One user may have several tabs open, each
/// with its own binding; a notification goes to all of them.
pub struct NotificationHub {
    users_online: DashMap<Identity, Vec<(ConnectionId, NotificationSender)>>,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        NotificationHub {
            users_online: DashMap::new(),
        }
    }

    #[instrument(skip(self, tx))]
    pub fn register_online(
        &self,
        identity: &str,
        connection_id: ConnectionId,
        tx: NotificationSender,
    ) {
        let mut bindings = self.users_online.entry(identity.to_string()).or_default();
        bindings.push((connection_id, tx));
        info!(
            bindings = bindings.len(),
            "Global connection registered as online"
        );
    }

    /// Removes one binding. Removing twice, or a binding that never existed, is a no-op.
    #[instrument(skip(self))]
    pub fn remove_from_online(&self, identity: &str, connection_id: ConnectionId) -> bool {
        let (removed, now_empty) = match self.users_online.get_mut(identity) {
            Some(mut bindings) => {
                let before = bindings.len();
                bindings.retain(|(id, _)| *id != connection_id);
                (bindings.len() < before, bindings.is_empty())
            }
            None => (false, false),
        };

        if now_empty {
            self.users_online
                .remove_if(identity, |_, bindings| bindings.is_empty());
        }
        if removed {
            info!("Global connection removed from online");
        }
        removed
    }

    /// Hands `frame` to every binding of `identity`. Returns how many accepted it;
    /// zero when the user has no global connection.
    #[instrument(skip(self, frame))]
    pub fn notify(&self, identity: &str, frame: Arc<NotificationFrame>) -> usize {
        let Some(bindings) = self.users_online.get(identity) else {
            debug!("User not online, notification dropped");
            return 0;
        };

        let mut delivered = 0;
        for (connection_id, tx) in bindings.iter() {
            match tx.send(frame.clone()) {
                Ok(()) => delivered += 1,
                // writer already gone, its binding is about to be removed
                Err(_) => warn!(connection_id, "Failed to hand notification to connection"),
            }
        }
        debug!(delivered, "Notification delivered");
        delivered
    }

    pub fn is_user_online(&self, identity: &str) -> bool {
        self.users_online.contains_key(identity)
    }

    /// Open global connections of `identity`.
    pub fn connection_count(&self, identity: &str) -> usize {
        self.users_online
            .get(identity)
            .map(|bindings| bindings.len())
            .unwrap_or(0)
    }

    /// Count of users with at least one global connection
    pub fn online_count(&self) -> usize {
        self.users_online.len()
    }
}
