//! Application State - shared state of the server
//!
//! Holds the repositories, the identity verifier and the transient real-time
//! components (presence, broadcast groups, notification bindings). Every component is
//! owned by the state instance: two `AppState`s in the same process share nothing.

use crate::core::auth::{IdentityVerifier, JwtVerifier};
use crate::repositories::{
    ListingRepository, MessageRepository, RoomRepository, UserRepository,
};
use crate::ws::chatmap::RoomChannels;
use crate::ws::presence::SessionRegistry;
use crate::ws::usermap::NotificationHub;
use crate::ws::TIMEOUT_DURATION_SECONDS;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

pub struct AppState {
    /// Room Directory persistence
    pub room: RoomRepository,

    /// Message Store
    pub msg: MessageRepository,

    /// Read-only user directory
    pub user: UserRepository,

    /// Read-only listing catalog
    pub listing: ListingRepository,

    /// Turns connection credentials into identities
    pub verifier: Arc<dyn IdentityVerifier>,

    /// Room id -> identities holding an open room connection
    pub presence: SessionRegistry,

    /// Room id -> broadcast group of the open room connections
    pub chats_online: RoomChannels,

    /// Identity -> open global notification connections
    pub users_online: NotificationHub,

    /// A bound connection silent for this long is closed
    pub idle_timeout: Duration,
}

impl AppState {
    /// Creates the state with a JWT verifier built from `jwt_secret`.
    pub fn new(pool: SqlitePool, jwt_secret: String) -> Self {
        Self::with_verifier(pool, Arc::new(JwtVerifier::new(&jwt_secret)))
    }

    /// Creates the state around an arbitrary identity verifier.
    pub fn with_verifier(pool: SqlitePool, verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self {
            room: RoomRepository::new(pool.clone()),
            msg: MessageRepository::new(pool.clone()),
            user: UserRepository::new(pool.clone()),
            listing: ListingRepository::new(pool),
            verifier,
            presence: SessionRegistry::new(),
            chats_online: RoomChannels::new(),
            users_online: NotificationHub::new(),
            idle_timeout: Duration::from_secs(TIMEOUT_DURATION_SECONDS),
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}
