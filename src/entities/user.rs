//! User entity - read-only view of the user directory

use super::Identity;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub uid: Identity,
    pub email: String,
    pub display_name: String,
}
