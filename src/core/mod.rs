//! Core Module - Infrastructure components
//!
//! - Authentication (identity verification, JWT, middleware)
//! - Configuration
//! - Error handling
//! - Application state

pub mod auth;
pub mod config;
pub mod error;
pub mod state;

// Re-exports
pub use auth::{
    AuthenticatedUser, Claims, IdentityVerifier, JwtVerifier, authentication_middleware,
    encode_jwt, extract_credential,
};
pub use config::Config;
pub use error::{AppError, ChatError};
pub use state::AppState;
