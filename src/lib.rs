//! Marketplace chat server library - exposes the main modules for the tests

pub mod core;
pub mod dtos;
pub mod entities;
pub mod repositories;
pub mod services;
pub mod ws;

pub use crate::core::{AppError, AppState, ChatError, auth, config};
pub use crate::services::root;

use axum::{
    Router, middleware,
    routing::{any, get, post},
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Builds the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    use crate::ws::{global_ws_handler, room_ws_handler};

    Router::new()
        .route("/", get(root))
        .merge(configure_room_routes(state.clone()))
        // the WebSocket handlers authenticate on their own: browsers cannot set headers
        // on an upgrade, so the credential may also come from `?token=`
        .route("/ws/global/", any(global_ws_handler))
        .route("/ws/chat/{rid}/", any(room_ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Configures the authenticated HTTP routes
fn configure_room_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    use crate::core::authentication_middleware;
    use crate::services::*;

    Router::new()
        .route("/get_rooms/", get(get_rooms))
        .route("/get_room/{rid}/", get(get_room))
        .route("/get_or_create_room/", post(get_or_create_room))
        .route("/get_messages/{rid}/", get(get_messages))
        .route("/block_user/{uid}/", post(block_user))
        .layer(middleware::from_fn_with_state(
            state,
            authentication_middleware,
        ))
}
