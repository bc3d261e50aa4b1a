//! Administrative HTTP API for the node's configuration.
//!
//! Every route except the limited client config and its signed hash
//! requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::server::Server;

/// State shared by every admin handler.
#[derive(Clone)]
pub struct AdminState {
    pub server: Arc<Server>,
}

impl AdminState {
    pub fn new(server: Arc<Server>) -> Self {
        Self { server }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    let protected = Router::new()
        .route("/api/v1/config", get(get_config).put(put_config))
        .route("/api/v1/config/reload", post(reload_config))
        .route("/api/v1/config/environment", get(get_environment_config))
        .route("/api/v1/config/client", get(get_client_config))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ));

    Router::new()
        .route("/api/v1/config/client/limited", get(get_limited_client_config))
        .route(
            "/api/v1/config/client/assertion",
            get(get_client_config_assertion),
        )
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
