//! Client portal backend: orders and quotes, direct-to-storage multipart
//! uploads, batch delivery, and client/staff conversations.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod storage;

use axum::Router;
use state::AppState;

/// The full HTTP application over `state`.
pub fn app(state: AppState) -> Router {
    routes::routes().with_state(state)
}
