//! HTTP API handlers for lungscan-api

pub mod auth;
pub mod health;
pub mod predict;
pub mod root;

pub use auth::{auth_middleware, API_KEY_HEADER};
pub use health::health_routes;
pub use predict::predict;
pub use root::root;
