//! The HTTP request boundary: auth resolution, routing, validation, error
//! mapping, and the live status stream.

pub mod api_error;
pub mod auth;
pub mod http_api;
pub mod state;

pub use api_error::ApiError;
pub use auth::{AuthContext, Principal};
pub use http_api::api_router;
pub use state::ApiState;
