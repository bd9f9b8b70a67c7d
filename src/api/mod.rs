//! HTTP surface.

pub mod routes;
pub mod webhook;

pub use routes::{AppState, alarm_routes};
