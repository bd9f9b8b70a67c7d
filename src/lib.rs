//! Mail Alarm: phone-call escalation for important email.

pub mod api;
pub mod config;
pub mod error;
pub mod escalation;
pub mod gateway;
pub mod monitor;
pub mod store;

#[cfg(test)]
mod testing;
