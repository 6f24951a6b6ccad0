//! HTTP handlers for the identity broker.

pub mod broker;
pub mod metrics;
pub mod user;

pub use broker::{authp_callback, login, status, verify};
pub use user::get_me;
