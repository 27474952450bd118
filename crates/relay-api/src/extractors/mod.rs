//! Custom Axum extractors.

pub mod user;

pub use user::ForwardedUser;
