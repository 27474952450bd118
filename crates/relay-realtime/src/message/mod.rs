//! WebSocket frame types, validation, and serialization.

pub mod serializer;
pub mod types;
pub mod validator;

pub use types::{InboundFrame, OutboundFrame};
