//! OCPP 2.1 messages exchanged by the overlay scenarios.

pub mod messages;
pub mod payload;
pub mod types;

pub use payload::{Action, Request, Response};
