pub mod envelope;
pub mod error;
pub mod frame;
pub mod message;
