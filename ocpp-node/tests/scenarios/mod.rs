pub mod failures;
pub mod forwarding;
pub mod routing;
