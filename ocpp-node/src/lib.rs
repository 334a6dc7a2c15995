//! A node of an OCPP overlay network.
//!
//! Charging stations, local controllers and the CSMS all run a [`Node`];
//! the [`NodeRole`] decides whether it relays traffic. Transports are
//! plugged in through [`LinkSender`] and a channel of inbound text frames.

pub mod config;
pub mod error;
pub mod events;
pub mod forwarding;
pub mod handler;
pub mod link;
pub mod node;
pub mod role;
pub mod router;
pub mod secure;
pub mod signature;

pub use config::{NodeConfig, StaticRoute};
pub use error::{CallOutcomeExt, NodeError, ResultCode, RoutingError, SecureTransferError, SignatureError};
pub use events::NodeEvent;
pub use forwarding::{DefaultForwarding, ForwardingEngine, ForwardingResult, ImmediateResponse, Verdict};
pub use handler::{CallFault, RequestContext};
pub use link::{Link, LinkSender, SendResult};
pub use node::{CallOptions, Node, NodeBuilder};
pub use role::NodeRole;
pub use secure::{KeyStore, MemoryKeyStore, SymmetricKey};
pub use signature::{KeyPair, SignaturePolicy, SignaturePolicyContext, VerificationAction};
