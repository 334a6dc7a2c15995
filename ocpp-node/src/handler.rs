use std::sync::Arc;

use ocpp_overlay_core::{
    format::{envelope::RequestEnvelope, error::ProtocolError},
    overlay::{NetworkPath, NetworkingNodeId},
    v21::Response,
};

use crate::secure::KeyStore;

/// What a local handler sees besides the request itself.
pub struct RequestContext<'a> {
    pub node_id: &'a NetworkingNodeId,
    /// Peer on the link the request arrived on.
    pub from: &'a NetworkingNodeId,
    /// Originator: the first hop of the path, or the link peer for a
    /// standard-mode frame.
    pub source: &'a NetworkingNodeId,
    pub network_path: &'a NetworkPath,
    pub key_store: Option<&'a dyn KeyStore>,
}

/// RPC error a handler answers with instead of a response payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFault {
    pub code: ProtocolError,
    pub description: String,
}

impl CallFault {
    pub fn new(code: ProtocolError, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

pub type RequestHandler =
    Arc<dyn Fn(&RequestContext<'_>, &RequestEnvelope) -> Result<Response, CallFault> + Send + Sync>;
