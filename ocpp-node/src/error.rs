use ocpp_overlay_core::{
    format::{envelope::EnvelopeError, error::ProtocolError},
    overlay::NetworkingNodeId,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoutingError {
    #[error("no route to {0}")]
    RouteNotFound(NetworkingNodeId),
    #[error("destination is empty")]
    EmptyDestination,
    #[error("{0} does not forward messages")]
    ForwardingNotAllowed(NetworkingNodeId),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SignatureError {
    #[error("invalid public key: {0}")]
    InvalidKey(String),
    #[error("malformed signature: {0}")]
    InvalidFormat(String),
    #[error("no valid signature for {action}")]
    Rejected { action: String },
    #[error("could not serialize signed content: {0}")]
    Content(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SecureTransferError {
    #[error("no key {key_id} known for {source_id}")]
    UnknownKey { source_id: NetworkingNodeId, key_id: u32 },
    #[error("ciphertext truncated")]
    Truncated,
    #[error("unsupported secure block version {0}")]
    UnsupportedVersion(u8),
    #[error("decryption failed, wrong key or tampered data")]
    Decryption,
    #[error("encryption failed")]
    Encryption,
    #[error("counter {counter} already seen for key {key_id}")]
    Replay { key_id: u32, counter: u64 },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    SecureTransfer(#[from] SecureTransferError),
    #[error("transport failure towards {peer}: {reason}")]
    Transport { peer: NetworkingNodeId, reason: String },
    #[error("request timed out")]
    Timeout,
    #[error("request cancelled")]
    Cancelled,
    #[error("peer answered {code}: {description}")]
    Protocol { code: ProtocolError, description: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("unexpected response payload for {0}")]
    UnexpectedResponse(String),
    #[error("envelope error: {0}")]
    Envelope(String),
}

impl From<EnvelopeError> for NodeError {
    fn from(value: EnvelopeError) -> Self {
        NodeError::Envelope(value.to_string())
    }
}

/// Coarse outcome of a call, as reported to the original caller.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    Timeout,
    NetworkError,
    SignatureError,
    ProtocolError,
    RouteNotFound,
    Cancelled,
    FormationViolation,
}

impl NodeError {
    pub fn result_code(&self) -> ResultCode {
        match self {
            NodeError::Routing(_) => ResultCode::RouteNotFound,
            NodeError::Signature(_) => ResultCode::SignatureError,
            NodeError::SecureTransfer(_) => ResultCode::SignatureError,
            NodeError::Transport { .. } => ResultCode::NetworkError,
            NodeError::Timeout => ResultCode::Timeout,
            NodeError::Cancelled => ResultCode::Cancelled,
            NodeError::Protocol { code, .. } => match code {
                ProtocolError::SecurityError => ResultCode::SignatureError,
                ProtocolError::FormationViolation => ResultCode::FormationViolation,
                _ => ResultCode::ProtocolError,
            },
            NodeError::MalformedResponse(_)
            | NodeError::UnexpectedResponse(_)
            | NodeError::Envelope(_) => ResultCode::FormationViolation,
        }
    }
}

pub trait CallOutcomeExt {
    fn result_code(&self) -> ResultCode;
}

impl<T> CallOutcomeExt for Result<T, NodeError> {
    fn result_code(&self) -> ResultCode {
        match self {
            Ok(_) => ResultCode::Ok,
            Err(e) => e.result_code(),
        }
    }
}
