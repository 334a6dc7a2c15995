//! Typed envelopes around request and response payloads.
//!
//! An envelope is what travels between nodes: the payload plus the
//! correlation id, addressing and signatures. Frames (`Call`, `CallResult`,
//! `CallError`) are the JSON shape of an envelope on one particular link.

use serde_json::{Map, Value};

use crate::{
    overlay::{Destination, NetworkPath, NetworkingMode, Signature},
    v21::{Request, Response},
};

use super::{
    error::ProtocolError,
    frame::{Call, CallError, CallResult, OverlayHeader},
};

const SIGNATURES_KEY: &str = "signatures";

/// Correlation id, assigned once by the original sender.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl core::fmt::Display for RequestId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EnvelopeError {
    /// Payload does not match the schema of its action.
    #[error("invalid {action} payload: {reason}")]
    Payload { action: String, reason: String },
    #[error("invalid signatures: {0}")]
    Signatures(String),
    #[error("serialization failed: {0}")]
    Serialize(String),
}

fn attach_signatures(payload: Value, signatures: &[Signature]) -> Result<Value, EnvelopeError> {
    if signatures.is_empty() {
        return Ok(payload);
    }
    let mut map = match payload {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        _ => return Err(EnvelopeError::Serialize("payload is not an object".into())),
    };
    let signatures =
        serde_json::to_value(signatures).map_err(|e| EnvelopeError::Serialize(e.to_string()))?;
    map.insert(SIGNATURES_KEY.into(), signatures);
    Ok(Value::Object(map))
}

fn detach_signatures(payload: &mut Value) -> Result<Vec<Signature>, EnvelopeError> {
    match payload.as_object_mut().and_then(|map| map.remove(SIGNATURES_KEY)) {
        Some(raw) => {
            serde_json::from_value(raw).map_err(|e| EnvelopeError::Signatures(e.to_string()))
        }
        None => Ok(Vec::new()),
    }
}

fn header_for(
    mode: NetworkingMode,
    destination: &Destination,
    network_path: &NetworkPath,
) -> Option<OverlayHeader> {
    match mode {
        NetworkingMode::Standard => None,
        NetworkingMode::OverlayNetwork => Some(OverlayHeader {
            destination: destination.clone(),
            network_path: network_path.clone(),
        }),
    }
}

fn addressing(
    header: Option<OverlayHeader>,
    implicit_destination: Destination,
) -> (Destination, NetworkPath, NetworkingMode) {
    match header {
        Some(h) => (h.destination, h.network_path, NetworkingMode::OverlayNetwork),
        None => (implicit_destination, NetworkPath::empty(), NetworkingMode::Standard),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    pub request_id: RequestId,
    pub destination: Destination,
    pub network_path: NetworkPath,
    pub networking_mode: NetworkingMode,
    pub signatures: Vec<Signature>,
    pub payload: Request,
}

impl RequestEnvelope {
    /// Wraps a payload under a fresh request id. An empty path means the
    /// message has not left its originating standard-mode link.
    pub fn wrap(
        payload: Request,
        destination: Destination,
        network_path: NetworkPath,
        signatures: Option<Vec<Signature>>,
    ) -> Self {
        let networking_mode = if network_path.is_empty() {
            NetworkingMode::Standard
        } else {
            NetworkingMode::OverlayNetwork
        };
        Self {
            request_id: RequestId::new(),
            destination,
            network_path,
            networking_mode,
            signatures: signatures.unwrap_or_default(),
            payload,
        }
    }

    pub fn unwrap(self) -> (Request, NetworkPath, Vec<Signature>) {
        (self.payload, self.network_path, self.signatures)
    }

    pub fn action(&self) -> &str {
        self.payload.action()
    }

    pub fn to_call(&self, mode: NetworkingMode) -> Result<Call, EnvelopeError> {
        let payload = self
            .payload
            .to_value()
            .map_err(|e| EnvelopeError::Serialize(e.to_string()))?;
        Ok(Call {
            unique_id: self.request_id.to_string(),
            action: self.action().to_string(),
            payload: attach_signatures(payload, &self.signatures)?,
            header: header_for(mode, &self.destination, &self.network_path),
        })
    }

    /// `implicit_destination` applies to standard-mode frames, which carry
    /// no routing header of their own.
    pub fn from_call(call: Call, implicit_destination: Destination) -> Result<Self, EnvelopeError> {
        let Call {
            unique_id,
            action,
            mut payload,
            header,
        } = call;
        let signatures = detach_signatures(&mut payload)?;
        let payload = Request::from_value(&action, payload).map_err(|e| EnvelopeError::Payload {
            action: action.clone(),
            reason: e.to_string(),
        })?;
        let (destination, network_path, networking_mode) = addressing(header, implicit_destination);
        Ok(Self {
            request_id: unique_id.into(),
            destination,
            network_path,
            networking_mode,
            signatures,
            payload,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    /// Id of the request this answers.
    pub request_id: RequestId,
    pub destination: Destination,
    pub network_path: NetworkPath,
    pub networking_mode: NetworkingMode,
    pub signatures: Vec<Signature>,
    pub payload: Response,
}

impl ResponseEnvelope {
    pub fn wrap(
        request_id: RequestId,
        payload: Response,
        destination: Destination,
        network_path: NetworkPath,
        signatures: Option<Vec<Signature>>,
    ) -> Self {
        let networking_mode = if network_path.is_empty() {
            NetworkingMode::Standard
        } else {
            NetworkingMode::OverlayNetwork
        };
        Self {
            request_id,
            destination,
            network_path,
            networking_mode,
            signatures: signatures.unwrap_or_default(),
            payload,
        }
    }

    pub fn unwrap(self) -> (Response, NetworkPath, Vec<Signature>) {
        (self.payload, self.network_path, self.signatures)
    }

    pub fn action(&self) -> &str {
        self.payload.action()
    }

    pub fn to_call_result(&self, mode: NetworkingMode) -> Result<CallResult, EnvelopeError> {
        let payload = self
            .payload
            .to_value()
            .map_err(|e| EnvelopeError::Serialize(e.to_string()))?;
        Ok(CallResult {
            unique_id: self.request_id.to_string(),
            payload: attach_signatures(payload, &self.signatures)?,
            header: header_for(mode, &self.destination, &self.network_path),
        })
    }

    /// Response frames do not name their action; `action` is taken from the
    /// request being answered.
    pub fn from_call_result(
        result: CallResult,
        action: &str,
        implicit_destination: Destination,
    ) -> Result<Self, EnvelopeError> {
        let CallResult {
            unique_id,
            mut payload,
            header,
        } = result;
        let signatures = detach_signatures(&mut payload)?;
        let payload = Response::from_value(action, payload).map_err(|e| EnvelopeError::Payload {
            action: action.to_string(),
            reason: e.to_string(),
        })?;
        let (destination, network_path, networking_mode) = addressing(header, implicit_destination);
        Ok(Self {
            request_id: unique_id.into(),
            destination,
            network_path,
            networking_mode,
            signatures,
            payload,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEnvelope {
    pub request_id: RequestId,
    pub destination: Destination,
    pub network_path: NetworkPath,
    pub networking_mode: NetworkingMode,
    pub error_code: ProtocolError,
    pub description: String,
    pub details: Value,
}

impl ErrorEnvelope {
    pub fn new(
        request_id: RequestId,
        error_code: ProtocolError,
        description: impl Into<String>,
        destination: Destination,
        network_path: NetworkPath,
    ) -> Self {
        let networking_mode = if network_path.is_empty() {
            NetworkingMode::Standard
        } else {
            NetworkingMode::OverlayNetwork
        };
        Self {
            request_id,
            destination,
            network_path,
            networking_mode,
            error_code,
            description: description.into(),
            details: Value::Object(Map::new()),
        }
    }

    pub fn to_call_error(&self, mode: NetworkingMode) -> CallError {
        CallError {
            unique_id: self.request_id.to_string(),
            error_code: self.error_code,
            error_description: self.description.clone(),
            error_details: self.details.clone(),
            header: header_for(mode, &self.destination, &self.network_path),
        }
    }

    pub fn from_call_error(error: CallError, implicit_destination: Destination) -> Self {
        let (destination, network_path, networking_mode) =
            addressing(error.header, implicit_destination);
        Self {
            request_id: error.unique_id.into(),
            destination,
            network_path,
            networking_mode,
            error_code: error.error_code,
            description: error.error_description,
            details: error.error_details,
        }
    }
}

/// What comes back for a request: a result or an RPC error.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseMessage {
    Result(ResponseEnvelope),
    Error(ErrorEnvelope),
}

impl ResponseMessage {
    pub fn request_id(&self) -> &RequestId {
        match self {
            ResponseMessage::Result(r) => &r.request_id,
            ResponseMessage::Error(e) => &e.request_id,
        }
    }

    pub fn network_path(&self) -> &NetworkPath {
        match self {
            ResponseMessage::Result(r) => &r.network_path,
            ResponseMessage::Error(e) => &e.network_path,
        }
    }

    pub fn set_addressing(&mut self, destination: Destination, network_path: NetworkPath) {
        let mode = if network_path.is_empty() {
            NetworkingMode::Standard
        } else {
            NetworkingMode::OverlayNetwork
        };
        match self {
            ResponseMessage::Result(r) => {
                r.destination = destination;
                r.network_path = network_path;
                r.networking_mode = mode;
            }
            ResponseMessage::Error(e) => {
                e.destination = destination;
                e.network_path = network_path;
                e.networking_mode = mode;
            }
        }
    }

    pub fn encode(&self, mode: NetworkingMode) -> Result<String, EnvelopeError> {
        use super::frame::Encode;
        match self {
            ResponseMessage::Result(r) => Ok(r.to_call_result(mode)?.encode()),
            ResponseMessage::Error(e) => Ok(e.to_call_error(mode).encode()),
        }
    }
}
