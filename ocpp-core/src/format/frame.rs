use serde_json::{json, Value};

use crate::overlay::{Destination, NetworkPath};

use super::error::ProtocolError;

pub const CALL: u64 = 2;
pub const CALL_RESULT: u64 = 3;
pub const CALL_ERROR: u64 = 4;

/// Routing metadata appended to a frame in overlay-network mode.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OverlayHeader {
    pub destination: Destination,
    #[serde(default)]
    pub network_path: NetworkPath,
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct Call {
    pub unique_id: String,
    pub action: String,
    pub payload: Value,
    pub header: Option<OverlayHeader>,
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct CallResult {
    pub unique_id: String,
    pub payload: Value,
    pub header: Option<OverlayHeader>,
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct CallError {
    pub unique_id: String,
    pub error_code: ProtocolError,
    pub error_description: String,
    pub error_details: Value,
    pub header: Option<OverlayHeader>,
}

impl CallResult {
    pub fn new(unique_id: String, payload: Value) -> Self {
        Self {
            unique_id,
            payload,
            header: None,
        }
    }
}

impl CallError {
    pub fn new(unique_id: String, error_code: ProtocolError) -> Self {
        Self {
            unique_id,
            error_code,
            error_description: String::new(),
            error_details: json!({}),
            header: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.error_description = description.into();
        self
    }
}

pub trait Encode {
    fn encode(&self) -> String;
}

fn push_header(mut frame: Vec<Value>, header: &Option<OverlayHeader>) -> String {
    if let Some(header) = header {
        frame.push(json!(header));
    }
    Value::Array(frame).to_string()
}

impl Encode for Call {
    fn encode(&self) -> String {
        let frame = vec![
            json!(CALL),
            json!(self.unique_id),
            json!(self.action),
            self.payload.clone(),
        ];
        push_header(frame, &self.header)
    }
}

impl Encode for CallResult {
    fn encode(&self) -> String {
        let frame = vec![json!(CALL_RESULT), json!(self.unique_id), self.payload.clone()];
        push_header(frame, &self.header)
    }
}

impl Encode for CallError {
    fn encode(&self) -> String {
        let frame = vec![
            json!(CALL_ERROR),
            json!(self.unique_id),
            json!(self.error_code.as_str()),
            json!(self.error_description),
            self.error_details.clone(),
        ];
        push_header(frame, &self.header)
    }
}
