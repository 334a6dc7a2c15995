use serde_json::Value;

use super::{
    error::ProtocolError,
    frame::{Call, CallError, CallResult, Encode, OverlayHeader, CALL, CALL_ERROR, CALL_RESULT},
};

#[derive(Debug, Clone)]
pub struct Invalid {
    /// Message type id, when the frame got far enough to have one.
    pub message_type: Option<u64>,
    pub unique_id: Option<String>,
    pub message: String,
    pub err_msg: String,
}

#[derive(Debug, Clone)]
pub enum CallResponse {
    CallResult(CallResult),
    CallError(CallError),
}

#[derive(Debug, Clone)]
pub enum OcppMessage {
    Call(Call),
    CallResponse(CallResponse),
    Invalid(Invalid),
}

impl CallResponse {
    pub fn unique_id(&self) -> &str {
        match self {
            CallResponse::CallResult(t) => &t.unique_id,
            CallResponse::CallError(t) => &t.unique_id,
        }
    }

    pub fn header(&self) -> Option<&OverlayHeader> {
        match self {
            CallResponse::CallResult(t) => t.header.as_ref(),
            CallResponse::CallError(t) => t.header.as_ref(),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            CallResponse::CallResult(t) => t.encode(),
            CallResponse::CallError(t) => t.encode(),
        }
    }
}

fn invalid(
    message_type: Option<u64>,
    unique_id: Option<String>,
    message: &str,
    err_msg: impl Into<String>,
) -> OcppMessage {
    OcppMessage::Invalid(Invalid {
        message_type,
        unique_id,
        message: message.to_string(),
        err_msg: err_msg.into(),
    })
}

/// Frames have a fixed arity in standard mode and one trailing header
/// object in overlay-network mode.
fn split_header(arr: &[Value], base_len: usize) -> Result<Option<OverlayHeader>, String> {
    match arr.len() {
        n if n == base_len => Ok(None),
        n if n == base_len + 1 => serde_json::from_value::<OverlayHeader>(arr[base_len].clone())
            .map(Some)
            .map_err(|e| format!("Invalid overlay header: {e}")),
        n => Err(format!("Unexpected frame length {n}")),
    }
}

impl OcppMessage {
    pub fn decode(message: &str) -> OcppMessage {
        let raw: Value = match serde_json::from_str(message) {
            Ok(val) => val,
            Err(e) => return invalid(None, None, message, format!("JSON parse error: {e}")),
        };

        let arr = match raw {
            Value::Array(arr) => arr,
            _ => return invalid(None, None, message, "Expected JSON array"),
        };

        let message_type = arr.first().and_then(|v| v.as_u64());
        let unique_id = arr.get(1).and_then(|v| v.as_str()).map(|s| s.to_string());
        let Some(unique_id) = unique_id else {
            return invalid(message_type, None, message, "Missing unique id");
        };

        match message_type {
            Some(CALL) => {
                let header = match split_header(&arr, 4) {
                    Ok(h) => h,
                    Err(e) => return invalid(message_type, Some(unique_id), message, e),
                };
                match (arr[2].as_str(), arr[3].is_object()) {
                    (Some(action), true) => OcppMessage::Call(Call {
                        unique_id,
                        action: action.to_string(),
                        payload: arr[3].clone(),
                        header,
                    }),
                    _ => invalid(message_type, Some(unique_id), message, "Invalid Call structure"),
                }
            }
            Some(CALL_RESULT) => match split_header(&arr, 3) {
                Ok(header) => OcppMessage::CallResponse(CallResponse::CallResult(CallResult {
                    unique_id,
                    payload: arr[2].clone(),
                    header,
                })),
                Err(e) => invalid(message_type, Some(unique_id), message, e),
            },
            Some(CALL_ERROR) => {
                let header = match split_header(&arr, 5) {
                    Ok(h) => h,
                    Err(e) => return invalid(message_type, Some(unique_id), message, e),
                };
                let error_code = arr[2].as_str().and_then(|s| s.parse::<ProtocolError>().ok());
                let error_description = arr[3].as_str();
                match (error_code, error_description) {
                    (Some(error_code), Some(error_description)) => {
                        OcppMessage::CallResponse(CallResponse::CallError(CallError {
                            unique_id,
                            error_code,
                            error_description: error_description.to_string(),
                            error_details: arr[4].clone(),
                            header,
                        }))
                    }
                    _ => invalid(message_type, Some(unique_id), message, "Invalid CallError structure"),
                }
            }
            _ => invalid(message_type, Some(unique_id), message, "Unknown or malformed message"),
        }
    }
}
