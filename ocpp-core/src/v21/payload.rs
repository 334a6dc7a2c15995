use core::str::FromStr;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use super::messages::{
    boot_notification::{BootNotificationRequest, BootNotificationResponse},
    data_transfer::{DataTransferRequest, DataTransferResponse},
    heartbeat::{HeartbeatRequest, HeartbeatResponse},
    reset::{ResetRequest, ResetResponse},
    secure_data_transfer::{SecureDataTransferRequest, SecureDataTransferResponse},
};

#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    BootNotification,
    Heartbeat,
    Reset,
    DataTransfer,
    SecureDataTransfer,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::BootNotification => "BootNotification",
            Action::Heartbeat => "Heartbeat",
            Action::Reset => "Reset",
            Action::DataTransfer => "DataTransfer",
            Action::SecureDataTransfer => "SecureDataTransfer",
        }
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BootNotification" => Ok(Action::BootNotification),
            "Heartbeat" => Ok(Action::Heartbeat),
            "Reset" => Ok(Action::Reset),
            "DataTransfer" => Ok(Action::DataTransfer),
            "SecureDataTransfer" => Ok(Action::SecureDataTransfer),
            _ => Err(()),
        }
    }
}

/// Request payloads. Actions this crate has no type for stay `Raw` so that
/// relays can carry them untouched.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    BootNotification(BootNotificationRequest),
    Heartbeat(HeartbeatRequest),
    Reset(ResetRequest),
    DataTransfer(DataTransferRequest),
    SecureDataTransfer(SecureDataTransferRequest),
    Raw { action: String, payload: Value },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    BootNotification(BootNotificationResponse),
    Heartbeat(HeartbeatResponse),
    Reset(ResetResponse),
    DataTransfer(DataTransferResponse),
    SecureDataTransfer(SecureDataTransferResponse),
    Raw { action: String, payload: Value },
}

fn typed<T: DeserializeOwned>(payload: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(payload)
}

fn untyped<T: Serialize>(payload: &T) -> Result<Value, serde_json::Error> {
    serde_json::to_value(payload)
}

impl Request {
    pub fn action(&self) -> &str {
        match self {
            Request::BootNotification(_) => Action::BootNotification.as_str(),
            Request::Heartbeat(_) => Action::Heartbeat.as_str(),
            Request::Reset(_) => Action::Reset.as_str(),
            Request::DataTransfer(_) => Action::DataTransfer.as_str(),
            Request::SecureDataTransfer(_) => Action::SecureDataTransfer.as_str(),
            Request::Raw { action, .. } => action,
        }
    }

    pub fn from_value(action: &str, payload: Value) -> Result<Self, serde_json::Error> {
        let req = match action.parse::<Action>() {
            Ok(Action::BootNotification) => Request::BootNotification(typed(payload)?),
            Ok(Action::Heartbeat) => Request::Heartbeat(typed(payload)?),
            Ok(Action::Reset) => Request::Reset(typed(payload)?),
            Ok(Action::DataTransfer) => Request::DataTransfer(typed(payload)?),
            Ok(Action::SecureDataTransfer) => Request::SecureDataTransfer(typed(payload)?),
            Err(_) => Request::Raw {
                action: action.to_string(),
                payload,
            },
        };
        Ok(req)
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Request::BootNotification(t) => untyped(t),
            Request::Heartbeat(t) => untyped(t),
            Request::Reset(t) => untyped(t),
            Request::DataTransfer(t) => untyped(t),
            Request::SecureDataTransfer(t) => untyped(t),
            Request::Raw { payload, .. } => Ok(payload.clone()),
        }
    }
}

impl Response {
    pub fn action(&self) -> &str {
        match self {
            Response::BootNotification(_) => Action::BootNotification.as_str(),
            Response::Heartbeat(_) => Action::Heartbeat.as_str(),
            Response::Reset(_) => Action::Reset.as_str(),
            Response::DataTransfer(_) => Action::DataTransfer.as_str(),
            Response::SecureDataTransfer(_) => Action::SecureDataTransfer.as_str(),
            Response::Raw { action, .. } => action,
        }
    }

    /// Responses carry no action on the wire; the caller supplies the action
    /// of the request they answer.
    pub fn from_value(action: &str, payload: Value) -> Result<Self, serde_json::Error> {
        let res = match action.parse::<Action>() {
            Ok(Action::BootNotification) => Response::BootNotification(typed(payload)?),
            Ok(Action::Heartbeat) => Response::Heartbeat(typed(payload)?),
            Ok(Action::Reset) => Response::Reset(typed(payload)?),
            Ok(Action::DataTransfer) => Response::DataTransfer(typed(payload)?),
            Ok(Action::SecureDataTransfer) => Response::SecureDataTransfer(typed(payload)?),
            Err(_) => Response::Raw {
                action: action.to_string(),
                payload,
            },
        };
        Ok(res)
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Response::BootNotification(t) => untyped(t),
            Response::Heartbeat(t) => untyped(t),
            Response::Reset(t) => untyped(t),
            Response::DataTransfer(t) => untyped(t),
            Response::SecureDataTransfer(t) => untyped(t),
            Response::Raw { payload, .. } => Ok(payload.clone()),
        }
    }
}

macro_rules! payload_from {
    ($target:ident, $variant:ident, $ty:ty) => {
        impl From<$ty> for $target {
            fn from(value: $ty) -> Self {
                $target::$variant(value)
            }
        }
    };
}

payload_from!(Request, BootNotification, BootNotificationRequest);
payload_from!(Request, Heartbeat, HeartbeatRequest);
payload_from!(Request, Reset, ResetRequest);
payload_from!(Request, DataTransfer, DataTransferRequest);
payload_from!(Request, SecureDataTransfer, SecureDataTransferRequest);
payload_from!(Response, BootNotification, BootNotificationResponse);
payload_from!(Response, Heartbeat, HeartbeatResponse);
payload_from!(Response, Reset, ResetResponse);
payload_from!(Response, DataTransfer, DataTransferResponse);
payload_from!(Response, SecureDataTransfer, SecureDataTransferResponse);

/// Typed view of a response; hands the original back when the action differs.
macro_rules! response_try_into {
    ($variant:ident, $ty:ty) => {
        impl TryFrom<Response> for $ty {
            type Error = Response;

            fn try_from(value: Response) -> Result<Self, Self::Error> {
                match value {
                    Response::$variant(inner) => Ok(inner),
                    other => Err(other),
                }
            }
        }
    };
}

response_try_into!(BootNotification, BootNotificationResponse);
response_try_into!(Heartbeat, HeartbeatResponse);
response_try_into!(Reset, ResetResponse);
response_try_into!(DataTransfer, DataTransferResponse);
response_try_into!(SecureDataTransfer, SecureDataTransferResponse);
