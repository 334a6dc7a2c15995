use core::str::FromStr;

/// RPC framework error codes carried in `CallError` frames.
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProtocolError {
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    OccurrenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
    NotImplemented,
    NotSupported,
    MessageTypeNotSupported,
    RpcFrameworkError,
}

impl ProtocolError {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolError::InternalError => "InternalError",
            ProtocolError::ProtocolError => "ProtocolError",
            ProtocolError::SecurityError => "SecurityError",
            ProtocolError::FormationViolation => "FormationViolation",
            ProtocolError::PropertyConstraintViolation => "PropertyConstraintViolation",
            ProtocolError::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            ProtocolError::TypeConstraintViolation => "TypeConstraintViolation",
            ProtocolError::GenericError => "GenericError",
            ProtocolError::NotImplemented => "NotImplemented",
            ProtocolError::NotSupported => "NotSupported",
            ProtocolError::MessageTypeNotSupported => "MessageTypeNotSupported",
            ProtocolError::RpcFrameworkError => "RpcFrameworkError",
        }
    }
}

impl core::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolError {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // OCPP 2.x renamed FormationViolation, accept both spellings
        let code = match s {
            "InternalError" => ProtocolError::InternalError,
            "ProtocolError" => ProtocolError::ProtocolError,
            "SecurityError" => ProtocolError::SecurityError,
            "FormationViolation" | "FormatViolation" => ProtocolError::FormationViolation,
            "PropertyConstraintViolation" => ProtocolError::PropertyConstraintViolation,
            "OccurrenceConstraintViolation" | "OccurenceConstraintViolation" => {
                ProtocolError::OccurrenceConstraintViolation
            }
            "TypeConstraintViolation" => ProtocolError::TypeConstraintViolation,
            "GenericError" => ProtocolError::GenericError,
            "NotImplemented" => ProtocolError::NotImplemented,
            "NotSupported" => ProtocolError::NotSupported,
            "MessageTypeNotSupported" => ProtocolError::MessageTypeNotSupported,
            "RpcFrameworkError" => ProtocolError::RpcFrameworkError,
            other => return Err(format!("unknown error code: {other}")),
        };
        Ok(code)
    }
}
