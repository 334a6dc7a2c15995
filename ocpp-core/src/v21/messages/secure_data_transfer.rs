use super::super::types::{SecureDataTransferStatus, StatusInfo};

/// Opaque ciphertext addressed to a peer holding the key named by `key_id`.
///
/// `parameter`, `key_id` and `counter` travel in clear so the receiver can
/// pick the key and reject replays.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecureDataTransferRequest {
    pub parameter: u16,
    pub key_id: u32,
    pub counter: u64,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecureDataTransferResponse {
    pub status: SecureDataTransferStatus,
    pub parameter: u16,
    pub key_id: u32,
    pub counter: u64,
    #[serde(with = "base64_bytes", default, skip_serializing_if = "Vec::is_empty")]
    pub ciphertext: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_info: Option<StatusInfo>,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
