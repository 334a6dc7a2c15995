//! Symmetric encryption of the opaque payload of `SecureDataTransfer`.
//!
//! The codec keeps no state between calls. `parameter`, `key_id` and
//! `counter` stay in clear and are bound to the ciphertext as associated
//! data.

use std::collections::HashMap;

use chacha20poly1305::{
    aead::{Aead, Payload},
    ChaCha20Poly1305, KeyInit, Nonce,
};
use dashmap::{mapref::entry::Entry, DashMap};
use ocpp_overlay_core::{
    overlay::NetworkingNodeId,
    v21::{
        messages::secure_data_transfer::{SecureDataTransferRequest, SecureDataTransferResponse},
        types::SecureDataTransferStatus,
    },
};
use parking_lot::RwLock;
use rand::RngCore;

use crate::error::SecureTransferError;

const NONCE_LEN: usize = 12;
const BLOCK_VERSION: u8 = 1;

/// 256-bit shared secret.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; 32]);

impl SymmetricKey {
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl core::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Resolves the key a peer used for a given key id.
pub trait KeyStore: Send + Sync + 'static {
    fn get_decryption_key(&self, source: &NetworkingNodeId, key_id: u32) -> Option<SymmetricKey>;
}

#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<(NetworkingNodeId, u32), SymmetricKey>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, source: NetworkingNodeId, key_id: u32, key: SymmetricKey) {
        self.keys.write().insert((source, key_id), key);
    }

    pub fn remove(&self, source: &NetworkingNodeId, key_id: u32) -> Option<SymmetricKey> {
        self.keys.write().remove(&(source.clone(), key_id))
    }
}

impl KeyStore for MemoryKeyStore {
    fn get_decryption_key(&self, source: &NetworkingNodeId, key_id: u32) -> Option<SymmetricKey> {
        self.keys.read().get(&(source.clone(), key_id)).cloned()
    }
}

/// Binary framing of an encrypted payload: `version | nonce | ciphertext`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureBlock {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

impl SecureBlock {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + NONCE_LEN + self.ciphertext.len());
        out.push(BLOCK_VERSION);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, SecureTransferError> {
        let (&version, rest) = raw.split_first().ok_or(SecureTransferError::Truncated)?;
        if version != BLOCK_VERSION {
            return Err(SecureTransferError::UnsupportedVersion(version));
        }
        // a poly1305 tag is 16 bytes, anything shorter cannot be valid
        if rest.len() < NONCE_LEN + 16 {
            return Err(SecureTransferError::Truncated);
        }
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
        let mut fixed = [0u8; NONCE_LEN];
        fixed.copy_from_slice(nonce);
        Ok(Self {
            nonce: fixed,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// Cleartext header shared by secure requests and responses.
pub trait SecurePayload {
    fn parameter(&self) -> u16;
    fn key_id(&self) -> u32;
    fn counter(&self) -> u64;
    fn ciphertext(&self) -> &[u8];
}

impl SecurePayload for SecureDataTransferRequest {
    fn parameter(&self) -> u16 {
        self.parameter
    }
    fn key_id(&self) -> u32 {
        self.key_id
    }
    fn counter(&self) -> u64 {
        self.counter
    }
    fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }
}

impl SecurePayload for SecureDataTransferResponse {
    fn parameter(&self) -> u16 {
        self.parameter
    }
    fn key_id(&self) -> u32 {
        self.key_id
    }
    fn counter(&self) -> u64 {
        self.counter
    }
    fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }
}

fn associated_data(parameter: u16, key_id: u32, counter: u64) -> [u8; 14] {
    let mut aad = [0u8; 14];
    aad[..2].copy_from_slice(&parameter.to_be_bytes());
    aad[2..6].copy_from_slice(&key_id.to_be_bytes());
    aad[6..].copy_from_slice(&counter.to_be_bytes());
    aad
}

fn seal(
    parameter: u16,
    key_id: u32,
    key: &SymmetricKey,
    counter: u64,
    plaintext: &[u8],
) -> Result<Vec<u8>, SecureTransferError> {
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| SecureTransferError::Encryption)?;
    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce);
    let aad = associated_data(parameter, key_id, counter);
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| SecureTransferError::Encryption)?;
    Ok(SecureBlock { nonce, ciphertext }.to_bytes())
}

pub fn encrypt(
    parameter: u16,
    key_id: u32,
    key: &SymmetricKey,
    counter: u64,
    plaintext: &[u8],
) -> Result<SecureDataTransferRequest, SecureTransferError> {
    Ok(SecureDataTransferRequest {
        parameter,
        key_id,
        counter,
        ciphertext: seal(parameter, key_id, key, counter, plaintext)?,
    })
}

pub fn encrypt_response(
    parameter: u16,
    key_id: u32,
    key: &SymmetricKey,
    counter: u64,
    plaintext: &[u8],
) -> Result<SecureDataTransferResponse, SecureTransferError> {
    Ok(SecureDataTransferResponse {
        status: SecureDataTransferStatus::Accepted,
        parameter,
        key_id,
        counter,
        ciphertext: seal(parameter, key_id, key, counter, plaintext)?,
        status_info: None,
    })
}

/// Never yields partial plaintext: either the tag checks out or the call
/// fails.
pub fn decrypt<P: SecurePayload>(payload: &P, key: &SymmetricKey) -> Result<Vec<u8>, SecureTransferError> {
    let block = SecureBlock::from_bytes(payload.ciphertext())?;
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| SecureTransferError::Decryption)?;
    let aad = associated_data(payload.parameter(), payload.key_id(), payload.counter());
    cipher
        .decrypt(
            Nonce::from_slice(&block.nonce),
            Payload {
                msg: &block.ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| SecureTransferError::Decryption)
}

pub fn resolve_and_decrypt<P: SecurePayload>(
    store: &dyn KeyStore,
    source: &NetworkingNodeId,
    payload: &P,
) -> Result<Vec<u8>, SecureTransferError> {
    let key = store
        .get_decryption_key(source, payload.key_id())
        .ok_or_else(|| SecureTransferError::UnknownKey {
            source_id: source.clone(),
            key_id: payload.key_id(),
        })?;
    decrypt(payload, &key)
}

/// Highest counter accepted per `(source, key_id)`. A counter is checked
/// when a request arrives and only committed once its payload decrypted.
#[derive(Debug, Default)]
pub struct ReplayGuard {
    seen: DashMap<(NetworkingNodeId, u32), u64>,
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails for a counter at or below the highest one committed.
    pub fn check(&self, source: &NetworkingNodeId, key_id: u32, counter: u64) -> Result<(), SecureTransferError> {
        match self.seen.get(&(source.clone(), key_id)) {
            Some(last) if counter <= *last => Err(SecureTransferError::Replay { key_id, counter }),
            _ => Ok(()),
        }
    }

    /// Records `counter`, failing if another request committed it (or a
    /// higher one) since the check.
    pub fn commit(&self, source: &NetworkingNodeId, key_id: u32, counter: u64) -> Result<(), SecureTransferError> {
        match self.seen.entry((source.clone(), key_id)) {
            Entry::Occupied(mut last) => {
                if counter <= *last.get() {
                    return Err(SecureTransferError::Replay { key_id, counter });
                }
                last.insert(counter);
            }
            Entry::Vacant(slot) => {
                slot.insert(counter);
            }
        }
        Ok(())
    }
}
