//! Signing outbound messages and verifying inbound ones, driven by rules
//! matched against the message action and kind.

use std::{collections::HashSet, sync::Arc};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use ocpp_overlay_core::{
    format::envelope::{RequestEnvelope, ResponseEnvelope},
    overlay::{Signature, VerificationStatus},
};
use rand::RngCore;
use serde_json::{json, Value};

use crate::error::SignatureError;

/// Ed25519 signing key of a node.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        Self::from_secret(secret)
    }

    pub fn from_secret(secret: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&secret),
        }
    }

    /// Base64 public key, used as the signature key id.
    pub fn public_key(&self) -> String {
        STANDARD.encode(self.signing.verifying_key().to_bytes())
    }

    fn sign(&self, content: &[u8]) -> String {
        STANDARD.encode(self.signing.sign(content).to_bytes())
    }
}

impl core::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Request,
    Response,
}

/// Which messages a rule applies to. An empty context matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignaturePolicyContext {
    actions: Option<HashSet<String>>,
    kind: Option<MessageKind>,
}

impl SignaturePolicyContext {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn action(action: impl Into<String>) -> Self {
        Self::actions([action])
    }

    pub fn actions<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            actions: Some(actions.into_iter().map(Into::into).collect()),
            kind: None,
        }
    }

    pub fn requests(mut self) -> Self {
        self.kind = Some(MessageKind::Request);
        self
    }

    pub fn responses(mut self) -> Self {
        self.kind = Some(MessageKind::Response);
        self
    }

    pub fn matches(&self, action: &str, kind: MessageKind) -> bool {
        let action_ok = self.actions.as_ref().is_none_or(|set| set.contains(action));
        let kind_ok = self.kind.is_none_or(|k| k == kind);
        action_ok && kind_ok
    }
}

/// The message being signed, as seen by per-message metadata functions.
#[derive(Debug, Clone, Copy)]
pub struct SignableMessage<'a> {
    pub action: &'a str,
    pub kind: MessageKind,
    pub payload: &'a Value,
}

pub type MetadataFn = Arc<dyn Fn(&SignableMessage<'_>) -> Option<String> + Send + Sync>;
pub type TimestampFn = Arc<dyn Fn(&SignableMessage<'_>) -> DateTime<Utc> + Send + Sync>;

#[derive(Clone)]
struct SigningRule {
    context: SignaturePolicyContext,
    key_pair: KeyPair,
    user_id_fn: MetadataFn,
    description_fn: MetadataFn,
    timestamp_fn: TimestampFn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationAction {
    Skip,
    /// Check every signature, accept the message whatever the outcome.
    VerifyAndWarn,
    /// Check every signature, reject the message unless one is valid.
    VerifyAll,
}

#[derive(Debug, Clone)]
struct VerificationRule {
    context: SignaturePolicyContext,
    action: VerificationAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub statuses: Vec<VerificationStatus>,
    pub demanded: bool,
    pub accepted: bool,
}

impl VerificationReport {
    pub fn any_valid(&self) -> bool {
        self.statuses.contains(&VerificationStatus::ValidSignature)
    }

    pub fn into_result(self, action: &str) -> Result<Self, SignatureError> {
        if self.accepted {
            Ok(self)
        } else {
            Err(SignatureError::Rejected {
                action: action.to_string(),
            })
        }
    }
}

#[derive(Clone, Default)]
pub struct SignaturePolicy {
    signing_rules: Vec<SigningRule>,
    verification_rules: Vec<VerificationRule>,
    reject_unsigned: bool,
}

impl core::fmt::Debug for SignaturePolicy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SignaturePolicy")
            .field("signing_rules", &self.signing_rules.len())
            .field("verification_rules", &self.verification_rules)
            .field("reject_unsigned", &self.reject_unsigned)
            .finish()
    }
}

/// Bytes covered by a signature. The network path is left out so relays
/// can add hops without breaking earlier signatures.
fn signed_content(
    action: &str,
    payload: &Value,
    user_id: &Option<String>,
    description: &Option<String>,
    timestamp: &DateTime<Utc>,
) -> Result<Vec<u8>, SignatureError> {
    serde_json::to_vec(&json!([action, payload, user_id, description, timestamp.to_rfc3339()]))
        .map_err(|e| SignatureError::Content(e.to_string()))
}

fn verify_one(signature: &Signature, action: &str, payload: &Value) -> VerificationStatus {
    if signature.signing_method != Signature::ED25519 {
        return VerificationStatus::InvalidSignatureFormat;
    }
    let key = STANDARD
        .decode(&signature.key_id)
        .ok()
        .and_then(|raw| <[u8; 32]>::try_from(raw.as_slice()).ok())
        .and_then(|raw| VerifyingKey::from_bytes(&raw).ok());
    let Some(key) = key else {
        return VerificationStatus::InvalidPublicKey;
    };
    let sig = STANDARD
        .decode(&signature.value)
        .ok()
        .and_then(|raw| ed25519_dalek::Signature::from_slice(&raw).ok());
    let Some(sig) = sig else {
        return VerificationStatus::InvalidSignatureFormat;
    };
    let content = match signed_content(
        action,
        payload,
        &signature.user_id,
        &signature.description,
        &signature.timestamp,
    ) {
        Ok(c) => c,
        Err(_) => return VerificationStatus::InvalidSignatureFormat,
    };
    match key.verify(&content, &sig) {
        Ok(()) => VerificationStatus::ValidSignature,
        Err(_) => VerificationStatus::InvalidSignature,
    }
}

impl SignaturePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a `VerifyAll` rule rejects messages that carry no signature.
    pub fn reject_unsigned(&mut self, reject: bool) -> &mut Self {
        self.reject_unsigned = reject;
        self
    }

    pub fn add_signing_rule<U, D, T>(
        &mut self,
        context: SignaturePolicyContext,
        key_pair: KeyPair,
        user_id_fn: U,
        description_fn: D,
        timestamp_fn: T,
    ) -> &mut Self
    where
        U: Fn(&SignableMessage<'_>) -> Option<String> + Send + Sync + 'static,
        D: Fn(&SignableMessage<'_>) -> Option<String> + Send + Sync + 'static,
        T: Fn(&SignableMessage<'_>) -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.signing_rules.push(SigningRule {
            context,
            key_pair,
            user_id_fn: Arc::new(user_id_fn),
            description_fn: Arc::new(description_fn),
            timestamp_fn: Arc::new(timestamp_fn),
        });
        self
    }

    /// Signing rule with no metadata, stamped with the current time.
    pub fn add_simple_signing_rule(&mut self, context: SignaturePolicyContext, key_pair: KeyPair) -> &mut Self {
        self.add_signing_rule(context, key_pair, |_| None, |_| None, |_| Utc::now())
    }

    pub fn add_verification_rule(
        &mut self,
        context: SignaturePolicyContext,
        action: VerificationAction,
    ) -> &mut Self {
        self.verification_rules.push(VerificationRule { context, action });
        self
    }

    pub fn has_signing_rules(&self) -> bool {
        !self.signing_rules.is_empty()
    }

    fn sign_payload(
        &self,
        action: &str,
        kind: MessageKind,
        payload: &Value,
        signatures: &mut Vec<Signature>,
    ) -> Result<(), SignatureError> {
        for rule in self.signing_rules.iter().filter(|r| r.context.matches(action, kind)) {
            let message = SignableMessage {
                action,
                kind,
                payload,
            };
            let user_id = (rule.user_id_fn)(&message);
            let description = (rule.description_fn)(&message);
            let timestamp = (rule.timestamp_fn)(&message);
            let content = signed_content(action, payload, &user_id, &description, &timestamp)?;
            signatures.push(Signature {
                key_id: rule.key_pair.public_key(),
                value: rule.key_pair.sign(&content),
                signing_method: Signature::ED25519.into(),
                user_id,
                description,
                timestamp,
                status: VerificationStatus::Unverified,
            });
        }
        Ok(())
    }

    fn verify_payload(
        &self,
        action: &str,
        kind: MessageKind,
        payload: &Value,
        signatures: &mut [Signature],
    ) -> VerificationReport {
        let actions: Vec<VerificationAction> = self
            .verification_rules
            .iter()
            .filter(|r| r.context.matches(action, kind))
            .map(|r| r.action)
            .filter(|a| *a != VerificationAction::Skip)
            .collect();
        if actions.is_empty() {
            return VerificationReport {
                statuses: signatures.iter().map(|s| s.status).collect(),
                demanded: false,
                accepted: true,
            };
        }

        for signature in signatures.iter_mut() {
            signature.status = verify_one(signature, action, payload);
        }
        let statuses: Vec<VerificationStatus> = signatures.iter().map(|s| s.status).collect();
        let any_valid = statuses.contains(&VerificationStatus::ValidSignature);
        let demanded = actions.contains(&VerificationAction::VerifyAll);

        let accepted = match (demanded, signatures.is_empty()) {
            (false, _) => true,
            (true, true) => !self.reject_unsigned,
            (true, false) => any_valid,
        };
        if !any_valid && !signatures.is_empty() {
            log::warn!("{action}: no valid signature among {:?}", statuses);
        }
        VerificationReport {
            statuses,
            demanded,
            accepted,
        }
    }

    /// Appends one signature per matching signing rule. Existing
    /// signatures are kept.
    pub fn sign_request(&self, mut envelope: RequestEnvelope) -> Result<RequestEnvelope, SignatureError> {
        let payload = envelope
            .payload
            .to_value()
            .map_err(|e| SignatureError::Content(e.to_string()))?;
        let action = envelope.action().to_string();
        self.sign_payload(&action, MessageKind::Request, &payload, &mut envelope.signatures)?;
        Ok(envelope)
    }

    pub fn sign_response(&self, mut envelope: ResponseEnvelope) -> Result<ResponseEnvelope, SignatureError> {
        let payload = envelope
            .payload
            .to_value()
            .map_err(|e| SignatureError::Content(e.to_string()))?;
        let action = envelope.action().to_string();
        self.sign_payload(&action, MessageKind::Response, &payload, &mut envelope.signatures)?;
        Ok(envelope)
    }

    /// Updates the status of every signature on the envelope. Only the
    /// statuses change; the signed content is left as received.
    pub fn verify_request(&self, envelope: &mut RequestEnvelope) -> VerificationReport {
        let action = envelope.action().to_string();
        let payload = envelope.payload.to_value().unwrap_or(Value::Null);
        self.verify_payload(&action, MessageKind::Request, &payload, &mut envelope.signatures)
    }

    pub fn verify_response(&self, envelope: &mut ResponseEnvelope) -> VerificationReport {
        let action = envelope.action().to_string();
        let payload = envelope.payload.to_value().unwrap_or(Value::Null);
        self.verify_payload(&action, MessageKind::Response, &payload, &mut envelope.signatures)
    }
}
