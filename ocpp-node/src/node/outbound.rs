use std::time::Duration;

use ocpp_overlay_core::{
    format::{
        envelope::{RequestEnvelope, RequestId, ResponseEnvelope, ResponseMessage},
        error::ProtocolError,
        frame::Encode,
    },
    overlay::Destination,
    v21::{
        messages::secure_data_transfer::SecureDataTransferResponse, types::SecureDataTransferStatus,
        Request, Response,
    },
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::{relay, Node};
use crate::{
    error::{NodeError, RoutingError, SecureTransferError},
    events::NodeEvent,
    link::SendResult,
    router::{PendingKind, PendingRequest, PendingRequests},
    secure::{self, SymmetricKey},
};

#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Overrides the configured call timeout.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: None,
        }
    }

    pub fn cancellable(token: CancellationToken) -> Self {
        Self {
            timeout: None,
            cancel: Some(token),
        }
    }
}

/// Removes the outstanding entry however the call ends, including when the
/// caller drops the future.
struct PendingGuard<'a> {
    pending: &'a PendingRequests,
    request_id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.request_id);
    }
}

impl Node {
    pub async fn call(
        &self,
        destination: Destination,
        payload: impl Into<Request>,
    ) -> Result<ResponseEnvelope, NodeError> {
        self.call_with(destination, payload, CallOptions::default()).await
    }

    /// Like [`Node::call`], returning the typed response payload.
    pub async fn call_as<T>(&self, destination: Destination, payload: impl Into<Request>) -> Result<T, NodeError>
    where
        T: TryFrom<Response, Error = Response>,
    {
        let response = self.call(destination, payload).await?;
        T::try_from(response.payload).map_err(|other| NodeError::UnexpectedResponse(other.action().to_string()))
    }

    /// Sends a request and waits for the matching response. A call error
    /// from the far end comes back as `Err`, as do timeouts, cancellation
    /// and loss of the link the request went out on.
    pub async fn call_with(
        &self,
        destination: Destination,
        payload: impl Into<Request>,
        options: CallOptions,
    ) -> Result<ResponseEnvelope, NodeError> {
        let link = self.inner.routing.resolve(&destination)?;
        let (destination, path) = self.origin_addressing(destination, &link);
        let request = RequestEnvelope::wrap(payload.into(), destination, path, None);
        let request = self.inner.signatures.sign_request(request)?;
        let frame = request.to_call(link.mode)?.encode();

        let (tx, rx) = oneshot::channel();
        let request_id = request.request_id.clone();
        self.inner.pending.insert(
            request_id.clone(),
            PendingRequest {
                action: request.action().to_string(),
                next_hop: link.peer.clone(),
                kind: PendingKind::Local(tx),
            },
        );
        let _guard = PendingGuard {
            pending: &self.inner.pending,
            request_id: request_id.clone(),
        };

        log::debug!("{}: {} [{}] -> {}", self.id(), request.action(), request_id, link.peer);
        self.publish(NodeEvent::RequestSent {
            to: link.peer.clone(),
            request,
        });
        if let SendResult::Failure(reason) = link.send(frame).await {
            return Err(NodeError::Transport {
                peer: link.peer.clone(),
                reason,
            });
        }

        let timeout = options
            .timeout
            .unwrap_or_else(|| Duration::from_secs(self.inner.config.call_timeout));
        let cancelled = async {
            match &options.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let outcome = tokio::select! {
            res = rx => res.unwrap_or_else(|_| Err(NodeError::Transport {
                peer: link.peer.clone(),
                reason: "link closed".into(),
            })),
            _ = tokio::time::sleep(timeout) => {
                log::warn!("{}: [{}] timed out after {:?}", self.id(), request_id, timeout);
                Err(NodeError::Timeout)
            }
            _ = cancelled => {
                log::debug!("{}: [{}] cancelled", self.id(), request_id);
                Err(NodeError::Cancelled)
            }
        };

        match outcome? {
            ResponseMessage::Result(response) => Ok(response),
            ResponseMessage::Error(error) => Err(relay::error_from_envelope(error)),
        }
    }

    /// Encrypts `plaintext` under `key`, sends it as a `SecureDataTransfer`
    /// and decrypts the answer with the key the key store holds for the
    /// responder.
    pub async fn send_secure_data_transfer(
        &self,
        destination: Destination,
        parameter: u16,
        key_id: u32,
        key: &SymmetricKey,
        counter: u64,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, NodeError> {
        let responder = destination
            .final_node()
            .cloned()
            .ok_or(RoutingError::EmptyDestination)?;
        let request = secure::encrypt(parameter, key_id, key, counter, plaintext)?;
        let response: SecureDataTransferResponse = self.call_as(destination, request).await?;
        if response.status != SecureDataTransferStatus::Accepted {
            return Err(NodeError::Protocol {
                code: ProtocolError::GenericError,
                description: format!("{} rejected the secure data transfer", responder),
            });
        }
        let store = self
            .inner
            .key_store
            .as_deref()
            .ok_or_else(|| SecureTransferError::UnknownKey {
                source_id: responder.clone(),
                key_id: response.key_id,
            })?;
        Ok(secure::resolve_and_decrypt(store, &responder, &response)?)
    }
}
