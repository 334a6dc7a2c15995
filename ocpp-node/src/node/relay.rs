use std::time::Duration;

use ocpp_overlay_core::{
    format::{
        envelope::{ErrorEnvelope, RequestEnvelope, RequestId, ResponseEnvelope, ResponseMessage},
        error::ProtocolError,
        frame::Encode,
    },
    overlay::{Destination, NetworkingNodeId},
};
use serde_json::{json, Value};

use super::Node;
use crate::{
    error::{NodeError, RoutingError},
    events::NodeEvent,
    forwarding::ImmediateResponse,
    link::{Link, SendResult},
    router::{relay_path, PendingKind, PendingRequest},
};

const REASON_KEY: &str = "reason";
const NODE_KEY: &str = "node";
const NO_ROUTE: &str = "RouteNotFound";
const LINK_FAILURE: &str = "NetworkError";
const TIMED_OUT: &str = "Timeout";

/// Machine-readable `errorDetails` for failures a relay reports back, so the
/// original caller sees the same typed error it would have seen locally.
pub(super) fn failure_details(error: &NodeError) -> Option<Value> {
    match error {
        NodeError::Routing(RoutingError::RouteNotFound(node)) => Some(json!({
            REASON_KEY: NO_ROUTE,
            NODE_KEY: node,
        })),
        NodeError::Transport { peer, .. } => Some(json!({
            REASON_KEY: LINK_FAILURE,
            NODE_KEY: peer,
        })),
        NodeError::Timeout => Some(json!({ REASON_KEY: TIMED_OUT })),
        _ => None,
    }
}

pub(super) fn error_code_for(error: &NodeError) -> ProtocolError {
    match error {
        NodeError::MalformedResponse(_) => ProtocolError::FormationViolation,
        NodeError::Signature(_) | NodeError::SecureTransfer(_) => ProtocolError::SecurityError,
        NodeError::Routing(_) | NodeError::Transport { .. } | NodeError::Timeout => ProtocolError::GenericError,
        _ => ProtocolError::InternalError,
    }
}

/// Inverse of [`failure_details`].
pub(super) fn error_from_envelope(error: ErrorEnvelope) -> NodeError {
    let reason = error.details.get(REASON_KEY).and_then(Value::as_str);
    let node = error
        .details
        .get(NODE_KEY)
        .and_then(Value::as_str)
        .map(NetworkingNodeId::from);
    match (reason, node) {
        (Some(NO_ROUTE), Some(node)) => RoutingError::RouteNotFound(node).into(),
        (Some(LINK_FAILURE), Some(peer)) => NodeError::Transport {
            peer,
            reason: error.description,
        },
        (Some(TIMED_OUT), _) => NodeError::Timeout,
        _ => NodeError::Protocol {
            code: error.error_code,
            description: error.description,
        },
    }
}

impl Node {
    /// Relays a request addressed elsewhere. The forwarding decision is
    /// published before anything is sent.
    pub(super) async fn forward_request(&self, link: &Link, request: RequestEnvelope) {
        let request_id = request.request_id.clone();
        let source = request
            .network_path
            .source()
            .cloned()
            .unwrap_or_else(|| link.peer.clone());
        let reply_to = Destination::Direct(source);

        let decision = self.inner.forwarding.decide(request.clone(), &link.peer);
        self.publish(NodeEvent::ForwardingDecided {
            from: link.peer.clone(),
            result: decision.result,
            request,
        });

        let Some(mut outgoing) = decision.outgoing() else {
            match decision.immediate_response {
                Some(ImmediateResponse::Response(payload)) => {
                    let (destination, path) = self.origin_addressing(reply_to.clone(), link);
                    let response = ResponseEnvelope::wrap(request_id.clone(), payload, destination, path, None);
                    match self.inner.signatures.sign_response(response) {
                        Ok(response) => self.send_response(link, ResponseMessage::Result(response)).await,
                        Err(e) => {
                            self.reply_error(link, request_id, reply_to, ProtocolError::InternalError, e.to_string(), None)
                                .await
                        }
                    }
                }
                Some(ImmediateResponse::Error { code, description }) => {
                    self.reply_error(link, request_id, reply_to, code, description, None).await;
                }
                None => log::info!("{}: [{}] dropped without answer", self.id(), request_id),
            }
            return;
        };

        outgoing.network_path = relay_path(&outgoing.network_path, &link.peer, self.id());
        let next = match self.inner.routing.resolve(&outgoing.destination) {
            Ok(next) => next,
            Err(e) => {
                log::warn!("{}: cannot relay [{}]: {}", self.id(), request_id, e);
                self.inner.forwarding.forget(&request_id);
                let error = NodeError::from(e);
                self.reply_error(
                    link,
                    request_id,
                    reply_to,
                    error_code_for(&error),
                    error.to_string(),
                    failure_details(&error),
                )
                .await;
                return;
            }
        };
        if outgoing.network_path.contains(&next.peer) {
            self.inner.forwarding.forget(&request_id);
            let description = format!("routing loop via {}", next.peer);
            self.reply_error(link, request_id, reply_to, ProtocolError::FormationViolation, description, None)
                .await;
            return;
        }
        outgoing.networking_mode = next.mode;

        let (frame, outgoing) = match self
            .inner
            .signatures
            .sign_request(outgoing)
            .map_err(NodeError::from)
            .and_then(|signed| Ok((signed.to_call(next.mode)?.encode(), signed)))
        {
            Ok(prepared) => prepared,
            Err(e) => {
                log::error!("{}: cannot prepare [{}] for {}: {}", self.id(), request_id, next.peer, e);
                self.inner.forwarding.forget(&request_id);
                self.reply_error(link, request_id, reply_to, ProtocolError::InternalError, e.to_string(), None)
                    .await;
                return;
            }
        };

        let registered = self.inner.pending.insert(
            request_id.clone(),
            PendingRequest {
                action: outgoing.action().to_string(),
                next_hop: next.peer.clone(),
                kind: PendingKind::Forwarded {
                    origin: link.peer.clone(),
                    reply_destination: reply_to.clone(),
                },
            },
        );
        if !registered {
            self.reply_error(
                link,
                request_id,
                reply_to,
                ProtocolError::ProtocolError,
                "request id already in flight",
                None,
            )
            .await;
            return;
        }

        log::debug!("{}: relaying {} [{}] {} -> {}", self.id(), outgoing.action(), request_id, link.peer, next.peer);
        self.publish(NodeEvent::RequestSent {
            to: next.peer.clone(),
            request: outgoing,
        });
        if let SendResult::Failure(reason) = next.send(frame).await {
            if let Some(entry) = self.inner.pending.remove(&request_id) {
                let error = NodeError::Transport {
                    peer: next.peer.clone(),
                    reason,
                };
                self.fail_pending(request_id, entry, error).await;
            }
            return;
        }
        self.expire_relayed(request_id);
    }

    /// After the call timeout a relayed request still outstanding is failed
    /// towards its originator and forgotten.
    fn expire_relayed(&self, request_id: RequestId) {
        let node = self.clone();
        let timeout = Duration::from_secs(self.inner.config.call_timeout);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(entry) = node.inner.pending.remove_forwarded(&request_id) {
                log::warn!(
                    "{}: relayed [{}] unanswered by {} after {:?}",
                    node.id(),
                    request_id,
                    entry.next_hop,
                    timeout
                );
                node.fail_pending(request_id, entry, NodeError::Timeout).await;
            }
        });
    }

    /// Sends a response for a relayed request back towards its originator,
    /// after the node's verification rules for responses accepted it. A
    /// pending response transform is applied and the path extended.
    pub(super) async fn route_response(
        &self,
        link: &Link,
        response: ResponseMessage,
        origin: NetworkingNodeId,
        reply_destination: Destination,
    ) {
        let request_id = response.request_id().clone();
        let transform = self.inner.forwarding.take_response_transform(&request_id);
        let Some(origin_link) = self.inner.routing.link(&origin) else {
            self.drop_frame(link, Some(request_id), format!("originator {} is gone", origin));
            return;
        };
        let path = relay_path(response.network_path(), &link.peer, self.id());

        let mut response = match response {
            ResponseMessage::Result(mut envelope) => {
                let report = self.inner.signatures.verify_response(&mut envelope);
                if let Err(e) = report.into_result(envelope.action()) {
                    log::warn!("{}: not relaying response [{}] from {}: {}", self.id(), request_id, link.peer, e);
                    self.reply_error(
                        &origin_link,
                        request_id,
                        reply_destination,
                        ProtocolError::SecurityError,
                        e.to_string(),
                        None,
                    )
                    .await;
                    return;
                }
                if let Some(transform) = transform {
                    envelope.payload = transform(&envelope);
                    envelope.signatures.clear();
                }
                match self.inner.signatures.sign_response(envelope) {
                    Ok(envelope) => ResponseMessage::Result(envelope),
                    Err(e) => {
                        log::error!("{}: cannot sign relayed response [{}]: {}", self.id(), request_id, e);
                        self.reply_error(
                            &origin_link,
                            request_id,
                            reply_destination,
                            ProtocolError::InternalError,
                            e.to_string(),
                            None,
                        )
                        .await;
                        return;
                    }
                }
            }
            error => error,
        };
        response.set_addressing(reply_destination, path);
        self.send_response(&origin_link, response).await;
    }
}
