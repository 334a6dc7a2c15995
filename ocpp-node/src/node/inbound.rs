use ocpp_overlay_core::{
    format::{
        envelope::{ErrorEnvelope, RequestEnvelope, RequestId, ResponseEnvelope, ResponseMessage},
        error::ProtocolError,
        frame::{Call, CALL},
        message::{CallResponse, Invalid, OcppMessage},
    },
    overlay::{Destination, NetworkingMode, NetworkingNodeId},
    v21::Request,
};

use super::{relay, Node};
use crate::{
    error::{NodeError, SignatureError},
    events::NodeEvent,
    handler::RequestContext,
    link::Link,
    router::{PendingKind, PendingRequest},
    signature::VerificationReport,
};

/// Reads frames from one link until its channel closes. Each frame is
/// handled on its own task so a slow relay never stalls the link.
pub(super) async fn run_link(node: Node, link: Link, inbound: flume::Receiver<String>) {
    while let Ok(frame) = inbound.recv_async().await {
        let node = node.clone();
        let link = link.clone();
        tokio::spawn(async move { node.dispatch(&link, frame).await });
    }
    node.link_lost(&link).await;
}

impl Node {
    async fn dispatch(&self, link: &Link, frame: String) {
        log::trace!("{} <- {} {}", self.id(), link.peer, frame);
        match OcppMessage::decode(&frame) {
            OcppMessage::Call(call) => self.handle_call(link, call).await,
            OcppMessage::CallResponse(response) => self.handle_call_response(link, response).await,
            OcppMessage::Invalid(invalid) => self.handle_invalid(link, invalid).await,
        }
    }

    async fn handle_invalid(&self, link: &Link, invalid: Invalid) {
        log::warn!("{}: invalid frame from {}: {}", self.id(), link.peer, invalid.err_msg);
        self.publish(NodeEvent::FrameDropped {
            from: link.peer.clone(),
            request_id: invalid.unique_id.clone().map(RequestId::from),
            reason: invalid.err_msg.clone(),
        });
        if let (Some(CALL), Some(unique_id)) = (invalid.message_type, invalid.unique_id) {
            self.reply_error(
                link,
                unique_id.into(),
                Destination::Direct(link.peer.clone()),
                ProtocolError::FormationViolation,
                invalid.err_msg,
                None,
            )
            .await;
        }
    }

    /// Destination of a standard-mode request, which carries none. A
    /// networking node passes leaf traffic it has no handler for on to the
    /// CSMS, unless it came from the CSMS side.
    fn implicit_destination(&self, link: &Link, action: &str) -> Destination {
        let relays = self.role().can_forward()
            && self.inner.config.relay_leaf_requests
            && !self.inner.handlers.read().contains_key(action);
        if relays {
            let upstream = self.inner.routing.resolve_node(&NetworkingNodeId::csms());
            if matches!(upstream, Ok(ref next) if next.peer != link.peer) {
                return Destination::Direct(NetworkingNodeId::csms());
            }
        }
        Destination::Direct(self.id().clone())
    }

    async fn handle_call(&self, link: &Link, call: Call) {
        let request_id = RequestId::from(call.unique_id.clone());
        let source = call
            .header
            .as_ref()
            .and_then(|h| h.network_path.source().cloned())
            .unwrap_or_else(|| link.peer.clone());
        let reply_to = Destination::Direct(source.clone());

        let implicit = self.implicit_destination(link, &call.action);
        let mut request = match RequestEnvelope::from_call(call, implicit) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("{}: unusable request from {}: {}", self.id(), link.peer, e);
                self.publish(NodeEvent::FrameDropped {
                    from: link.peer.clone(),
                    request_id: Some(request_id.clone()),
                    reason: e.to_string(),
                });
                self.reply_error(link, request_id, reply_to, ProtocolError::FormationViolation, e.to_string(), None)
                    .await;
                return;
            }
        };

        if let Some(violation) = self.path_violation(link, &request) {
            log::warn!("{}: {} [{}]", self.id(), violation, request_id);
            self.publish(NodeEvent::FrameDropped {
                from: link.peer.clone(),
                request_id: Some(request_id.clone()),
                reason: violation.clone(),
            });
            self.reply_error(link, request_id, reply_to, ProtocolError::FormationViolation, violation, None)
                .await;
            return;
        }

        log::debug!(
            "{}: {} [{}] from {} for {:?}",
            self.id(),
            request.action(),
            request_id,
            link.peer,
            request.destination
        );
        let report = self.inner.signatures.verify_request(&mut request);
        self.publish(NodeEvent::RequestReceived {
            from: link.peer.clone(),
            request: request.clone(),
        });
        if let Err(e) = report.into_result(request.action()) {
            log::warn!("{}: rejecting {} [{}]: {}", self.id(), request.action(), request_id, e);
            self.reply_error(link, request_id, reply_to, ProtocolError::SecurityError, e.to_string(), None)
                .await;
            return;
        }

        let local = self.role().terminates(self.id(), &request.destination)
            || request.destination.final_node().is_some_and(|n| self.is_self(n));
        if local {
            self.handle_locally(link, request, &source).await;
        } else {
            self.forward_request(link, request).await;
        }
    }

    /// An overlay path must end at the peer that handed the message over and
    /// must not already pass through this node.
    fn path_violation(&self, link: &Link, request: &RequestEnvelope) -> Option<String> {
        if request.networking_mode != NetworkingMode::OverlayNetwork {
            return None;
        }
        if request.network_path.last() != Some(&link.peer) {
            return Some(format!("network path does not end at {}", link.peer));
        }
        if request.network_path.contains(self.id()) {
            return Some(format!("network path already passes through {}", self.id()));
        }
        None
    }

    async fn handle_locally(&self, link: &Link, request: RequestEnvelope, source: &NetworkingNodeId) {
        let request_id = request.request_id.clone();
        let reply_to = Destination::Direct(source.clone());

        let secure_counter = match &request.payload {
            Request::SecureDataTransfer(secure_req) => Some((secure_req.key_id, secure_req.counter)),
            _ => None,
        };
        if let Some((key_id, counter)) = secure_counter {
            if let Err(e) = self.inner.replay_guard.check(source, key_id, counter) {
                log::warn!("{}: {} from {}", self.id(), e, source);
                self.reply_error(link, request_id, reply_to, ProtocolError::SecurityError, e.to_string(), None)
                    .await;
                return;
            }
        }

        let handler = self.inner.handlers.read().get(request.action()).cloned();
        let Some(handler) = handler else {
            let description = format!("{} is not supported by {}", request.action(), self.id());
            self.reply_error(link, request_id, reply_to, ProtocolError::NotSupported, description, None)
                .await;
            return;
        };

        let ctx = RequestContext {
            node_id: self.id(),
            from: &link.peer,
            source,
            network_path: &request.network_path,
            key_store: self.inner.key_store.as_deref(),
        };
        match handler(&ctx, &request) {
            Ok(payload) if payload.action() == request.action() => {
                // Only a payload that decrypted moves the counter.
                if let Some((key_id, counter)) = secure_counter {
                    if let Err(e) = self.inner.replay_guard.commit(source, key_id, counter) {
                        log::warn!("{}: {} from {}", self.id(), e, source);
                        self.reply_error(link, request_id, reply_to, ProtocolError::SecurityError, e.to_string(), None)
                            .await;
                        return;
                    }
                }
                let (destination, path) = self.origin_addressing(reply_to.clone(), link);
                let response = ResponseEnvelope::wrap(request_id.clone(), payload, destination, path, None);
                match self.inner.signatures.sign_response(response) {
                    Ok(response) => self.send_response(link, ResponseMessage::Result(response)).await,
                    Err(e) => {
                        log::error!("{}: cannot sign {} response: {}", self.id(), request.action(), e);
                        self.reply_error(link, request_id, reply_to, ProtocolError::InternalError, e.to_string(), None)
                            .await;
                    }
                }
            }
            Ok(payload) => {
                let description = format!("handler answered {} to {}", payload.action(), request.action());
                log::error!("{}: {}", self.id(), description);
                self.reply_error(link, request_id, reply_to, ProtocolError::InternalError, description, None)
                    .await;
            }
            Err(fault) => {
                self.reply_error(link, request_id, reply_to, fault.code, fault.description, None)
                    .await;
            }
        }
    }

    async fn handle_call_response(&self, link: &Link, response: CallResponse) {
        let request_id = RequestId::from(response.unique_id().to_string());

        if let Some(header) = response.header() {
            if link.mode == NetworkingMode::OverlayNetwork && header.network_path.last() != Some(&link.peer) {
                self.drop_frame(link, Some(request_id), format!("network path does not end at {}", link.peer));
                return;
            }
        }

        let Some(entry) = self.inner.pending.take_from(&request_id, &link.peer) else {
            let reason = if self.inner.pending.contains(&request_id) {
                format!("response from {} which was not asked", link.peer)
            } else {
                "no outstanding request".to_string()
            };
            self.drop_frame(link, Some(request_id), reason);
            return;
        };

        let implicit = Destination::Direct(self.id().clone());
        let message = match response {
            CallResponse::CallResult(result) => {
                match ResponseEnvelope::from_call_result(result, &entry.action, implicit) {
                    Ok(envelope) => ResponseMessage::Result(envelope),
                    Err(e) => {
                        log::warn!("{}: malformed {} response from {}: {}", self.id(), entry.action, link.peer, e);
                        self.fail_pending(request_id, entry, NodeError::MalformedResponse(e.to_string()))
                            .await;
                        return;
                    }
                }
            }
            CallResponse::CallError(error) => ResponseMessage::Error(ErrorEnvelope::from_call_error(error, implicit)),
        };

        log::debug!("{}: response [{}] from {}", self.id(), request_id, link.peer);
        self.publish(NodeEvent::ResponseReceived {
            from: link.peer.clone(),
            response: message.clone(),
        });

        match entry.kind {
            PendingKind::Local(tx) => {
                let outcome = self.verify_local_response(message);
                if tx.send(outcome).is_err() {
                    log::debug!("{}: caller of [{}] went away", self.id(), request_id);
                }
            }
            PendingKind::Forwarded {
                origin,
                reply_destination,
            } => {
                self.route_response(link, message, origin, reply_destination).await;
            }
        }
    }

    fn verify_local_response(&self, message: ResponseMessage) -> Result<ResponseMessage, NodeError> {
        match message {
            ResponseMessage::Result(mut envelope) => {
                let report: VerificationReport = self.inner.signatures.verify_response(&mut envelope);
                if report.accepted {
                    Ok(ResponseMessage::Result(envelope))
                } else {
                    Err(SignatureError::Rejected {
                        action: envelope.action().to_string(),
                    }
                    .into())
                }
            }
            error => Ok(error),
        }
    }

    pub(super) fn drop_frame(&self, link: &Link, request_id: Option<RequestId>, reason: String) {
        log::warn!("{}: dropping frame from {}: {}", self.id(), link.peer, reason);
        self.publish(NodeEvent::FrameDropped {
            from: link.peer.clone(),
            request_id,
            reason,
        });
    }

    /// Completes an outstanding request with `error`: the local caller gets
    /// it directly, a relayed request gets an RPC error sent back towards its
    /// originator.
    pub(super) async fn fail_pending(&self, request_id: RequestId, entry: PendingRequest, error: NodeError) {
        self.inner.forwarding.forget(&request_id);
        match entry.kind {
            PendingKind::Local(tx) => {
                let _ = tx.send(Err(error));
            }
            PendingKind::Forwarded {
                origin,
                reply_destination,
            } => {
                let Some(origin_link) = self.inner.routing.link(&origin) else {
                    log::warn!("{}: cannot report failure of [{}], {} is gone", self.id(), request_id, origin);
                    return;
                };
                self.reply_error(
                    &origin_link,
                    request_id,
                    reply_destination,
                    relay::error_code_for(&error),
                    error.to_string(),
                    relay::failure_details(&error),
                )
                .await;
            }
        }
    }

    async fn link_lost(&self, link: &Link) {
        if !self.inner.routing.remove_link(link) {
            log::debug!("{}: stale session {} to {} closed", self.id(), link.session(), link.peer);
            return;
        }
        log::warn!("{}: link to {} lost", self.id(), link.peer);
        for (request_id, entry) in self.inner.pending.drain_for_peer(&link.peer) {
            let error = NodeError::Transport {
                peer: link.peer.clone(),
                reason: "link closed".into(),
            };
            self.fail_pending(request_id, entry, error).await;
        }
    }
}
