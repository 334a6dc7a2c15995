//! A node on the overlay network: its links, local handlers, outbound calls
//! and relaying.

mod builder;
mod inbound;
mod outbound;
mod relay;

use std::{collections::HashMap, sync::Arc};

use ocpp_overlay_core::{
    format::{
        envelope::{ErrorEnvelope, RequestEnvelope, RequestId, ResponseMessage},
        error::ProtocolError,
    },
    overlay::{Destination, NetworkPath, NetworkingMode, NetworkingNodeId},
    v21::{Request, Response},
};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::{
    config::NodeConfig,
    events::{EventBus, NodeEvent},
    forwarding::ForwardingEngine,
    handler::{CallFault, RequestContext, RequestHandler},
    link::{Link, LinkSender, SendResult},
    role::NodeRole,
    router::{PendingRequests, RoutingTable},
    secure::{self, KeyStore, ReplayGuard},
    signature::SignaturePolicy,
};

pub use builder::NodeBuilder;
pub use outbound::CallOptions;

struct NodeInner {
    config: NodeConfig,
    routing: RoutingTable,
    pending: PendingRequests,
    forwarding: ForwardingEngine,
    signatures: SignaturePolicy,
    handlers: RwLock<HashMap<String, RequestHandler>>,
    key_store: Option<Arc<dyn KeyStore>>,
    replay_guard: ReplayGuard,
    events: EventBus,
}

/// Cheap to clone; all clones share one node.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl core::fmt::Debug for Node {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.config.id)
            .field("role", &self.inner.config.role)
            .field("links", &self.inner.routing.connected_peers())
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}

impl Node {
    pub fn id(&self) -> &NetworkingNodeId {
        &self.inner.config.id
    }

    pub fn role(&self) -> NodeRole {
        self.inner.config.role
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.inner.routing
    }

    /// Forwarding rules can be changed while the node runs.
    pub fn forwarding(&self) -> &ForwardingEngine {
        &self.inner.forwarding
    }

    pub fn subscribe(&self) -> flume::Receiver<NodeEvent> {
        self.inner.events.subscribe()
    }

    /// Outstanding requests, local calls and relayed ones alike.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn add_static_routing(&self, destination: impl Into<NetworkingNodeId>, via: impl Into<NetworkingNodeId>) {
        self.inner.routing.add_static_routing(destination.into(), via.into());
    }

    pub fn remove_static_routing(&self, destination: &NetworkingNodeId) {
        self.inner.routing.remove_static_routing(destination);
    }

    /// Registers the local handler for `action`, replacing any earlier one.
    pub fn on_request<F>(&self, action: impl Into<String>, handler: F)
    where
        F: Fn(&RequestContext<'_>, &RequestEnvelope) -> Result<Response, CallFault> + Send + Sync + 'static,
    {
        self.inner.handlers.write().insert(action.into(), Arc::new(handler));
    }

    /// Handles `SecureDataTransfer` with the key the key store holds for the
    /// originator. `handler` gets the parameter and the plaintext and returns
    /// the plaintext of the answer, which goes back under the same key.
    pub fn on_secure_data_transfer<F>(&self, handler: F)
    where
        F: Fn(&RequestContext<'_>, u16, Vec<u8>) -> Result<Vec<u8>, CallFault> + Send + Sync + 'static,
    {
        self.on_request("SecureDataTransfer", move |ctx, request| {
            let Request::SecureDataTransfer(secure_req) = &request.payload else {
                return Err(CallFault::new(
                    ProtocolError::FormationViolation,
                    "not a SecureDataTransfer payload",
                ));
            };
            let store = ctx
                .key_store
                .ok_or_else(|| CallFault::new(ProtocolError::SecurityError, "no key store configured"))?;
            let key = store
                .get_decryption_key(ctx.source, secure_req.key_id)
                .ok_or_else(|| {
                    CallFault::new(
                        ProtocolError::SecurityError,
                        format!("no key {} for {}", secure_req.key_id, ctx.source),
                    )
                })?;
            let plaintext = secure::decrypt(secure_req, &key)
                .map_err(|e| CallFault::new(ProtocolError::SecurityError, e.to_string()))?;
            let answer = handler(ctx, secure_req.parameter, plaintext)?;
            secure::encrypt_response(secure_req.parameter, secure_req.key_id, &key, secure_req.counter, &answer)
                .map(Response::SecureDataTransfer)
                .map_err(|e| CallFault::new(ProtocolError::InternalError, e.to_string()))
        });
    }

    /// Hands a connected transport to the node. Frames from `inbound` are
    /// processed until the channel closes, at which point the link is torn
    /// down and requests waiting on it fail.
    pub fn attach_link(
        &self,
        peer: impl Into<NetworkingNodeId>,
        mode: NetworkingMode,
        sender: Arc<dyn LinkSender>,
        inbound: flume::Receiver<String>,
    ) -> JoinHandle<()> {
        let peer = peer.into();
        let effective = self.role().link_mode(mode);
        if effective != mode {
            log::warn!("{}: {} links are always {:?}", self.id(), self.role(), effective);
        }
        let link = Link::new(peer, effective, sender);
        if let Some(old) = self.inner.routing.add_link(link.clone()) {
            log::warn!("{}: link to {} replaced (session {})", self.id(), old.peer, old.session());
        }
        log::info!("{}: link to {} up ({:?})", self.id(), link.peer, link.mode);
        tokio::spawn(inbound::run_link(self.clone(), link, inbound))
    }

    fn publish(&self, event: NodeEvent) {
        self.inner.events.publish(event);
    }

    fn is_self(&self, id: &NetworkingNodeId) -> bool {
        self.role().is_self(self.id(), id)
    }

    /// Addressing of a message this node originates over `link`.
    fn origin_addressing(&self, destination: Destination, link: &Link) -> (Destination, NetworkPath) {
        let path = match link.mode {
            NetworkingMode::OverlayNetwork => NetworkPath::from_source(self.id().clone()),
            NetworkingMode::Standard => NetworkPath::empty(),
        };
        (destination, path)
    }

    async fn send_response(&self, link: &Link, response: ResponseMessage) {
        let frame = match response.encode(link.mode) {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("{}: cannot encode response {}: {}", self.id(), response.request_id(), e);
                return;
            }
        };
        self.publish(NodeEvent::ResponseSent {
            to: link.peer.clone(),
            response,
        });
        if let SendResult::Failure(reason) = link.send(frame).await {
            log::warn!("{}: response to {} not delivered: {}", self.id(), link.peer, reason);
        }
    }

    async fn reply_error(
        &self,
        link: &Link,
        request_id: RequestId,
        destination: Destination,
        code: ProtocolError,
        description: impl Into<String>,
        details: Option<Value>,
    ) {
        let (destination, path) = self.origin_addressing(destination, link);
        let mut error = ErrorEnvelope::new(request_id, code, description, destination, path);
        if let Some(details) = details {
            error.details = details;
        }
        log::debug!(
            "{}: answering {} [{}] with {}: {}",
            self.id(),
            link.peer,
            error.request_id,
            error.error_code,
            error.description
        );
        self.send_response(link, ResponseMessage::Error(error)).await;
    }
}
