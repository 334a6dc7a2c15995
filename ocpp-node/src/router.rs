//! Routing table and outstanding-request bookkeeping.

use std::collections::HashMap;

use dashmap::DashMap;
use ocpp_overlay_core::{
    format::envelope::RequestId,
    overlay::{Destination, NetworkPath, NetworkingNodeId},
};
use parking_lot::RwLock;
use tokio::sync::oneshot;

use crate::{
    error::{NodeError, RoutingError},
    link::Link,
};

use ocpp_overlay_core::format::envelope::ResponseMessage;

/// Static routes (`destination -> next hop`), an optional default route,
/// and the live links this node holds.
#[derive(Debug)]
pub struct RoutingTable {
    own_id: NetworkingNodeId,
    static_routes: RwLock<HashMap<NetworkingNodeId, NetworkingNodeId>>,
    default_route: RwLock<Option<NetworkingNodeId>>,
    links: RwLock<HashMap<NetworkingNodeId, Link>>,
}

impl RoutingTable {
    pub fn new(own_id: NetworkingNodeId) -> Self {
        Self {
            own_id,
            static_routes: RwLock::new(HashMap::new()),
            default_route: RwLock::new(None),
            links: RwLock::new(HashMap::new()),
        }
    }

    /// Upsert, last write wins.
    pub fn add_static_routing(&self, destination: NetworkingNodeId, via: NetworkingNodeId) {
        log::debug!("{}: static route {} via {}", self.own_id, destination, via);
        self.static_routes.write().insert(destination, via);
    }

    pub fn remove_static_routing(&self, destination: &NetworkingNodeId) -> Option<NetworkingNodeId> {
        self.static_routes.write().remove(destination)
    }

    pub fn set_default_route(&self, via: Option<NetworkingNodeId>) {
        *self.default_route.write() = via;
    }

    pub fn static_route(&self, destination: &NetworkingNodeId) -> Option<NetworkingNodeId> {
        self.static_routes.read().get(destination).cloned()
    }

    pub(crate) fn add_link(&self, link: Link) -> Option<Link> {
        self.links.write().insert(link.peer.clone(), link)
    }

    /// Removes the link to `peer` only if it is still the same session.
    pub(crate) fn remove_link(&self, link: &Link) -> bool {
        let mut links = self.links.write();
        match links.get(&link.peer) {
            Some(current) if current.session() == link.session() => {
                links.remove(&link.peer);
                true
            }
            _ => false,
        }
    }

    pub fn link(&self, peer: &NetworkingNodeId) -> Option<Link> {
        self.links.read().get(peer).cloned()
    }

    pub fn is_connected(&self, peer: &NetworkingNodeId) -> bool {
        self.links.read().contains_key(peer)
    }

    pub fn connected_peers(&self) -> Vec<NetworkingNodeId> {
        self.links.read().keys().cloned().collect()
    }

    /// Picks the link for the next hop towards `destination`: a live link to
    /// the node itself, then a static route, then the default route.
    pub fn resolve(&self, destination: &Destination) -> Result<Link, RoutingError> {
        let target = destination
            .next_hop_after(&self.own_id)
            .ok_or(RoutingError::EmptyDestination)?;
        self.resolve_node(target)
    }

    pub fn resolve_node(&self, target: &NetworkingNodeId) -> Result<Link, RoutingError> {
        if let Some(link) = self.link(target) {
            return Ok(link);
        }
        let via = self
            .static_route(target)
            .or_else(|| self.default_route.read().clone());
        via.and_then(|via| self.link(&via))
            .ok_or_else(|| RoutingError::RouteNotFound(target.clone()))
    }
}

/// Path of a message leaving this node after arriving from `from`.
///
/// A message that arrives with an empty path has just left its
/// originating standard-mode link, so the sender becomes the source.
pub fn relay_path(path: &NetworkPath, from: &NetworkingNodeId, own_id: &NetworkingNodeId) -> NetworkPath {
    if path.is_empty() {
        NetworkPath::from_source(from.clone()).append(own_id.clone())
    } else {
        path.append(own_id.clone())
    }
}

pub(crate) type ResponseSender = oneshot::Sender<Result<ResponseMessage, NodeError>>;

pub(crate) enum PendingKind {
    /// A call this node made itself; the caller awaits on the receiver.
    Local(ResponseSender),
    /// A request relayed on behalf of `origin`.
    Forwarded {
        origin: NetworkingNodeId,
        reply_destination: Destination,
    },
}

pub(crate) struct PendingRequest {
    pub action: String,
    pub next_hop: NetworkingNodeId,
    pub kind: PendingKind,
}

/// Outstanding requests keyed by request id. An entry is taken at most
/// once, so a duplicate response finds nothing.
#[derive(Default)]
pub(crate) struct PendingRequests {
    entries: DashMap<RequestId, PendingRequest>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// False when the id is already outstanding.
    pub fn insert(&self, id: RequestId, request: PendingRequest) -> bool {
        match self.entries.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(request);
                true
            }
        }
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn action(&self, id: &RequestId) -> Option<String> {
        self.entries.get(id).map(|e| e.action.clone())
    }

    /// Takes the entry only if the response came from the hop the request
    /// was sent to.
    pub fn take_from(&self, id: &RequestId, from: &NetworkingNodeId) -> Option<PendingRequest> {
        self.entries
            .remove_if(id, |_, entry| &entry.next_hop == from)
            .map(|(_, entry)| entry)
    }

    /// Removes the entry only if it is a relayed request.
    pub fn remove_forwarded(&self, id: &RequestId) -> Option<PendingRequest> {
        self.entries
            .remove_if(id, |_, entry| matches!(entry.kind, PendingKind::Forwarded { .. }))
            .map(|(_, entry)| entry)
    }

    pub fn remove(&self, id: &RequestId) -> Option<PendingRequest> {
        self.entries.remove(id).map(|(_, entry)| entry)
    }

    pub fn drain_for_peer(&self, peer: &NetworkingNodeId) -> Vec<(RequestId, PendingRequest)> {
        let ids: Vec<RequestId> = self
            .entries
            .iter()
            .filter(|e| &e.next_hop == peer)
            .map(|e| e.key().clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
