use std::{collections::HashMap, sync::Arc};

use ocpp_overlay_core::overlay::NetworkingNodeId;
use parking_lot::RwLock;

use super::{Node, NodeInner};
use crate::{
    config::{NodeConfig, StaticRoute},
    events::EventBus,
    forwarding::{DefaultForwarding, ForwardingEngine},
    role::NodeRole,
    router::{PendingRequests, RoutingTable},
    secure::{KeyStore, ReplayGuard},
    signature::{KeyPair, SignaturePolicy, SignaturePolicyContext, VerificationAction},
};

pub struct NodeBuilder {
    config: NodeConfig,
    signatures: SignaturePolicy,
    key_store: Option<Arc<dyn KeyStore>>,
}

impl NodeBuilder {
    pub fn new(id: impl Into<NetworkingNodeId>, role: NodeRole) -> Self {
        Self::from_config(NodeConfig::new(id, role))
    }

    pub fn charging_station(id: impl Into<NetworkingNodeId>) -> Self {
        Self::new(id, NodeRole::ChargingStation)
    }

    pub fn networking_node(id: impl Into<NetworkingNodeId>) -> Self {
        Self::new(id, NodeRole::NetworkingNode)
    }

    pub fn csms(id: impl Into<NetworkingNodeId>) -> Self {
        Self::new(id, NodeRole::Csms)
    }

    pub fn from_config(config: NodeConfig) -> Self {
        Self {
            config,
            signatures: SignaturePolicy::new(),
            key_store: None,
        }
    }

    /// Seconds.
    pub fn call_timeout(mut self, timeout: u64) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    pub fn default_forwarding(mut self, result: DefaultForwarding) -> Self {
        self.config.default_forwarding = result;
        self
    }

    pub fn reject_unsigned(mut self, reject: bool) -> Self {
        self.config.reject_unsigned = reject;
        self
    }

    pub fn relay_leaf_requests(mut self, relay: bool) -> Self {
        self.config.relay_leaf_requests = relay;
        self
    }

    pub fn static_route(mut self, destination: impl Into<NetworkingNodeId>, via: impl Into<NetworkingNodeId>) -> Self {
        self.config.static_routes.push(StaticRoute {
            destination: destination.into(),
            via: via.into(),
        });
        self
    }

    pub fn default_route(mut self, via: impl Into<NetworkingNodeId>) -> Self {
        self.config.default_route = Some(via.into());
        self
    }

    pub fn signature_policy(mut self, policy: SignaturePolicy) -> Self {
        self.signatures = policy;
        self
    }

    /// Signs every matching outbound message with `key_pair`.
    pub fn sign_with(mut self, context: SignaturePolicyContext, key_pair: KeyPair) -> Self {
        self.signatures.add_simple_signing_rule(context, key_pair);
        self
    }

    pub fn verify(mut self, context: SignaturePolicyContext, action: VerificationAction) -> Self {
        self.signatures.add_verification_rule(context, action);
        self
    }

    pub fn key_store(mut self, store: Arc<dyn KeyStore>) -> Self {
        self.key_store = Some(store);
        self
    }

    pub fn build(self) -> Node {
        let NodeBuilder {
            config,
            mut signatures,
            key_store,
        } = self;

        if config.reject_unsigned {
            signatures.reject_unsigned(true);
        }
        let routing = RoutingTable::new(config.id.clone());
        for route in &config.static_routes {
            routing.add_static_routing(route.destination.clone(), route.via.clone());
        }
        routing.set_default_route(config.default_route.clone());
        let forwarding = ForwardingEngine::new(config.default_forwarding);

        log::info!("{}: {} node ready", config.id, config.role);
        Node {
            inner: Arc::new(NodeInner {
                config,
                routing,
                pending: PendingRequests::new(),
                forwarding,
                signatures,
                handlers: RwLock::new(HashMap::new()),
                key_store,
                replay_guard: ReplayGuard::new(),
                events: EventBus::default(),
            }),
        }
    }
}
