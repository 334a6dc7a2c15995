use ocpp_overlay_core::overlay::NetworkingNodeId;

use crate::{forwarding::DefaultForwarding, role::NodeRole};

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StaticRoute {
    pub destination: NetworkingNodeId,
    pub via: NetworkingNodeId,
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub id: NetworkingNodeId,
    pub role: NodeRole,
    /// Seconds to wait for a response before a call fails with a timeout.
    #[serde(default = "default_call_timeout")]
    pub call_timeout: u64,
    #[serde(default)]
    pub default_forwarding: DefaultForwarding,
    #[serde(default)]
    pub reject_unsigned: bool,
    /// Relay standard-mode requests from leaves towards the CSMS when no
    /// local handler takes them.
    #[serde(default = "default_relay_leaf_requests")]
    pub relay_leaf_requests: bool,
    #[serde(default)]
    pub static_routes: Vec<StaticRoute>,
    #[serde(default)]
    pub default_route: Option<NetworkingNodeId>,
}

fn default_call_timeout() -> u64 {
    30
}

fn default_relay_leaf_requests() -> bool {
    true
}

impl NodeConfig {
    pub fn new(id: impl Into<NetworkingNodeId>, role: NodeRole) -> Self {
        Self {
            id: id.into(),
            role,
            call_timeout: default_call_timeout(),
            default_forwarding: DefaultForwarding::Forward,
            reject_unsigned: false,
            relay_leaf_requests: default_relay_leaf_requests(),
            static_routes: Vec::new(),
            default_route: None,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
