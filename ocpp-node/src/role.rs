use ocpp_overlay_core::overlay::{Destination, NetworkingMode, NetworkingNodeId};

/// What a node is allowed to do on the network.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    /// Leaf. Talks standard mode to a single upstream peer and never relays.
    ChargingStation,
    /// Local controller sitting between charging stations and the CSMS.
    NetworkingNode,
    /// Root of the tree; every inbound path ends here.
    Csms,
}

impl NodeRole {
    pub fn can_forward(&self) -> bool {
        matches!(self, NodeRole::NetworkingNode)
    }

    /// Whether a request for `destination` is handled here rather than
    /// relayed.
    pub fn terminates(&self, own_id: &NetworkingNodeId, destination: &Destination) -> bool {
        match self {
            NodeRole::ChargingStation | NodeRole::Csms => true,
            NodeRole::NetworkingNode => destination.final_node() == Some(own_id),
        }
    }

    /// Charging stations never speak the overlay framing.
    pub fn link_mode(&self, requested: NetworkingMode) -> NetworkingMode {
        match self {
            NodeRole::ChargingStation => NetworkingMode::Standard,
            _ => requested,
        }
    }

    /// Whether `id` names this node, counting the CSMS sentinel on the CSMS.
    pub fn is_self(&self, own_id: &NetworkingNodeId, id: &NetworkingNodeId) -> bool {
        id == own_id || (*self == NodeRole::Csms && id.is_csms())
    }
}

impl core::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            NodeRole::ChargingStation => "ChargingStation",
            NodeRole::NetworkingNode => "NetworkingNode",
            NodeRole::Csms => "CSMS",
        };
        f.write_str(s)
    }
}
