//! Overlay-network addressing: node identifiers, network paths, destinations
//! and the detached signatures that ride along with a payload.

use chrono::{DateTime, Utc};

/// Identifier of a node in the overlay network.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct NetworkingNodeId(String);

impl NetworkingNodeId {
    pub const CSMS: &'static str = "CSMS";
    pub const ZERO: &'static str = "Zero";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Sentinel addressing "whichever CSMS is upstream".
    pub fn csms() -> Self {
        Self(Self::CSMS.into())
    }

    pub fn zero() -> Self {
        Self(Self::ZERO.into())
    }

    pub fn is_csms(&self) -> bool {
        self.0 == Self::CSMS
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for NetworkingNodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NetworkingNodeId {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for NetworkingNodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Hops a message has traversed, oldest first.
///
/// A path only ever grows, and growing it yields a new value.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct NetworkPath(Vec<NetworkingNodeId>);

impl NetworkPath {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn from_source(source: NetworkingNodeId) -> Self {
        Self(vec![source])
    }

    pub fn append(&self, hop: NetworkingNodeId) -> Self {
        let mut hops = Vec::with_capacity(self.0.len() + 1);
        hops.extend(self.0.iter().cloned());
        hops.push(hop);
        Self(hops)
    }

    pub fn source(&self) -> Option<&NetworkingNodeId> {
        self.0.first()
    }

    pub fn last(&self) -> Option<&NetworkingNodeId> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: &NetworkingNodeId) -> bool {
        self.0.contains(id)
    }

    pub fn hops(&self) -> &[NetworkingNodeId] {
        &self.0
    }

    pub fn reversed(&self) -> Self {
        Self(self.0.iter().rev().cloned().collect())
    }
}

impl FromIterator<NetworkingNodeId> for NetworkPath {
    fn from_iter<T: IntoIterator<Item = NetworkingNodeId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Where a message is headed: a final node id, or an explicit source route.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum Destination {
    Direct(NetworkingNodeId),
    Routed(Vec<NetworkingNodeId>),
}

impl Destination {
    pub fn direct(id: impl Into<NetworkingNodeId>) -> Self {
        Destination::Direct(id.into())
    }

    pub fn routed<I, T>(hops: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<NetworkingNodeId>,
    {
        Destination::Routed(hops.into_iter().map(Into::into).collect())
    }

    /// The node the message is ultimately addressed to.
    pub fn final_node(&self) -> Option<&NetworkingNodeId> {
        match self {
            Destination::Direct(id) => Some(id),
            Destination::Routed(hops) => hops.last(),
        }
    }

    /// For a source route, the hop following `current`, or the first hop
    /// when `current` is not part of the route.
    pub fn next_hop_after(&self, current: &NetworkingNodeId) -> Option<&NetworkingNodeId> {
        match self {
            Destination::Direct(id) => Some(id),
            Destination::Routed(hops) => match hops.iter().position(|h| h == current) {
                Some(pos) => hops.get(pos + 1),
                None => hops.first(),
            },
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum NetworkingMode {
    /// Point-to-point, frames carry no routing header.
    #[default]
    Standard,
    OverlayNetwork,
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum VerificationStatus {
    #[default]
    Unverified,
    ValidSignature,
    InvalidSignature,
    InvalidPublicKey,
    InvalidSignatureFormat,
}

/// A detached signature over a message payload.
///
/// `status` is local bookkeeping and never goes over the wire.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub key_id: String,
    pub value: String,
    #[serde(default = "Signature::default_method")]
    pub signing_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub status: VerificationStatus,
}

impl Signature {
    pub const ED25519: &'static str = "Ed25519";

    fn default_method() -> String {
        Self::ED25519.into()
    }
}
