//! Per-action, per-connection policy deciding what a networking node does
//! with a request that is not addressed to it.

use std::{collections::HashMap, sync::Arc};

use dashmap::DashMap;
use ocpp_overlay_core::{
    format::{
        envelope::{RequestEnvelope, RequestId, ResponseEnvelope},
        error::ProtocolError,
    },
    overlay::NetworkingNodeId,
    v21::{Request, Response},
};
use parking_lot::RwLock;

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForwardingResult {
    #[default]
    Forward,
    Drop,
    Replace,
    Transform,
}

impl core::fmt::Display for ForwardingResult {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ForwardingResult::Forward => "FORWARD",
            ForwardingResult::Drop => "DROP",
            ForwardingResult::Replace => "REPLACE",
            ForwardingResult::Transform => "TRANSFORM",
        };
        f.write_str(s)
    }
}

/// What happens to a relayed request no rule matches. Replacing or
/// transforming needs a rule, so neither can be a default.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultForwarding {
    #[default]
    Forward,
    Drop,
}

impl From<DefaultForwarding> for ForwardingResult {
    fn from(value: DefaultForwarding) -> Self {
        match value {
            DefaultForwarding::Forward => ForwardingResult::Forward,
            DefaultForwarding::Drop => ForwardingResult::Drop,
        }
    }
}

/// Answer sent back to the previous hop in place of relaying.
#[derive(Debug, Clone, PartialEq)]
pub enum ImmediateResponse {
    Response(Response),
    Error { code: ProtocolError, description: String },
}

pub type ResponseTransform = Arc<dyn Fn(&ResponseEnvelope) -> Response + Send + Sync>;

/// What a filter returns for one request.
#[derive(Clone)]
pub enum Verdict {
    Forward,
    Drop(Option<ImmediateResponse>),
    Replace(Request),
    Transform(Request, ResponseTransform),
}

pub type ForwardingFilter = Arc<dyn Fn(&RequestEnvelope, &NetworkingNodeId) -> Verdict + Send + Sync>;

pub struct ForwardingDecision {
    pub request: RequestEnvelope,
    pub result: ForwardingResult,
    pub replacement: Option<Request>,
    pub immediate_response: Option<ImmediateResponse>,
    pub response_transform: Option<ResponseTransform>,
}

impl ForwardingDecision {
    fn from_verdict(request: RequestEnvelope, verdict: Verdict) -> Self {
        let (result, replacement, immediate_response, response_transform) = match verdict {
            Verdict::Forward => (ForwardingResult::Forward, None, None, None),
            Verdict::Drop(immediate) => (ForwardingResult::Drop, None, immediate, None),
            Verdict::Replace(req) => (ForwardingResult::Replace, Some(req), None, None),
            Verdict::Transform(req, f) => (ForwardingResult::Transform, Some(req), None, Some(f)),
        };
        Self {
            request,
            result,
            replacement,
            immediate_response,
            response_transform,
        }
    }

    /// The envelope to relay: the original, or the original id carrying the
    /// replacement payload. Signatures over the old payload are dropped.
    pub fn outgoing(&self) -> Option<RequestEnvelope> {
        match self.result {
            ForwardingResult::Drop => None,
            ForwardingResult::Forward => Some(self.request.clone()),
            ForwardingResult::Replace | ForwardingResult::Transform => {
                let mut env = self.request.clone();
                if let Some(replacement) = &self.replacement {
                    env.payload = replacement.clone();
                    env.signatures.clear();
                }
                Some(env)
            }
        }
    }
}

impl core::fmt::Debug for ForwardingDecision {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ForwardingDecision")
            .field("request_id", &self.request.request_id)
            .field("action", &self.request.action())
            .field("result", &self.result)
            .field("replacement", &self.replacement)
            .field("immediate_response", &self.immediate_response)
            .field("transforms_response", &self.response_transform.is_some())
            .finish()
    }
}

type RuleKey = (String, Option<NetworkingNodeId>);

pub struct ForwardingEngine {
    rules: RwLock<HashMap<RuleKey, ForwardingFilter>>,
    default_result: DefaultForwarding,
    transforms: DashMap<RequestId, ResponseTransform>,
}

impl core::fmt::Debug for ForwardingEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ForwardingEngine")
            .field("rules", &self.rules.read().keys().collect::<Vec<_>>())
            .field("default_result", &self.default_result)
            .field("pending_transforms", &self.pending_transforms())
            .finish()
    }
}

impl ForwardingEngine {
    /// `default_result` applies when no rule matches.
    pub fn new(default_result: DefaultForwarding) -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            default_result,
            transforms: DashMap::new(),
        }
    }

    pub fn default_result(&self) -> ForwardingResult {
        self.default_result.into()
    }

    pub fn on_request<F>(&self, action: impl Into<String>, filter: F)
    where
        F: Fn(&RequestEnvelope, &NetworkingNodeId) -> Verdict + Send + Sync + 'static,
    {
        self.rules.write().insert((action.into(), None), Arc::new(filter));
    }

    /// Rule for requests of `action` arriving over the link to `connection`.
    /// Takes precedence over a connection-independent rule.
    pub fn on_request_from<F>(&self, action: impl Into<String>, connection: NetworkingNodeId, filter: F)
    where
        F: Fn(&RequestEnvelope, &NetworkingNodeId) -> Verdict + Send + Sync + 'static,
    {
        self.rules
            .write()
            .insert((action.into(), Some(connection)), Arc::new(filter));
    }

    pub fn drop_action(&self, action: impl Into<String>, immediate: Option<ImmediateResponse>) {
        self.on_request(action, move |_, _| Verdict::Drop(immediate.clone()));
    }

    fn lookup(&self, action: &str, connection: &NetworkingNodeId) -> Option<ForwardingFilter> {
        let rules = self.rules.read();
        rules
            .get(&(action.to_string(), Some(connection.clone())))
            .or_else(|| rules.get(&(action.to_string(), None)))
            .cloned()
    }

    /// Exactly one decision per inbound request. A `Transform` verdict
    /// leaves a note under the request id for the response's return trip.
    pub fn decide(&self, request: RequestEnvelope, connection: &NetworkingNodeId) -> ForwardingDecision {
        let verdict = match self.lookup(request.action(), connection) {
            Some(filter) => filter(&request, connection),
            None => match self.default_result {
                DefaultForwarding::Drop => Verdict::Drop(Some(ImmediateResponse::Error {
                    code: ProtocolError::SecurityError,
                    description: format!("{} is not forwarded", request.action()),
                })),
                DefaultForwarding::Forward => Verdict::Forward,
            },
        };
        let decision = ForwardingDecision::from_verdict(request, verdict);
        if let Some(transform) = &decision.response_transform {
            self.transforms
                .insert(decision.request.request_id.clone(), transform.clone());
        }
        log::info!(
            "forwarding decision {} for {} [{}] from {}",
            decision.result,
            decision.request.action(),
            decision.request.request_id,
            connection
        );
        decision
    }

    /// Transform notes still waiting for their response.
    pub fn pending_transforms(&self) -> usize {
        self.transforms.len()
    }

    pub fn take_response_transform(&self, request_id: &RequestId) -> Option<ResponseTransform> {
        self.transforms.remove(request_id).map(|(_, f)| f)
    }

    pub fn forget(&self, request_id: &RequestId) {
        self.transforms.remove(request_id);
    }
}

impl Default for ForwardingEngine {
    fn default() -> Self {
        Self::new(DefaultForwarding::Forward)
    }
}
