//! Observer hooks. Every event is published before the I/O it describes
//! completes, so subscribers see decisions even when the send fails.

use ocpp_overlay_core::{
    format::envelope::{RequestEnvelope, RequestId, ResponseMessage},
    overlay::NetworkingNodeId,
};
use parking_lot::Mutex;

use crate::forwarding::ForwardingResult;

#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// Signatures on `request` already carry their verification status.
    RequestReceived {
        from: NetworkingNodeId,
        request: RequestEnvelope,
    },
    RequestSent {
        to: NetworkingNodeId,
        request: RequestEnvelope,
    },
    /// A networking node decided what to do with a request not addressed to
    /// it. `request` is the envelope as received.
    ForwardingDecided {
        from: NetworkingNodeId,
        result: ForwardingResult,
        request: RequestEnvelope,
    },
    ResponseReceived {
        from: NetworkingNodeId,
        response: ResponseMessage,
    },
    ResponseSent {
        to: NetworkingNodeId,
        response: ResponseMessage,
    },
    FrameDropped {
        from: NetworkingNodeId,
        request_id: Option<RequestId>,
        reason: String,
    },
}

#[derive(Debug, Default)]
pub(crate) struct EventBus {
    subscribers: Mutex<Vec<flume::Sender<NodeEvent>>>,
}

impl EventBus {
    pub fn subscribe(&self) -> flume::Receiver<NodeEvent> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: NodeEvent) {
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
