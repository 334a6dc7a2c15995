use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use ocpp_overlay_core::overlay::{NetworkingMode, NetworkingNodeId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendResult {
    Success,
    Failure(String),
}

/// Outbound half of a transport link. The transport owns the handshake,
/// framing and keep-alives; the node only hands it text frames.
#[async_trait::async_trait]
pub trait LinkSender: Send + Sync + 'static {
    async fn send(&self, frame: String) -> SendResult;
}

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// A connected peer as the node sees it.
#[derive(Clone)]
pub struct Link {
    pub peer: NetworkingNodeId,
    pub mode: NetworkingMode,
    session: u64,
    sender: Arc<dyn LinkSender>,
}

impl Link {
    pub fn new(peer: NetworkingNodeId, mode: NetworkingMode, sender: Arc<dyn LinkSender>) -> Self {
        Self {
            peer,
            mode,
            session: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            sender,
        }
    }

    /// Distinguishes a reconnect from the link it replaced.
    pub fn session(&self) -> u64 {
        self.session
    }

    pub async fn send(&self, frame: String) -> SendResult {
        log::trace!("-> {} {}", self.peer, frame);
        self.sender.send(frame).await
    }
}

impl core::fmt::Debug for Link {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Link")
            .field("peer", &self.peer)
            .field("mode", &self.mode)
            .field("session", &self.session)
            .finish()
    }
}

#[cfg(feature = "tokio_ws")]
pub use ws::{spawn_ws_link, WsLink};

#[cfg(feature = "tokio_ws")]
mod ws {
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio_tungstenite::{tungstenite::Message, WebSocketStream};

    use super::{LinkSender, SendResult};

    /// Sender side of an upgraded websocket.
    pub struct WsLink {
        tx: flume::Sender<String>,
    }

    #[async_trait::async_trait]
    impl LinkSender for WsLink {
        async fn send(&self, frame: String) -> SendResult {
            match self.tx.send_async(frame).await {
                Ok(()) => SendResult::Success,
                Err(_) => SendResult::Failure("websocket closed".into()),
            }
        }
    }

    /// Splits an upgraded websocket into a `WsLink` and the receiver of its
    /// inbound text frames, ready for `Node::attach_link`.
    pub fn spawn_ws_link<S>(socket: WebSocketStream<S>) -> (WsLink, flume::Receiver<String>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = flume::unbounded::<String>();
        let (in_tx, in_rx) = flume::unbounded::<String>();
        let (mut sink, mut stream) = socket.split();

        tokio::spawn(async move {
            while let Ok(frame) = out_rx.recv_async().await {
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    log::error!("ws send error: {:?}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        log::error!("ws recv error: {:?}", e);
                        break;
                    }
                }
            }
        });

        (WsLink { tx: out_tx }, in_rx)
    }
}
