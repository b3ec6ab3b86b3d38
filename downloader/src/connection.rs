use crate::fetcher::Fetcher;
use common::hooks::Hooks;
use common::model::config::CrawlConfig;
use common::model::frame::Frame;
use common::model::task::Task;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use queue::Broker;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

pub(crate) const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const OUTBOUND_BUFFER: usize = 32;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why a connected session ended. Classification only affects log
/// output; the reconnect path is identical for every cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    /// Self-initiated rotation after serving `max_request` tasks.
    RequestCapReached,
    /// The parser force-closed us for being idle too long.
    PeerIdleTimeout,
    /// The stream ended or errored without a planned close.
    UnexpectedDrop,
}

/// Everything the connections of one downloader share.
pub(crate) struct Shared {
    pub broker: Arc<dyn Broker>,
    pub queue_name: String,
    pub fetcher: Arc<dyn Fetcher>,
    pub hooks: Arc<dyn Hooks>,
    pub codec: codec::PackageCodec,
    pub crawl: CrawlConfig,
}

/// One persistent downloader-side connection.
///
/// Lifecycle: connect, install task pull timer (and heartbeat for
/// remote peers), pull-download-forward until closed, then reconnect
/// after a fixed delay, forever.
pub(crate) struct Connection {
    pub endpoint: String,
    pub index: usize,
    pub shared: Arc<Shared>,
}

impl Connection {
    pub async fn run(self) {
        let delay = Duration::from_millis(self.shared.crawl.reconnect_delay_ms);
        loop {
            match connect_async(&self.endpoint).await {
                Ok((ws, _)) => {
                    info!("connection #{} established to {}", self.index, self.endpoint);
                    metrics::gauge!("downloader_connections").increment(1.0);
                    let cause = self.drive(ws).await;
                    metrics::gauge!("downloader_connections").decrement(1.0);
                    match cause {
                        CloseCause::RequestCapReached => info!(
                            "connection #{} rotating after request cap, reconnecting",
                            self.index
                        ),
                        CloseCause::PeerIdleTimeout => info!(
                            "connection #{} evicted by peer idle timeout, reconnecting",
                            self.index
                        ),
                        CloseCause::UnexpectedDrop => warn!(
                            "connection #{} to {} dropped, reconnecting",
                            self.index, self.endpoint
                        ),
                    }
                }
                Err(e) => warn!(
                    "connection #{} to {} refused: {e}",
                    self.index, self.endpoint
                ),
            }
            // Identical fixed-delay reconnect regardless of cause.
            sleep(delay).await;
        }
    }

    async fn drive(&self, ws: WsStream) -> CloseCause {
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);

        // Both timers fire one period after connect, not at connect
        // time.
        let pull_period = Duration::from_millis(self.shared.crawl.crawl_interval_ms);
        let mut pull = interval_at(Instant::now() + pull_period, pull_period);
        pull.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let heartbeat_enabled = endpoint_is_remote(&self.endpoint);
        let mut heartbeat =
            interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);

        // A frame that did not fit in the outbound buffer. It pauses
        // the pull timer until the buffer drains; a downloaded result
        // is never discarded once its task left the broker.
        let mut pending: Option<Message> = None;
        let mut requests_served: u64 = 0;

        loop {
            tokio::select! {
                _ = pull.tick(), if pending.is_none() => {
                    let Some(frame) = self.consume_one_task().await else {
                        continue;
                    };
                    match tx.try_send(Message::binary(frame)) {
                        Ok(()) => {}
                        Err(TrySendError::Full(msg)) => {
                            debug!("connection #{} outbound buffer full, pausing pulls", self.index);
                            pending = Some(msg);
                        }
                        Err(TrySendError::Closed(_)) => return CloseCause::UnexpectedDrop,
                    }
                    requests_served += 1;
                    metrics::counter!("downloader_tasks_forwarded_total").increment(1);
                    if self.shared.crawl.max_request > 0
                        && requests_served > self.shared.crawl.max_request
                    {
                        // The queued frames carry tasks already popped
                        // and acknowledged; they all go out before the
                        // rotation close.
                        if flush_outbound(&mut sink, &mut rx, pending.take()).await.is_err() {
                            return CloseCause::UnexpectedDrop;
                        }
                        let _ = sink.send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Away,
                            reason: "request cap".into(),
                        }))).await;
                        return CloseCause::RequestCapReached;
                    }
                }
                _ = heartbeat.tick(), if heartbeat_enabled => {
                    if let Ok(bytes) = self.shared.codec.assemble(&Frame::ping(
                        HEARTBEAT_INTERVAL.as_secs(),
                    )) {
                        let _ = tx.try_send(Message::binary(bytes));
                    }
                }
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        return CloseCause::UnexpectedDrop;
                    };
                    if sink.send(msg).await.is_err() {
                        return CloseCause::UnexpectedDrop;
                    }
                    if rx.is_empty()
                        && let Some(held) = pending.take()
                    {
                        debug!("connection #{} outbound buffer drained, resuming pulls", self.index);
                        if sink.send(held).await.is_err() {
                            return CloseCause::UnexpectedDrop;
                        }
                    }
                }
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(Message::Close(frame))) => return classify_close(frame),
                        Some(Ok(msg)) if msg.is_text() || msg.is_binary() => {
                            self.handle_reply(&msg.into_data());
                        }
                        Some(Ok(_)) => {} // transport ping/pong
                        Some(Err(e)) => {
                            warn!("connection #{} read error: {e}", self.index);
                            return CloseCause::UnexpectedDrop;
                        }
                        None => return CloseCause::UnexpectedDrop,
                    }
                }
            }
        }
    }

    /// Pulls one task from the broker and turns it into an outbound
    /// frame. Any failure is logged and swallowed; the pull timer
    /// simply fires again.
    async fn consume_one_task(&self) -> Option<Vec<u8>> {
        let delivery = match self
            .shared
            .broker
            .pop(&self.shared.queue_name, false)
            .await
        {
            Ok(Some(delivery)) => delivery,
            Ok(None) => return None,
            Err(e) => {
                warn!("task pop failed: {e}");
                return None;
            }
        };

        let task: Task = match serde_json::from_slice(&delivery.payload) {
            Ok(task) => task,
            Err(e) => {
                warn!("dropping undecodable task payload: {e}");
                return None;
            }
        };

        if !self.shared.hooks.on_start_task(&task) {
            debug!("task {} cancelled by on_start_task", task.id);
            return None;
        }
        if !self.shared.hooks.before_download(&task) {
            debug!("task {} cancelled by before_download", task.id);
            return None;
        }

        let result = match self.shared.fetcher.fetch(&task).await {
            Ok(result) => result,
            Err(e) => {
                warn!("download failed for {}: {e}", task.url);
                metrics::counter!("downloader_fetch_errors_total").increment(1);
                return None;
            }
        };

        if !self.shared.hooks.after_download(&task, &result.data) {
            debug!("task {} result dropped by after_download", task.id);
            return None;
        }

        if let Some(tag) = &delivery.tag
            && let Err(e) = self
                .shared
                .broker
                .acknowledge(&self.shared.queue_name, tag)
                .await
        {
            warn!("acknowledge failed for task {}: {e}", task.id);
        }

        let frame = Frame::Download {
            task,
            download_data: result.data,
            binary_type: result.binary_type,
        };
        match self.shared.codec.assemble(&frame) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("frame assembly failed: {e}");
                None
            }
        }
    }

    fn handle_reply(&self, data: &[u8]) {
        match self.shared.codec.disassemble::<Frame>(data) {
            Ok(Frame::Ack { message }) => {
                debug!("connection #{} ack: {message}", self.index)
            }
            Ok(_) => {}
            Err(e) => warn!("connection #{} undecodable reply: {e}", self.index),
        }
    }
}

/// Drains every queued outbound frame onto the socket, the held
/// overflow frame last. Runs before a self-initiated close so rotation
/// never sheds downloaded results.
async fn flush_outbound(
    sink: &mut SplitSink<WsStream, Message>,
    rx: &mut mpsc::Receiver<Message>,
    pending: Option<Message>,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    while let Ok(msg) = rx.try_recv() {
        sink.send(msg).await?;
    }
    if let Some(msg) = pending {
        sink.send(msg).await?;
    }
    Ok(())
}

fn classify_close(frame: Option<CloseFrame>) -> CloseCause {
    match frame {
        Some(frame) if frame.reason.contains("idle") => CloseCause::PeerIdleTimeout,
        _ => CloseCause::UnexpectedDrop,
    }
}

/// Heartbeats are only worth sending when the peer is off-host.
fn endpoint_is_remote(endpoint: &str) -> bool {
    let Ok(url) = url::Url::parse(endpoint) else {
        return true;
    };
    !matches!(
        url.host_str(),
        Some("localhost") | Some("127.0.0.1") | Some("::1") | Some("[::1]")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_is_remote() {
        assert!(!endpoint_is_remote("ws://127.0.0.1:7621"));
        assert!(!endpoint_is_remote("ws://localhost:7621/feed"));
        assert!(endpoint_is_remote("ws://parser.internal:7621"));
        assert!(endpoint_is_remote("wss://10.0.0.4:7621"));
    }

    #[test]
    fn test_classify_close() {
        assert_eq!(
            classify_close(Some(CloseFrame {
                code: CloseCode::Away,
                reason: "idle timeout".into(),
            })),
            CloseCause::PeerIdleTimeout
        );
        assert_eq!(
            classify_close(Some(CloseFrame {
                code: CloseCode::Abnormal,
                reason: "".into(),
            })),
            CloseCause::UnexpectedDrop
        );
        assert_eq!(classify_close(None), CloseCause::UnexpectedDrop);
    }
}
