use crate::extract::Extractor;
use crate::handler::{ParserContext, handle_message};
use common::hooks::Hooks;
use common::model::config::Config;
use common::sink::TaskSink;
use errors::Result;
use errors::error::ProtocolError;
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

/// Parse-side endpoint: accepts downloader connections, evicts the
/// idle ones and feeds every frame through the handler.
pub struct ParserServer {
    ctx: Arc<ParserContext>,
    bind: String,
    idle_timeout: Duration,
    local_addr: Option<SocketAddr>,
    accept_handle: Option<JoinHandle<()>>,
    conn_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ParserServer {
    pub fn new(
        sink: Arc<dyn TaskSink>,
        extractor: Arc<dyn Extractor>,
        hooks: Arc<dyn Hooks>,
        config: &Config,
    ) -> Self {
        ParserServer {
            ctx: Arc::new(ParserContext {
                codec: codec::PackageCodec::from_config(&config.codec),
                sink,
                extractor,
                hooks,
                max_depth: config.crawl.max_depth,
                allow_domains: config.crawl.allow_domains.clone(),
            }),
            bind: config.parser.bind.clone(),
            idle_timeout: Duration::from_secs(config.parser.idle_timeout_secs),
            local_addr: None,
            accept_handle: None,
            conn_handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Binds the listener and spawns the accept loop.
    pub async fn start(&mut self) -> Result<()> {
        let listener = TcpListener::bind(&self.bind)
            .await
            .map_err(|e| ProtocolError::HandshakeFailed(Box::new(e)))?;
        self.local_addr = listener.local_addr().ok();
        info!("parser listening on {}", self.bind);

        let ctx = self.ctx.clone();
        let idle_timeout = self.idle_timeout;
        let conn_handles = self.conn_handles.clone();
        self.accept_handle = Some(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let handle = tokio::spawn(serve_connection(
                            ctx.clone(),
                            stream,
                            peer,
                            idle_timeout,
                        ));
                        let mut handles = conn_handles.lock().await;
                        handles.retain(|h| !h.is_finished());
                        handles.push(handle);
                    }
                    Err(e) => warn!("accept failed: {e}"),
                }
            }
        }));
        Ok(())
    }

    /// The address actually bound, once started. Differs from the
    /// configured bind string when port 0 was requested.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stops accepting and tears down every established connection.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.accept_handle.take() {
            handle.abort();
        }
        for handle in self.conn_handles.lock().await.drain(..) {
            handle.abort();
        }
        info!("parser stopped");
    }
}

async fn serve_connection(
    ctx: Arc<ParserContext>,
    stream: TcpStream,
    peer: SocketAddr,
    idle_timeout: Duration,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("handshake with {peer} failed: {e}");
            return;
        }
    };
    info!("downloader connected from {peer}");
    metrics::gauge!("parser_connections").increment(1.0);

    let (mut sink, mut stream) = ws.split();
    let mut last_alive = Instant::now();
    let mut liveness = interval(LIVENESS_INTERVAL);

    loop {
        tokio::select! {
            _ = liveness.tick() => {
                if last_alive.elapsed() >= idle_timeout {
                    info!("evicting {peer}: idle for {:?}", last_alive.elapsed());
                    let _ = sink.send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Away,
                        reason: "idle timeout".into(),
                    }))).await;
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(msg)) if msg.is_text() || msg.is_binary() => {
                        last_alive = Instant::now();
                        if let Some(reply) = handle_message(&ctx, &msg.into_data()).await
                            && sink.send(Message::binary(reply)).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(_)) => last_alive = Instant::now(), // transport ping/pong
                    Some(Err(e)) => {
                        warn!("read error from {peer}: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    metrics::gauge!("parser_connections").decrement(1.0);
    info!("connection from {peer} closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::NoopExtractor;
    use async_trait::async_trait;
    use common::hooks::NoopHooks;
    use common::model::task::Task;
    use tokio::time::timeout;
    use tokio_tungstenite::connect_async;
    use uuid::Uuid;

    struct DiscardSink;

    #[async_trait]
    impl TaskSink for DiscardSink {
        async fn create_task(&self, task: Task) -> Option<Uuid> {
            Some(task.id)
        }
    }

    async fn started_server(idle_timeout_secs: u64) -> ParserServer {
        let mut config = Config::default();
        config.parser.bind = "127.0.0.1:0".to_string();
        config.parser.idle_timeout_secs = idle_timeout_secs;
        let mut server = ParserServer::new(
            Arc::new(DiscardSink),
            Arc::new(NoopExtractor),
            Arc::new(NoopHooks),
            &config,
        );
        server.start().await.unwrap();
        server
    }

    #[tokio::test]
    async fn test_idle_connection_is_evicted() {
        let mut server = started_server(1).await;
        let addr = server.local_addr().unwrap();

        let (ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        let (_, mut stream) = ws.split();

        // Send nothing; the liveness sweep must force-close us.
        let frame = timeout(Duration::from_secs(4), async {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Close(frame))) => break frame,
                    Some(Ok(_)) => {}
                    other => panic!("stream ended without close: {other:?}"),
                }
            }
        })
        .await
        .unwrap();
        assert!(frame.unwrap().reason.contains("idle"));

        server.stop().await;
    }

    #[tokio::test]
    async fn test_stop_closes_established_connections() {
        let mut server = started_server(300).await;
        let addr = server.local_addr().unwrap();

        let (ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        server.stop().await;

        // The connection task was aborted, so the socket must go down
        // well before the idle timeout.
        let (_, mut stream) = ws.split();
        let ended = timeout(Duration::from_secs(2), async {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await;
        assert!(ended.is_ok(), "connection survived stop");
    }
}
