use crate::connection::{Connection, Shared};
use crate::fetcher::Fetcher;
use common::hooks::Hooks;
use common::model::config::Config;
use errors::Result;
use log::info;
use queue::Broker;
use std::sync::Arc;
use tokio::task::JoinHandle;

const MAX_CONNECTIONS: usize = 1000;

/// Maps a connection index onto a parser endpoint. The default is
/// round-robin over the configured endpoint list.
pub type Router = dyn Fn(usize, &[String]) -> String + Send + Sync;

/// Owns the connection set of one downloader process.
pub struct DownloaderEngine {
    shared: Arc<Shared>,
    endpoints: Vec<String>,
    connection_count: usize,
    router: Option<Box<Router>>,
    handles: Vec<JoinHandle<()>>,
}

impl DownloaderEngine {
    pub fn new(
        broker: Arc<dyn Broker>,
        fetcher: Arc<dyn Fetcher>,
        hooks: Arc<dyn Hooks>,
        config: &Config,
    ) -> Self {
        let endpoints = if config.parser.endpoints.is_empty() {
            vec![format!("ws://{}", config.parser.bind)]
        } else {
            config.parser.endpoints.clone()
        };
        let connection_count = config.crawl.max_connections.clamp(1, MAX_CONNECTIONS);

        DownloaderEngine {
            shared: Arc::new(Shared {
                broker,
                queue_name: config.name.clone(),
                fetcher,
                hooks,
                codec: codec::PackageCodec::from_config(&config.codec),
                crawl: config.crawl.clone(),
            }),
            endpoints,
            connection_count,
            router: None,
            handles: Vec::new(),
        }
    }

    /// Replaces the default round-robin endpoint assignment.
    pub fn with_router(mut self, router: Box<Router>) -> Self {
        self.router = Some(router);
        self
    }

    /// Spawns one task per connection. Each connection reconnects on
    /// its own schedule; `start` returns immediately.
    pub fn start(&mut self) -> Result<()> {
        info!(
            "starting downloader: {} connection(s) across {} endpoint(s)",
            self.connection_count,
            self.endpoints.len()
        );
        for index in 0..self.connection_count {
            let endpoint = match &self.router {
                Some(router) => router(index, &self.endpoints),
                None => self.endpoints[index % self.endpoints.len()].clone(),
            };
            let connection = Connection {
                endpoint,
                index,
                shared: self.shared.clone(),
            };
            self.handles.push(tokio::spawn(connection.run()));
        }
        Ok(())
    }

    /// Tears the connection set down. Reconnect loops never end on
    /// their own, so stop aborts them.
    pub async fn stop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        info!("downloader stopped");
    }

    pub fn connection_count(&self) -> usize {
        self.connection_count
    }
}
