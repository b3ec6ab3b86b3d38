use crate::admission::Admission;
use crate::context::WorkerContext;
use downloader::DownloaderEngine;
use errors::Result;
use log::{error, info, warn};
use parser::extract::Extractor;
use parser::server::ParserServer;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

// Delay before exiting on a fatal startup failure, so supervisor
// restart loops do not turn into storms.
const FATAL_EXIT_DELAY: Duration = Duration::from_secs(5);

/// One crawl worker process: a parser endpoint plus a downloader
/// connection set, sharing a single [`WorkerContext`].
pub struct Worker {
    context: Arc<WorkerContext>,
    admission: Arc<Admission>,
    downloader: DownloaderEngine,
    parser: ParserServer,
}

impl Worker {
    pub fn new(context: WorkerContext, extractor: Arc<dyn Extractor>) -> Self {
        let context = Arc::new(context);
        let admission = Arc::new(Admission::new(context.clone()));

        let downloader = DownloaderEngine::new(
            context.broker.clone(),
            context.fetcher.clone(),
            context.hooks.clone(),
            &context.config,
        );
        let parser = ParserServer::new(
            admission.clone(),
            extractor,
            context.hooks.clone(),
            &context.config,
        );

        Worker {
            context,
            admission,
            downloader,
            parser,
        }
    }

    /// The admission gate, for seeding tasks from user code.
    pub fn admission(&self) -> Arc<Admission> {
        self.admission.clone()
    }

    pub fn context(&self) -> &WorkerContext {
        &self.context
    }

    /// Brings the parser endpoint up first, then the downloader
    /// connections that feed it.
    pub async fn start(&mut self) -> Result<()> {
        self.parser.start().await?;
        self.downloader.start()?;
        info!("worker '{}' started", self.context.config.name);
        Ok(())
    }

    /// Like [`Worker::start`], but treats failure as an
    /// infrastructure-unavailability error: log, wait, exit.
    pub async fn start_or_exit(&mut self) {
        if let Err(e) = self.start().await {
            error!("worker startup failed: {e}");
            sleep(FATAL_EXIT_DELAY).await;
            std::process::exit(1);
        }
    }

    /// Tears the pipeline down and clears the producer-side dedup
    /// bucket so the next run starts from an empty filter.
    pub async fn stop(&mut self) {
        self.downloader.stop().await;
        self.parser.stop().await;
        if let Err(e) = self.context.dedup.clear().await {
            warn!("dedup clear at shutdown failed: {e}");
        }
        if let Err(e) = self.context.broker.close().await {
            warn!("broker close failed: {e}");
        }
        info!("worker '{}' stopped", self.context.config.name);
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use common::hooks::NoopHooks;
    use common::model::config::Config;
    use common::model::frame::BinaryType;
    use common::model::task::Task;
    use common::sink::TaskSink;
    use downloader::{DownloaderEngine, FetchResult, Fetcher};
    use parser::extract::{Extraction, Extractor};
    use parser::server::ParserServer;
    use queue::{Broker, MemoryBroker};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;
    use uuid::Uuid;

    struct StubFetcher;

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, _task: &Task) -> errors::Result<FetchResult> {
            Ok(FetchResult {
                data: b"<html/>".to_vec(),
                binary_type: BinaryType::Text,
            })
        }
    }

    struct DiscardSink;

    #[async_trait]
    impl TaskSink for DiscardSink {
        async fn create_task(&self, task: Task) -> Option<Uuid> {
            Some(task.id)
        }
    }

    /// Counts the download frames that made it across the wire.
    struct CountingExtractor(Arc<AtomicUsize>);

    impl Extractor for CountingExtractor {
        fn extract(&self, _: &Task, _: &[u8], _: BinaryType) -> Extraction {
            self.0.fetch_add(1, Ordering::SeqCst);
            Extraction::default()
        }
    }

    /// Boots a parser on an ephemeral port and a downloader pointed at
    /// it, both over a shared in-memory broker.
    async fn boot(
        configure: impl Fn(&mut Config),
        parsed: Arc<AtomicUsize>,
    ) -> (ParserServer, DownloaderEngine, Arc<MemoryBroker>) {
        let mut config = Config::default();
        config.parser.bind = "127.0.0.1:0".to_string();
        configure(&mut config);

        let mut server = ParserServer::new(
            Arc::new(DiscardSink),
            Arc::new(CountingExtractor(parsed)),
            Arc::new(NoopHooks),
            &config,
        );
        server.start().await.unwrap();
        config.parser.endpoints = vec![format!("ws://{}", server.local_addr().unwrap())];

        let broker = Arc::new(MemoryBroker::new());
        let mut engine = DownloaderEngine::new(
            broker.clone(),
            Arc::new(StubFetcher),
            Arc::new(NoopHooks),
            &config,
        );
        engine.start().unwrap();
        (server, engine, broker)
    }

    async fn push_task(broker: &MemoryBroker, queue: &str, url: String) {
        let payload = serde_json::to_vec(&Task::new(url)).unwrap();
        broker.push(queue, &payload).await.unwrap();
    }

    async fn wait_for(counter: &AtomicUsize, expected: usize) {
        for _ in 0..100 {
            if counter.load(Ordering::SeqCst) >= expected {
                return;
            }
            sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn test_reconnect_after_idle_eviction_resumes_flow() {
        let parsed = Arc::new(AtomicUsize::new(0));
        let (mut server, mut engine, broker) = boot(
            |config| {
                config.parser.idle_timeout_secs = 1;
                config.crawl.max_connections = 1;
                config.crawl.crawl_interval_ms = 50;
                config.crawl.reconnect_delay_ms = 100;
            },
            parsed.clone(),
        )
        .await;

        // Silence past the idle timeout: the parser evicts the
        // connection and the downloader reconnects on its own.
        sleep(Duration::from_millis(2500)).await;

        // The reconnected session must still carry tasks end to end.
        push_task(&broker, "arachne", "http://example.com/".to_string()).await;
        wait_for(&parsed, 1).await;
        assert_eq!(parsed.load(Ordering::SeqCst), 1);

        engine.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_request_cap_rotation_loses_no_tasks() {
        let parsed = Arc::new(AtomicUsize::new(0));
        let (mut server, mut engine, broker) = boot(
            |config| {
                config.crawl.max_connections = 2;
                config.crawl.max_request = 2;
                config.crawl.crawl_interval_ms = 20;
                config.crawl.reconnect_delay_ms = 50;
            },
            parsed.clone(),
        )
        .await;

        for i in 0..6 {
            push_task(&broker, "arachne", format!("http://example.com/{i}")).await;
        }

        // Both connections rotate mid-stream; every popped task must
        // still reach the parser because rotation flushes queued
        // frames instead of shedding them.
        wait_for(&parsed, 6).await;
        assert_eq!(parsed.load(Ordering::SeqCst), 6);

        engine.stop().await;
        server.stop().await;
    }
}
