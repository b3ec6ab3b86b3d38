use crate::{Broker, Delivery};
use async_trait::async_trait;
use common::model::config::KafkaConfig;
use dashmap::DashMap;
use errors::Result;
use errors::error::QueueError;
use log::{info, warn};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message as KafkaMessageTrait;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

const RECV_WAIT: Duration = Duration::from_secs(1);
const RECV_NOWAIT: Duration = Duration::from_millis(50);

/// Durable broker backend. The AMQP-style contract maps onto kafka
/// primitives: push = produce to a namespaced topic, pop = consume
/// through a shared consumer group, acknowledge = commit the delivery's
/// offset. Durability comes from broker retention, not per-message
/// flags.
pub struct KafkaBroker {
    producer: FutureProducer,
    admin_client: Arc<AdminClient<DefaultClientContext>>,
    consumers: DashMap<String, Arc<StreamConsumer>>,
    client_config: ClientConfig,
    group_id: String,
    namespace: String,
    known_topics: Arc<RwLock<HashSet<String>>>,
}

impl KafkaBroker {
    pub fn new(kafka_config: &KafkaConfig, namespace: &str) -> Result<Self> {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", kafka_config.brokers.as_str());
        config.set("message.timeout.ms", "5000");

        let use_tls = kafka_config.tls.unwrap_or(false);
        if let (Some(user), Some(pass)) = (&kafka_config.username, &kafka_config.password) {
            if use_tls {
                config.set("security.protocol", "SASL_SSL");
            } else {
                config.set("security.protocol", "SASL_PLAINTEXT");
            }
            config
                .set("sasl.mechanism", "PLAIN")
                .set("sasl.username", user)
                .set("sasl.password", pass);
        } else if use_tls {
            config.set("security.protocol", "SSL");
        }

        let producer: FutureProducer = config.create().map_err(|_| QueueError::ConnectionFailed)?;
        let admin_client: AdminClient<DefaultClientContext> =
            config.create().map_err(|_| QueueError::ConnectionFailed)?;

        Ok(KafkaBroker {
            producer,
            admin_client: Arc::new(admin_client),
            consumers: DashMap::new(),
            client_config: config,
            group_id: format!("{namespace}-crawl-group"),
            namespace: namespace.to_string(),
            known_topics: Arc::new(RwLock::new(HashSet::new())),
        })
    }

    fn topic(&self, queue: &str) -> String {
        format!("{}-{}", self.namespace, queue)
    }

    async fn ensure_topic_exists(&self, topic_name: &str) -> Result<()> {
        if let Ok(cache) = self.known_topics.read()
            && cache.contains(topic_name)
        {
            return Ok(());
        }

        let new_topic = NewTopic::new(topic_name, 1, TopicReplication::Fixed(1));
        let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(5)));

        match self.admin_client.create_topics(&[new_topic], &opts).await {
            Ok(results) => {
                for result in results {
                    match result {
                        Ok(_) => info!("created kafka topic: {topic_name}"),
                        Err((_, err)) => {
                            if err != rdkafka::types::RDKafkaErrorCode::TopicAlreadyExists {
                                warn!("failed to create kafka topic {topic_name}: {err}");
                            }
                        }
                    }
                }
            }
            Err(e) => {
                warn!("admin client failed to create topic {topic_name}: {e}");
            }
        }

        if let Ok(mut cache) = self.known_topics.write() {
            cache.insert(topic_name.to_string());
        }
        Ok(())
    }

    fn consumer_for(&self, topic: &str) -> Result<Arc<StreamConsumer>> {
        if let Some(consumer) = self.consumers.get(topic) {
            return Ok(consumer.clone());
        }

        let mut config = self.client_config.clone();
        config
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest");

        let consumer: StreamConsumer = config.create().map_err(|_| QueueError::ConnectionFailed)?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| QueueError::OperationFailed(Box::new(e)))?;

        let consumer = Arc::new(consumer);
        self.consumers.insert(topic.to_string(), consumer.clone());
        info!("kafka consumer subscribed: topic={topic} group={}", self.group_id);
        Ok(consumer)
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn push(&self, queue: &str, payload: &[u8]) -> Result<Option<String>> {
        let topic = self.topic(queue);
        self.ensure_topic_exists(&topic).await?;

        let key = Uuid::new_v4().to_string();
        let record = FutureRecord::to(&topic).payload(payload).key(&key);
        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| QueueError::PushFailed(Box::new(e)))?;
        Ok(Some(key))
    }

    async fn pop(&self, queue: &str, wait: bool) -> Result<Option<Delivery>> {
        let topic = self.topic(queue);
        self.ensure_topic_exists(&topic).await?;
        let consumer = self.consumer_for(&topic)?;

        let timeout = if wait { RECV_WAIT } else { RECV_NOWAIT };
        match tokio::time::timeout(timeout, consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(QueueError::PopFailed(Box::new(e)).into()),
            Ok(Ok(message)) => {
                let payload = message.payload().unwrap_or_default().to_vec();
                let tag = format!("{}:{}", message.partition(), message.offset());
                Ok(Some(Delivery {
                    payload,
                    tag: Some(tag),
                }))
            }
        }
    }

    async fn llen(&self, queue: &str) -> Result<u64> {
        let topic = self.topic(queue);
        let consumer = self.consumer_for(&topic)?;

        let (low, high) = consumer
            .fetch_watermarks(&topic, 0, Duration::from_secs(1))
            .map_err(|e| QueueError::OperationFailed(Box::new(e)))?;

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(&topic, 0);
        let committed = consumer
            .committed_offsets(tpl, Duration::from_secs(1))
            .map_err(|e| QueueError::OperationFailed(Box::new(e)))?;

        let consumed = committed
            .elements()
            .first()
            .and_then(|el| match el.offset() {
                Offset::Offset(offset) => Some(offset),
                _ => None,
            })
            .unwrap_or(low);

        Ok((high - consumed).max(0) as u64)
    }

    async fn purge(&self, queue: &str) -> Result<()> {
        let topic = self.topic(queue);
        let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(5)));
        self.admin_client
            .delete_topics(&[topic.as_str()], &opts)
            .await
            .map_err(|e| QueueError::OperationFailed(Box::new(e)))?;
        self.consumers.remove(&topic);
        if let Ok(mut cache) = self.known_topics.write() {
            cache.remove(&topic);
        }
        Ok(())
    }

    async fn acknowledge(&self, queue: &str, tag: &str) -> Result<()> {
        let topic = self.topic(queue);
        let consumer = self.consumer_for(&topic)?;

        let (partition, offset) = tag
            .split_once(':')
            .and_then(|(p, o)| Some((p.parse::<i32>().ok()?, o.parse::<i64>().ok()?)))
            .ok_or_else(|| {
                QueueError::AckFailed(format!("malformed delivery tag '{tag}'").into())
            })?;

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&topic, partition, Offset::Offset(offset + 1))
            .map_err(|e| QueueError::AckFailed(Box::new(e)))?;
        consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| QueueError::AckFailed(Box::new(e)))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.consumers.clear();
        let _ = self.producer.flush(Duration::from_secs(5));
        Ok(())
    }
}
