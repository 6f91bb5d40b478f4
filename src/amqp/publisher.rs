//! AMQP event publisher for outbound events

use crate::amqp::messages::{
    MessageEnvelope, MATCH_EVENTS_EXCHANGE, MATCH_FOUND_ROUTING_KEY,
    SESSION_CANCELLED_ROUTING_KEY, SESSION_EVENTS_EXCHANGE, SESSION_TIMED_OUT_ROUTING_KEY,
    USER_ENQUEUED_ROUTING_KEY,
};
use crate::error::{PairingError, Result};
use crate::types::*;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Trait for publishing pairing events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a UserEnqueued event
    async fn publish_user_enqueued(&self, event: UserEnqueued) -> Result<()>;

    /// Publish a MatchFound event
    async fn publish_match_found(&self, event: MatchFound) -> Result<()>;

    /// Publish a SessionTimedOut event
    async fn publish_session_timed_out(&self, event: SessionTimedOut) -> Result<()>;

    /// Publish a SessionCancelled event
    async fn publish_session_cancelled(&self, event: SessionCancelled) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub enable_deduplication: bool,
    pub publish_timeout_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            enable_deduplication: true,
            publish_timeout_ms: 5000,
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
    published_messages: std::sync::Mutex<std::collections::HashSet<String>>, // For deduplication
}

impl AmqpEventPublisher {
    /// Create a new event publisher
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self {
            channel,
            config,
            published_messages: std::sync::Mutex::new(std::collections::HashSet::new()),
        };

        // Exchanges must exist before any publish can happen
        publisher.setup_exchanges().await?;

        Ok(publisher)
    }

    /// Set up AMQP exchanges for events
    async fn setup_exchanges(&self) -> Result<()> {
        // Declare match events exchange
        let args = ExchangeDeclareArguments::new(MATCH_EVENTS_EXCHANGE, "topic");
        self.channel.exchange_declare(args).await.map_err(|e| {
            PairingError::AmqpConnectionFailed {
                message: format!("Failed to declare match events exchange: {}", e),
            }
        })?;

        // Declare session events exchange
        let args = ExchangeDeclareArguments::new(SESSION_EVENTS_EXCHANGE, "topic");
        self.channel.exchange_declare(args).await.map_err(|e| {
            PairingError::AmqpConnectionFailed {
                message: format!("Failed to declare session events exchange: {}", e),
            }
        })?;

        info!("Successfully set up AMQP exchanges");
        Ok(())
    }

    /// Generic method to publish to an exchange with retry logic
    async fn publish_to_exchange<T>(
        &self,
        exchange: &str,
        envelope: &MessageEnvelope<T>,
    ) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Clone,
    {
        // Check for deduplication
        if self.config.enable_deduplication {
            let published_messages =
                self.published_messages
                    .lock()
                    .map_err(|_| PairingError::InternalError {
                        message: "Failed to acquire published messages lock".to_string(),
                    })?;
            if published_messages.contains(&envelope.correlation_id) {
                debug!(
                    "Message {} already published, skipping",
                    envelope.correlation_id
                );
                return Ok(());
            }
        }

        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(exchange, envelope).await {
                Ok(_) => {
                    if self.config.enable_deduplication {
                        let mut published_messages =
                            self.published_messages.lock().map_err(|_| {
                                PairingError::InternalError {
                                    message: "Failed to acquire published messages lock"
                                        .to_string(),
                                }
                            })?;
                        published_messages.insert(envelope.correlation_id.clone());
                    }

                    debug!(
                        "Successfully published message {} to exchange {}",
                        envelope.correlation_id, exchange
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    /// Single publish attempt
    async fn try_publish<T>(&self, exchange: &str, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| PairingError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            })?;

        Ok(())
    }

    /// Clear deduplication cache (useful for testing or memory management)
    pub fn clear_deduplication_cache(&self) {
        if let Ok(mut published_messages) = self.published_messages.lock() {
            published_messages.clear();
        }
    }

    /// Get number of cached message IDs (for monitoring)
    pub fn cached_message_count(&self) -> usize {
        self.published_messages
            .lock()
            .map(|cache| cache.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_user_enqueued(&self, event: UserEnqueued) -> Result<()> {
        let envelope = MessageEnvelope::new(event, USER_ENQUEUED_ROUTING_KEY.to_string());
        self.publish_to_exchange(SESSION_EVENTS_EXCHANGE, &envelope)
            .await
    }

    async fn publish_match_found(&self, event: MatchFound) -> Result<()> {
        let envelope = MessageEnvelope::new(event, MATCH_FOUND_ROUTING_KEY.to_string());
        self.publish_to_exchange(MATCH_EVENTS_EXCHANGE, &envelope)
            .await
    }

    async fn publish_session_timed_out(&self, event: SessionTimedOut) -> Result<()> {
        let envelope = MessageEnvelope::new(event, SESSION_TIMED_OUT_ROUTING_KEY.to_string());
        self.publish_to_exchange(SESSION_EVENTS_EXCHANGE, &envelope)
            .await
    }

    async fn publish_session_cancelled(&self, event: SessionCancelled) -> Result<()> {
        let envelope = MessageEnvelope::new(event, SESSION_CANCELLED_ROUTING_KEY.to_string());
        self.publish_to_exchange(SESSION_EVENTS_EXCHANGE, &envelope)
            .await
    }
}

/// Mock event publisher for testing
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published_events: std::sync::Mutex<Vec<AmqpMessage>>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all published events (for testing)
    pub fn get_published_events(&self) -> Vec<AmqpMessage> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Clear published events (for testing)
    pub fn clear_events(&self) {
        if let Ok(mut events) = self.published_events.lock() {
            events.clear();
        }
    }

    pub fn count_user_enqueued(&self) -> usize {
        self.count_matching(|event| matches!(event, AmqpMessage::UserEnqueued(_)))
    }

    pub fn count_match_found(&self) -> usize {
        self.count_matching(|event| matches!(event, AmqpMessage::MatchFound(_)))
    }

    pub fn count_session_timed_out(&self) -> usize {
        self.count_matching(|event| matches!(event, AmqpMessage::SessionTimedOut(_)))
    }

    pub fn count_session_cancelled(&self) -> usize {
        self.count_matching(|event| matches!(event, AmqpMessage::SessionCancelled(_)))
    }

    fn count_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&AmqpMessage) -> bool,
    {
        self.published_events
            .lock()
            .map(|events| events.iter().filter(|event| predicate(event)).count())
            .unwrap_or(0)
    }

    fn record(&self, event: AmqpMessage) {
        if let Ok(mut events) = self.published_events.lock() {
            events.push(event);
        }
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish_user_enqueued(&self, event: UserEnqueued) -> Result<()> {
        self.record(AmqpMessage::UserEnqueued(event));
        Ok(())
    }

    async fn publish_match_found(&self, event: MatchFound) -> Result<()> {
        self.record(AmqpMessage::MatchFound(event));
        Ok(())
    }

    async fn publish_session_timed_out(&self, event: SessionTimedOut) -> Result<()> {
        self.record(AmqpMessage::SessionTimedOut(event));
        Ok(())
    }

    async fn publish_session_cancelled(&self, event: SessionCancelled) -> Result<()> {
        self.record(AmqpMessage::SessionCancelled(event));
        Ok(())
    }
}
