//! AMQP message handlers for processing pair requests and cancellations
//!
//! This module provides the message handling infrastructure for the pairing
//! service, including request processing, error handling, and dead letter
//! queue management.

use crate::amqp::messages::MessageUtils;
use crate::error::{PairingError, Result};
use crate::types::{AmqpMessage, CancelRequest, PairRequest};
use amqprs::{
    channel::{BasicCancelArguments, BasicConsumeArguments, Channel},
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Trait defining the interface for handling AMQP messages
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a pair request from a client
    async fn handle_pair_request(&self, request: PairRequest) -> Result<()>;

    /// Handle a cancellation request from a client
    async fn handle_cancel_request(&self, request: CancelRequest) -> Result<()>;

    /// Handle processing errors
    async fn handle_error(&self, error: PairingError, message_data: &[u8]);
}

/// Consumer for handling pair request messages
pub struct PairRequestConsumer {
    handler: Arc<dyn MessageHandler>,
    channel: Channel,
    consumer_tag: String,
}

impl PairRequestConsumer {
    /// Create a new pair request consumer
    pub fn new(handler: Arc<dyn MessageHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("pair-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
        }
    }

    /// Start consuming messages from the queue
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);

        self.channel
            .basic_consume(PairConsumer::new(self.handler.clone()), args)
            .await
            .map_err(|e| PairingError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming messages from queue: {}", queue_name);
        Ok(())
    }

    /// Stop consuming messages
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel
            .basic_cancel(args)
            .await
            .map_err(|e| PairingError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            })?;

        info!("Stopped consuming messages");
        Ok(())
    }
}

/// Internal consumer implementation
struct PairConsumer {
    handler: Arc<dyn MessageHandler>,
}

impl PairConsumer {
    fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl AsyncConsumer for PairConsumer {
    async fn consume(
        &mut self,
        _channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        _content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        let routing_key = deliver.routing_key();
        let message_size = _content.len();

        info!(
            "AMQP message received - delivery_tag: {}, routing_key: '{}', size: {} bytes",
            delivery_tag, routing_key, message_size
        );

        let start_time = std::time::Instant::now();

        match self.process_message(&_content).await {
            Ok(_) => {
                let processing_time = start_time.elapsed();
                info!(
                    "Message processed successfully - delivery_tag: {}, processing_time: {:.2}ms",
                    delivery_tag,
                    processing_time.as_secs_f64() * 1000.0
                );
            }
            Err(e) => {
                let processing_time = start_time.elapsed();
                error!(
                    "Message processing failed - delivery_tag: {}, processing_time: {:.2}ms, error: {}",
                    delivery_tag, processing_time.as_secs_f64() * 1000.0, e
                );
                self.handler
                    .handle_error(
                        PairingError::InternalError {
                            message: e.to_string(),
                        },
                        &_content,
                    )
                    .await;
            }
        }
    }
}

impl PairConsumer {
    /// Process an incoming message
    async fn process_message(&self, content: &[u8]) -> Result<()> {
        let message = MessageUtils::deserialize_message(content)?;

        match message {
            AmqpMessage::PairRequest(request) => {
                info!("Pair request parsed - user_id: '{}'", request.user_id);
                self.handler.handle_pair_request(request).await?;
            }
            AmqpMessage::CancelRequest(request) => {
                info!("Cancel request parsed - user_id: '{}'", request.user_id);
                self.handler.handle_cancel_request(request).await?;
            }
            // Events are published by this service and never expected inbound
            other => {
                return Err(PairingError::InvalidPairRequest {
                    reason: format!(
                        "Unexpected message on request queue: {}",
                        MessageUtils::get_routing_key(&other)
                    ),
                }
                .into());
            }
        }

        Ok(())
    }
}

/// Dead letter queue handler for failed messages
pub struct DeadLetterHandler {
    _channel: Channel,
    retry_attempts: std::collections::HashMap<String, u32>,
    max_retries: u32,
}

impl DeadLetterHandler {
    /// Create a new dead letter queue handler
    pub fn new(channel: Channel, max_retries: u32) -> Self {
        Self {
            _channel: channel,
            retry_attempts: std::collections::HashMap::new(),
            max_retries,
        }
    }

    /// Handle a failed message
    pub async fn handle_failed_message(
        &mut self,
        message_id: String,
        _content: Vec<u8>,
        error: PairingError,
    ) -> Result<()> {
        let retry_count = self.retry_attempts.entry(message_id.clone()).or_insert(0);
        *retry_count += 1;

        if *retry_count <= self.max_retries {
            warn!(
                "Message {} failed (attempt {}), will retry: {}",
                message_id, retry_count, error
            );

            // In a real implementation, we would republish to retry queue
            // For now, just log the retry attempt
            return Ok(());
        }

        error!(
            "Message {} exceeded max retries ({}), moving to dead letter queue: {}",
            message_id, self.max_retries, error
        );

        // Remove from retry tracking
        self.retry_attempts.remove(&message_id);

        // In a real implementation, we would publish to dead letter exchange
        // For now, just log the permanent failure

        Ok(())
    }
}

/// Mock message handler for testing
pub struct MockMessageHandler {
    pub received_pairs: Arc<tokio::sync::Mutex<Vec<PairRequest>>>,
    pub received_cancels: Arc<tokio::sync::Mutex<Vec<CancelRequest>>>,
}

impl Default for MockMessageHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMessageHandler {
    pub fn new() -> Self {
        Self {
            received_pairs: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            received_cancels: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl MessageHandler for MockMessageHandler {
    async fn handle_pair_request(&self, request: PairRequest) -> Result<()> {
        let mut requests = self.received_pairs.lock().await;
        requests.push(request);
        Ok(())
    }

    async fn handle_cancel_request(&self, request: CancelRequest) -> Result<()> {
        let mut requests = self.received_cancels.lock().await;
        requests.push(request);
        Ok(())
    }

    async fn handle_error(&self, error: PairingError, _message_data: &[u8]) {
        eprintln!("Mock handler received error: {}", error);
    }
}
