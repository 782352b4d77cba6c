//! NATS client wrapper
//!
//! Connection management plus the small publish/subscribe surface the
//! service needs. Reconnection and backoff beyond the initial connect are
//! the library's responsibility.

use async_nats::{Client, ConnectOptions};
use bytes::Bytes;
use std::time::Duration;
use tracing::info;

use crate::config::NatsArgs;
use crate::types::{Result, WardenError};

/// Ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// NATS client wrapper with JetStream support
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
    name: String,
}

impl NatsClient {
    /// Create a new NATS client
    pub async fn new(args: &NatsArgs, name: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", args.nats_url);

        // No retry on the initial connect: fail fast when the bus is
        // unavailable. Reconnection still applies once connected.
        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.nats_url)
            .await
            .map_err(|e| WardenError::Nats(format!("Failed to connect: {}", e)))?;

        info!("Connected to NATS at {}", args.nats_url);

        Ok(Self {
            client,
            name: name.to_string(),
        })
    }

    /// Get the underlying NATS client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Whether the connection is currently up, for readiness probes
    pub fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }

    /// Publish a message to a subject
    pub async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| WardenError::Nats(format!("Publish failed: {}", e)))
    }

    /// Subscribe to a subject within a queue group
    pub async fn queue_subscribe(
        &self,
        subject: &str,
        queue_group: &str,
    ) -> Result<async_nats::Subscriber> {
        self.client
            .queue_subscribe(subject.to_string(), queue_group.to_string())
            .await
            .map_err(|e| WardenError::Nats(format!("Subscribe failed: {}", e)))
    }

    /// Flush pending messages
    pub async fn flush(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .map_err(|e| WardenError::Nats(format!("Flush failed: {}", e)))
    }

    /// Drain subscriptions and close the connection
    pub async fn drain(&self) -> Result<()> {
        self.client
            .drain()
            .await
            .map_err(|e| WardenError::Nats(format!("Drain failed: {}", e)))
    }

    /// Get the client name
    pub fn name(&self) -> &str {
        &self.name
    }
}
