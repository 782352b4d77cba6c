//! Configuration for warden
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use uuid::Uuid;

/// Warden - relationship-based access control sync and check service
#[derive(Parser, Debug, Clone)]
#[command(name = "warden")]
#[command(about = "Keeps a ReBAC store in sync with domain events and answers batched access checks")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address the health/metrics HTTP server listens on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// JetStream KV bucket used as the relation check cache
    #[arg(long, env = "CACHE_BUCKET", default_value = "warden-cache")]
    pub cache_bucket: String,

    /// Whether to serve checks from the cache and seed it after syncs.
    /// Disable when the authorization store is written out of band.
    #[arg(long, env = "USE_CACHE", default_value = "true")]
    pub use_cache: bool,

    /// Authorization store (OpenFGA-compatible) API URL
    #[arg(long, env = "FGA_API_URL")]
    pub fga_api_url: String,

    /// Authorization store id
    #[arg(long, env = "FGA_STORE_ID")]
    pub fga_store_id: String,

    /// Authorization model id (optional; the store's latest model is used
    /// when unset)
    #[arg(long, env = "FGA_MODEL_ID")]
    pub fga_model_id: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Enable debug logging regardless of LOG_LEVEL
    #[arg(short = 'd', long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

impl Args {
    /// Effective tracing filter directive
    pub fn log_filter(&self) -> String {
        let level = if self.debug { "debug" } else { &self.log_level };
        format!("warden={},info", level)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.fga_api_url.is_empty() {
            return Err("FGA_API_URL is required".to_string());
        }
        if self.fga_store_id.is_empty() {
            return Err("FGA_STORE_ID is required".to_string());
        }
        if self.cache_bucket.is_empty() {
            return Err("CACHE_BUCKET must not be empty".to_string());
        }
        Ok(())
    }
}
