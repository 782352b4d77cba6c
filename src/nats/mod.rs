//! NATS connectivity: client wrapper, subjects, and queue subscriptions

mod client;
pub mod subjects;
mod subscriptions;

pub use client::NatsClient;
pub use subscriptions::{dispatch, start};
