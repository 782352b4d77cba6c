//! HTTP server for health probes and metrics

mod http;

pub use http::{run, AppState};
