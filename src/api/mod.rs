//! HTTP front for the hub
//!
//! A thin axum adapter over `EventHub`: SSE for subscriptions, JSON for
//! ingest and replay.

pub mod http;
pub mod sse;

pub use http::create_router;
