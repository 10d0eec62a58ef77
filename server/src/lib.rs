//! Pubcast: an in-process publish/subscribe broker that delivers messages to
//! HTTP clients over Server-Sent Events.
//!
//! Producers create topics and publish to them through a small JSON API;
//! consumers hold long-lived SSE streams that receive messages in arrival
//! order with bounded per-subscriber delivery latency. Counter mutations are
//! mirrored onto a reserved topic, so the broker's own metrics are just
//! another stream.

pub mod api;
pub mod app;
pub mod core;
pub mod data;
pub mod pubsub;
pub mod utils;
