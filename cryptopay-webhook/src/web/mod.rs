//! HTTP side of the webhook.
//!
//! This module provides:
//! - A server-independent `respond` function mapping a delivery to a status
//!   code and optional plaintext body
//! - An axum endpoint and router built on it
//!
//! Handlers run in the background; the endpoint answers Crypto Pay as soon
//! as the update is handed off.

pub mod handlers;

pub use handlers::{health, receive_update, respond, router, HealthResponse, WebhookResponse};
