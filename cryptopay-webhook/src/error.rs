//! Error types for the webhook subsystem.
//!
//! Transport errors ([`WebhookError`]) describe why a delivery was rejected
//! before any handler ran. Handler errors ([`HandlerError`]) describe what
//! happened to one handler after the delivery was accepted. The two are
//! reported through separate callbacks.

use std::time::Duration;

use thiserror::Error;

use crate::webhook::UpdateType;

/// Rejection of an inbound delivery.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// The signature header was missing, malformed, or did not match the body.
    ///
    /// Someone who knows the webhook path may be sending forged requests, or
    /// the body was altered in transit. The update is never decoded.
    #[error("wrong request signature")]
    WrongSignature,

    /// The body was authentic but could not be decoded into an update.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Failure to decode a verified body into an [`Update`](crate::webhook::Update).
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("cannot decode update body: {0}")]
    Json(#[source] serde_json::Error),

    #[error("cannot decode update body: missing field `{0}`")]
    MissingField(&'static str),

    #[error("cannot decode update body: invalid field `{field}`: {source}")]
    InvalidField {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Misuse of the handler registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no handler at index {index} for update type `{update_type}` (registered: {len})")]
    IndexOutOfRange {
        update_type: UpdateType,
        index: usize,
        len: usize,
    },
}

/// Failure of a single handler invocation.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler failed: {0:#}")]
    Failed(#[source] anyhow::Error),

    #[error("handler timed out after {0:?}")]
    TimedOut(Duration),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Invalid Crypto Pay API token.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token: empty")]
    Empty,

    #[error("invalid token: expected `<app_id>:<secret>`")]
    MissingSeparator,

    #[error("invalid token: app id is not a number")]
    InvalidAppId,
}

/// Failure to build a [`Webhook`](crate::webhook::Webhook).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Handlers need a tokio runtime to be spawned on.
    #[error("no tokio runtime: build inside one or pass a handle with `runtime`")]
    NoRuntime,
}
