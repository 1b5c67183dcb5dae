//! Webhook ingestion and dispatch.
//!
//! ```text
//! body + signature → verify → decode → registry snapshot → handler tasks
//! ```
//!
//! Nothing here is mounted on a server; see [`crate::web`] for the HTTP side.

pub mod dispatcher;
pub mod registry;
pub mod signature;
pub mod update;

pub use dispatcher::{
    Dispatched, HandlerErrorCallback, Webhook, WebhookBuilder, WebhookErrorCallback,
};
pub use registry::{Handler, HandlerFuture, HandlerRegistry};
pub use signature::{SigningKey, SIGNATURE_HEADER};
pub use update::{decode, Asset, Invoice, InvoiceStatus, PaidButton, Payload, Update, UpdateType};
