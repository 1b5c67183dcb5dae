//! Crypto Pay webhook receiver.
//!
//! Receives updates pushed by Crypto Pay, verifies their HMAC signature,
//! decodes them and runs the handlers registered for their update type.
//!
//! ## Architecture
//!
//! ```text
//! POST → web::receive_update → Webhook::receive → verify → decode → handler tasks
//! ```
//!
//! The REST side of the Crypto Pay API is not part of this crate; the only
//! thing the two share is the API token the signing key is derived from.

pub mod config;
pub mod error;
pub mod token;
pub mod web;
pub mod webhook;

// Re-export commonly used types
pub use config::Config;
pub use error::{BuildError, DecodeError, HandlerError, RegistryError, TokenError, WebhookError};
pub use token::validate_token;
pub use webhook::{
    Asset, Dispatched, HandlerRegistry, Invoice, InvoiceStatus, PaidButton, Payload, SigningKey,
    Update, UpdateType, Webhook, WebhookBuilder, SIGNATURE_HEADER,
};
