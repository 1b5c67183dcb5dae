//! Webhook update types and the body decoder.
//!
//! Decoding happens in two steps: the envelope (`update_id`, `update_type`,
//! `request_date`, raw `payload`) and then the payload, whose shape is chosen
//! by the update type. New payload shapes only need a [`Payload`] variant and
//! an arm in `decode_payload`.

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Declares an open string type with well-known constants.
///
/// Crypto Pay adds new values over time, so unknown strings must decode
/// instead of failing the whole update.
macro_rules! open_string_type {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$const_meta:meta])* $konst:ident = $value:literal,)* }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Cow<'static, str>);

        impl $name {
            $($(#[$const_meta])* pub const $konst: Self = Self(Cow::Borrowed($value));)*

            pub fn new(value: impl Into<String>) -> Self {
                Self(Cow::Owned(value.into()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

open_string_type! {
    /// Type of a webhook update.
    UpdateType {
        /// The invoice was paid.
        INVOICE_PAID = "invoice_paid",
    }
}

open_string_type! {
    /// Currency code.
    Asset {
        BTC = "BTC",
        TON = "TON",
        /// Testnet only.
        ETH = "ETH",
        USDT = "USDT",
        USDC = "USDC",
        BUSD = "BUSD",
    }
}

open_string_type! {
    /// Status of an invoice.
    InvoiceStatus {
        ACTIVE = "active",
        PAID = "paid",
        EXPIRED = "expired",
    }
}

open_string_type! {
    /// Button shown to the user after the invoice is paid.
    PaidButton {
        VIEW_ITEM = "viewItem",
        OPEN_CHANNEL = "openChannel",
        OPEN_BOT = "openBot",
        CALLBACK = "callback",
    }
}

/// Invoice snapshot carried by `invoice_paid` updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Unique ID of the invoice
    #[serde(rename = "invoice_id")]
    pub id: i64,
    /// Hash of the invoice
    #[serde(default)]
    pub hash: String,
    pub status: InvoiceStatus,
    pub asset: Asset,
    /// Decimal amount exactly as sent by the API
    pub amount: String,
    /// Amount of charged service fees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<String>,
    /// Price of the asset in USD at the time the invoice was paid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usd_rate: Option<String>,
    /// URL the user pays the invoice at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pay_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Comment to the payment from the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Hidden message shown to the user after payment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden_message: Option<String>,
    /// Data previously attached to the invoice by the app
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_btn_name: Option<PaidButton>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_btn_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_anonymously: Option<bool>,
    #[serde(default)]
    pub allow_comments: bool,
    #[serde(default)]
    pub allow_anonymous: bool,
}

/// Update payload, selected by update type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Invoice(Invoice),
    /// Payload of an update type this library does not know yet.
    Other(serde_json::Value),
}

impl Payload {
    /// The invoice, if this is an invoice payload.
    pub fn invoice(&self) -> Option<&Invoice> {
        match self {
            Payload::Invoice(invoice) => Some(invoice),
            Payload::Other(_) => None,
        }
    }
}

/// Update pushed by Crypto Pay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Update {
    /// Non-unique update ID; retried deliveries repeat it
    #[serde(rename = "update_id")]
    pub id: i64,
    pub update_type: UpdateType,
    /// When Crypto Pay sent the request
    pub request_date: DateTime<Utc>,
    pub payload: Payload,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    update_id: Option<serde_json::Value>,
    #[serde(default)]
    update_type: Option<serde_json::Value>,
    #[serde(default)]
    request_date: Option<serde_json::Value>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

/// Decode a verified request body into an [`Update`].
///
/// Unknown top-level fields are ignored. A missing or `null` required field
/// is reported by name.
pub fn decode(body: &[u8]) -> Result<Update, DecodeError> {
    let envelope: Envelope = serde_json::from_slice(body).map_err(DecodeError::Json)?;

    let id: i64 = required_field(envelope.update_id, "update_id")?;
    let update_type: UpdateType = required_field(envelope.update_type, "update_type")?;
    let request_date: DateTime<Utc> = required_field(envelope.request_date, "request_date")?;
    let raw_payload = envelope
        .payload
        .ok_or(DecodeError::MissingField("payload"))?;
    let payload = decode_payload(&update_type, raw_payload)?;

    Ok(Update {
        id,
        update_type,
        request_date,
        payload,
    })
}

fn required_field<T: DeserializeOwned>(
    raw: Option<serde_json::Value>,
    field: &'static str,
) -> Result<T, DecodeError> {
    let raw = raw.ok_or(DecodeError::MissingField(field))?;
    serde_json::from_value(raw).map_err(|source| DecodeError::InvalidField { field, source })
}

fn decode_payload(
    update_type: &UpdateType,
    raw: serde_json::Value,
) -> Result<Payload, DecodeError> {
    if *update_type == UpdateType::INVOICE_PAID {
        serde_json::from_value(raw)
            .map(Payload::Invoice)
            .map_err(|source| DecodeError::InvalidField {
                field: "payload",
                source,
            })
    } else {
        Ok(Payload::Other(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invoice_json() -> serde_json::Value {
        json!({
            "invoice_id": 528890,
            "hash": "IVDoTcNBYEfk",
            "status": "paid",
            "asset": "USDT",
            "amount": "1.5",
            "fee": "0.015",
            "usd_rate": "1.0001",
            "pay_url": "https://t.me/CryptoBot?start=IVDoTcNBYEfk",
            "description": "Order #42",
            "payload": "order:42",
            "paid_btn_name": "viewItem",
            "paid_btn_url": "https://example.com/orders/42",
            "created_at": "2024-03-01T10:00:00.000Z",
            "paid_at": "2024-03-01T10:02:30.000Z",
            "paid_anonymously": true,
            "allow_comments": true,
            "allow_anonymous": true
        })
    }

    fn body(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_decode_invoice_paid() {
        let update = decode(&body(json!({
            "update_id": 7,
            "update_type": "invoice_paid",
            "request_date": "2024-03-01T10:02:31.123Z",
            "payload": invoice_json()
        })))
        .unwrap();

        assert_eq!(update.id, 7);
        assert_eq!(update.update_type, UpdateType::INVOICE_PAID);
        assert_eq!(
            update.request_date.to_rfc3339(),
            "2024-03-01T10:02:31.123+00:00"
        );

        let invoice = update.payload.invoice().unwrap();
        assert_eq!(invoice.id, 528890);
        assert_eq!(invoice.status, InvoiceStatus::PAID);
        assert_eq!(invoice.status.as_str(), "paid");
        assert_eq!(invoice.asset, Asset::USDT);
        assert_eq!(invoice.amount, "1.5");
        assert_eq!(invoice.paid_btn_name, Some(PaidButton::VIEW_ITEM));
        assert_eq!(invoice.payload.as_deref(), Some("order:42"));
        assert_eq!(invoice.comment, None);
        assert_eq!(invoice.paid_anonymously, Some(true));
        assert!(invoice.paid_at.is_some());
        assert!(invoice.expiration_date.is_none());
    }

    #[test]
    fn test_decode_minimal_invoice_uses_defaults() {
        let update = decode(&body(json!({
            "update_id": -1,
            "update_type": "invoice_paid",
            "request_date": "2024-03-01T10:02:31Z",
            "payload": {
                "invoice_id": 1,
                "status": "paid",
                "asset": "TON",
                "amount": "10",
                "created_at": "2024-03-01T10:00:00Z"
            }
        })))
        .unwrap();

        let invoice = update.payload.invoice().unwrap();
        assert_eq!(update.id, -1);
        assert_eq!(invoice.hash, "");
        assert!(!invoice.allow_comments);
        assert!(!invoice.allow_anonymous);
        assert_eq!(invoice.fee, None);
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let mut payload = invoice_json();
        payload["swap_to"] = json!("TON");

        let update = decode(&body(json!({
            "update_id": 1,
            "update_type": "invoice_paid",
            "request_date": "2024-03-01T10:02:31Z",
            "payload": payload,
            "api_version": 2
        })))
        .unwrap();

        assert_eq!(update.payload.invoice().unwrap().asset, Asset::USDT);
    }

    #[test]
    fn test_decode_unknown_update_type_keeps_raw_payload() {
        let update = decode(&body(json!({
            "update_id": 3,
            "update_type": "check_activated",
            "request_date": "2024-03-01T10:02:31Z",
            "payload": {"check_id": 12}
        })))
        .unwrap();

        assert_eq!(update.update_type.as_str(), "check_activated");
        assert_eq!(update.payload, Payload::Other(json!({"check_id": 12})));
        assert!(update.payload.invoice().is_none());
    }

    #[test]
    fn test_decode_unknown_status_and_asset() {
        let mut payload = invoice_json();
        payload["status"] = json!("refunded");
        payload["asset"] = json!("TRX");

        let update = decode(&body(json!({
            "update_id": 1,
            "update_type": "invoice_paid",
            "request_date": "2024-03-01T10:02:31Z",
            "payload": payload
        })))
        .unwrap();

        let invoice = update.payload.invoice().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::new("refunded"));
        assert_eq!(invoice.asset.to_string(), "TRX");
    }

    #[test]
    fn test_decode_missing_update_type() {
        let err = decode(&body(json!({
            "update_id": 1,
            "request_date": "2024-03-01T10:02:31Z",
            "payload": invoice_json()
        })))
        .unwrap_err();

        assert!(matches!(err, DecodeError::MissingField("update_type")));
    }

    #[test]
    fn test_decode_null_fields_are_missing() {
        let err = decode(&body(json!({
            "update_id": null,
            "update_type": "invoice_paid",
            "request_date": "2024-03-01T10:02:31Z",
            "payload": invoice_json()
        })))
        .unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("update_id")));

        let err = decode(&body(json!({
            "update_id": 1,
            "update_type": "invoice_paid",
            "request_date": "2024-03-01T10:02:31Z",
            "payload": null
        })))
        .unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("payload")));
    }

    #[test]
    fn test_decode_invalid_field_type() {
        let err = decode(&body(json!({
            "update_id": "seven",
            "update_type": "invoice_paid",
            "request_date": "2024-03-01T10:02:31Z",
            "payload": invoice_json()
        })))
        .unwrap_err();

        assert!(matches!(
            err,
            DecodeError::InvalidField {
                field: "update_id",
                ..
            }
        ));
    }

    #[test]
    fn test_decode_payload_shape_mismatch() {
        let err = decode(&body(json!({
            "update_id": 1,
            "update_type": "invoice_paid",
            "request_date": "2024-03-01T10:02:31Z",
            "payload": {"invoice_id": 1}
        })))
        .unwrap_err();

        assert!(matches!(err, DecodeError::InvalidField { field: "payload", .. }));
        assert!(err.to_string().contains("missing field `status`"));
    }

    #[test]
    fn test_decode_invalid_json() {
        let err = decode(b"some body").unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
        assert!(err.to_string().starts_with("cannot decode update body: expected"));
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(matches!(decode(b"42"), Err(DecodeError::Json(_))));
        assert!(matches!(decode(b""), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_update_serializes_with_wire_names() {
        let update = decode(&body(json!({
            "update_id": 9,
            "update_type": "invoice_paid",
            "request_date": "2024-03-01T10:02:31Z",
            "payload": invoice_json()
        })))
        .unwrap();

        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["update_id"], 9);
        assert_eq!(value["payload"]["invoice_id"], 528890);
        assert_eq!(decode(&serde_json::to_vec(&value).unwrap()).unwrap(), update);
    }
}
