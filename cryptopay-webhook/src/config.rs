//! Configuration module for environment variable parsing.
//!
//! Reads all configuration from environment variables. Invalid values fall
//! back to the default with a warning.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::webhook::{Webhook, WebhookBuilder};

/// Receiver configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    /// Crypto Pay API token (`<app_id>:<secret>`); the signing key is derived from it
    pub crypto_pay_token: String,

    /// Skip the `<app_id>:<secret>` token format check
    pub skip_token_validation: bool,

    /// Port for the web server to listen on
    pub port: u16,

    /// Path Crypto Pay posts updates to
    pub webhook_path: String,

    /// Per-handler time limit in milliseconds (0 = unlimited)
    pub handler_timeout_ms: u64,

    /// Maximum number of handlers running at once (0 = unbounded)
    pub max_concurrent_handlers: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            crypto_pay_token: env::var("CRYPTO_PAY_TOKEN").unwrap_or_default(),

            skip_token_validation: parse_bool("CRYPTO_PAY_SKIP_TOKEN_VALIDATION", false),

            port: parse_or("PORT", 8080),

            webhook_path: parse_path("WEBHOOK_PATH", "/webhooks/cryptopay"),

            handler_timeout_ms: parse_or("HANDLER_TIMEOUT_MS", 0),

            max_concurrent_handlers: parse_or("MAX_CONCURRENT_HANDLERS", 100),
        }
    }

    /// Per-handler time limit, if any.
    pub fn handler_timeout(&self) -> Option<Duration> {
        match self.handler_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Webhook builder with the token and handler limits from this config.
    ///
    /// Callbacks still have to be attached by the caller.
    pub fn webhook_builder(&self) -> WebhookBuilder {
        let mut builder = Webhook::builder(&self.crypto_pay_token)
            .max_concurrent_handlers(self.max_concurrent_handlers);
        if let Some(timeout) = self.handler_timeout() {
            builder = builder.handler_timeout(timeout);
        }
        if self.skip_token_validation {
            builder = builder.skip_token_validation();
        }
        builder
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("crypto_pay_token_set", &!self.crypto_pay_token.is_empty())
            .field("skip_token_validation", &self.skip_token_validation)
            .field("port", &self.port)
            .field("webhook_path", &self.webhook_path)
            .field("handler_timeout_ms", &self.handler_timeout_ms)
            .field("max_concurrent_handlers", &self.max_concurrent_handlers)
            .finish()
    }
}

/// Parse a value, keeping `default` when unset or invalid.
fn parse_or<T: FromStr>(name: &str, default: T) -> T {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid value, using default");
            default
        }
    }
}

/// Parse a boolean flag ("1"/"true"/"yes", "0"/"false"/"no").
fn parse_bool(name: &str, default: bool) -> bool {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => true,
        "0" | "false" | "no" => false,
        _ => {
            warn!(env_var = name, value = %raw, "Invalid boolean, using default");
            default
        }
    }
}

/// Parse a route path; it must start with `/`.
fn parse_path(name: &str, default: &str) -> String {
    match env::var(name) {
        Ok(raw) if raw.starts_with('/') && raw.len() > 1 => raw,
        Ok(raw) => {
            warn!(env_var = name, value = %raw, "Invalid route path, using default");
            default.to_string()
        }
        Err(_) => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BuildError, TokenError};

    #[test]
    fn test_parse_or_valid() {
        env::set_var("TEST_CFG_PORT", " 9090 ");
        assert_eq!(parse_or("TEST_CFG_PORT", 8080u16), 9090);
        env::remove_var("TEST_CFG_PORT");
    }

    #[test]
    fn test_parse_or_invalid_uses_default() {
        env::set_var("TEST_CFG_BAD_PORT", "99999");
        assert_eq!(parse_or("TEST_CFG_BAD_PORT", 8080u16), 8080);
        env::remove_var("TEST_CFG_BAD_PORT");
    }

    #[test]
    fn test_parse_or_default() {
        assert_eq!(parse_or("NONEXISTENT_VAR", 100usize), 100);
    }

    #[test]
    fn test_parse_bool() {
        env::set_var("TEST_CFG_BOOL_TRUE", "Yes");
        env::set_var("TEST_CFG_BOOL_BAD", "maybe");
        assert!(parse_bool("TEST_CFG_BOOL_TRUE", false));
        assert!(parse_bool("TEST_CFG_BOOL_BAD", true));
        assert!(!parse_bool("NONEXISTENT_VAR", false));
        env::remove_var("TEST_CFG_BOOL_TRUE");
        env::remove_var("TEST_CFG_BOOL_BAD");
    }

    #[test]
    fn test_parse_path() {
        env::set_var("TEST_CFG_PATH", "hooks");
        assert_eq!(parse_path("TEST_CFG_PATH", "/default"), "/default");
        env::set_var("TEST_CFG_PATH", "/hooks/pay");
        assert_eq!(parse_path("TEST_CFG_PATH", "/default"), "/hooks/pay");
        env::remove_var("TEST_CFG_PATH");
    }

    fn config(token: &str) -> Config {
        Config {
            crypto_pay_token: token.to_string(),
            skip_token_validation: false,
            port: 8080,
            webhook_path: "/webhooks/cryptopay".to_string(),
            handler_timeout_ms: 0,
            max_concurrent_handlers: 100,
        }
    }

    #[test]
    fn test_handler_timeout() {
        let mut cfg = config("5675:test_token");
        assert_eq!(cfg.handler_timeout(), None);
        cfg.handler_timeout_ms = 1500;
        assert_eq!(cfg.handler_timeout(), Some(Duration::from_millis(1500)));
    }

    #[tokio::test]
    async fn test_webhook_builder_respects_validation_flag() {
        let mut cfg = config("not-a-token");
        assert!(cfg.webhook_builder().build().is_err());
        cfg.skip_token_validation = true;
        assert!(cfg.webhook_builder().build().is_ok());
    }

    #[tokio::test]
    async fn test_missing_token_is_rejected_even_when_skipping_validation() {
        let mut cfg = config("");
        cfg.skip_token_validation = true;
        assert_eq!(
            cfg.webhook_builder().build().unwrap_err(),
            BuildError::Token(TokenError::Empty)
        );
    }

    #[test]
    fn test_debug_hides_token() {
        let cfg = config("5675:test_token");
        let printed = format!("{cfg:?}");
        assert!(!printed.contains("test_token"));
        assert!(printed.contains("crypto_pay_token_set: true"));
    }
}
