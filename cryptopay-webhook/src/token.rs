//! Crypto Pay API token format check.
//!
//! Tokens look like `<app_id>:<secret>`, e.g. `5675:AAzQcZWQqQAbsfgPnOLr4FHC8Doa4L7KryC`.

use crate::error::TokenError;

/// Validate the token format and return the app id it belongs to.
///
/// This only checks the shape; whether Crypto Pay accepts the token is
/// something only the API can answer.
pub fn validate_token(token: &str) -> Result<i64, TokenError> {
    if token.trim().is_empty() {
        return Err(TokenError::Empty);
    }

    let (app_id, _secret) = token.split_once(':').ok_or(TokenError::MissingSeparator)?;

    app_id.parse().map_err(|_| TokenError::InvalidAppId)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_token_valid() {
        assert_eq!(validate_token("5675:test_token"), Ok(5675));
        assert_eq!(validate_token("1:a:b"), Ok(1));
    }

    #[test]
    fn test_validate_token_empty() {
        assert_eq!(validate_token(""), Err(TokenError::Empty));
        assert_eq!(validate_token("   "), Err(TokenError::Empty));
    }

    #[test]
    fn test_validate_token_missing_separator() {
        assert_eq!(
            validate_token("5675test_token"),
            Err(TokenError::MissingSeparator)
        );
    }

    #[test]
    fn test_validate_token_invalid_app_id() {
        assert_eq!(validate_token("app:secret"), Err(TokenError::InvalidAppId));
        assert_eq!(validate_token(":secret"), Err(TokenError::InvalidAppId));
    }
}
