//! Identifier validation rules shared by every write path.
//!
//! - hierarchy ids (tenant, organization, department, user): `^[A-Za-z0-9_-]{3,64}$`
//! - custom context keys: `^[A-Za-z0-9_-]{1,64}$`
//! - request and session ids: 8 to 128 characters, any content

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ValidationError;

/// Minimum length of a hierarchy identifier.
pub const MIN_ID_LEN: usize = 3;
/// Maximum length of a hierarchy identifier or custom key.
pub const MAX_ID_LEN: usize = 64;
/// Minimum length of a request or session identifier.
pub const MIN_TOKEN_LEN: usize = 8;
/// Maximum length of a request or session identifier.
pub const MAX_TOKEN_LEN: usize = 128;

/// Tenant ids exempt from isolation by convention.
pub const RESERVED_TENANTS: [&str; 2] = ["default", "system"];

static ID_CHARSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"));

fn check_charset(field: &str, value: &str) -> Result<(), ValidationError> {
    if ID_CHARSET.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::new(
            field,
            "may only contain letters, digits, '_' and '-'",
        ))
    }
}

fn check_length(
    field: &str,
    value: &str,
    min: usize,
    max: usize,
) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len == 0 {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    if len < min || len > max {
        return Err(ValidationError::new(
            field,
            format!("must be between {min} and {max} characters, got {len}"),
        ));
    }
    Ok(())
}

/// Validates a hierarchy identifier (tenant, organization, department or user).
///
/// # Errors
///
/// Returns [`ValidationError`] naming `field` when the value is empty, outside
/// 3..=64 characters, or contains characters other than `[A-Za-z0-9_-]`.
pub fn validate_id(field: &str, value: &str) -> Result<(), ValidationError> {
    check_length(field, value, MIN_ID_LEN, MAX_ID_LEN)?;
    check_charset(field, value)
}

/// Validates a custom context key. Same charset as ids, length 1..=64.
///
/// # Errors
///
/// Returns [`ValidationError`] for `custom:<key>` when the key is malformed.
pub fn validate_custom_key(key: &str) -> Result<(), ValidationError> {
    let field = format!("custom:{key}");
    check_length(&field, key, 1, MAX_ID_LEN)?;
    check_charset(&field, key)
}

/// Validates a request or session identifier (length only).
///
/// # Errors
///
/// Returns [`ValidationError`] when the value is outside 8..=128 characters.
pub fn validate_token(field: &str, value: &str) -> Result<(), ValidationError> {
    check_length(field, value, MIN_TOKEN_LEN, MAX_TOKEN_LEN)
}

/// Returns `true` for tenant ids that are exempt from isolation.
#[must_use]
pub fn is_reserved_tenant(tenant_id: &str) -> bool {
    RESERVED_TENANTS.contains(&tenant_id)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn accepts_typical_ids() {
        for id in ["abc", "tenant-123", "org_456", "A-b_C-9", &"x".repeat(64)] {
            assert!(validate_id("tenantId", id).is_ok(), "{id} should be valid");
        }
    }

    #[test]
    fn rejects_invalid_samples() {
        let long = "a".repeat(65);
        for id in ["", "ab", long.as_str(), "bad@id", "has space", "dot.ted"] {
            let err = validate_id("tenantId", id).unwrap_err();
            assert_eq!(err.field, "tenantId");
        }
    }

    #[test]
    fn empty_id_reason() {
        let err = validate_id("userId", "").unwrap_err();
        assert_eq!(err.reason, "must not be empty");
    }

    #[test]
    fn custom_key_allows_single_char() {
        assert!(validate_custom_key("x").is_ok());
        assert!(validate_custom_key("feature_flags").is_ok());
    }

    #[test]
    fn custom_key_rejects_bad_charset() {
        let err = validate_custom_key("a:b").unwrap_err();
        assert_eq!(err.field, "custom:a:b");
    }

    #[test]
    fn token_bounds() {
        assert!(validate_token("requestId", "1234567").is_err());
        assert!(validate_token("requestId", "12345678").is_ok());
        assert!(validate_token("requestId", &"r".repeat(128)).is_ok());
        assert!(validate_token("requestId", &"r".repeat(129)).is_err());
        // Tokens are not charset restricted.
        assert!(validate_token("sessionId", "sess:ion/42").is_ok());
    }

    #[test]
    fn reserved_tenants() {
        assert!(is_reserved_tenant("default"));
        assert!(is_reserved_tenant("system"));
        assert!(!is_reserved_tenant("tenant-1"));
    }

    proptest! {
        #[test]
        fn any_well_formed_id_is_accepted(id in "[A-Za-z0-9_-]{3,64}") {
            prop_assert!(validate_id("tenantId", &id).is_ok());
        }

        #[test]
        fn ids_with_foreign_chars_are_rejected(
            prefix in "[a-z]{2,10}",
            bad in "[@.:/ #]",
            suffix in "[a-z]{1,10}",
        ) {
            let id = format!("{prefix}{bad}{suffix}");
            prop_assert!(validate_id("tenantId", &id).is_err());
        }
    }
}
