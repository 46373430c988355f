//! Reusable field validators
//!
//! Plug into `#[validate(custom(function = "..."))]` on request DTOs.

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;
use validator::ValidationError;

static HOSTNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("valid regex"));

static SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-]{2,40}$").expect("valid regex"));

static REGION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{3}[0-9]$").expect("valid regex"));

/// Billing periods customers can buy
pub const ALLOWED_DURATIONS: [u32; 4] = [1, 3, 6, 12];

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    ValidationError::new(code).with_message(Cow::Borrowed(message))
}

/// Validator: RFC-1123 label, lowercase
pub fn validate_hostname(value: &str) -> Result<(), ValidationError> {
    if HOSTNAME.is_match(value) {
        Ok(())
    } else {
        Err(invalid(
            "hostname",
            "must be 1-63 lowercase letters, digits or hyphens, not starting or ending with a hyphen",
        ))
    }
}

/// Validator: catalog slug
pub fn validate_slug(value: &str) -> Result<(), ValidationError> {
    if SLUG.is_match(value) {
        Ok(())
    } else {
        Err(invalid(
            "slug",
            "must be 2-40 lowercase letters, digits or hyphens",
        ))
    }
}

/// Validator: provider region slug such as `sgp1`
pub fn validate_region(value: &str) -> Result<(), ValidationError> {
    if REGION.is_match(value) {
        Ok(())
    } else {
        Err(invalid("region", "must look like 'sgp1'"))
    }
}

/// Validator: billing period in months
pub fn validate_duration(value: u32) -> Result<(), ValidationError> {
    if ALLOWED_DURATIONS.contains(&value) {
        Ok(())
    } else {
        Err(invalid("duration", "must be 1, 3, 6 or 12 months"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostname_accepts_labels() {
        assert!(validate_hostname("web-1").is_ok());
        assert!(validate_hostname("a").is_ok());
        assert!(validate_hostname(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn test_hostname_rejects_bad_labels() {
        assert!(validate_hostname("").is_err());
        assert!(validate_hostname("-web").is_err());
        assert!(validate_hostname("web-").is_err());
        assert!(validate_hostname("Web").is_err());
        assert!(validate_hostname("web.example").is_err());
        assert!(validate_hostname(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_slug() {
        assert!(validate_slug("basic-1gb").is_ok());
        assert!(validate_slug("x").is_err());
        assert!(validate_slug("Basic").is_err());
    }

    #[test]
    fn test_region() {
        assert!(validate_region("sgp1").is_ok());
        assert!(validate_region("singapore").is_err());
    }

    #[test]
    fn test_duration() {
        for months in ALLOWED_DURATIONS {
            assert!(validate_duration(months).is_ok());
        }
        assert!(validate_duration(2).is_err());
        assert!(validate_duration(0).is_err());
    }
}
