//! Common validation utilities.

use lazy_static::lazy_static;
use regex::Regex;
use validator::ValidationError;

/// Maximum length of a human-readable change reason.
const MAX_REASON_LENGTH: usize = 500;

lazy_static! {
    /// Flag keys: lowercase kebab-case, 1-100 chars, must start with a letter.
    static ref FLAG_KEY_RE: Regex = Regex::new(r"^[a-z][a-z0-9-]{0,99}$").unwrap();
}

/// Validates a feature flag key (lowercase kebab-case identifier).
pub fn validate_flag_key(key: &str) -> Result<(), ValidationError> {
    if FLAG_KEY_RE.is_match(key) {
        Ok(())
    } else {
        let mut err = ValidationError::new("flag_key_format");
        err.message = Some("Flag key must be lowercase kebab-case (e.g. 'new-checkout')".into());
        Err(err)
    }
}

/// Validates a mandatory change reason: non-blank, bounded length.
pub fn validate_reason(reason: &str) -> Result<(), ValidationError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("reason_required");
        err.message = Some("A change reason is required".into());
        return Err(err);
    }
    if trimmed.len() > MAX_REASON_LENGTH {
        let mut err = ValidationError::new("reason_length");
        err.message = Some("Reason must be at most 500 characters".into());
        return Err(err);
    }
    Ok(())
}

/// Extracts the lowercased domain part of an email address.
///
/// Returns `None` when the input does not look like an email.
pub fn email_domain(email: &str) -> Option<String> {
    let at = email.rfind('@')?;
    let domain = &email[at + 1..];
    if domain.is_empty() || !domain.contains('.') {
        return None;
    }
    Some(domain.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_flag_key() {
        assert!(validate_flag_key("new-checkout").is_ok());
        assert!(validate_flag_key("a").is_ok());
        assert!(validate_flag_key("chat-v2").is_ok());
        assert!(validate_flag_key("").is_err());
        assert!(validate_flag_key("CamelCase").is_err());
        assert!(validate_flag_key("9-starts-with-digit").is_err());
        assert!(validate_flag_key("has spaces").is_err());
        assert!(validate_flag_key(&"x".repeat(101)).is_err());
    }

    #[test]
    fn test_validate_reason() {
        assert!(validate_reason("Disabling for incident INC-204").is_ok());
        assert!(validate_reason("").is_err());
        assert!(validate_reason("   ").is_err());
        assert!(validate_reason(&"r".repeat(501)).is_err());
    }

    #[test]
    fn test_email_domain() {
        assert_eq!(
            email_domain("user@Example.COM"),
            Some("example.com".to_string())
        );
        assert_eq!(
            email_domain("a@b@mailinator.com"),
            Some("mailinator.com".to_string())
        );
        assert_eq!(email_domain("no-at-sign"), None);
        assert_eq!(email_domain("user@nodot"), None);
        assert_eq!(email_domain("user@"), None);
    }
}
