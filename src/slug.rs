//! Slug derivation, validation, and random code generation.
//!
//! The slug is the actual lookup key: a deterministic, URL-safe form of the
//! user-facing code. Derivation is idempotent so re-deriving a stored slug
//! never changes it.

use crate::config::RedirectSettings;
use crate::storage::StorageError;

const GENERATE_MAX_ATTEMPTS: u32 = 10;
const CODE_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Lowercase, map non `[a-z0-9_-]` runs to hyphens, collapse repeats, trim
/// edge hyphens.
pub fn slugify(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut last_hyphen = false;
    for c in code.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
            out.push(c);
            last_hyphen = false;
        } else if !last_hyphen {
            out.push('-');
            last_hyphen = true;
        }
    }
    out.trim_matches('-').to_string()
}

/// Validate slug format and the configured reserved-word list.
pub fn validate_slug(slug: &str, settings: &RedirectSettings) -> Result<(), StorageError> {
    if slug.is_empty() {
        return Err(StorageError::Validation("slug cannot be empty".to_string()));
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(StorageError::Validation(format!(
            "slug '{slug}' contains invalid characters (allowed: a-z, A-Z, 0-9, _, -)"
        )));
    }
    if settings
        .reserved_slugs
        .iter()
        .any(|r| r.eq_ignore_ascii_case(slug))
    {
        return Err(StorageError::Validation(format!("slug '{slug}' is reserved")));
    }
    Ok(())
}

/// Random alphanumeric code of the configured length.
pub fn random_code(length: usize) -> String {
    use rand::RngExt;
    let mut rng = rand::rng();
    (0..length)
        .map(|_| CODE_CHARSET[rng.random_range(0..CODE_CHARSET.len())] as char)
        .collect()
}

/// One attempt in the bounded auto-generation loop: random codes up to the
/// attempt limit, then a timestamp suffix so creation still terminates.
pub fn generation_candidate(attempt: u32, length: usize, now: i64) -> String {
    if attempt < GENERATE_MAX_ATTEMPTS {
        random_code(length)
    } else {
        format!("{}{}", random_code(length), now)
    }
}

/// Attempts allowed before the timestamp fallback kicks in.
pub fn max_attempts() -> u32 {
    GENERATE_MAX_ATTEMPTS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_sanitizes() {
        assert_eq!(slugify("Summer Sale 2025!"), "summer-sale-2025");
        assert_eq!(slugify("--Hello__World--"), "hello__world");
        assert_eq!(slugify("a***b"), "a-b");
        assert_eq!(slugify("***"), "");
    }

    #[test]
    fn slugify_is_idempotent() {
        for input in ["Summer Sale!", "promo-1", "A_B c", "éclair"] {
            let once = slugify(input);
            assert_eq!(slugify(&once), once);
        }
    }

    #[test]
    fn validate_rejects_bad_format_and_reserved() {
        let settings = RedirectSettings::default();
        assert!(validate_slug("promo-1", &settings).is_ok());
        assert!(validate_slug("", &settings).is_err());
        assert!(validate_slug("has space", &settings).is_err());
        assert!(validate_slug("Admin", &settings).is_err());
        assert!(validate_slug("api", &settings).is_err());
    }

    #[test]
    fn random_code_has_requested_length_and_charset() {
        let code = random_code(12);
        assert_eq!(code.len(), 12);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn generation_falls_back_to_timestamp_suffix() {
        let candidate = generation_candidate(max_attempts(), 8, 1_700_000_000);
        assert!(candidate.ends_with("1700000000"));
        assert!(candidate.len() > 8);
    }
}
