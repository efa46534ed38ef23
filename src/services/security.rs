//! Credential and input checks run before any state change or upstream call

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

use crate::error::{AppError, ValidationError};

fn phone_regex() -> &'static Regex {
    static PHONE: OnceLock<Regex> = OnceLock::new();
    PHONE.get_or_init(|| Regex::new(r"^0[789][01]\d{8}$").expect("phone pattern is valid"))
}

fn pin_regex() -> &'static Regex {
    static PIN: OnceLock<Regex> = OnceLock::new();
    PIN.get_or_init(|| Regex::new(r"^\d{4}$").expect("pin pattern is valid"))
}

/// Bring `+234…`/`234…` numbers to the local 11-digit form.
pub fn normalize_phone(phone: &str) -> String {
    let digits: String = phone
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    let digits = digits.strip_prefix('+').unwrap_or(&digits);
    match digits.strip_prefix("234") {
        Some(rest) if rest.len() == 10 => format!("0{}", rest),
        _ => digits.to_string(),
    }
}

/// Validate a Nigerian mobile number and return it normalized.
pub fn validate_phone(phone: &str) -> Result<String, AppError> {
    let normalized = normalize_phone(phone);
    if !phone_regex().is_match(&normalized) {
        return Err(AppError::validation(ValidationError::InvalidPhone {
            phone: phone.to_string(),
            reason: "expected an 11-digit Nigerian mobile number".to_string(),
        }));
    }
    Ok(normalized)
}

pub fn validate_pin_format(pin: &str) -> Result<(), AppError> {
    if pin_regex().is_match(pin) {
        Ok(())
    } else {
        Err(AppError::validation(ValidationError::InvalidPinFormat))
    }
}

/// Argon2id PHC string with a random salt.
pub fn hash_pin(pin: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(pin.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::configuration(format!("PIN hashing failed: {}", e)))
}

/// A stored hash that does not parse never verifies.
pub fn verify_pin(pin: &str, stored: &str) -> bool {
    let parsed = match PasswordHash::new(stored) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(target: "security", error = %e, "Stored PIN hash is unreadable");
            return false;
        }
    };
    Argon2::default()
        .verify_password(pin.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_local_and_international_forms() {
        assert_eq!(validate_phone("08031234567").unwrap(), "08031234567");
        assert_eq!(validate_phone("+2348031234567").unwrap(), "08031234567");
        assert_eq!(validate_phone("0803 123 4567").unwrap(), "08031234567");
    }

    #[test]
    fn rejects_malformed_numbers() {
        assert!(validate_phone("0803123456").is_err());
        assert!(validate_phone("06031234567").is_err());
        assert!(validate_phone("not-a-phone").is_err());
    }

    #[test]
    fn pin_hash_is_salted_and_verifies() {
        let first = hash_pin("1234").unwrap();
        let second = hash_pin("1234").unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with("$argon2id$"));
        assert!(verify_pin("1234", &first));
        assert!(verify_pin("1234", &second));
        assert!(!verify_pin("4321", &first));
        assert!(!verify_pin("1234", "garbage"));
    }

    #[test]
    fn pin_must_be_four_digits() {
        assert!(validate_pin_format("0000").is_ok());
        assert!(validate_pin_format("123").is_err());
        assert!(validate_pin_format("12a4").is_err());
    }
}
