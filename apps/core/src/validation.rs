use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::models::ClientProfile;

/// Digits allowed after the leading `+`.
const PHONE_MIN_DIGITS: usize = 7;
const PHONE_MAX_DIGITS: usize = 15;
/// Instagram handles are capped at 30 characters plus the `@`.
const INSTAGRAM_MAX_LEN: usize = 31;

/// `+` followed by 7–15 digits.
pub fn is_phone_valid(phone: &str) -> bool {
    match phone.strip_prefix('+') {
        Some(digits) => {
            (PHONE_MIN_DIGITS..=PHONE_MAX_DIGITS).contains(&digits.len())
                && digits.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Keep only handle characters, force a leading `@`, cap the length.
pub fn normalize_instagram(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '_' | '.'))
        .collect();
    let handle = cleaned.trim_start_matches('@');
    if handle.is_empty() {
        return None;
    }
    Some(format!("@{}", handle).chars().take(INSTAGRAM_MAX_LEN).collect())
}

/// `YYYY-MM` with a real month.
pub fn validate_month(month: &str) -> Result<(), ValidationError> {
    let (year, mon) = month.split_once('-').ok_or(ValidationError::InvalidMonth)?;
    let valid = year.len() == 4
        && mon.len() == 2
        && year.chars().all(|c| c.is_ascii_digit())
        && matches!(mon.parse::<u32>(), Ok(1..=12));
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidMonth)
    }
}

pub fn validate_amount(amount: i64) -> Result<(), ValidationError> {
    if amount > 0 {
        Ok(())
    } else {
        Err(ValidationError::NonPositiveAmount)
    }
}

/// `"446746688, 412062038"` → ids; blank entries are skipped.
pub fn parse_id_list(raw: &str) -> Result<Vec<i64>, std::num::ParseIntError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

/// A booking needs consent and a phone that still passes validation.
pub fn is_client_eligible(client: &ClientProfile) -> bool {
    client.consent_given && client.phone.as_deref().is_some_and(is_phone_valid)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub first_name: String,
    pub phone: String,
    pub instagram: Option<String>,
    pub consent_given: bool,
}

/// A profile update that passed validation, ready for the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidProfile {
    pub first_name: String,
    pub phone: String,
    pub instagram: Option<String>,
}

impl ProfileUpdate {
    pub fn validate(&self) -> Result<ValidProfile, ValidationError> {
        if !self.consent_given {
            return Err(ValidationError::ConsentRequired);
        }
        let first_name = self.first_name.trim();
        if first_name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        let phone = self.phone.trim();
        if !is_phone_valid(phone) {
            return Err(ValidationError::InvalidPhone);
        }
        Ok(ValidProfile {
            first_name: first_name.to_string(),
            phone: phone.to_string(),
            instagram: self.instagram.as_deref().and_then(normalize_instagram),
        })
    }
}

// ── Tests ──
