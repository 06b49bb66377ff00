//! Input validation for command arguments.
//!
//! Retailer names go through the same three tiers as everywhere else in the
//! CLI: exact match → synonym lookup → error with suggestion. ZIP codes,
//! store numbers, Discord IDs and thresholds are checked before anything
//! reaches storage.

use crate::error::{Error, Result};
use crate::model::{Money, Retailer};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Highest threshold accepted for a tracking request.
pub const MAX_THRESHOLD: Money = Money::from_cents(1_000_000);

pub static RETAILER_SYNONYMS: LazyLock<HashMap<&str, Retailer>> = LazyLock::new(|| {
    [
        ("wal-mart", Retailer::Walmart),
        ("wmt", Retailer::Walmart),
        ("walmart.com", Retailer::Walmart),
        ("tgt", Retailer::Target),
        ("target.com", Retailer::Target),
    ]
    .into_iter()
    .collect()
});

/// Resolve a retailer name via exact match or synonym lookup.
///
/// Returns the retailer, or an error with the original input and an
/// optional suggestion.
pub fn normalize_retailer(input: &str) -> std::result::Result<Retailer, (String, Option<String>)> {
    let lower = input.trim().to_lowercase();

    if let Ok(retailer) = lower.parse::<Retailer>() {
        return Ok(retailer);
    }

    if let Some(&retailer) = RETAILER_SYNONYMS.get(lower.as_str()) {
        return Ok(retailer);
    }

    let suggestion = Retailer::ALL
        .iter()
        .map(|r| (levenshtein_distance(&lower, r.as_str()), r.as_str()))
        .filter(|(dist, _)| *dist <= 3)
        .min_by_key(|(dist, _)| *dist)
        .map(|(_, name)| name.to_string());
    Err((input.to_string(), suggestion))
}

/// Validate a US ZIP code. ZIP+4 input is cut to the first five digits.
///
/// # Errors
///
/// Returns `InvalidArgument` unless the input is five digits, optionally
/// followed by `-` and four digits.
pub fn validate_zip(input: &str) -> Result<String> {
    let trimmed = input.trim();
    let (zip, plus4) = trimmed.split_once('-').unwrap_or((trimmed, ""));

    let digits = |s: &str, n: usize| s.len() == n && s.bytes().all(|b| b.is_ascii_digit());
    if digits(zip, 5) && (plus4.is_empty() || digits(plus4, 4)) && !trimmed.ends_with('-') {
        Ok(zip.to_string())
    } else {
        Err(Error::InvalidArgument(format!(
            "Invalid ZIP code '{input}': expected 5 digits"
        )))
    }
}

/// Validate a store number (1-6 digits, not all zeros).
///
/// # Errors
///
/// Returns `InvalidArgument` for anything else.
pub fn validate_store_id(input: &str) -> Result<String> {
    let trimmed = input.trim();
    let ok = (1..=6).contains(&trimmed.len())
        && trimmed.bytes().all(|b| b.is_ascii_digit())
        && trimmed.bytes().any(|b| b != b'0');
    if ok {
        Ok(trimmed.to_string())
    } else {
        Err(Error::InvalidArgument(format!(
            "Invalid store number '{input}': expected 1-6 digits"
        )))
    }
}

/// Validate a Discord user ID (numeric snowflake).
///
/// # Errors
///
/// Returns `InvalidArgument` unless the input is 1-20 digits.
pub fn validate_discord_id(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if (1..=20).contains(&trimmed.len()) && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        Ok(trimmed.to_string())
    } else {
        Err(Error::InvalidArgument(format!(
            "Invalid Discord ID '{input}': expected a numeric user ID"
        )))
    }
}

/// Parse an alert threshold such as `49.99` or `$1,299`.
///
/// # Errors
///
/// Returns `InvalidArgument` for unparseable, zero, or oversized amounts.
pub fn parse_threshold(input: &str) -> Result<Money> {
    let price: Money = input.parse()?;
    if !price.is_positive() {
        return Err(Error::InvalidArgument(format!(
            "Invalid threshold {price}: must be greater than $0.00"
        )));
    }
    if price > MAX_THRESHOLD {
        return Err(Error::InvalidArgument(format!(
            "Invalid threshold {price}: must be at most {MAX_THRESHOLD}"
        )));
    }
    Ok(price)
}

// ── Levenshtein distance ─────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
#[must_use]
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Existing values close to `searched`, nearest first, at most `max`.
#[must_use]
pub fn find_similar(searched: &str, existing: &[String], max: usize) -> Vec<String> {
    let mut candidates: Vec<(usize, &str)> = existing
        .iter()
        .map(|v| (levenshtein_distance(searched, v), v.as_str()))
        .filter(|(dist, _)| *dist <= 3)
        .collect();

    candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

    candidates
        .into_iter()
        .take(max)
        .map(|(_, v)| v.to_string())
        .collect()
}
