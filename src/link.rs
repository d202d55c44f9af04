//! Share tokens, payment labels and deep links.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

pub const TOKEN_LENGTH: usize = 16;
pub const PAYMENT_LABEL_LENGTH: usize = 32;

/// Prefix of the `/start` payload for single-score rating links
pub const RATE_PREFIX: &str = "rate_";
/// Prefix of the `/start` payload for question poll links
pub const POLL_PREFIX: &str = "poll_";

/// How long a share token stays valid after it is issued
pub fn token_lifetime() -> Duration {
    Duration::weeks(1)
}

/// Random alphanumeric identifier of the given length
pub fn random_identifier(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn generate_token() -> String {
    random_identifier(TOKEN_LENGTH)
}

pub fn generate_payment_label() -> String {
    random_identifier(PAYMENT_LABEL_LENGTH)
}

/// Whether a token issued at `created_at` is still usable at `now`
pub fn is_token_fresh(created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    created_at + token_lifetime() > now
}

pub fn rating_link(bot_username: &str, token: &str) -> String {
    format!("https://t.me/{bot_username}?start={RATE_PREFIX}{token}")
}

pub fn poll_link(bot_username: &str, token: &str) -> String {
    format!("https://t.me/{bot_username}?start={POLL_PREFIX}{token}")
}

/// Parsed `/start` deep-link payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartPayload {
    Rate(String),
    Poll(String),
    Unknown(String),
}

impl StartPayload {
    pub fn parse(payload: &str) -> Self {
        let payload = payload.trim();
        if let Some(token) = payload.strip_prefix(RATE_PREFIX).filter(|t| is_well_formed(t)) {
            StartPayload::Rate(token.to_string())
        } else if let Some(token) = payload.strip_prefix(POLL_PREFIX).filter(|t| is_well_formed(t)) {
            StartPayload::Poll(token.to_string())
        } else {
            StartPayload::Unknown(payload.to_string())
        }
    }
}

fn is_well_formed(token: &str) -> bool {
    !token.is_empty() && token.len() <= 64 && token.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_LENGTH);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_payment_label_shape() {
        let label = generate_payment_label();
        assert_eq!(label.len(), PAYMENT_LABEL_LENGTH);
    }

    #[test]
    fn test_token_freshness_boundary() {
        let now = Utc::now();
        assert!(is_token_fresh(now - Duration::days(6), now));
        assert!(!is_token_fresh(now - Duration::days(7), now));
        assert!(!is_token_fresh(now - Duration::days(8), now));
    }

    #[test]
    fn test_links() {
        assert_eq!(
            rating_link("PeopleRatingsBot", "abc123"),
            "https://t.me/PeopleRatingsBot?start=rate_abc123"
        );
        assert_eq!(
            poll_link("PeopleRatingsBot", "xyz"),
            "https://t.me/PeopleRatingsBot?start=poll_xyz"
        );
    }

    #[test]
    fn test_start_payload_parsing() {
        assert_eq!(StartPayload::parse("rate_abc"), StartPayload::Rate("abc".into()));
        assert_eq!(StartPayload::parse("poll_Q1w2"), StartPayload::Poll("Q1w2".into()));
        assert_eq!(
            StartPayload::parse("rate_"),
            StartPayload::Unknown("rate_".into())
        );
        assert_eq!(
            StartPayload::parse("rate_a-b"),
            StartPayload::Unknown("rate_a-b".into())
        );
        assert_eq!(StartPayload::parse("hello"), StartPayload::Unknown("hello".into()));
    }
}
