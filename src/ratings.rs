//! Rating links, score submission and statistics.

use anyhow::{bail, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::link::{self, generate_token, is_token_fresh};
use crate::models::{Statistics, User, Voter};
use crate::storage::Storage;
use crate::subscription::Period;

const MAX_TOKEN_ATTEMPTS: usize = 5;

/// Why a rating link cannot be used, or who it rates
#[derive(Debug, Clone, PartialEq)]
pub enum RatingCheck {
    Ready(User),
    InvalidLink,
    Expired,
    SelfRating,
    AlreadyRated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RatingOutcome {
    /// Stored; carries the display name of the rated user
    Saved(String),
    InvalidScore,
    Rejected(RatingCheck),
}

pub struct RatingService {
    storage: Arc<dyn Storage>,
    bot_username: String,
}

impl RatingService {
    pub fn new(storage: Arc<dyn Storage>, bot_username: impl Into<String>) -> Self {
        Self {
            storage,
            bot_username: bot_username.into(),
        }
    }

    /// Issue a fresh share token and return its deep link
    pub async fn issue_link(&self, user_id: i64) -> Result<String> {
        for attempt in 1..=MAX_TOKEN_ATTEMPTS {
            let token = generate_token();
            if self.storage.set_link_token(user_id, &token, Utc::now()).await? {
                info!(user_id = %user_id, "Issued rating link");
                return Ok(link::rating_link(&self.bot_username, &token));
            }
            warn!(user_id = %user_id, attempt, "Share token collision, retrying");
        }
        bail!("Could not issue a unique share token for user {user_id}")
    }

    /// Resolve a token to the rated user, clearing it once it has expired
    async fn resolve_token(&self, token: &str) -> Result<Result<User, RatingCheck>> {
        let Some(rated) = self.storage.get_user_by_token(token).await? else {
            return Ok(Err(RatingCheck::InvalidLink));
        };
        let fresh = rated
            .link_created_at
            .is_some_and(|created| is_token_fresh(created, Utc::now()));
        if !fresh {
            self.storage.clear_link_token(rated.telegram_id).await?;
            info!(user_id = %rated.telegram_id, "Cleared expired share token");
            return Ok(Err(RatingCheck::Expired));
        }
        Ok(Ok(rated))
    }

    /// Checks run when a rating link is opened and again on submission
    pub async fn open_rating(&self, rater_id: i64, token: &str) -> Result<RatingCheck> {
        let rated = match self.resolve_token(token).await? {
            Ok(rated) => rated,
            Err(check) => return Ok(check),
        };
        if rated.telegram_id == rater_id {
            return Ok(RatingCheck::SelfRating);
        }
        if self
            .storage
            .get_existing_rating(rater_id, rated.telegram_id)
            .await?
            .is_some()
        {
            return Ok(RatingCheck::AlreadyRated);
        }
        Ok(RatingCheck::Ready(rated))
    }

    pub async fn submit_rating(&self, rater_id: i64, token: &str, score: i16) -> Result<RatingOutcome> {
        if !(1..=5).contains(&score) {
            return Ok(RatingOutcome::InvalidScore);
        }
        let rated = match self.open_rating(rater_id, token).await? {
            RatingCheck::Ready(rated) => rated,
            other => return Ok(RatingOutcome::Rejected(other)),
        };

        if !self
            .storage
            .save_rating(rater_id, rated.telegram_id, score, Utc::now())
            .await?
        {
            // Lost a race against a concurrent submission
            return Ok(RatingOutcome::Rejected(RatingCheck::AlreadyRated));
        }
        info!(rater_id = %rater_id, rated_id = %rated.telegram_id, score, "Rating saved");
        Ok(RatingOutcome::Saved(rated.display_name()))
    }

    /// Average and count of ratings received within the period
    pub async fn statistics(&self, user_id: i64, period: Period) -> Result<Statistics> {
        let since = Utc::now() - period.duration();
        self.storage.get_statistics(user_id, since).await
    }

    pub async fn voters(&self, user_id: i64) -> Result<Vec<Voter>> {
        self.storage.get_voters(user_id).await
    }
}
