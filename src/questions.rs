//! Question catalogue and question poll links.

use anyhow::{bail, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::admin::AdminOutcome;
use crate::dialogue::{validate_question, QuestionInputError};
use crate::link::{self, generate_token, is_token_fresh};
use crate::models::{Question, QuestionAverage, QuestionLink, RaterBreakdown};
use crate::storage::Storage;

const MAX_TOKEN_ATTEMPTS: usize = 5;
pub const MAX_QUESTION_LENGTH: usize = 255;

#[derive(Debug, Clone, PartialEq)]
pub enum AddQuestion {
    Added(Question),
    Empty,
    TooLong,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollCheck {
    Ready(QuestionLink),
    InvalidLink,
    Expired,
    OwnPoll,
    AlreadyAnswered,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnswerOutcome {
    Saved,
    AlreadyAnswered,
    InvalidScore,
    UnknownQuestion,
    Rejected(PollCheck),
}

/// Poll results for the owner; the breakdown is only filled for VIP owners
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PollResults {
    pub averages: Vec<QuestionAverage>,
    pub breakdown: Option<Vec<RaterBreakdown>>,
}

pub struct QuestionService {
    storage: Arc<dyn Storage>,
    bot_username: String,
}

impl QuestionService {
    pub fn new(storage: Arc<dyn Storage>, bot_username: impl Into<String>) -> Self {
        Self {
            storage,
            bot_username: bot_username.into(),
        }
    }

    pub async fn add_question(&self, user_id: i64, text: &str) -> Result<AdminOutcome<AddQuestion>> {
        if !self.storage.is_admin(user_id).await? {
            warn!(user_id = %user_id, "Non-admin attempted to add a question");
            return Ok(AdminOutcome::Forbidden);
        }
        let text = match validate_question(text) {
            Ok(text) => text,
            Err(QuestionInputError::TooLong) => return Ok(AdminOutcome::Done(AddQuestion::TooLong)),
            Err(QuestionInputError::Empty) => return Ok(AdminOutcome::Done(AddQuestion::Empty)),
        };
        Ok(AdminOutcome::Done(match self.storage.add_question(&text).await? {
            Some(question) => {
                info!(user_id = %user_id, question_id = question.id, "Question added");
                AddQuestion::Added(question)
            }
            None => AddQuestion::Duplicate,
        }))
    }

    pub async fn list_questions(&self) -> Result<Vec<Question>> {
        self.storage.list_questions().await
    }

    /// Create a poll link over the selected questions. Returns `None` when
    /// nothing was selected.
    pub async fn create_link(&self, owner_id: i64, question_ids: &[i64]) -> Result<Option<String>> {
        if question_ids.is_empty() {
            return Ok(None);
        }
        for attempt in 1..=MAX_TOKEN_ATTEMPTS {
            let token = generate_token();
            if self
                .storage
                .create_question_link(owner_id, &token, question_ids, Utc::now())
                .await?
            {
                info!(user_id = %owner_id, questions = question_ids.len(), "Issued poll link");
                return Ok(Some(link::poll_link(&self.bot_username, &token)));
            }
            warn!(user_id = %owner_id, attempt, "Poll token collision, retrying");
        }
        bail!("Could not issue a unique poll token for user {owner_id}")
    }

    pub async fn open_poll(&self, rater_id: i64, token: &str) -> Result<PollCheck> {
        let Some(poll) = self.storage.get_question_link(token).await? else {
            return Ok(PollCheck::InvalidLink);
        };
        if !is_token_fresh(poll.created_at, Utc::now()) {
            return Ok(PollCheck::Expired);
        }
        if poll.owner_id == rater_id {
            return Ok(PollCheck::OwnPoll);
        }
        if self.storage.has_answered_poll(token, rater_id).await? {
            return Ok(PollCheck::AlreadyAnswered);
        }
        Ok(PollCheck::Ready(poll))
    }

    pub async fn answer(
        &self,
        rater_id: i64,
        token: &str,
        question_id: i64,
        score: i16,
    ) -> Result<AnswerOutcome> {
        if !(1..=5).contains(&score) {
            return Ok(AnswerOutcome::InvalidScore);
        }
        let Some(poll) = self.storage.get_question_link(token).await? else {
            return Ok(AnswerOutcome::Rejected(PollCheck::InvalidLink));
        };
        if !is_token_fresh(poll.created_at, Utc::now()) {
            return Ok(AnswerOutcome::Rejected(PollCheck::Expired));
        }
        if poll.owner_id == rater_id {
            return Ok(AnswerOutcome::Rejected(PollCheck::OwnPoll));
        }
        if !poll.questions.iter().any(|q| q.id == question_id) {
            return Ok(AnswerOutcome::UnknownQuestion);
        }
        let saved = self
            .storage
            .save_question_answer(token, question_id, rater_id, score, Utc::now())
            .await?;
        Ok(if saved {
            AnswerOutcome::Saved
        } else {
            AnswerOutcome::AlreadyAnswered
        })
    }

    pub async fn results(&self, owner_id: i64, vip: bool) -> Result<PollResults> {
        let averages = self.storage.get_poll_averages(owner_id).await?;
        let breakdown = if vip {
            Some(self.storage.get_poll_breakdown(owner_id).await?)
        } else {
            None
        };
        Ok(PollResults {
            averages,
            breakdown,
        })
    }
}
