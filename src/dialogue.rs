//! Per-user conversation state for the multi-step flows.

use serde::{Deserialize, Serialize};
use teloxide::dispatching::dialogue::{Dialogue, InMemStorage};

use crate::models::Question;
use crate::questions::MAX_QUESTION_LENGTH;
use crate::subscription::Plan;

/// Represents where a user is inside a multi-step flow
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum BotDialogueState {
    #[default]
    Start,
    /// Admin picked a plan and is about to type its price
    WaitingForPrice { plan: Plan },
    /// Admin is about to type a new question
    WaitingForQuestion,
    /// User is ticking questions for a poll link
    SelectingQuestions { selected: Vec<i64> },
    /// User is answering a poll, one question at a time
    AnsweringQuestions {
        token: String,
        questions: Vec<Question>,
        index: usize,
    },
}

impl BotDialogueState {
    /// State after ticking a question; already selected ids are kept once
    pub fn with_selected(selected: &[i64], question_id: i64) -> Self {
        let mut selected = selected.to_vec();
        if !selected.contains(&question_id) {
            selected.push(question_id);
        }
        BotDialogueState::SelectingQuestions { selected }
    }

    /// Advance a poll to its next question, or `None` when it was the last one
    pub fn next_question(&self) -> Option<(Self, &Question)> {
        let BotDialogueState::AnsweringQuestions {
            token,
            questions,
            index,
        } = self
        else {
            return None;
        };
        let next = index + 1;
        questions.get(next).map(|question| {
            (
                BotDialogueState::AnsweringQuestions {
                    token: token.clone(),
                    questions: questions.clone(),
                    index: next,
                },
                question,
            )
        })
    }
}

pub type BotDialogue = Dialogue<BotDialogueState, InMemStorage<BotDialogueState>>;

/// Why a typed question was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QuestionInputError {
    #[error("question is empty")]
    Empty,
    #[error("question is too long")]
    TooLong,
}

/// Validates a question typed by an admin
pub fn validate_question(text: &str) -> Result<String, QuestionInputError> {
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return Err(QuestionInputError::Empty);
    }

    if trimmed.chars().count() > MAX_QUESTION_LENGTH {
        return Err(QuestionInputError::TooLong);
    }

    Ok(trimmed.to_string())
}
