//! Bot module for handling Telegram interactions
//!
//! This module is split into several submodules:
//! - `message_handler`: Handles `/start` deep links and typed input
//! - `callback_handler`: Handles inline keyboard callback queries
//! - `callback_data`: Typed callback payloads carried by buttons
//! - `ui_builder`: Creates keyboards and formats messages
//! - `dialogue_manager`: Handles input for multi-step dialogue states

pub mod callback_data;
pub mod callback_handler;
pub mod dialogue_manager;
pub mod message_handler;
pub mod ui_builder;

use std::sync::Arc;

use crate::admin::AdminService;
use crate::config::BotConfig;
use crate::provider::PaymentProvider;
use crate::questions::QuestionService;
use crate::ratings::RatingService;
use crate::reconciliation::PaymentService;
use crate::storage::Storage;

// Re-export main handler functions for use in main.rs
pub use callback_handler::callback_handler;
pub use message_handler::message_handler;

pub use callback_data::CallbackAction;

/// Services shared by every handler invocation
pub struct BotContext {
    pub storage: Arc<dyn Storage>,
    pub payments: PaymentService,
    pub ratings: RatingService,
    pub admin: AdminService,
    pub questions: QuestionService,
}

impl BotContext {
    pub fn new(
        config: &BotConfig,
        storage: Arc<dyn Storage>,
        provider: Arc<dyn PaymentProvider>,
    ) -> Self {
        Self {
            payments: PaymentService::new(
                storage.clone(),
                provider,
                config.payment_grace,
                config.check_countdown_secs,
            ),
            ratings: RatingService::new(storage.clone(), config.bot_username.clone()),
            admin: AdminService::new(storage.clone()),
            questions: QuestionService::new(storage.clone(), config.bot_username.clone()),
            storage,
        }
    }
}

/// Telegram's user id as stored in the database
pub(crate) fn user_id(user: &teloxide::types::User) -> i64 {
    user.id.0 as i64
}
