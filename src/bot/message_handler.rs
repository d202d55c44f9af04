//! Message Handler module for processing incoming Telegram messages

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{debug, error, info};

use crate::dialogue::{BotDialogue, BotDialogueState};
use crate::link::StartPayload;
use crate::localization::{t_args_lang, t_lang};
use crate::ratings::RatingCheck;

use super::dialogue_manager::{handle_price_input, handle_question_input, start_poll};
use super::ui_builder::{main_menu_keyboard, rate_keyboard, rating_check_message};
use super::{user_id, BotContext};

/// Split `/start`, `/start payload` and `/start@BotName payload`
fn start_payload(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("/start")?;
    let rest = match rest.strip_prefix('@') {
        Some(mention) => mention.split_once(' ').map(|(_, p)| p).unwrap_or(""),
        None if rest.is_empty() || rest.starts_with(' ') => rest,
        None => return None,
    };
    Some(rest.trim())
}

async fn handle_start(
    bot: &Bot,
    msg: &Message,
    dialogue: BotDialogue,
    ctx: &BotContext,
    payload: &str,
    language_code: Option<&str>,
) -> Result<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let user_id = user_id(from);

    ctx.storage
        .set_user(user_id, Some(from.first_name.as_str()), from.username.as_deref())
        .await?;
    dialogue.exit().await?;

    if payload.is_empty() {
        let is_admin = ctx.admin.is_admin(user_id).await?;
        bot.send_message(msg.chat.id, t_lang("menu-welcome", language_code))
            .reply_markup(main_menu_keyboard(is_admin, language_code))
            .await?;
        return Ok(());
    }

    match StartPayload::parse(payload) {
        StartPayload::Rate(token) => match ctx.ratings.open_rating(user_id, &token).await? {
            RatingCheck::Ready(rated) => {
                info!(user_id = %user_id, rated_id = %rated.telegram_id, "Opened rating link");
                bot.send_message(
                    msg.chat.id,
                    t_args_lang("rate-prompt", &[("name", &rated.display_name())], language_code),
                )
                .reply_markup(rate_keyboard(&token, language_code))
                .await?;
            }
            check => {
                debug!(user_id = %user_id, check = ?check, "Rating link rejected");
                bot.send_message(msg.chat.id, rating_check_message(&check, language_code))
                    .await?;
            }
        },
        StartPayload::Poll(token) => {
            start_poll(bot, msg.chat.id, dialogue, ctx, user_id, &token, language_code).await?;
        }
        StartPayload::Unknown(payload) => {
            debug!(user_id = %user_id, payload = %payload, "Unknown start payload");
            bot.send_message(msg.chat.id, t_lang("start-invalid-command", language_code))
                .await?;
        }
    }
    Ok(())
}

async fn handle_text_message(
    bot: &Bot,
    msg: &Message,
    dialogue: BotDialogue,
    ctx: &BotContext,
    text: &str,
) -> Result<()> {
    // Extract user's language code from Telegram
    let language_code = msg
        .from
        .as_ref()
        .and_then(|user| user.language_code.as_ref())
        .map(|s| s.as_str());

    debug!(user_id = %msg.chat.id, message_length = text.len(), "Received text message from user");

    if let Some(payload) = start_payload(text) {
        return handle_start(bot, msg, dialogue, ctx, payload, language_code).await;
    }

    match dialogue.get().await? {
        Some(BotDialogueState::WaitingForPrice { plan }) => {
            return handle_price_input(bot, msg, dialogue, ctx, plan, text, language_code).await;
        }
        Some(BotDialogueState::WaitingForQuestion) => {
            return handle_question_input(bot, msg, dialogue, ctx, text, language_code).await;
        }
        Some(BotDialogueState::SelectingQuestions { .. })
        | Some(BotDialogueState::AnsweringQuestions { .. })
        | Some(BotDialogueState::Start)
        | None => {}
    }

    let is_admin = match msg.from.as_ref() {
        Some(from) => ctx.admin.is_admin(user_id(from)).await?,
        None => false,
    };
    bot.send_message(msg.chat.id, t_lang("text-fallback", language_code))
        .reply_markup(main_menu_keyboard(is_admin, language_code))
        .await?;
    Ok(())
}

pub async fn message_handler(
    bot: Bot,
    msg: Message,
    ctx: Arc<BotContext>,
    dialogue: BotDialogue,
) -> Result<()> {
    let Some(text) = msg.text() else {
        debug!(user_id = %msg.chat.id, "Ignoring non-text message");
        return Ok(());
    };

    if let Err(e) = handle_text_message(&bot, &msg, dialogue, &ctx, text).await {
        error!(user_id = %msg.chat.id, error = %e, "Failed to handle message");
        let language_code = msg.from.as_ref().and_then(|u| u.language_code.as_deref());
        bot.send_message(msg.chat.id, t_lang("error-generic", language_code))
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_payload() {
        assert_eq!(start_payload("/start"), Some(""));
        assert_eq!(start_payload("/start rate_abc"), Some("rate_abc"));
        assert_eq!(start_payload("/start@PeopleRatingsBot poll_x"), Some("poll_x"));
        assert_eq!(start_payload("/start@PeopleRatingsBot"), Some(""));
        assert_eq!(start_payload("/started"), None);
        assert_eq!(start_payload("hello"), None);
    }
}
