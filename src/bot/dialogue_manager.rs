//! Dialogue Manager module for handling input inside dialogue states

use anyhow::Result;
use teloxide::prelude::*;
use tracing::{debug, error};

use crate::admin::{AdminOutcome, PriceUpdate};
use crate::dialogue::{BotDialogue, BotDialogueState};
use crate::localization::{t_args_lang, t_lang};
use crate::models::Question;
use crate::questions::{AddQuestion, PollCheck};
use crate::subscription::Plan;

use super::ui_builder::{
    back_to_menu_keyboard, back_to_prices_keyboard, format_amount, period_name, poll_check_message,
    single_question_keyboard, tier_name,
};
use super::{user_id, BotContext};

/// Handle the price typed after choosing a plan in the price manager
pub async fn handle_price_input(
    bot: &Bot,
    msg: &Message,
    dialogue: BotDialogue,
    ctx: &BotContext,
    plan: Plan,
    input: &str,
    language_code: Option<&str>,
) -> Result<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };

    match ctx.admin.set_price(user_id(from), plan, input).await {
        Ok(AdminOutcome::Done(PriceUpdate::Updated(price))) => {
            let text = t_args_lang(
                "price-updated",
                &[
                    ("period", &period_name(plan.period, language_code)),
                    ("tier", &tier_name(plan, language_code)),
                    ("price", &format_amount(price)),
                ],
                language_code,
            );
            bot.send_message(msg.chat.id, text)
                .reply_markup(back_to_prices_keyboard(language_code))
                .await?;
            dialogue.exit().await?;
        }
        Ok(AdminOutcome::Done(PriceUpdate::InvalidInput)) => {
            bot.send_message(msg.chat.id, t_lang("price-invalid", language_code))
                .await?;
            // Keep dialogue active, admin can try again
        }
        Ok(AdminOutcome::Forbidden) => {
            bot.send_message(msg.chat.id, t_lang("admin-forbidden", language_code))
                .await?;
            dialogue.exit().await?;
        }
        Err(e) => {
            error!(user_id = %msg.chat.id, error = %e, "Failed to update subscription price");
            bot.send_message(msg.chat.id, t_lang("price-update-error", language_code))
                .reply_markup(back_to_prices_keyboard(language_code))
                .await?;
            dialogue.exit().await?;
        }
    }
    Ok(())
}

/// Handle a question typed by an admin. The dialogue stays open so several
/// questions can be added in a row.
pub async fn handle_question_input(
    bot: &Bot,
    msg: &Message,
    dialogue: BotDialogue,
    ctx: &BotContext,
    input: &str,
    language_code: Option<&str>,
) -> Result<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };

    let reply = match ctx.questions.add_question(user_id(from), input).await? {
        AdminOutcome::Forbidden => {
            dialogue.exit().await?;
            t_lang("admin-forbidden", language_code)
        }
        AdminOutcome::Done(AddQuestion::Added(question)) => t_args_lang(
            "question-added",
            &[("question", &question.text)],
            language_code,
        ),
        AdminOutcome::Done(AddQuestion::Empty) => t_lang("question-empty", language_code),
        AdminOutcome::Done(AddQuestion::TooLong) => t_lang("question-too-long", language_code),
        AdminOutcome::Done(AddQuestion::Duplicate) => t_lang("question-duplicate", language_code),
    };

    bot.send_message(msg.chat.id, reply)
        .reply_markup(back_to_menu_keyboard(language_code))
        .await?;
    Ok(())
}

pub async fn send_poll_question(
    bot: &Bot,
    chat_id: ChatId,
    token: &str,
    question: &Question,
    language_code: Option<&str>,
) -> Result<()> {
    bot.send_message(
        chat_id,
        t_args_lang("poll-question", &[("question", &question.text)], language_code),
    )
    .reply_markup(single_question_keyboard(token, question.id))
    .await?;
    Ok(())
}

/// Open a poll link and present its first question
pub async fn start_poll(
    bot: &Bot,
    chat_id: ChatId,
    dialogue: BotDialogue,
    ctx: &BotContext,
    rater_id: i64,
    token: &str,
    language_code: Option<&str>,
) -> Result<()> {
    let poll = match ctx.questions.open_poll(rater_id, token).await? {
        PollCheck::Ready(poll) => poll,
        check => {
            debug!(user_id = %rater_id, check = ?check, "Poll link rejected");
            bot.send_message(chat_id, poll_check_message(&check, language_code))
                .await?;
            return Ok(());
        }
    };

    let Some(first) = poll.questions.first() else {
        bot.send_message(chat_id, t_lang("poll-invalid-link", language_code))
            .await?;
        return Ok(());
    };

    send_poll_question(bot, chat_id, token, first, language_code).await?;
    dialogue
        .update(BotDialogueState::AnsweringQuestions {
            token: token.to_string(),
            questions: poll.questions.clone(),
            index: 0,
        })
        .await?;
    Ok(())
}
