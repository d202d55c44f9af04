//! Callback Handler module for processing inline keyboard callback queries

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, InlineKeyboardMarkup, MessageId};
use tracing::{debug, error, info, warn};

use crate::admin::AdminOutcome;
use crate::dialogue::{BotDialogue, BotDialogueState};
use crate::localization::{t_args_lang, t_lang};
use crate::models::Payment;
use crate::questions::AnswerOutcome;
use crate::ratings::RatingOutcome;
use crate::reconciliation::{CheckOutcome, CountdownView, PaymentError, PaymentRequest};
use crate::subscription::{Period, Plan};

use super::callback_data::CallbackAction;
use super::dialogue_manager::send_poll_question;
use super::ui_builder::{
    back_to_menu_keyboard, back_to_prices_keyboard, back_to_results_keyboard,
    confirm_new_payment_keyboard, format_admin_overview, format_amount, format_poll_results,
    format_prices, format_statistics, format_voters, main_menu_keyboard, manage_prices_keyboard,
    payment_keyboard, payment_periods_keyboard, period_name, poll_check_message,
    question_selection_keyboard, rating_check_message, stats_menu_keyboard, tier_name,
};
use super::{user_id, BotContext};

/// How a callback query gets answered once its action ran
enum CallbackReply {
    Silent,
    Notice(String),
    Alert(String),
}

/// Where the pressed button lives, so screens can be edited in place
struct Screen<'a> {
    bot: &'a Bot,
    chat_id: ChatId,
    message_id: MessageId,
}

impl Screen<'_> {
    /// Replace the message; fall back to a new one when it cannot be edited
    async fn show(&self, text: String, keyboard: InlineKeyboardMarkup) -> Result<()> {
        match self
            .bot
            .edit_message_text(self.chat_id, self.message_id, text.clone())
            .reply_markup(keyboard.clone())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                debug!(user_id = %self.chat_id, error = %e, "Failed to edit message, sending a new one");
                self.bot
                    .send_message(self.chat_id, text)
                    .reply_markup(keyboard)
                    .await?;
                Ok(())
            }
        }
    }

    async fn show_keyboard(&self, keyboard: InlineKeyboardMarkup) -> Result<()> {
        self.bot
            .edit_message_reply_markup(self.chat_id, self.message_id)
            .reply_markup(keyboard)
            .await?;
        Ok(())
    }
}

/// Re-renders the payment keyboard with a ticking check button
struct MessageCountdown {
    bot: Bot,
    chat_id: ChatId,
    message_id: MessageId,
    language_code: Option<String>,
}

#[async_trait]
impl CountdownView for MessageCountdown {
    async fn show_remaining(&self, payment: &Payment, seconds_left: u32) -> Result<()> {
        let lang = self.language_code.as_deref();
        let label = t_args_lang("btn-retry-in", &[("seconds", &seconds_left.to_string())], lang);
        self.bot
            .edit_message_reply_markup(self.chat_id, self.message_id)
            .reply_markup(payment_keyboard(&payment.payment_url, label, lang))
            .await?;
        Ok(())
    }
}

fn payment_text(payment: &Payment, language_code: Option<&str>) -> String {
    t_args_lang(
        "payment-created",
        &[
            ("period", &period_name(payment.period, language_code)),
            ("amount", &format_amount(payment.amount)),
        ],
        language_code,
    )
}

async fn show_payment(screen: &Screen<'_>, payment: &Payment, language_code: Option<&str>) -> Result<()> {
    screen
        .show(
            payment_text(payment, language_code),
            payment_keyboard(
                &payment.payment_url,
                t_lang("btn-check-payment", language_code),
                language_code,
            ),
        )
        .await
}

async fn show_payment_required(screen: &Screen<'_>, language_code: Option<&str>) -> Result<()> {
    screen
        .show(
            t_lang("stats-payment-required", language_code),
            payment_periods_keyboard(language_code),
        )
        .await
}

/// Render the failure of a payment request or replacement
async fn show_payment_error(
    screen: &Screen<'_>,
    user_id: i64,
    plan: Plan,
    err: PaymentError,
    language_code: Option<&str>,
) -> Result<()> {
    match err {
        PaymentError::PriceNotSet(plan) => {
            warn!(user_id = %user_id, period = %plan.period, vip = plan.is_vip, "Price not set");
            screen
                .show(
                    t_lang("payment-price-not-set", language_code),
                    back_to_menu_keyboard(language_code),
                )
                .await
        }
        PaymentError::PendingExists => show_confirm_new_payment(screen, plan, language_code).await,
        err => {
            error!(user_id = %user_id, error = %err, "Failed to create payment");
            screen
                .show(
                    t_lang("payment-create-error", language_code),
                    back_to_menu_keyboard(language_code),
                )
                .await
        }
    }
}

async fn show_confirm_new_payment(
    screen: &Screen<'_>,
    plan: Plan,
    language_code: Option<&str>,
) -> Result<()> {
    let key = if plan.is_vip {
        "payment-pending-exists-vip"
    } else {
        "payment-pending-exists"
    };
    screen
        .show(t_lang(key, language_code), confirm_new_payment_keyboard(plan, language_code))
        .await
}

async fn request_payment(
    screen: &Screen<'_>,
    ctx: &BotContext,
    user_id: i64,
    plan: Plan,
    language_code: Option<&str>,
) -> Result<()> {
    match ctx.payments.request_payment(user_id, plan).await {
        Ok(PaymentRequest::Created(payment)) => show_payment(screen, &payment, language_code).await,
        Ok(PaymentRequest::NeedsConfirmation { existing, plan }) => {
            debug!(user_id = %user_id, payment_id = existing.id, "Pending payment needs replacing");
            show_confirm_new_payment(screen, plan, language_code).await
        }
        Err(e) => show_payment_error(screen, user_id, plan, e, language_code).await,
    }
}

/// Run the interactive payment check; the query is already answered since
/// the countdown outlives Telegram's callback timeout.
async fn check_payment(
    screen: &Screen<'_>,
    ctx: &BotContext,
    user_id: i64,
    language_code: Option<&str>,
) -> Result<()> {
    let view = MessageCountdown {
        bot: screen.bot.clone(),
        chat_id: screen.chat_id,
        message_id: screen.message_id,
        language_code: language_code.map(str::to_string),
    };

    match ctx.payments.check_payment(user_id, &view).await {
        Ok(CheckOutcome::NoPayments) => {
            screen
                .show(
                    t_lang("payment-no-payments", language_code),
                    payment_periods_keyboard(language_code),
                )
                .await
        }
        Ok(CheckOutcome::Expired) => {
            screen
                .show(
                    t_lang("payment-expired", language_code),
                    payment_periods_keyboard(language_code),
                )
                .await
        }
        Ok(CheckOutcome::AlreadyPaid(_)) | Ok(CheckOutcome::Confirmed(_)) => {
            let vip = ctx.payments.is_vip(user_id).await?;
            screen
                .show(
                    t_lang("payment-success", language_code),
                    stats_menu_keyboard(vip, language_code),
                )
                .await
        }
        Ok(CheckOutcome::NotPaid(payment)) => {
            screen
                .show(
                    t_lang("payment-not-paid", language_code),
                    payment_keyboard(
                        &payment.payment_url,
                        t_lang("btn-check-payment", language_code),
                        language_code,
                    ),
                )
                .await
        }
        Ok(CheckOutcome::InProgress) => {
            screen
                .bot
                .send_message(screen.chat_id, t_lang("payment-check-in-progress", language_code))
                .await?;
            Ok(())
        }
        Err(e) => {
            error!(user_id = %user_id, error = %e, "Payment check failed");
            screen
                .bot
                .send_message(screen.chat_id, t_lang("payment-check-error", language_code))
                .await?;
            Ok(())
        }
    }
}

async fn show_results(
    screen: &Screen<'_>,
    ctx: &BotContext,
    user_id: i64,
    language_code: Option<&str>,
) -> Result<()> {
    match ctx.payments.access(user_id).await? {
        Some(access) => {
            screen
                .show(
                    t_lang("stats-choose-period", language_code),
                    stats_menu_keyboard(access.vip, language_code),
                )
                .await
        }
        None => show_payment_required(screen, language_code).await,
    }
}

async fn show_statistics(
    screen: &Screen<'_>,
    ctx: &BotContext,
    user_id: i64,
    period: Period,
    language_code: Option<&str>,
) -> Result<()> {
    if !ctx.payments.has_active_access(user_id).await? {
        return show_payment_required(screen, language_code).await;
    }
    let stats = ctx.ratings.statistics(user_id, period).await?;
    screen
        .show(
            format_statistics(period, &stats, language_code),
            back_to_results_keyboard(language_code),
        )
        .await
}

#[allow(clippy::too_many_arguments)]
async fn handle_answer(
    screen: &Screen<'_>,
    ctx: &BotContext,
    dialogue: &BotDialogue,
    user_id: i64,
    question_id: i64,
    score: i16,
    token: &str,
    language_code: Option<&str>,
) -> Result<CallbackReply> {
    let state = dialogue.get().await?;
    let current = match &state {
        Some(BotDialogueState::AnsweringQuestions {
            token: active,
            questions,
            index,
        }) if active == token => questions.get(*index),
        _ => None,
    };
    if !current.is_some_and(|q| q.id == question_id) {
        debug!(user_id = %user_id, question_id, "Answer outside the active poll");
        return Ok(CallbackReply::Alert(t_lang("poll-session-lost", language_code)));
    }

    match ctx.questions.answer(user_id, token, question_id, score).await? {
        AnswerOutcome::Saved | AnswerOutcome::AlreadyAnswered => {}
        AnswerOutcome::InvalidScore => {
            return Ok(CallbackReply::Alert(t_lang("rate-invalid-score", language_code)));
        }
        AnswerOutcome::UnknownQuestion => {
            return Ok(CallbackReply::Alert(t_lang("poll-session-lost", language_code)));
        }
        AnswerOutcome::Rejected(check) => {
            dialogue.exit().await?;
            screen
                .show(
                    poll_check_message(&check, language_code),
                    back_to_menu_keyboard(language_code),
                )
                .await?;
            return Ok(CallbackReply::Silent);
        }
    }

    // Freeze the answered question
    if let Err(e) = screen.show_keyboard(InlineKeyboardMarkup::default()).await {
        debug!(user_id = %user_id, error = %e, "Failed to clear answer keyboard");
    }

    let next = state.as_ref().and_then(|s| s.next_question());
    match next {
        Some((next_state, question)) => {
            send_poll_question(screen.bot, screen.chat_id, token, question, language_code).await?;
            dialogue.update(next_state).await?;
        }
        None => {
            info!(user_id = %user_id, "Poll completed");
            dialogue.exit().await?;
            screen
                .bot
                .send_message(screen.chat_id, t_lang("poll-finished", language_code))
                .await?;
        }
    }
    Ok(CallbackReply::Notice(t_lang("poll-answer-saved", language_code)))
}

async fn handle_action(
    screen: &Screen<'_>,
    ctx: &BotContext,
    dialogue: &BotDialogue,
    user_id: i64,
    action: CallbackAction,
    language_code: Option<&str>,
) -> Result<CallbackReply> {
    let forbidden = || CallbackReply::Alert(t_lang("admin-forbidden", language_code));

    match action {
        CallbackAction::BackToMenu => {
            dialogue.exit().await?;
            let is_admin = ctx.admin.is_admin(user_id).await?;
            screen
                .show(
                    t_lang("menu-choose", language_code),
                    main_menu_keyboard(is_admin, language_code),
                )
                .await?;
        }
        CallbackAction::GenerateLink => match ctx.ratings.issue_link(user_id).await {
            Ok(link) => {
                screen
                    .show(
                        t_args_lang("link-generated", &[("link", &link)], language_code),
                        back_to_menu_keyboard(language_code),
                    )
                    .await?;
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to issue rating link");
                return Ok(CallbackReply::Alert(t_lang("link-error", language_code)));
            }
        },
        CallbackAction::ShowResults | CallbackAction::BackToStatChoice => {
            show_results(screen, ctx, user_id, language_code).await?;
        }
        CallbackAction::CheckSubscription => match ctx.payments.access(user_id).await? {
            Some(access) => {
                let (days, hours, minutes) = access.remaining(Utc::now());
                screen
                    .show(
                        t_args_lang(
                            "subscription-active",
                            &[
                                ("days", &days.to_string()),
                                ("hours", &hours.to_string()),
                                ("minutes", &minutes.to_string()),
                            ],
                            language_code,
                        ),
                        back_to_menu_keyboard(language_code),
                    )
                    .await?;
            }
            None => {
                screen
                    .show(
                        t_lang("subscription-none", language_code),
                        payment_periods_keyboard(language_code),
                    )
                    .await?;
            }
        },
        CallbackAction::Stat(period) => {
            show_statistics(screen, ctx, user_id, period, language_code).await?;
        }
        CallbackAction::InvalidPeriod(tag) => {
            warn!(user_id = %user_id, period = %tag, "Invalid period in callback");
            return Ok(CallbackReply::Alert(t_lang("stats-invalid-period", language_code)));
        }
        CallbackAction::ViewVoters => {
            if !ctx.payments.is_vip(user_id).await? {
                return Ok(CallbackReply::Alert(t_lang("voters-vip-required", language_code)));
            }
            let voters = ctx.ratings.voters(user_id).await?;
            let text = if voters.is_empty() {
                t_lang("voters-empty", language_code)
            } else {
                format_voters(&voters, language_code)
            };
            screen.show(text, back_to_results_keyboard(language_code)).await?;
        }
        CallbackAction::PollResults => {
            let Some(access) = ctx.payments.access(user_id).await? else {
                show_payment_required(screen, language_code).await?;
                return Ok(CallbackReply::Silent);
            };
            let results = ctx.questions.results(user_id, access.vip).await?;
            let text = if results.averages.is_empty() {
                t_lang("poll-results-empty", language_code)
            } else {
                format_poll_results(&results, language_code)
            };
            screen.show(text, back_to_results_keyboard(language_code)).await?;
        }
        CallbackAction::Pay(plan) => {
            request_payment(screen, ctx, user_id, plan, language_code).await?;
        }
        CallbackAction::BuyVip => {
            request_payment(screen, ctx, user_id, Plan::vip(Period::Month), language_code).await?;
        }
        CallbackAction::ConfirmNewPayment(plan) => {
            match ctx.payments.replace_pending(user_id, plan).await {
                Ok(payment) => show_payment(screen, &payment, language_code).await?,
                Err(e) => show_payment_error(screen, user_id, plan, e, language_code).await?,
            }
        }
        CallbackAction::CheckPayment => {
            check_payment(screen, ctx, user_id, language_code).await?;
        }
        CallbackAction::Rate { score, token } => {
            match ctx.ratings.submit_rating(user_id, &token, score).await? {
                RatingOutcome::Saved(name) => {
                    screen
                        .show(
                            t_args_lang(
                                "rate-thanks",
                                &[("name", &name), ("score", &score.to_string())],
                                language_code,
                            ),
                            back_to_menu_keyboard(language_code),
                        )
                        .await?;
                }
                RatingOutcome::InvalidScore => {
                    return Ok(CallbackReply::Alert(t_lang("rate-invalid-score", language_code)));
                }
                RatingOutcome::Rejected(check) => {
                    screen
                        .show(
                            rating_check_message(&check, language_code),
                            back_to_menu_keyboard(language_code),
                        )
                        .await?;
                }
            }
        }
        CallbackAction::AdminStats => match ctx.admin.overview(user_id).await? {
            AdminOutcome::Done(overview) => {
                screen
                    .show(
                        format_admin_overview(&overview, language_code),
                        back_to_menu_keyboard(language_code),
                    )
                    .await?;
            }
            AdminOutcome::Forbidden => return Ok(forbidden()),
        },
        CallbackAction::ManagePrices => match ctx.admin.prices(user_id).await? {
            AdminOutcome::Done(prices) => {
                dialogue.exit().await?;
                screen
                    .show(
                        format_prices(&prices, language_code),
                        manage_prices_keyboard(language_code),
                    )
                    .await?;
            }
            AdminOutcome::Forbidden => return Ok(forbidden()),
        },
        CallbackAction::SetPrice(plan) => {
            if !ctx.admin.is_admin(user_id).await? {
                return Ok(forbidden());
            }
            dialogue.update(BotDialogueState::WaitingForPrice { plan }).await?;
            screen
                .show(
                    t_args_lang(
                        "price-prompt",
                        &[
                            ("period", &period_name(plan.period, language_code)),
                            ("tier", &tier_name(plan, language_code)),
                        ],
                        language_code,
                    ),
                    back_to_prices_keyboard(language_code),
                )
                .await?;
        }
        CallbackAction::AddQuestions => {
            if !ctx.admin.is_admin(user_id).await? {
                return Ok(forbidden());
            }
            dialogue.update(BotDialogueState::WaitingForQuestion).await?;
            screen
                .show(
                    t_lang("question-prompt", language_code),
                    back_to_menu_keyboard(language_code),
                )
                .await?;
        }
        CallbackAction::GenerateCustomLink => {
            let questions = ctx.questions.list_questions().await?;
            if questions.is_empty() {
                return Ok(CallbackReply::Alert(t_lang("question-none-available", language_code)));
            }
            dialogue
                .update(BotDialogueState::SelectingQuestions { selected: Vec::new() })
                .await?;
            screen
                .show(
                    t_lang("question-select", language_code),
                    question_selection_keyboard(&questions, &[], language_code),
                )
                .await?;
        }
        CallbackAction::SelectQuestion(question_id) => {
            let selected = match dialogue.get().await? {
                Some(BotDialogueState::SelectingQuestions { selected }) => selected,
                _ => Vec::new(),
            };
            let state = BotDialogueState::with_selected(&selected, question_id);
            let BotDialogueState::SelectingQuestions { selected } = &state else {
                return Ok(CallbackReply::Silent);
            };
            let questions = ctx.questions.list_questions().await?;
            if let Err(e) = screen
                .show_keyboard(question_selection_keyboard(&questions, selected, language_code))
                .await
            {
                // Telegram rejects edits that change nothing
                debug!(user_id = %user_id, error = %e, "Selection keyboard not updated");
            }
            dialogue.update(state).await?;
            return Ok(CallbackReply::Notice(t_lang("question-selected", language_code)));
        }
        CallbackAction::FinalizeQuestionLink => {
            let selected = match dialogue.get().await? {
                Some(BotDialogueState::SelectingQuestions { selected }) => selected,
                _ => Vec::new(),
            };
            match ctx.questions.create_link(user_id, &selected).await? {
                Some(link) => {
                    dialogue.exit().await?;
                    screen
                        .show(
                            t_args_lang("question-link-ready", &[("link", &link)], language_code),
                            back_to_menu_keyboard(language_code),
                        )
                        .await?;
                }
                None => {
                    return Ok(CallbackReply::Alert(t_lang("question-select-one", language_code)));
                }
            }
        }
        CallbackAction::Answer {
            question_id,
            score,
            token,
        } => {
            return handle_answer(
                screen,
                ctx,
                dialogue,
                user_id,
                question_id,
                score,
                &token,
                language_code,
            )
            .await;
        }
        CallbackAction::Unknown(data) => {
            warn!(user_id = %user_id, data = %data, "Unknown callback data");
            return Ok(CallbackReply::Alert(t_lang("unknown-action", language_code)));
        }
    }
    Ok(CallbackReply::Silent)
}

/// Handle callback queries from inline keyboards
pub async fn callback_handler(
    bot: Bot,
    q: CallbackQuery,
    ctx: Arc<BotContext>,
    dialogue: BotDialogue,
) -> Result<()> {
    let action = CallbackAction::parse(q.data.as_deref().unwrap_or(""));
    let language_code = q.from.language_code.as_deref();
    let user_id = user_id(&q.from);
    debug!(user_id = %user_id, action = ?action, "Received callback query from user");

    let Some(msg) = &q.message else {
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };
    let screen = Screen {
        bot: &bot,
        chat_id: msg.chat().id,
        message_id: msg.id(),
    };

    // The countdown outlasts the callback answer deadline
    if action == CallbackAction::CheckPayment {
        bot.answer_callback_query(q.id.clone()).await?;
    }

    let reply = match handle_action(&screen, &ctx, &dialogue, user_id, action.clone(), language_code).await {
        Ok(reply) => reply,
        Err(e) => {
            error!(user_id = %user_id, error = %e, "Failed to handle callback query");
            bot.send_message(screen.chat_id, t_lang("error-generic", language_code))
                .await?;
            CallbackReply::Silent
        }
    };

    if action == CallbackAction::CheckPayment {
        return Ok(());
    }
    let answer = bot.answer_callback_query(q.id.clone());
    let answer = match reply {
        CallbackReply::Silent => answer.await,
        CallbackReply::Notice(text) => answer.text(text).await,
        CallbackReply::Alert(text) => answer.text(text).show_alert(true).await,
    };
    if let Err(e) = answer {
        debug!(user_id = %user_id, error = %e, "Failed to answer callback query");
    }
    Ok(())
}
