//! UI Builder module for creating keyboards and formatting messages

use reqwest::Url;
use rust_decimal::Decimal;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use tracing::warn;

use crate::localization::{t_args_lang, t_lang};
use crate::models::{AdminOverview, Question, Statistics, SubscriptionPrice, Voter};
use crate::questions::{PollCheck, PollResults};
use crate::ratings::RatingCheck;
use crate::subscription::{Period, Plan};

use super::callback_data::CallbackAction;

fn button(text: String, action: CallbackAction) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(text, action.to_data())
}

fn menu_row(language_code: Option<&str>) -> Vec<InlineKeyboardButton> {
    vec![button(t_lang("btn-menu", language_code), CallbackAction::BackToMenu)]
}

/// Localized name of a period as used inside sentences
pub fn period_name(period: Period, language_code: Option<&str>) -> String {
    t_lang(&format!("period-{}", period.as_str()), language_code)
}

pub fn tier_name(plan: Plan, language_code: Option<&str>) -> String {
    t_lang(&format!("tier-{}", plan.tier_tag()), language_code)
}

pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", amount)
}

pub fn main_menu_keyboard(is_admin: bool, language_code: Option<&str>) -> InlineKeyboardMarkup {
    let mut rows = vec![
        vec![button(t_lang("btn-generate-link", language_code), CallbackAction::GenerateLink)],
        vec![button(
            t_lang("btn-question-link", language_code),
            CallbackAction::GenerateCustomLink,
        )],
        vec![button(t_lang("btn-show-results", language_code), CallbackAction::ShowResults)],
        vec![button(
            t_lang("btn-check-subscription", language_code),
            CallbackAction::CheckSubscription,
        )],
    ];
    if is_admin {
        rows.push(vec![button(t_lang("btn-admin-stats", language_code), CallbackAction::AdminStats)]);
        rows.push(vec![button(
            t_lang("btn-manage-prices", language_code),
            CallbackAction::ManagePrices,
        )]);
        rows.push(vec![button(
            t_lang("btn-add-questions", language_code),
            CallbackAction::AddQuestions,
        )]);
    }
    InlineKeyboardMarkup::new(rows)
}

pub fn back_to_menu_keyboard(language_code: Option<&str>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![button(
        t_lang("btn-back", language_code),
        CallbackAction::BackToMenu,
    )]])
}

/// Back button used under statistics screens
pub fn back_to_results_keyboard(language_code: Option<&str>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![button(
        t_lang("btn-back", language_code),
        CallbackAction::BackToStatChoice,
    )]])
}

pub fn payment_periods_keyboard(language_code: Option<&str>) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = Plan::catalog()
        .into_iter()
        .map(|plan| {
            let key = if plan.is_vip {
                format!("btn-pay-vip-{}", plan.period)
            } else {
                format!("btn-pay-{}", plan.period)
            };
            vec![button(t_lang(&key, language_code), CallbackAction::Pay(plan))]
        })
        .collect();
    rows.push(vec![button(
        t_lang("btn-back-to-menu", language_code),
        CallbackAction::BackToMenu,
    )]);
    InlineKeyboardMarkup::new(rows)
}

pub fn stats_menu_keyboard(is_vip: bool, language_code: Option<&str>) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = Period::ALL
        .into_iter()
        .map(|period| {
            vec![button(
                t_lang(&format!("btn-stat-{period}"), language_code),
                CallbackAction::Stat(period),
            )]
        })
        .collect();
    rows.push(vec![button(t_lang("btn-poll-results", language_code), CallbackAction::PollResults)]);
    if is_vip {
        rows.push(vec![button(t_lang("btn-view-voters", language_code), CallbackAction::ViewVoters)]);
    }
    rows.push(vec![button(t_lang("btn-back", language_code), CallbackAction::BackToMenu)]);
    InlineKeyboardMarkup::new(rows)
}

pub fn rate_keyboard(token: &str, language_code: Option<&str>) -> InlineKeyboardMarkup {
    let scores: Vec<_> = (1..=5)
        .map(|score| {
            button(
                score.to_string(),
                CallbackAction::Rate {
                    score,
                    token: token.to_string(),
                },
            )
        })
        .collect();
    InlineKeyboardMarkup::new(vec![scores, menu_row(language_code)])
}

/// Pay link plus the check button, whose label doubles as the countdown
pub fn payment_keyboard(url: &str, check_label: String, language_code: Option<&str>) -> InlineKeyboardMarkup {
    let mut rows = Vec::new();
    match Url::parse(url) {
        Ok(url) => rows.push(vec![InlineKeyboardButton::url(t_lang("btn-pay", language_code), url)]),
        Err(e) => warn!(error = %e, "Payment URL is not a valid URL"),
    }
    rows.push(vec![button(check_label, CallbackAction::CheckPayment)]);
    rows.push(menu_row(language_code));
    InlineKeyboardMarkup::new(rows)
}

pub fn confirm_new_payment_keyboard(plan: Plan, language_code: Option<&str>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button(
            t_lang("btn-confirm-new-payment", language_code),
            CallbackAction::ConfirmNewPayment(plan),
        )],
        vec![button(
            t_lang("btn-decline-new-payment", language_code),
            CallbackAction::BackToMenu,
        )],
    ])
}

pub fn manage_prices_keyboard(language_code: Option<&str>) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = Plan::catalog()
        .into_iter()
        .map(|plan| {
            let label = t_args_lang(
                "btn-set-price",
                &[
                    ("period", &period_name(plan.period, language_code)),
                    ("tier", &tier_name(plan, language_code)),
                ],
                language_code,
            );
            vec![button(label, CallbackAction::SetPrice(plan))]
        })
        .collect();
    rows.push(vec![button(
        t_lang("btn-back-to-menu", language_code),
        CallbackAction::BackToMenu,
    )]);
    InlineKeyboardMarkup::new(rows)
}

pub fn back_to_prices_keyboard(language_code: Option<&str>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![button(
        t_lang("btn-back-to-prices", language_code),
        CallbackAction::ManagePrices,
    )]])
}

/// One button per question, ticked ones marked
pub fn question_selection_keyboard(
    questions: &[Question],
    selected: &[i64],
    language_code: Option<&str>,
) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = questions
        .iter()
        .map(|q| {
            let label = if selected.contains(&q.id) {
                format!("✅ {}", q.text)
            } else {
                q.text.clone()
            };
            vec![button(label, CallbackAction::SelectQuestion(q.id))]
        })
        .collect();
    rows.push(vec![button(
        t_lang("btn-done", language_code),
        CallbackAction::FinalizeQuestionLink,
    )]);
    rows.push(vec![button(t_lang("btn-back", language_code), CallbackAction::BackToMenu)]);
    InlineKeyboardMarkup::new(rows)
}

pub fn single_question_keyboard(token: &str, question_id: i64) -> InlineKeyboardMarkup {
    let scores: Vec<_> = (1..=5)
        .map(|score| {
            button(
                score.to_string(),
                CallbackAction::Answer {
                    question_id,
                    score,
                    token: token.to_string(),
                },
            )
        })
        .collect();
    InlineKeyboardMarkup::new(vec![scores])
}

/// Message explaining why a rating link cannot be used
pub fn rating_check_message(check: &RatingCheck, language_code: Option<&str>) -> String {
    let key = match check {
        RatingCheck::Expired => "rate-expired-link",
        RatingCheck::SelfRating => "rate-self",
        RatingCheck::AlreadyRated => "rate-already",
        RatingCheck::InvalidLink | RatingCheck::Ready(_) => "rate-invalid-link",
    };
    t_lang(key, language_code)
}

pub fn poll_check_message(check: &PollCheck, language_code: Option<&str>) -> String {
    let key = match check {
        PollCheck::Expired => "poll-expired",
        PollCheck::OwnPoll => "poll-own",
        PollCheck::AlreadyAnswered => "poll-already-answered",
        PollCheck::InvalidLink | PollCheck::Ready(_) => "poll-invalid-link",
    };
    t_lang(key, language_code)
}

pub fn format_statistics(
    period: Period,
    stats: &Statistics,
    language_code: Option<&str>,
) -> String {
    let period = period_name(period, language_code);
    match stats.average {
        Some(average) if stats.total > 0 => t_args_lang(
            "stats-summary",
            &[
                ("period", &period),
                ("average", &format!("{average:.2}")),
                ("total", &stats.total.to_string()),
            ],
            language_code,
        ),
        _ => t_args_lang("stats-empty", &[("period", &period)], language_code),
    }
}

pub fn format_voters(voters: &[Voter], language_code: Option<&str>) -> String {
    let mut lines = vec![t_lang("voters-title", language_code)];
    lines.extend(voters.iter().map(|voter| {
        t_args_lang(
            "voters-line",
            &[("voter", &voter.label()), ("score", &voter.score.to_string())],
            language_code,
        )
    }));
    lines.join("\n")
}

pub fn format_admin_overview(overview: &AdminOverview, language_code: Option<&str>) -> String {
    t_args_lang(
        "admin-overview",
        &[
            ("users", &overview.total_users.to_string()),
            ("with_links", &overview.users_with_links.to_string()),
            ("normal", &overview.normal_payments.to_string()),
            ("vip", &overview.vip_payments.to_string()),
            ("total_normal", &format_amount(overview.total_normal)),
            ("total_vip", &format_amount(overview.total_vip)),
            ("total", &format_amount(overview.total_spent())),
        ],
        language_code,
    )
}

pub fn format_prices(prices: &[SubscriptionPrice], language_code: Option<&str>) -> String {
    if prices.is_empty() {
        return format!(
            "{}\n{}",
            t_lang("prices-title", language_code),
            t_lang("prices-empty", language_code)
        );
    }
    let mut lines = vec![t_lang("prices-title", language_code)];
    lines.extend(prices.iter().map(|p| {
        t_args_lang(
            "prices-line",
            &[
                ("period", &period_name(p.plan.period, language_code)),
                ("tier", &tier_name(p.plan, language_code)),
                ("price", &format_amount(p.price)),
            ],
            language_code,
        )
    }));
    lines.join("\n")
}

pub fn format_poll_results(results: &PollResults, language_code: Option<&str>) -> String {
    match &results.breakdown {
        Some(breakdown) => {
            let mut text = t_lang("poll-results-vip-title", language_code);
            text.push('\n');
            for rater in breakdown {
                let name = rater
                    .username
                    .as_ref()
                    .map(|u| format!("@{u}"))
                    .unwrap_or_else(|| t_lang("anonymous", language_code));
                text.push('\n');
                text.push_str(&t_args_lang("poll-results-rater", &[("rater", &name)], language_code));
                for answer in &rater.answers {
                    text.push('\n');
                    text.push_str(&t_args_lang(
                        "poll-results-rater-line",
                        &[
                            ("question", &answer.text),
                            ("average", &format!("{:.1}", answer.average)),
                        ],
                        language_code,
                    ));
                }
                text.push('\n');
            }
            text
        }
        None => {
            let mut lines = vec![t_lang("poll-results-title", language_code)];
            lines.extend(results.averages.iter().map(|q| {
                t_args_lang(
                    "poll-results-line",
                    &[("question", &q.text), ("average", &format!("{:.2}", q.average))],
                    language_code,
                )
            }));
            lines.join("\n")
        }
    }
}
