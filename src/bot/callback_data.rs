//! Callback data carried by inline keyboard buttons

use crate::subscription::{Period, Plan};

/// Every button press the bot understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    BackToMenu,
    GenerateLink,
    ShowResults,
    CheckSubscription,
    BackToStatChoice,
    ViewVoters,
    PollResults,
    Stat(Period),
    /// A `stat_` button with a period tag we do not know
    InvalidPeriod(String),
    /// Malformed periods fall back to a day
    Pay(Plan),
    ConfirmNewPayment(Plan),
    BuyVip,
    CheckPayment,
    Rate { score: i16, token: String },
    AdminStats,
    ManagePrices,
    SetPrice(Plan),
    AddQuestions,
    GenerateCustomLink,
    SelectQuestion(i64),
    FinalizeQuestionLink,
    Answer {
        question_id: i64,
        score: i16,
        token: String,
    },
    Unknown(String),
}

fn parse_plan(rest: &str) -> Option<(Period, bool)> {
    let (period, tier) = rest.split_once('_')?;
    let is_vip = match tier {
        "vip" => true,
        "normal" => false,
        _ => return None,
    };
    Some((Period::parse_or_day(period), is_vip))
}

impl CallbackAction {
    pub fn parse(data: &str) -> Self {
        let unknown = || CallbackAction::Unknown(data.to_string());

        match data {
            "back_to_menu" => return CallbackAction::BackToMenu,
            "generate_link" => return CallbackAction::GenerateLink,
            "show_results" => return CallbackAction::ShowResults,
            "check_subscription" => return CallbackAction::CheckSubscription,
            "back_to_stat_choice" => return CallbackAction::BackToStatChoice,
            "view_voters" => return CallbackAction::ViewVoters,
            "poll_results" => return CallbackAction::PollResults,
            "buy_vip" => return CallbackAction::BuyVip,
            "check_payment" => return CallbackAction::CheckPayment,
            "admin_stats" => return CallbackAction::AdminStats,
            "manage_prices" => return CallbackAction::ManagePrices,
            "add_questions" => return CallbackAction::AddQuestions,
            "generate_custom_link" => return CallbackAction::GenerateCustomLink,
            "finalize_question_link" => return CallbackAction::FinalizeQuestionLink,
            "pay_vip_month" => return CallbackAction::Pay(Plan::vip(Period::Month)),
            _ => {}
        }

        if let Some(tag) = data.strip_prefix("stat_") {
            return match tag.parse() {
                Ok(period) => CallbackAction::Stat(period),
                Err(_) => CallbackAction::InvalidPeriod(tag.to_string()),
            };
        }
        if let Some(rest) = data.strip_prefix("confirm_new_payment_") {
            return match parse_plan(rest) {
                Some((period, is_vip)) => CallbackAction::ConfirmNewPayment(Plan { period, is_vip }),
                None => unknown(),
            };
        }
        if let Some(tag) = data.strip_prefix("pay_") {
            return CallbackAction::Pay(Plan::normal(Period::parse_or_day(tag)));
        }
        if let Some(rest) = data.strip_prefix("set_price_") {
            let Some((tag, tier)) = rest.split_once('_') else {
                return unknown();
            };
            return match (tag.parse::<Period>(), tier) {
                (Ok(period), "normal") => CallbackAction::SetPrice(Plan::normal(period)),
                (Ok(period), "vip") => CallbackAction::SetPrice(Plan::vip(period)),
                (Err(_), _) => CallbackAction::InvalidPeriod(tag.to_string()),
                _ => unknown(),
            };
        }
        if let Some(id) = data.strip_prefix("select_q_") {
            return id
                .parse()
                .map(CallbackAction::SelectQuestion)
                .unwrap_or_else(|_| unknown());
        }
        if let Some(rest) = data.strip_prefix("rate_") {
            let Some((score, token)) = rest.split_once('_') else {
                return unknown();
            };
            return match score.parse() {
                Ok(score) if !token.is_empty() => CallbackAction::Rate {
                    score,
                    token: token.to_string(),
                },
                _ => unknown(),
            };
        }
        if let Some(rest) = data.strip_prefix("ans_") {
            let mut parts = rest.splitn(3, '_');
            let (Some(question_id), Some(score), Some(token)) =
                (parts.next(), parts.next(), parts.next())
            else {
                return unknown();
            };
            return match (question_id.parse(), score.parse()) {
                (Ok(question_id), Ok(score)) if !token.is_empty() => CallbackAction::Answer {
                    question_id,
                    score,
                    token: token.to_string(),
                },
                _ => unknown(),
            };
        }

        unknown()
    }

    pub fn to_data(&self) -> String {
        match self {
            CallbackAction::BackToMenu => "back_to_menu".to_string(),
            CallbackAction::GenerateLink => "generate_link".to_string(),
            CallbackAction::ShowResults => "show_results".to_string(),
            CallbackAction::CheckSubscription => "check_subscription".to_string(),
            CallbackAction::BackToStatChoice => "back_to_stat_choice".to_string(),
            CallbackAction::ViewVoters => "view_voters".to_string(),
            CallbackAction::PollResults => "poll_results".to_string(),
            CallbackAction::Stat(period) => format!("stat_{period}"),
            CallbackAction::InvalidPeriod(tag) => format!("stat_{tag}"),
            CallbackAction::Pay(plan) if plan.is_vip => format!("pay_vip_{}", plan.period),
            CallbackAction::Pay(plan) => format!("pay_{}", plan.period),
            CallbackAction::ConfirmNewPayment(plan) => {
                format!("confirm_new_payment_{}_{}", plan.period, plan.tier_tag())
            }
            CallbackAction::BuyVip => "buy_vip".to_string(),
            CallbackAction::CheckPayment => "check_payment".to_string(),
            CallbackAction::Rate { score, token } => format!("rate_{score}_{token}"),
            CallbackAction::AdminStats => "admin_stats".to_string(),
            CallbackAction::ManagePrices => "manage_prices".to_string(),
            CallbackAction::SetPrice(plan) => {
                format!("set_price_{}_{}", plan.period, plan.tier_tag())
            }
            CallbackAction::AddQuestions => "add_questions".to_string(),
            CallbackAction::GenerateCustomLink => "generate_custom_link".to_string(),
            CallbackAction::SelectQuestion(id) => format!("select_q_{id}"),
            CallbackAction::FinalizeQuestionLink => "finalize_question_link".to_string(),
            CallbackAction::Answer {
                question_id,
                score,
                token,
            } => format!("ans_{question_id}_{score}_{token}"),
            CallbackAction::Unknown(data) => data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_buttons() {
        assert_eq!(
            CallbackAction::parse("pay_week"),
            CallbackAction::Pay(Plan::normal(Period::Week))
        );
        assert_eq!(
            CallbackAction::parse("pay_vip_month"),
            CallbackAction::Pay(Plan::vip(Period::Month))
        );
        // Payment creation never rejects a period
        assert_eq!(
            CallbackAction::parse("pay_fortnight"),
            CallbackAction::Pay(Plan::normal(Period::Day))
        );
        assert_eq!(
            CallbackAction::parse("confirm_new_payment_month_vip"),
            CallbackAction::ConfirmNewPayment(Plan::vip(Period::Month))
        );
    }

    #[test]
    fn test_statistics_buttons() {
        assert_eq!(CallbackAction::parse("stat_month"), CallbackAction::Stat(Period::Month));
        assert_eq!(
            CallbackAction::parse("stat_year"),
            CallbackAction::InvalidPeriod("year".into())
        );
        assert_eq!(
            CallbackAction::parse("set_price_year_vip"),
            CallbackAction::InvalidPeriod("year".into())
        );
    }

    #[test]
    fn test_rating_and_answer_buttons() {
        assert_eq!(
            CallbackAction::parse("rate_4_AbC123"),
            CallbackAction::Rate {
                score: 4,
                token: "AbC123".into()
            }
        );
        assert_eq!(
            CallbackAction::parse("ans_12_5_tok"),
            CallbackAction::Answer {
                question_id: 12,
                score: 5,
                token: "tok".into()
            }
        );
        assert!(matches!(CallbackAction::parse("rate_x_tok"), CallbackAction::Unknown(_)));
        assert!(matches!(CallbackAction::parse("ans_1_2"), CallbackAction::Unknown(_)));
        assert!(matches!(CallbackAction::parse("edit_3"), CallbackAction::Unknown(_)));
    }

    #[test]
    fn test_data_is_stable() {
        let actions = [
            CallbackAction::BackToMenu,
            CallbackAction::Stat(Period::Week),
            CallbackAction::Pay(Plan::normal(Period::Month)),
            CallbackAction::Pay(Plan::vip(Period::Month)),
            CallbackAction::ConfirmNewPayment(Plan::normal(Period::Day)),
            CallbackAction::SetPrice(Plan::vip(Period::Month)),
            CallbackAction::SelectQuestion(7),
            CallbackAction::Rate {
                score: 1,
                token: "t0k".into(),
            },
        ];
        for action in actions {
            assert_eq!(CallbackAction::parse(&action.to_data()), action);
            assert!(action.to_data().len() <= 64);
        }
    }
}
