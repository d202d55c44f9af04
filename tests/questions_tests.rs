use anyhow::Result;
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;

use people_ratings::admin::{AdminOutcome, AdminService, PriceUpdate};
use people_ratings::memory_storage::MemoryStorage;
use people_ratings::models::Question;
use people_ratings::questions::{AddQuestion, AnswerOutcome, PollCheck, QuestionService};
use people_ratings::storage::{PriceStore, QuestionStore, UserStore};
use people_ratings::subscription::{Period, Plan};

const ADMIN: i64 = 1;
const OWNER: i64 = 2;
const RATER: i64 = 3;

async fn setup() -> Result<(MemoryStorage, QuestionService, AdminService)> {
    let storage = MemoryStorage::new();
    storage.grant_admin(ADMIN).await?;
    storage.set_user(OWNER, Some("Anna"), Some("anna")).await?;
    storage.set_user(RATER, Some("Boris"), Some("boris")).await?;
    let shared = Arc::new(storage.clone());
    Ok((
        storage,
        QuestionService::new(shared.clone(), "PeopleRatingsBot"),
        AdminService::new(shared),
    ))
}

async fn add(service: &QuestionService, text: &str) -> Result<Question> {
    match service.add_question(ADMIN, text).await? {
        AdminOutcome::Done(AddQuestion::Added(question)) => Ok(question),
        other => anyhow::bail!("question not added: {other:?}"),
    }
}

fn token_of(link: &str) -> &str {
    link.split("start=poll_").nth(1).unwrap_or_default()
}

#[tokio::test]
async fn test_only_admins_add_questions() -> Result<()> {
    let (storage, service, _) = setup().await?;

    assert_eq!(service.add_question(OWNER, "Is kind?").await?, AdminOutcome::Forbidden);
    assert!(storage.list_questions().await?.is_empty());

    add(&service, "Is kind?").await?;
    assert_eq!(
        service.add_question(ADMIN, "Is kind?").await?,
        AdminOutcome::Done(AddQuestion::Duplicate)
    );
    assert_eq!(
        service.add_question(ADMIN, "   ").await?,
        AdminOutcome::Done(AddQuestion::Empty)
    );
    assert_eq!(
        service.add_question(ADMIN, &"x".repeat(256)).await?,
        AdminOutcome::Done(AddQuestion::TooLong)
    );
    assert_eq!(service.list_questions().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_poll_flow_and_results() -> Result<()> {
    let (_storage, service, _) = setup().await?;
    let kind = add(&service, "Is kind?").await?;
    let punctual = add(&service, "Is punctual?").await?;

    assert_eq!(service.create_link(OWNER, &[]).await?, None);
    let link = service
        .create_link(OWNER, &[kind.id, punctual.id])
        .await?
        .expect("link for selected questions");
    assert!(link.starts_with("https://t.me/PeopleRatingsBot?start=poll_"));
    let token = token_of(&link);

    assert_eq!(service.open_poll(OWNER, token).await?, PollCheck::OwnPoll);
    let PollCheck::Ready(poll) = service.open_poll(RATER, token).await? else {
        panic!("poll should open for a rater");
    };
    assert_eq!(poll.questions, vec![kind.clone(), punctual.clone()]);

    assert_eq!(service.answer(RATER, token, kind.id, 5).await?, AnswerOutcome::Saved);
    assert_eq!(
        service.answer(RATER, token, kind.id, 1).await?,
        AnswerOutcome::AlreadyAnswered
    );
    assert_eq!(service.answer(RATER, token, punctual.id, 3).await?, AnswerOutcome::Saved);
    assert_eq!(service.answer(RATER, token, 999, 3).await?, AnswerOutcome::UnknownQuestion);
    assert_eq!(service.answer(RATER, token, kind.id, 0).await?, AnswerOutcome::InvalidScore);
    assert_eq!(service.open_poll(RATER, token).await?, PollCheck::AlreadyAnswered);

    let results = service.results(OWNER, false).await?;
    assert_eq!(results.averages.len(), 2);
    assert_eq!(results.averages[0].average, 5.0);
    assert!(results.breakdown.is_none());

    let vip = service.results(OWNER, true).await?;
    let breakdown = vip.breakdown.expect("breakdown for VIP owners");
    assert_eq!(breakdown.len(), 1);
    assert_eq!(breakdown[0].username.as_deref(), Some("boris"));
    assert_eq!(breakdown[0].answers.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_expired_and_unknown_poll_links() -> Result<()> {
    let (storage, service, _) = setup().await?;
    let question = add(&service, "Is kind?").await?;

    let old = Utc::now() - Duration::days(8);
    storage
        .create_question_link(OWNER, "OldPollToken0000", &[question.id], old)
        .await?;
    assert_eq!(service.open_poll(RATER, "OldPollToken0000").await?, PollCheck::Expired);
    assert_eq!(
        service.answer(RATER, "OldPollToken0000", question.id, 4).await?,
        AnswerOutcome::Rejected(PollCheck::Expired)
    );
    assert_eq!(service.open_poll(RATER, "missing").await?, PollCheck::InvalidLink);
    Ok(())
}

#[tokio::test]
async fn test_price_changes_are_admin_only() -> Result<()> {
    let (storage, _, admin) = setup().await?;
    let plan = Plan::normal(Period::Week);

    assert_eq!(admin.set_price(OWNER, plan, "150").await?, AdminOutcome::Forbidden);
    assert_eq!(storage.get_subscription_price(plan).await?, None);
    assert_eq!(admin.prices(OWNER).await?, AdminOutcome::Forbidden);
    assert_eq!(admin.overview(OWNER).await?, AdminOutcome::Forbidden);

    assert_eq!(
        admin.set_price(ADMIN, plan, "-3").await?,
        AdminOutcome::Done(PriceUpdate::InvalidInput)
    );
    assert_eq!(
        admin.set_price(ADMIN, plan, "149,50").await?,
        AdminOutcome::Done(PriceUpdate::Updated(dec!(149.50)))
    );
    assert_eq!(storage.get_subscription_price(plan).await?, Some(dec!(149.50)));

    let AdminOutcome::Done(prices) = admin.prices(ADMIN).await? else {
        panic!("admin sees prices");
    };
    assert_eq!(prices.len(), 1);
    assert_eq!(prices[0].plan, plan);
    Ok(())
}

#[tokio::test]
async fn test_admin_overview_counts() -> Result<()> {
    let (storage, _, admin) = setup().await?;
    storage.set_link_token(OWNER, "Token00000000000", Utc::now()).await?;

    let AdminOutcome::Done(overview) = admin.overview(ADMIN).await? else {
        panic!("admin sees the overview");
    };
    assert_eq!(overview.total_users, 3);
    assert_eq!(overview.users_with_links, 1);
    assert_eq!(overview.total_spent(), dec!(0));
    Ok(())
}
