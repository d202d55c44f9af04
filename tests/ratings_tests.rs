use anyhow::Result;
use chrono::{Duration, Utc};
use std::sync::Arc;

use people_ratings::memory_storage::MemoryStorage;
use people_ratings::ratings::{RatingCheck, RatingOutcome, RatingService};
use people_ratings::storage::{RatingStore, UserStore};
use people_ratings::subscription::Period;

const OWNER: i64 = 10;
const RATER: i64 = 20;

async fn setup() -> Result<(MemoryStorage, RatingService)> {
    let storage = MemoryStorage::new();
    storage.set_user(OWNER, Some("Anna"), Some("anna")).await?;
    storage.set_user(RATER, Some("Boris"), None).await?;
    let service = RatingService::new(Arc::new(storage.clone()), "PeopleRatingsBot");
    Ok((storage, service))
}

fn token_of(link: &str) -> &str {
    link.split("start=rate_").nth(1).unwrap_or_default()
}

#[tokio::test]
async fn test_issue_link_and_rate() -> Result<()> {
    let (storage, service) = setup().await?;

    let link = service.issue_link(OWNER).await?;
    assert!(link.starts_with("https://t.me/PeopleRatingsBot?start=rate_"));
    let token = token_of(&link);
    assert_eq!(token.len(), 16);

    match service.open_rating(RATER, token).await? {
        RatingCheck::Ready(user) => assert_eq!(user.telegram_id, OWNER),
        other => panic!("unexpected {other:?}"),
    }

    let outcome = service.submit_rating(RATER, token, 4).await?;
    assert_eq!(outcome, RatingOutcome::Saved("Anna".to_string()));

    let stats = service.statistics(OWNER, Period::Day).await?;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.average, Some(4.0));

    let voters = service.voters(OWNER).await?;
    assert_eq!(voters.len(), 1);
    assert_eq!(voters[0].label(), "Boris");
    assert_eq!(storage.ratings().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_second_rating_is_rejected() -> Result<()> {
    let (storage, service) = setup().await?;
    let link = service.issue_link(OWNER).await?;
    let token = token_of(&link);

    service.submit_rating(RATER, token, 5).await?;
    assert_eq!(service.open_rating(RATER, token).await?, RatingCheck::AlreadyRated);
    assert_eq!(
        service.submit_rating(RATER, token, 1).await?,
        RatingOutcome::Rejected(RatingCheck::AlreadyRated)
    );

    let ratings = storage.ratings().await;
    assert_eq!(ratings.len(), 1);
    assert_eq!(ratings[0].score, 5);
    Ok(())
}

#[tokio::test]
async fn test_self_rating_writes_nothing() -> Result<()> {
    let (storage, service) = setup().await?;
    let link = service.issue_link(OWNER).await?;
    let token = token_of(&link);

    assert_eq!(service.open_rating(OWNER, token).await?, RatingCheck::SelfRating);
    assert_eq!(
        service.submit_rating(OWNER, token, 5).await?,
        RatingOutcome::Rejected(RatingCheck::SelfRating)
    );
    assert!(storage.ratings().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_week_old_token_is_rejected_and_cleared() -> Result<()> {
    let (storage, service) = setup().await?;
    let issued = Utc::now() - Duration::days(7) - Duration::minutes(1);
    storage.set_link_token(OWNER, "OldToken12345678", issued).await?;

    assert_eq!(
        service.open_rating(RATER, "OldToken12345678").await?,
        RatingCheck::Expired
    );
    let owner = storage.get_user(OWNER).await?.expect("owner exists");
    assert_eq!(owner.link_token, None);
    // Once cleared the token no longer resolves at all
    assert_eq!(
        service.open_rating(RATER, "OldToken12345678").await?,
        RatingCheck::InvalidLink
    );
    Ok(())
}

#[tokio::test]
async fn test_unknown_token_and_bad_score() -> Result<()> {
    let (storage, service) = setup().await?;
    assert_eq!(service.open_rating(RATER, "nope").await?, RatingCheck::InvalidLink);

    let link = service.issue_link(OWNER).await?;
    assert_eq!(
        service.submit_rating(RATER, token_of(&link), 6).await?,
        RatingOutcome::InvalidScore
    );
    assert!(storage.get_ratings_for_user(OWNER).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_new_link_replaces_old_token() -> Result<()> {
    let (_storage, service) = setup().await?;
    let first = service.issue_link(OWNER).await?;
    let second = service.issue_link(OWNER).await?;
    assert_ne!(first, second);
    assert_eq!(
        service.open_rating(RATER, token_of(&first)).await?,
        RatingCheck::InvalidLink
    );
    assert!(matches!(
        service.open_rating(RATER, token_of(&second)).await?,
        RatingCheck::Ready(_)
    ));
    Ok(())
}
