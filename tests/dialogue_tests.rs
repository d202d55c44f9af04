use anyhow::Result;

use people_ratings::dialogue::{validate_question, BotDialogueState, QuestionInputError};
use people_ratings::models::Question;
use people_ratings::subscription::{Period, Plan};

fn questions() -> Vec<Question> {
    vec![
        Question {
            id: 1,
            text: "Is punctual?".to_string(),
        },
        Question {
            id: 2,
            text: "Keeps promises?".to_string(),
        },
    ]
}

/// Integration test for question validation
#[tokio::test]
async fn test_question_dialogue_validation() -> Result<()> {
    assert_eq!(validate_question("  Helpful?  "), Ok("Helpful?".to_string()));
    assert_eq!(validate_question("\n\t"), Err(QuestionInputError::Empty));
    assert_eq!(validate_question(&"q".repeat(300)), Err(QuestionInputError::TooLong));

    Ok(())
}

/// Test dialogue state serialization
#[tokio::test]
async fn test_dialogue_state_serialization() -> Result<()> {
    let state = BotDialogueState::WaitingForPrice {
        plan: Plan::vip(Period::Month),
    };
    let json = serde_json::to_string(&state)?;
    let restored: BotDialogueState = serde_json::from_str(&json)?;
    assert_eq!(restored, state);

    let state = BotDialogueState::AnsweringQuestions {
        token: "AbCdEf0123456789".to_string(),
        questions: questions(),
        index: 1,
    };
    let restored: BotDialogueState = serde_json::from_str(&serde_json::to_string(&state)?)?;
    assert_eq!(restored, state);

    Ok(())
}

/// Walk a poll from its first question to the end
#[tokio::test]
async fn test_poll_progression() -> Result<()> {
    let state = BotDialogueState::AnsweringQuestions {
        token: "tok".to_string(),
        questions: questions(),
        index: 0,
    };

    let (next, question) = state.next_question().expect("second question");
    assert_eq!(question.id, 2);
    assert!(matches!(next, BotDialogueState::AnsweringQuestions { index: 1, .. }));

    assert!(next.next_question().is_none());
    assert!(BotDialogueState::Start.next_question().is_none());

    Ok(())
}

/// Test basic dialogue functionality
#[tokio::test]
async fn test_dialogue_functionality() -> Result<()> {
    let start_state = BotDialogueState::default();
    assert_eq!(start_state, BotDialogueState::Start);

    let selecting = BotDialogueState::with_selected(&[], 4);
    assert_eq!(selecting, BotDialogueState::SelectingQuestions { selected: vec![4] });

    Ok(())
}
