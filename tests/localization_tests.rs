//! # Localization Tests
//!
//! This module contains unit tests for the localization functionality,
//! testing message retrieval and formatting with various edge cases.

use people_ratings::localization::{t_args_lang, t_lang, LocalizationManager};
use std::collections::HashMap;

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_localization() -> LocalizationManager {
        // Create a new localization manager for each test
        LocalizationManager::new().expect("Failed to create localization manager")
    }

    #[test]
    fn test_get_message_existing_key() {
        let manager = setup_localization();

        let message = manager.get_message_in_language("rate-self", "en", None);
        assert_eq!(message, "You cannot rate yourself!");
    }

    #[test]
    fn test_get_message_nonexistent_key() {
        let manager = setup_localization();

        let message = manager.get_message_in_language("nonexistent-key", "en", None);
        assert_eq!(message, "Missing translation: nonexistent-key");
    }

    #[test]
    fn test_get_message_unsupported_language() {
        let manager = setup_localization();

        assert!(!manager.is_language_supported("de"));
        let message = manager.get_message_in_language("rate-self", "de", None);
        // Should fall back to English
        assert_eq!(message, "You cannot rate yourself!");
    }

    #[test]
    fn test_get_message_with_args() {
        let manager = setup_localization();

        let mut args = HashMap::new();
        args.insert("name", "Anna".to_string());
        args.insert("score", "4".to_string());

        let message = manager.get_message_in_language("rate-thanks", "en", Some(&args));
        assert!(message.contains("Anna"));
        assert!(message.contains("4 points"));
        // Isolation marks would show up as garbage in Telegram
        assert!(!message.contains('\u{2068}'));
    }

    #[test]
    fn test_russian_messages() {
        let manager = setup_localization();

        assert!(manager.is_language_supported("ru"));
        let english = manager.get_message_in_language("menu-choose", "en", None);
        let russian = manager.get_message_in_language("menu-choose", "ru", None);
        assert_ne!(english, russian);
    }

    #[test]
    fn test_global_helpers_detect_language() {
        assert_eq!(t_lang("btn-back", Some("en-GB")), "Back");
        assert_eq!(t_lang("btn-back", None), "Back");
        assert_ne!(t_lang("btn-back", Some("ru-RU")), "Back");

        let label = t_args_lang("btn-retry-in", &[("seconds", "7")], Some("en"));
        assert_eq!(label, "Check again in 7...");
    }
}
