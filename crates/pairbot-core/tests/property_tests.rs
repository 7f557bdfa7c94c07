//! Property-based tests for identity and session-id handling.

use proptest::prelude::*;

use pairbot_core::{normalize_phone, validate_phone, Jid, SessionId};

proptest! {
    /// Normalization keeps exactly the ASCII digits, in order.
    #[test]
    fn normalize_phone_keeps_only_digits(raw in "\\PC{0,40}") {
        let digits = normalize_phone(&raw);
        prop_assert!(digits.chars().all(|c| c.is_ascii_digit()));
        let expected: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        prop_assert_eq!(digits, expected);
    }

    /// Any 8-15 digit number survives validation unchanged, whatever
    /// punctuation surrounds it.
    #[test]
    fn validate_phone_accepts_formatted_numbers(digits in "[0-9]{8,15}", sep in "[ +()-]{0,3}") {
        let formatted = format!("{sep}{digits}{sep}");
        prop_assert_eq!(validate_phone(&formatted).unwrap(), digits);
    }

    /// File stems never contain identity separators.
    #[test]
    fn file_stem_has_no_separators(user in "[0-9]{5,15}", device in proptest::option::of("[0-9]{1,3}")) {
        let raw = match device {
            Some(d) => format!("{user}:{d}@s.whatsapp.net"),
            None => format!("{user}@s.whatsapp.net"),
        };
        let jid = Jid::parse(&raw).unwrap();
        let stem = jid.file_stem();
        prop_assert!(!stem.contains('@'));
        prop_assert!(!stem.contains(':'));
        prop_assert_eq!(jid.to_string(), raw);
    }

    /// Accepted session ids never escape their namespace directory.
    #[test]
    fn session_ids_are_path_safe(raw in "\\PC{0,80}") {
        if let Ok(id) = SessionId::new(raw) {
            let s = id.as_str();
            prop_assert!(!s.contains('/'));
            prop_assert!(!s.contains('\\'));
            prop_assert!(s != "." && s != "..");
            prop_assert!(!s.is_empty());
        }
    }
}
