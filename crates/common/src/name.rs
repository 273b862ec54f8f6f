use std::sync::OnceLock;

use regex::Regex;

/// Longest display name an account may claim.
pub const MAX_NAME_LENGTH: usize = 50;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9]{1,50}$").expect("static regex"))
}

/// Whether `name` is acceptable as a display name: 1 to 50 ASCII letters or digits.
pub fn validate_name(name: &str) -> bool {
    name_pattern().is_match(name)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_validate_name() {
        let cases = [
            ("", false),
            ("a", true),
            ("A", true),
            ("mister green", false),
            ("mr.green", false),
            ("épicerie", false),
            ("😀", false),
            ("Charm2024", true),
        ];
        for (name, expected) in cases {
            assert_eq!(validate_name(name), expected, "{:?}", name);
        }
    }

    #[test]
    fn test_validate_name_length_bound() {
        assert!(validate_name(&"x".repeat(MAX_NAME_LENGTH)));
        assert!(!validate_name(&"x".repeat(MAX_NAME_LENGTH + 1)));
    }
}
