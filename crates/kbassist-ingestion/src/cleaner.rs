//! Text Cleaning
//!
//! Normalizes raw extracted text before metadata extraction and chunking.
//! The steps always run in the same order: encoding repair, URL removal,
//! email removal, whitespace normalization.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://(?:[a-zA-Z0-9]|[$-_@.&+]|[!*(),]|%[0-9a-fA-F]{2})+")
        .expect("URL pattern is valid")
});

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
        .expect("email pattern is valid")
});

static HORIZONTAL_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t\x0B\x0C]+").expect("space pattern is valid"));

static BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{2,}").expect("newline pattern is valid"));

static SPECIAL_WITH_PUNCTUATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[^\w\s.,!?;:\-'"()]"#).expect("special-character pattern is valid")
});

static SPECIAL_WITHOUT_PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s]").expect("special-character pattern is valid"));

/// UTF-8 text that was decoded as Windows-1252 somewhere upstream.
/// Longer sequences come first so their prefixes do not match early.
const MOJIBAKE: &[(&str, &str)] = &[
    ("\u{e2}\u{20ac}\u{2122}", "'"),
    ("\u{e2}\u{20ac}\u{2dc}", "'"),
    ("\u{e2}\u{20ac}\u{153}", "\""),
    ("\u{e2}\u{20ac}\u{9d}", "\""),
    ("\u{e2}\u{20ac}\u{201d}", "\u{2014}"),
    ("\u{e2}\u{20ac}\u{201c}", "\u{2013}"),
    ("\u{e2}\u{20ac}\u{a6}", "..."),
    ("\u{e2}\u{20ac}", "\""),
    ("\u{c3}\u{a9}", "\u{e9}"),
    ("\u{c3}\u{a8}", "\u{e8}"),
    ("\u{c3}\u{a0}", "\u{e0}"),
    ("\u{c3}\u{a2}", "\u{e2}"),
    ("\u{c3}\u{b4}", "\u{f4}"),
    ("\u{c3}\u{bc}", "\u{fc}"),
    ("\u{c3}\u{b6}", "\u{f6}"),
    ("\u{c3}\u{a4}", "\u{e4}"),
    ("\u{c3}\u{a7}", "\u{e7}"),
    ("\u{c2}\u{a0}", " "),
];

/// Options for a cleaning pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanOptions {
    pub remove_urls: bool,
    pub remove_emails: bool,
    pub fix_encoding: bool,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            remove_urls: true,
            remove_emails: false,
            fix_encoding: true,
        }
    }
}

/// Deterministic text normalizer
#[derive(Debug, Clone, Default)]
pub struct TextCleaner {
    options: CleanOptions,
}

impl TextCleaner {
    pub fn new(options: CleanOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> CleanOptions {
        self.options
    }

    /// Clean with this cleaner's options
    pub fn clean(&self, text: &str) -> String {
        Self::clean_with(
            text,
            self.options.remove_urls,
            self.options.remove_emails,
            self.options.fix_encoding,
        )
    }

    pub fn clean_with(text: &str, remove_urls: bool, remove_emails: bool, fix_encoding: bool) -> String {
        let mut text = if fix_encoding {
            Self::fix_encoding(text)
        } else {
            text.to_string()
        };

        if remove_urls {
            text = URL_PATTERN.replace_all(&text, "").into_owned();
        }
        if remove_emails {
            text = EMAIL_PATTERN.replace_all(&text, "").into_owned();
        }

        Self::normalize_whitespace(&text)
    }

    /// Replace common mojibake sequences with the characters they encode
    pub fn fix_encoding(text: &str) -> String {
        MOJIBAKE
            .iter()
            .fold(text.to_string(), |acc, (broken, fixed)| {
                if acc.contains(broken) {
                    acc.replace(broken, fixed)
                } else {
                    acc
                }
            })
    }

    /// Collapse spaces, strip every line, and cap blank-line runs at one
    pub fn normalize_whitespace(text: &str) -> String {
        let text = text.replace("\r\n", "\n").replace('\r', "\n");
        let text = HORIZONTAL_SPACE.replace_all(&text, " ");
        let text = text.lines().map(str::trim).collect::<Vec<_>>().join("\n");
        BLANK_LINES.replace_all(&text, "\n\n").trim().to_string()
    }

    /// Remove everything but word characters and whitespace, optionally keeping punctuation
    pub fn remove_special_characters(text: &str, keep_punctuation: bool) -> String {
        let pattern = if keep_punctuation {
            &*SPECIAL_WITH_PUNCTUATION
        } else {
            &*SPECIAL_WITHOUT_PUNCTUATION
        };
        pattern.replace_all(text, "").into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_whitespace_normalization() {
        let text = "  Leave   Policy  \n\n\n\n  Employees\t\tmay take leave.   \n";
        assert_eq!(
            TextCleaner::normalize_whitespace(text),
            "Leave Policy\n\nEmployees may take leave."
        );
    }

    #[test]
    fn test_blank_lines_with_spaces_collapse() {
        let text = "First\n   \n \n\nSecond";
        assert_eq!(TextCleaner::normalize_whitespace(text), "First\n\nSecond");
    }

    #[test]
    fn test_urls_removed_by_default() {
        let cleaner = TextCleaner::default();
        let cleaned = cleaner.clean("See https://intranet.example.com/hr?id=4 for details.");
        assert_eq!(cleaned, "See for details.");
    }

    #[test]
    fn test_emails_kept_by_default() {
        let cleaner = TextCleaner::default();
        assert_eq!(cleaner.clean("Contact hr@example.com today"), "Contact hr@example.com today");

        let cleaned = TextCleaner::clean_with("Contact hr@example.com today", false, true, false);
        assert_eq!(cleaned, "Contact today");
    }

    #[test]
    fn test_fix_encoding() {
        let broken = "Employee\u{e2}\u{20ac}\u{2122}s caf\u{c3}\u{a9} \u{e2}\u{20ac}\u{153}break\u{e2}\u{20ac}\u{9d}";
        assert_eq!(TextCleaner::fix_encoding(broken), "Employee's café \"break\"");
    }

    #[test]
    fn test_encoding_fix_can_be_disabled() {
        let broken = "caf\u{c3}\u{a9}";
        assert_eq!(TextCleaner::clean_with(broken, false, false, false), broken);
    }

    #[test]
    fn test_clean_is_deterministic() {
        let cleaner = TextCleaner::default();
        let text = "A  b\n\n\n\nc https://x.io d";
        assert_eq!(cleaner.clean(text), cleaner.clean(text));
    }

    #[test]
    fn test_remove_special_characters() {
        assert_eq!(
            TextCleaner::remove_special_characters("Pay: $100 (net)!", true),
            "Pay: 100 (net)!"
        );
        assert_eq!(
            TextCleaner::remove_special_characters("Pay: $100 (net)!", false),
            "Pay 100 net"
        );
    }
}
