//! Normalization of converter output.
//!
//! pandoc's commonmark writer escapes or re-quotes a handful of constructs that
//! the site renderer handles natively. The rules below undo those artifacts.
//! They run in order because later rules match text that earlier rules decode
//! (e.g. a `&gt;` quote marker only becomes `>` after rule one).

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::bytes::{NoExpand, Regex};

/// A single named substitution.
#[derive(Debug)]
pub struct Rule {
    name: &'static str,
    pattern: Regex,
    replacement: &'static [u8],
}

impl Rule {
    /// A rule replacing every occurrence of `from` verbatim.
    fn literal(name: &'static str, from: &str, replacement: &'static [u8]) -> Self {
        Self::pattern(name, &regex::escape(from), replacement)
    }

    fn pattern(name: &'static str, pattern: &str, replacement: &'static [u8]) -> Self {
        Self {
            name,
            // Patterns are compile-time constants, covered by the tests below.
            pattern: Regex::new(pattern).expect("normalization pattern must compile"),
            replacement,
        }
    }

    fn apply<'a>(&self, input: &'a [u8]) -> Cow<'a, [u8]> {
        self.pattern.replace_all(input, NoExpand(self.replacement))
    }
}

/// An ordered list of rules applied once each.
#[derive(Debug)]
pub struct Normalizer {
    rules: Vec<Rule>,
}

impl Normalizer {
    /// The rule set for pandoc's docx → commonmark output.
    pub fn standard() -> Self {
        Self {
            rules: vec![
                Rule::literal("decode-gt", "&gt;", b">"),
                Rule::literal("decode-lt", "&lt;", b"<"),
                Rule::literal("unescape-rule", "\\---", b"---"),
                Rule::literal("join-hard-breaks", "\\\n", b""),
                Rule::literal("unquote-bullet", "  - >", b"  -"),
                // Ordered lists are renumbered by the site renderer.
                Rule::pattern("unquote-ordered", r"[0-9]{1,3}\. {1,2}>", b"1."),
                Rule::literal("drop-quote-continuation", "    > ", b""),
                Rule::literal("unescape-backtick", "\\`", b"`"),
            ],
        }
    }

    /// Run every rule over `raw`, in order.
    pub fn normalize(&self, raw: &[u8]) -> Vec<u8> {
        let mut buf = raw.to_vec();
        for rule in &self.rules {
            if let Cow::Owned(replaced) = rule.apply(&buf) {
                tracing::trace!(rule = rule.name, "normalization rule matched");
                buf = replaced;
            }
        }
        buf
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::standard()
    }
}

static STANDARD: LazyLock<Normalizer> = LazyLock::new(Normalizer::standard);

/// Normalize converter output with the standard rule set.
pub fn normalize(raw: &[u8]) -> Vec<u8> {
    STANDARD.normalize(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(s: &str) -> String {
        String::from_utf8(normalize(s.as_bytes())).unwrap()
    }

    #[test]
    fn test_rule_order() {
        assert_eq!(
            Normalizer::standard()
                .rules
                .iter()
                .map(|rule| rule.name)
                .collect::<Vec<_>>(),
            vec![
                "decode-gt",
                "decode-lt",
                "unescape-rule",
                "join-hard-breaks",
                "unquote-bullet",
                "unquote-ordered",
                "drop-quote-continuation",
                "unescape-backtick",
            ]
        );
    }

    #[test]
    fn test_decodes_angle_brackets() {
        assert_eq!(norm("a &lt;b&gt; c"), "a <b> c");
    }

    #[test]
    fn test_unescapes_horizontal_rule() {
        assert_eq!(norm("some text\\---\nmore"), "some text---\nmore");
    }

    #[test]
    fn test_joins_hard_breaks() {
        assert_eq!(norm("first line\\\nsecond line\n"), "first linesecond line\n");
    }

    #[test]
    fn test_unquotes_bullets() {
        assert_eq!(norm("list:\n  - > item\n"), "list:\n  - item\n");
    }

    #[test]
    fn test_bullet_quote_encoded_as_entity() {
        // The quote marker arrives escaped and is decoded first.
        assert_eq!(norm("  - &gt; item"), "  - item");
    }

    #[test]
    fn test_unquotes_ordered_items() {
        assert_eq!(norm("1. > first\n12.  > twelfth\n"), "1. first\n1. twelfth\n");
        assert_eq!(norm("123. > x"), "1. x");
    }

    #[test]
    fn test_drops_quote_continuation() {
        assert_eq!(norm("1. > item\n    > continued\n"), "1. item\ncontinued\n");
    }

    #[test]
    fn test_unescapes_backticks() {
        assert_eq!(norm("use \\`cargo\\` here"), "use `cargo` here");
    }

    #[test]
    fn test_clean_input_is_untouched() {
        let clean = "# Title\n\nSome *text* with `code`.\n\n  - item\n1. first\n\n---\n";
        assert_eq!(norm(clean), clean);
        assert_eq!(norm(&norm(clean)), norm(clean));
    }

    #[test]
    fn test_empty_input() {
        assert!(normalize(b"").is_empty());
    }

    #[test]
    fn test_non_utf8_bytes_pass_through() {
        let raw = [0xff, b'&', b'g', b't', b';', 0xfe];
        assert_eq!(normalize(&raw), vec![0xff, b'>', 0xfe]);
    }
}
