//! Text helpers shared by the ingest and search paths

use std::collections::BTreeSet;

use regex::Regex;
use std::sync::OnceLock;

/// Handle mentions embedded in post text: `@name.example.com`.
///
/// Handles are DNS-name shaped; the trailing segment must contain a dot so
/// bare `@word` tokens are not treated as mentions.
fn mention_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|\s|\()@([a-zA-Z0-9][a-zA-Z0-9.-]*\.[a-zA-Z]{2,})")
            .expect("mention regex is valid")
    })
}

/// Extract the distinct handles mentioned in `text`, lowercased,
/// in first-occurrence order.
pub fn extract_mention_handles(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut handles = Vec::new();
    for cap in mention_regex().captures_iter(text) {
        let handle = cap[1].trim_end_matches('.').to_ascii_lowercase();
        if seen.insert(handle.clone()) {
            handles.push(handle);
        }
    }
    handles
}

/// Escape LIKE metacharacters so user input can be embedded in a
/// `LIKE 'prefix%'` pattern without acting as wildcards.
pub fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_single_mention() {
        let handles = extract_mention_handles("hello @bob.bsky.social nice post");
        assert_eq!(handles, vec!["bob.bsky.social"]);
    }

    #[test]
    fn test_dedupes_repeated_mentions() {
        let handles =
            extract_mention_handles("@alice.example hi @alice.example again @ALICE.example");
        assert_eq!(handles, vec!["alice.example"]);
    }

    #[test]
    fn test_ignores_bare_at_words() {
        assert!(extract_mention_handles("email me @ home, or @soon").is_empty());
    }

    #[test]
    fn test_mention_at_start_and_after_paren() {
        let handles = extract_mention_handles("(@carol.test.coop) @dan.example.org");
        assert_eq!(handles, vec!["carol.test.coop", "dan.example.org"]);
    }

    #[test]
    fn test_trailing_punctuation_stripped() {
        let handles = extract_mention_handles("cc @eve.example.");
        assert_eq!(handles, vec!["eve.example"]);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("a%b_c"), "a\\%b\\_c");
        assert_eq!(escape_like("back\\slash"), "back\\\\slash");
        assert_eq!(escape_like("plain"), "plain");
    }
}
