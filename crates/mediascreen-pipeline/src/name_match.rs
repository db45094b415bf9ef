//! Name-match optimizer: decides whether the name-presence stage needs the oracle.
//!
//! Three ordered tiers, first match wins:
//! 1. exact: the normalized full name is a substring of the normalized article;
//! 2. absence: no name token of at least `min_token_len` characters occurs anywhere;
//! 3. ambiguous: everything else, which is escalated to the oracle.

use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Outcome of the cheap, deterministic part of the name check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameMatchTier {
    Exact,
    Absent,
    Ambiguous,
}

impl NameMatchTier {
    /// Whether this tier settles the question without the oracle.
    pub fn is_conclusive(&self) -> bool {
        !matches!(self, NameMatchTier::Ambiguous)
    }
}

/// Accent- and case-insensitive form used for matching.
///
/// Canonical decomposition, combining marks dropped, lowercased, and runs
/// of whitespace collapsed to one space.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits a name on whitespace, hyphens, commas and periods.
fn name_tokens(name: &str) -> impl Iterator<Item = String> + '_ {
    name.split(|c: char| c.is_whitespace() || matches!(c, '-' | ',' | '.'))
        .filter(|part| !part.is_empty())
        .map(normalize)
}

#[derive(Debug, Clone)]
pub struct NameMatcher {
    min_token_len: usize,
}

impl NameMatcher {
    pub fn new(min_token_len: usize) -> Self {
        Self {
            min_token_len: min_token_len.max(1),
        }
    }

    /// Tokens long enough to take part in the absence tier.
    pub fn significant_tokens(&self, name: &str) -> Vec<String> {
        name_tokens(name)
            .filter(|t| t.chars().count() >= self.min_token_len)
            .collect()
    }

    pub fn assess(&self, full_name: &str, article_text: &str) -> NameMatchTier {
        let article = normalize(article_text);
        let name = normalize(full_name);

        if !name.is_empty() && article.contains(&name) {
            return NameMatchTier::Exact;
        }

        let tokens = self.significant_tokens(full_name);
        // A name made only of initials cannot prove absence.
        if tokens.is_empty() {
            return NameMatchTier::Ambiguous;
        }

        if tokens.iter().any(|t| article.contains(t.as_str())) {
            NameMatchTier::Ambiguous
        } else {
            NameMatchTier::Absent
        }
    }
}

impl Default for NameMatcher {
    fn default() -> Self {
        Self::new(2)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_accents_and_case() {
        assert_eq!(normalize("José"), "jose");
        assert_eq!(normalize("MARÍA Pérez"), "maria perez");
        assert_eq!(normalize("Zoë  Ñúñez\n"), "zoe nunez");
    }

    #[test]
    fn normalize_is_accent_invariant() {
        assert_eq!(normalize("José García"), normalize("Jose Garcia"));
        // precomposed vs. decomposed input
        assert_eq!(normalize("Jos\u{00e9}"), normalize("Jose\u{0301}"));
    }

    #[test]
    fn exact_tier_on_full_name() {
        let m = NameMatcher::default();
        assert_eq!(
            m.assess("Jane Smith", "Jane Smith, 33, opened a bakery."),
            NameMatchTier::Exact
        );
    }

    #[test]
    fn exact_tier_ignores_accents_case_and_line_breaks() {
        let m = NameMatcher::default();
        assert_eq!(
            m.assess("José García", "Reporters spoke to JOSE\nGARCIA yesterday."),
            NameMatchTier::Exact
        );
        assert_eq!(
            m.assess("Jose Garcia", "Según José García, el mercado..."),
            NameMatchTier::Exact
        );
    }

    #[test]
    fn absence_tier_when_no_token_present() {
        let m = NameMatcher::default();
        assert_eq!(
            m.assess(
                "Bernie Madoff",
                "A local charity raised funds for the new library."
            ),
            NameMatchTier::Absent
        );
    }

    #[test]
    fn partial_tokens_are_ambiguous() {
        let m = NameMatcher::default();
        assert_eq!(
            m.assess("Bernard Madoff", "Bernie Madoff was sentenced in 2009."),
            NameMatchTier::Ambiguous
        );
        assert_eq!(
            m.assess("Wei Zhang", "Zhang Wei, the chief executive, resigned."),
            NameMatchTier::Ambiguous
        );
    }

    #[test]
    fn initials_do_not_cause_false_absence() {
        let m = NameMatcher::default();
        // "J" would match almost anything; it is excluded, and "Smith" is absent.
        assert_eq!(
            m.assess("J. Smith", "Jobs report shows steady growth."),
            NameMatchTier::Absent
        );
        // Initials only: no eligible token, so escalate.
        assert_eq!(
            m.assess("J. K.", "An article about publishing."),
            NameMatchTier::Ambiguous
        );
    }

    #[test]
    fn hyphenated_names_split_into_tokens() {
        let m = NameMatcher::default();
        assert_eq!(
            m.significant_tokens("Anne-Marie O. Dupont"),
            vec!["anne", "marie", "dupont"]
        );
        assert_eq!(
            m.assess("Anne-Marie Dupont", "Dupont family news"),
            NameMatchTier::Ambiguous
        );
    }

    #[test]
    fn min_token_len_is_configurable() {
        let m = NameMatcher::new(5);
        assert_eq!(m.significant_tokens("Li Wang Xiaoming"), vec!["xiaoming"]);
        assert_eq!(
            m.assess("Li Wang Xiaoming", "Wang Li attended."),
            NameMatchTier::Absent
        );
    }

    #[test]
    fn conclusive_tiers() {
        assert!(NameMatchTier::Exact.is_conclusive());
        assert!(NameMatchTier::Absent.is_conclusive());
        assert!(!NameMatchTier::Ambiguous.is_conclusive());
    }
}
