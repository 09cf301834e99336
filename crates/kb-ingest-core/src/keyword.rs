//! Keyword vocabulary and matching for the chat path.
//!
//! Both keywords and message text are *folded* before comparison: lowercased,
//! stripped of emphasis markup, and every word reduced to its singular form.
//! A keyword matches when its folded form occurs as a substring of the
//! folded text, so `"Pending approvals"` matches the keyword
//! `"pending approval"` and `"users"` matches `"user"`.
//!
//! # Tie-break
//!
//! When several keywords match one text, [`Vocabulary::best_match`] picks
//! the one with the longest canonical form; among equally long keywords the
//! one configured first wins. The result depends only on the text and the
//! vocabulary order.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::normalize::normalize_for_match;

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("valid regex"));
static CODE_SPAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`\n]+)`").expect("valid regex"));

/// Longest inline code span, in words, accepted as a harvested keyword.
const MAX_HARVESTED_WORDS: usize = 4;

/// A configured keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyword {
    /// Folded form used for matching and article keys.
    pub canonical_form: String,
    /// The configured string with whitespace collapsed, used in titles and
    /// topics.
    pub display_form: String,
}

impl Keyword {
    /// Build a keyword from a configured string. Returns `None` when the
    /// string folds to nothing.
    pub fn new(raw: &str) -> Option<Self> {
        let canonical_form = fold(raw);
        if canonical_form.is_empty() {
            return None;
        }
        let display_form = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        Some(Self {
            canonical_form,
            display_form,
        })
    }
}

/// An immutable, ordered keyword vocabulary.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    keywords: Vec<Keyword>,
}

impl Vocabulary {
    /// Build a vocabulary from configured strings, in order.
    ///
    /// Entries that fold to nothing are ignored; entries folding to an
    /// already-seen canonical form keep their first position.
    pub fn new<S: AsRef<str>>(raw: &[S]) -> Self {
        let mut seen = HashSet::new();
        let keywords = raw
            .iter()
            .filter_map(|s| Keyword::new(s.as_ref()))
            .filter(|k| seen.insert(k.canonical_form.clone()))
            .collect();
        Self { keywords }
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn keywords(&self) -> &[Keyword] {
        &self.keywords
    }

    /// Look up a keyword by canonical form.
    pub fn get(&self, canonical_form: &str) -> Option<&Keyword> {
        self.keywords
            .iter()
            .find(|k| k.canonical_form == canonical_form)
    }

    /// Every keyword matching `text`, in vocabulary order.
    pub fn matches(&self, text: &str) -> Vec<&Keyword> {
        let folded = fold(text);
        if folded.is_empty() {
            return Vec::new();
        }
        self.keywords
            .iter()
            .filter(|k| folded.contains(k.canonical_form.as_str()))
            .collect()
    }

    /// The single best keyword for `text`, or `None` when nothing matches.
    pub fn best_match(&self, text: &str) -> Option<&Keyword> {
        let mut best: Option<&Keyword> = None;
        for keyword in self.matches(text) {
            let len = keyword.canonical_form.chars().count();
            match best {
                Some(current) if current.canonical_form.chars().count() >= len => {}
                _ => best = Some(keyword),
            }
        }
        best
    }
}

/// Fold text for keyword comparison: match-normalize, then singularize
/// every alphanumeric word. Punctuation between words is kept as-is.
pub fn fold(text: &str) -> String {
    let normalized = normalize_for_match(text);
    WORD_RE
        .replace_all(&normalized, |caps: &regex::Captures| {
            singularize(&caps[0]).to_string()
        })
        .into_owned()
}

/// Reduce an English plural to its singular form.
///
/// Handles the regular patterns only: `-ies` → `-y`, `-sses`/`-xes`/
/// `-ches`/`-shes`/`-zes` → drop `-es`, otherwise a trailing `-s` is
/// dropped. Words ending in `-ss`, `-us` or `-is`, and words of three
/// characters or fewer, are left alone.
pub fn singularize(word: &str) -> std::borrow::Cow<'_, str> {
    use std::borrow::Cow;

    let len = word.chars().count();
    if len <= 3 {
        return Cow::Borrowed(word);
    }
    if let Some(stem) = word.strip_suffix("ies") {
        return Cow::Owned(format!("{}y", stem));
    }
    if word.ends_with("sses") {
        return Cow::Borrowed(&word[..word.len() - 2]);
    }
    if word.ends_with("ss") || word.ends_with("us") || word.ends_with("is") {
        return Cow::Borrowed(word);
    }
    for suffix in ["xes", "ches", "shes", "zes"] {
        if word.ends_with(suffix) {
            return Cow::Borrowed(&word[..word.len() - 2]);
        }
    }
    match word.strip_suffix('s') {
        Some(stem) => Cow::Borrowed(stem),
        None => Cow::Borrowed(word),
    }
}

/// Harvest keyword candidates from a markdown document.
///
/// Collects bullet items (`- x`, `* x`) and inline code spans of at most
/// four words, in document order. Fenced code blocks are skipped.
pub fn harvest_keywords(markdown: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut in_fence = false;
    for line in markdown.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some(item) = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
        {
            let item = item.trim().trim_matches('`').trim();
            if !item.is_empty() && item.split_whitespace().count() <= MAX_HARVESTED_WORDS {
                out.push(item.to_string());
            }
            continue;
        }
        for caps in CODE_SPAN_RE.captures_iter(trimmed) {
            let span = caps[1].trim();
            if !span.is_empty() && span.split_whitespace().count() <= MAX_HARVESTED_WORDS {
                out.push(span.to_string());
            }
        }
    }
    out
}
