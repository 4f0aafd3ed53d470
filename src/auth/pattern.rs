//! Line-oriented wildcard matcher for SSO exclusion lists.
//!
//! Each configured line is a literal path except for two tokens:
//!
//! - `*` matches any run of characters, including `/`.
//! - A line consisting of exactly `<front>` stands for the site's front page.
//!
//! Every other character is literal, so `a.b` only ever matches `a.b`. All
//! lines are joined into a single anchored alternation; a candidate must match
//! one line in full. Matching is case-insensitive: the candidate is lowercased
//! and the combined regex is compiled with `(?i)`, so uppercase letters in a
//! pattern behave the same as lowercase ones.
//!
//! Lines are split on `\n` and `\r\n`. Blank lines are skipped but surrounding
//! whitespace on a non-blank line is part of the pattern. The configuration
//! loader trims lines before they get here, so this only matters for callers
//! that build a matcher directly.

use regex::Regex;

/// Placeholder for the front page path.
pub const FRONT_PAGE_TOKEN: &str = "<front>";

/// Error compiling an exclusion list.
#[derive(Debug, thiserror::Error)]
#[error("exclusion patterns could not be compiled: {0}")]
pub struct PatternError(#[from] regex::Error);

/// Translate exclusion lines into a single regex source string.
///
/// Returns `None` when there are no non-blank lines, in which case nothing
/// can match.
pub fn translate_patterns<S: AsRef<str>>(patterns: &[S], frontpage_path: &str) -> Option<String> {
    let alternatives: Vec<String> = patterns
        .iter()
        .flat_map(|entry| entry.as_ref().split('\n'))
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty())
        .map(|line| translate_line(line, frontpage_path))
        .collect();

    if alternatives.is_empty() {
        return None;
    }

    Some(format!("(?is)^(?:{})$", alternatives.join("|")))
}

fn translate_line(line: &str, frontpage_path: &str) -> String {
    if line == FRONT_PAGE_TOKEN {
        return regex::escape(frontpage_path);
    }

    line.split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*")
}

/// A compiled exclusion list.
///
/// Immutable once built and cheap to share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct CompiledMatcher {
    regex: Option<Regex>,
    pattern_count: usize,
}

impl CompiledMatcher {
    /// Compile `patterns`, substituting `frontpage_path` for `<front>`.
    ///
    /// # Errors
    /// Fails only if the combined expression exceeds the regex engine's size
    /// limit; all user text is escaped.
    pub fn compile<S: AsRef<str>>(
        patterns: &[S],
        frontpage_path: &str,
    ) -> Result<Self, PatternError> {
        let Some(source) = translate_patterns(patterns, frontpage_path) else {
            return Ok(Self::empty());
        };

        let pattern_count = source_line_count(patterns);
        let regex = Regex::new(&source)?;

        Ok(Self {
            regex: Some(regex),
            pattern_count,
        })
    }

    /// A matcher that never matches.
    pub fn empty() -> Self {
        Self {
            regex: None,
            pattern_count: 0,
        }
    }

    /// Whether the whole of `candidate` matches one of the lines.
    pub fn matches(&self, candidate: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(&candidate.to_lowercase()),
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.regex.is_none()
    }

    /// Number of non-blank lines compiled into the matcher.
    pub fn pattern_count(&self) -> usize {
        self.pattern_count
    }
}

impl Default for CompiledMatcher {
    fn default() -> Self {
        Self::empty()
    }
}

fn source_line_count<S: AsRef<str>>(patterns: &[S]) -> usize {
    patterns
        .iter()
        .flat_map(|entry| entry.as_ref().split('\n'))
        .filter(|line| !line.trim().is_empty())
        .count()
}
