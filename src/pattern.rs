//! Literal-or-regex matching used for expects, escapes and completion prompts.
//!
//! A [`Pattern`] is first looked up as a literal substring. Only when that
//! fails is it tried as a case-insensitive, multi-line regular expression.
//! Patterns that are not valid regexes simply never match through the regex
//! path; user-written sequence files are full of strings like `[ OK ]` that
//! would otherwise be rejected.

use regex::{Regex, RegexBuilder};
use std::fmt;
use std::ops::Range;

#[derive(Debug, Clone)]
pub struct Pattern {
    text: String,
    regex: Option<Regex>,
}

impl Pattern {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let regex = if text.is_empty() {
            None
        } else {
            RegexBuilder::new(&text)
                .case_insensitive(true)
                .multi_line(true)
                .build()
                .ok()
        };
        Self { text, regex }
    }

    /// The pattern source as written in the sequence file.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Byte range of the first match in `s`. An empty pattern never matches.
    pub fn find(&self, s: &str) -> Option<Range<usize>> {
        if self.text.is_empty() {
            return None;
        }
        if let Some(pos) = s.find(&self.text) {
            return Some(pos..pos + self.text.len());
        }
        self.regex.as_ref()?.find(s).map(|m| m.range())
    }

    pub fn matches(&self, s: &str) -> bool {
        self.find(s).is_some()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for Pattern {}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&str> for Pattern {
    fn from(s: &str) -> Self {
        Pattern::new(s)
    }
}

impl From<String> for Pattern {
    fn from(s: String) -> Self {
        Pattern::new(s)
    }
}
