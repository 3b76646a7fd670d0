//! Display name sanitization
//!
//! The platform refuses webhook executions whose username contains certain
//! reserved words. Splitting each occurrence with a hair space keeps the
//! name looking the same to users while no longer matching the filter.

use regex::{Captures, Regex, RegexBuilder};
use std::borrow::Cow;

/// U+200A HAIR SPACE
pub const SEPARATOR: char = '\u{200A}';

pub const DEFAULT_TRIGGER_WORDS: &[&str] = &["clyde", "discord"];

#[derive(Debug, Clone)]
pub struct NameSanitizer {
    pattern: Option<Regex>,
}

impl NameSanitizer {
    /// Words shorter than two characters can't be split and are ignored.
    pub fn new<S: AsRef<str>>(words: &[S]) -> Result<Self, regex::Error> {
        let alternatives: Vec<String> = words
            .iter()
            .map(|w| w.as_ref().trim())
            .filter(|w| w.chars().count() > 1 && !w.contains(SEPARATOR))
            .map(regex::escape)
            .collect();

        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }

        let pattern = RegexBuilder::new(&alternatives.join("|"))
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    pub fn sanitize<'a>(&self, name: &'a str) -> Cow<'a, str> {
        let Some(pattern) = &self.pattern else {
            return Cow::Borrowed(name);
        };

        let mut name = Cow::Borrowed(name);
        // A split word can still leave a shorter trigger intact, so rescan
        while pattern.is_match(&name) {
            name = Cow::Owned(pattern.replace_all(&name, split_match).into_owned());
        }
        name
    }
}

fn split_match(caps: &Captures) -> String {
    let word = &caps[0];
    let at = word.chars().next().map_or(0, char::len_utf8);
    format!("{}{}{}", &word[..at], SEPARATOR, &word[at..])
}
