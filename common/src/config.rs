//! Text tag-list configuration.
//!
//! Hosts hand components a flat list of `key=value` tags, separated by
//! commas or newlines, e.g. `tcp_backlog=10,dict_size=64`. Components read
//! the keys they know and ignore the rest.

use std::collections::HashMap;

use thiserror::Error;

/// Error parsing a tag list.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A tag without a `key=value` shape.
    #[error("malformed tag `{0}`")]
    Malformed(String),
}

/// A parsed tag list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(HashMap<String, String>);

impl Tags {
    /// Parse a tag list. Empty segments are skipped.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let mut tags = HashMap::new();

        for tag in input.split(|c| c == ',' || c == '\n') {
            let tag = tag.trim();
            if tag.is_empty() {
                continue;
            }
            let (key, value) = tag
                .split_once('=')
                .ok_or_else(|| ParseError::Malformed(tag.to_owned()))?;

            tags.insert(key.trim().to_owned(), value.trim().to_owned());
        }
        Ok(Self(tags))
    }

    /// The raw value of `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Integer value of `key`, or `default` when the key is missing or
    /// unparsable. Unparsable values are logged and skipped.
    pub fn int_default(&self, key: &str, default: i64) -> i64 {
        match self.get(key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                log::warn!(target: "config", "ignoring non-integer tag {}={}", key, raw);
                default
            }),
        }
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_separators() {
        let tags = Tags::parse("tcp_backlog=10,\ndict_size = 64 ,").unwrap();

        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get("tcp_backlog"), Some("10"));
        assert_eq!(tags.int_default("dict_size", 0), 64);
    }

    #[test]
    fn missing_and_bad_values_fall_back() {
        let tags = Tags::parse("tcp_backlog=lots").unwrap();

        assert_eq!(tags.int_default("tcp_backlog", 50), 50);
        assert_eq!(tags.int_default("absent", 7), 7);
    }

    #[test]
    fn rejects_malformed_tags() {
        assert_eq!(
            Tags::parse("backlog"),
            Err(ParseError::Malformed("backlog".to_owned()))
        );
    }

    #[test]
    fn empty_input_is_empty() {
        assert!(Tags::parse("").unwrap().is_empty());
    }
}
