//! Tags with bounded-length keys and values.
//!
//! Keys and values are validated when a tag is created, so a `Tag` that
//! exists always fits into a serialized record.

use crate::error::{Error, Result};

use std::fmt;

/// Maximum number of characters in a tag key, tag value or member role.
pub const MAX_TEXT_CHARS: usize = 255;

/// Checks that `text` has at most `MAX_TEXT_CHARS` characters.
pub(crate) fn validate_text(field: &'static str, text: &str) -> Result<()> {
    // Every character takes at least one byte, so short strings need no count.
    if text.len() <= MAX_TEXT_CHARS {
        return Ok(());
    }
    let length = text.chars().count();
    if length > MAX_TEXT_CHARS {
        return Err(Error::Validation {
            field,
            length,
            limit: MAX_TEXT_CHARS,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    key: String,
    value: String,
}

impl Tag {
    pub fn new<K: Into<String>, V: Into<String>>(key: K, value: V) -> Result<Self> {
        let key = key.into();
        let value = value.into();
        validate_text("tag key", &key)?;
        validate_text("tag value", &value)?;
        Ok(Self { key, value })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Ordered list of tags. Duplicate keys are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagList {
    tags: Vec<Tag>,
}

impl TagList {
    pub fn new() -> Self {
        Default::default()
    }

    /// Validates and appends a tag.
    pub fn add<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) -> Result<()> {
        self.tags.push(Tag::new(key, value)?);
        Ok(())
    }

    pub fn push(&mut self, tag: Tag) {
        self.tags.push(tag);
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Removes all tags, keeping the allocation.
    pub fn clear(&mut self) {
        self.tags.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tag> {
        self.tags.iter()
    }

    /// Returns the value of the first tag with the given key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.key == key)
            .map(|tag| tag.value.as_str())
    }

    /// Checks if there is a tag with a given `key` and `value`.
    pub fn has_tag(&self, key: &str, value: &str) -> bool {
        self.get(key) == Some(value)
    }
}

impl std::ops::Index<usize> for TagList {
    type Output = Tag;

    fn index(&self, idx: usize) -> &Tag {
        &self.tags[idx]
    }
}

impl<'a> IntoIterator for &'a TagList {
    type Item = &'a Tag;
    type IntoIter = std::slice::Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.tags.iter()
    }
}
