//! Bots and bot state snapshots.

use crate::{BotId, TagValue, Tags, TypesError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix scripts may put in front of a tag name (`#color`).
pub const TAG_PREFIX: char = '#';

/// Strips the optional `#` prefix from a tag name.
///
/// ```
/// assert_eq!(tagbot_types::tag_name("#color"), "color");
/// assert_eq!(tagbot_types::tag_name("color"), "color");
/// ```
#[must_use]
pub fn tag_name(tag: &str) -> &str {
    tag.strip_prefix(TAG_PREFIX).unwrap_or(tag)
}

/// Like [`tag_name`], but rejects names that are empty after stripping.
///
/// # Errors
///
/// Returns [`TypesError::EmptyTagName`].
pub fn try_tag_name(tag: &str) -> Result<&str, TypesError> {
    let name = tag_name(tag);
    if name.is_empty() {
        return Err(TypesError::EmptyTagName);
    }
    Ok(name)
}

/// An entity: an immutable id plus a bag of tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bot {
    /// Unique id.
    pub id: BotId,
    /// Tag values.
    #[serde(default)]
    pub tags: Tags,
}

static NULL_TAG: TagValue = TagValue::Null;

impl Bot {
    /// Creates a bot with no tags.
    #[must_use]
    pub fn new(id: impl Into<BotId>) -> Self {
        Self {
            id: id.into(),
            tags: Tags::new(),
        }
    }

    /// Creates a bot with the given tags.
    #[must_use]
    pub fn with_tags(id: impl Into<BotId>, tags: Tags) -> Self {
        Self {
            id: id.into(),
            tags,
        }
    }

    /// Builder-style tag setter.
    #[must_use]
    pub fn tag_with(mut self, tag: &str, value: impl Into<TagValue>) -> Self {
        self.set_tag(tag, value);
        self
    }

    /// Returns the raw value of `tag`, or [`TagValue::Null`] when unset.
    ///
    /// The key is looked up verbatim first; a `#name` miss falls back to
    /// the data tag `name`.
    #[must_use]
    pub fn tag(&self, tag: &str) -> &TagValue {
        self.tags
            .get(tag)
            .or_else(|| self.tags.get(tag_name(tag)))
            .unwrap_or(&NULL_TAG)
    }

    /// Sets a tag under its verbatim key, so `#name` listeners keep their
    /// spelling. Setting [`TagValue::Null`] removes it.
    pub fn set_tag(&mut self, tag: &str, value: impl Into<TagValue>) {
        let value = value.into();
        if value.is_null() {
            self.tags.remove(tag);
        } else {
            self.tags.insert(tag.to_string(), value);
        }
    }

    /// Applies a partial tag patch (`Null` deletes).
    pub fn apply_update(&mut self, update: &Tags) {
        for (tag, value) in update {
            self.set_tag(tag, value.clone());
        }
    }
}

/// Snapshot of the authoritative store: id → bot, or `None` for a
/// tombstoned bot.
///
/// The runtime only ever reads a `BotsState`; mutations are described as
/// events and applied by the owner of the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BotsState(BTreeMap<BotId, Option<Bot>>);

impl BotsState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a state holding `bots`.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::DuplicateBot`] if two bots share an id.
    pub fn from_bots(bots: impl IntoIterator<Item = Bot>) -> Result<Self, TypesError> {
        let mut state = Self::new();
        for bot in bots {
            if state.0.contains_key(&bot.id) {
                return Err(TypesError::DuplicateBot(bot.id.to_string()));
            }
            state.insert(bot);
        }
        Ok(state)
    }

    /// Inserts or replaces a bot.
    pub fn insert(&mut self, bot: Bot) {
        self.0.insert(bot.id.clone(), Some(bot));
    }

    /// Marks a bot as removed.
    pub fn tombstone(&mut self, id: &BotId) {
        self.0.insert(id.clone(), None);
    }

    /// Returns the active bot with `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Bot> {
        self.0.get(id).and_then(Option::as_ref)
    }

    /// Returns a mutable reference to the active bot with `id`.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Bot> {
        self.0.get_mut(id).and_then(Option::as_mut)
    }

    /// Returns `true` if `id` is present and tombstoned.
    #[must_use]
    pub fn is_tombstoned(&self, id: &str) -> bool {
        matches!(self.0.get(id), Some(None))
    }

    /// Iterates active bots in id order.
    pub fn active(&self) -> impl Iterator<Item = &Bot> {
        self.0.values().filter_map(Option::as_ref)
    }

    /// Number of entries, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the state has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks that every key matches the id of the bot stored under it.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::MismatchedKey`] for the first mismatch.
    pub fn validate(&self) -> Result<(), TypesError> {
        for (key, bot) in &self.0 {
            if let Some(bot) = bot {
                if &bot.id != key {
                    return Err(TypesError::MismatchedKey {
                        key: key.to_string(),
                        id: bot.id.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
