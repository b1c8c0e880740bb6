//! Bot identifiers.

use crate::TypesError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Identifier of a bot.
///
/// Ids are minted outside the runtime (see `BotIdSource` in
/// `tagbot-runtime`) and never change after creation. Ordering is plain
/// string ordering, which is what every "sorted by id" guarantee in the
/// runtime refers to.
///
/// # Example
///
/// ```
/// use tagbot_types::BotId;
///
/// let a = BotId::new("a");
/// let b = BotId::new("b");
/// assert!(a < b);
/// assert_eq!(a.as_str(), "a");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BotId(String);

impl BotId {
    /// Creates an id without validation.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates an id, rejecting the empty string.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::EmptyBotId`] for `""`.
    pub fn try_new(id: impl Into<String>) -> Result<Self, TypesError> {
        let id = id.into();
        if id.is_empty() {
            return Err(TypesError::EmptyBotId);
        }
        Ok(Self(id))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BotId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for BotId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for BotId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for BotId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
