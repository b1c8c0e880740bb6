//! Bot id minting.

use tagbot_types::BotId;
use uuid::Uuid;

/// Mints ids for bots created during a batch.
pub trait BotIdSource {
    /// Returns a fresh, never-before-returned id.
    fn next_bot_id(&mut self) -> BotId;
}

/// Random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdSource;

impl BotIdSource for UuidIdSource {
    fn next_bot_id(&mut self) -> BotId {
        BotId::new(Uuid::new_v4().to_string())
    }
}

/// `prefix-1`, `prefix-2`, …
///
/// # Example
///
/// ```
/// use tagbot_runtime::{BotIdSource, SequentialIdSource};
///
/// let mut ids = SequentialIdSource::new("bot");
/// assert_eq!(ids.next_bot_id().as_str(), "bot-1");
/// assert_eq!(ids.next_bot_id().as_str(), "bot-2");
/// ```
#[derive(Debug, Clone)]
pub struct SequentialIdSource {
    prefix: String,
    next: u64,
}

impl SequentialIdSource {
    /// Creates a source counting from 1.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 1,
        }
    }
}

impl BotIdSource for SequentialIdSource {
    fn next_bot_id(&mut self) -> BotId {
        let id = BotId::new(format!("{}-{}", self.prefix, self.next));
        self.next += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_are_distinct() {
        let mut ids = UuidIdSource;
        let a = ids.next_bot_id();
        let b = ids.next_bot_id();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }
}
