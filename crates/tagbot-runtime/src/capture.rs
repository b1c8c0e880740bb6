//! Pending tag writes for one batch.
//!
//! Two layers are kept:
//!
//! - `pending`: every write of the batch, used for reads. Never cleared,
//!   so a later listener sees an earlier listener's writes.
//! - `frames`: a stack of dirty maps. A listener run pushes a frame and
//!   pops it when it finishes, so each listener's writes to one bot
//!   become a single `UpdateBot`, however many nested shouts ran in
//!   between. The bottom frame collects writes made outside any run.

use std::collections::BTreeMap;
use tagbot_event::{ActionKind, ActionSequence, BotAction};
use tagbot_types::{Bot, BotId, TagValue, Tags};

/// Read-your-writes layer over the bot snapshot.
///
/// # Example
///
/// ```
/// use tagbot_event::ActionSequence;
/// use tagbot_runtime::TagUpdateCapture;
/// use tagbot_types::{BotId, TagValue};
///
/// let mut capture = TagUpdateCapture::new();
/// let a = BotId::new("a");
/// capture.set_tag(&a, "color", TagValue::from("red"));
///
/// assert_eq!(capture.pending(&a, "color"), Some(&TagValue::from("red")));
///
/// let mut seq = ActionSequence::new();
/// assert_eq!(capture.get_bot_updates(&mut seq).len(), 1);
/// assert!(capture.get_bot_updates(&mut seq).is_empty());
/// // Still readable after the flush.
/// assert!(capture.pending(&a, "color").is_some());
/// ```
#[derive(Debug, Clone)]
pub struct TagUpdateCapture {
    pending: BTreeMap<BotId, Tags>,
    frames: Vec<BTreeMap<BotId, Tags>>,
}

impl Default for TagUpdateCapture {
    fn default() -> Self {
        Self {
            pending: BTreeMap::new(),
            frames: vec![BTreeMap::new()],
        }
    }
}

impl TagUpdateCapture {
    /// Creates an empty capture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts collecting writes for one listener run.
    pub fn push_frame(&mut self) {
        self.frames.push(BTreeMap::new());
    }

    /// Ends the innermost listener run and turns its writes into one
    /// `UpdateBot` per bot, ascending by id.
    ///
    /// With no run open this drains the bottom frame instead.
    pub fn pop_frame(&mut self, sequence: &mut ActionSequence) -> Vec<BotAction> {
        if self.frames.len() > 1 {
            let frame = self.frames.pop().unwrap_or_default();
            return updates(frame, sequence);
        }
        self.get_bot_updates(sequence)
    }

    /// The pending value of `tag`, if written this batch. A deleted tag
    /// is `Some(Null)`.
    #[must_use]
    pub fn pending(&self, id: &BotId, tag: &str) -> Option<&TagValue> {
        self.pending.get(id).and_then(|tags| tags.get(tag))
    }

    /// Records a write and returns the value unchanged.
    pub fn set_tag(&mut self, id: &BotId, tag: &str, value: TagValue) -> TagValue {
        self.pending
            .entry(id.clone())
            .or_default()
            .insert(tag.to_string(), value.clone());
        if let Some(frame) = self.frames.last_mut() {
            frame
                .entry(id.clone())
                .or_default()
                .insert(tag.to_string(), value.clone());
        }
        value
    }

    /// Whether any open frame holds unflushed writes.
    #[must_use]
    pub fn has_updates(&self) -> bool {
        self.frames
            .iter()
            .any(|frame| frame.values().any(|tags| !tags.is_empty()))
    }

    /// Drains the innermost frame into one `UpdateBot` per bot, ascending
    /// by id. The frame itself stays open.
    pub fn get_bot_updates(&mut self, sequence: &mut ActionSequence) -> Vec<BotAction> {
        match self.frames.last_mut() {
            Some(frame) => updates(std::mem::take(frame), sequence),
            None => Vec::new(),
        }
    }

    /// Drops unflushed writes for a bot that is being removed.
    pub fn forget(&mut self, id: &BotId) {
        for frame in &mut self.frames {
            frame.remove(id);
        }
    }

    /// `bot`'s tags with pending writes applied.
    #[must_use]
    pub fn merged_tags(&self, bot: &Bot) -> Tags {
        let mut tags = bot.tags.clone();
        if let Some(pending) = self.pending.get(&bot.id) {
            for (tag, value) in pending {
                if value.is_null() {
                    tags.remove(tag);
                } else {
                    tags.insert(tag.clone(), value.clone());
                }
            }
        }
        tags
    }
}

fn updates(frame: BTreeMap<BotId, Tags>, sequence: &mut ActionSequence) -> Vec<BotAction> {
    frame
        .into_iter()
        .filter(|(_, update)| !update.is_empty())
        .map(|(id, update)| sequence.mint(ActionKind::update_bot(id, update)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> BotId {
        BotId::new(s)
    }

    #[test]
    fn last_write_wins_per_tag() {
        let mut capture = TagUpdateCapture::new();
        capture.set_tag(&id("a"), "n", TagValue::from(1));
        capture.set_tag(&id("a"), "n", TagValue::from(2));
        capture.set_tag(&id("a"), "m", TagValue::from(3));

        let mut seq = ActionSequence::new();
        let updates = capture.get_bot_updates(&mut seq);
        assert_eq!(updates.len(), 1);
        match &updates[0].kind {
            ActionKind::UpdateBot { bot_id, update } => {
                assert_eq!(bot_id, &id("a"));
                assert_eq!(update.get("n"), Some(&TagValue::from(2)));
                assert_eq!(update.get("m"), Some(&TagValue::from(3)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn flush_is_sorted_by_bot_id() {
        let mut capture = TagUpdateCapture::new();
        capture.set_tag(&id("c"), "x", TagValue::from(1));
        capture.set_tag(&id("a"), "x", TagValue::from(1));
        capture.set_tag(&id("b"), "x", TagValue::from(1));

        let mut seq = ActionSequence::new();
        let order: Vec<String> = capture
            .get_bot_updates(&mut seq)
            .into_iter()
            .map(|action| match action.kind {
                ActionKind::UpdateBot { bot_id, .. } => bot_id.to_string(),
                _ => String::new(),
            })
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn set_tag_returns_value() {
        let mut capture = TagUpdateCapture::new();
        let value = capture.set_tag(&id("a"), "x", TagValue::from("v"));
        assert_eq!(value, TagValue::from("v"));
        assert!(capture.has_updates());
    }

    #[test]
    fn merged_tags_applies_deletes() {
        let bot = Bot::new("a").tag_with("keep", 1).tag_with("drop", 2);
        let mut capture = TagUpdateCapture::new();
        capture.set_tag(&bot.id, "drop", TagValue::Null);
        capture.set_tag(&bot.id, "new", TagValue::from(true));

        let tags = capture.merged_tags(&bot);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get("keep"), Some(&TagValue::from(1)));
        assert_eq!(tags.get("new"), Some(&TagValue::from(true)));
    }

    #[test]
    fn frames_keep_outer_writes_together() {
        let mut capture = TagUpdateCapture::new();
        let mut seq = ActionSequence::new();

        capture.push_frame();
        capture.set_tag(&id("a"), "x", TagValue::from(1));
        capture.push_frame();
        capture.set_tag(&id("b"), "z", TagValue::from(3));
        let inner = capture.pop_frame(&mut seq);
        capture.set_tag(&id("a"), "y", TagValue::from(2));
        let outer = capture.pop_frame(&mut seq);

        assert_eq!(inner.len(), 1);
        assert!(matches!(&inner[0].kind, ActionKind::UpdateBot { bot_id, .. } if bot_id == &id("b")));
        assert_eq!(outer.len(), 1);
        match &outer[0].kind {
            ActionKind::UpdateBot { bot_id, update } => {
                assert_eq!(bot_id, &id("a"));
                assert_eq!(update.keys().collect::<Vec<_>>(), vec!["x", "y"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!capture.has_updates());
        assert_eq!(capture.pending(&id("b"), "z"), Some(&TagValue::from(3)));
    }

    #[test]
    fn forget_reaches_every_frame() {
        let mut capture = TagUpdateCapture::new();
        capture.push_frame();
        capture.set_tag(&id("a"), "x", TagValue::from(1));
        capture.push_frame();
        capture.forget(&id("a"));

        let mut seq = ActionSequence::new();
        assert!(capture.pop_frame(&mut seq).is_empty());
        assert!(capture.pop_frame(&mut seq).is_empty());
    }

    #[test]
    fn forget_drops_unflushed_writes_only() {
        let mut capture = TagUpdateCapture::new();
        capture.set_tag(&id("a"), "x", TagValue::from(1));
        capture.forget(&id("a"));

        assert!(!capture.has_updates());
        assert_eq!(capture.pending(&id("a"), "x"), Some(&TagValue::from(1)));
    }
}
