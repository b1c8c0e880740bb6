//! Shout descriptors.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use tagbot_types::BotId;

/// A named event dispatched to listening bots.
///
/// `bot_ids = None` targets every active bot; `Some(ids)` is a whisper.
/// `argument = None` means "no argument given", which is different from
/// `Some(JsonValue::Null)`: listeners of an argument-less shout receive
/// the targets positionally (`arg0`, `arg1`, …).
///
/// # Example
///
/// ```
/// use tagbot_event::ShoutAction;
/// use serde_json::json;
///
/// let shout = ShoutAction::new("sayHello")
///     .to(["b", "a"])
///     .with_argument(json!({"greeting": "hi"}));
///
/// assert_eq!(shout.event_name, "sayHello");
/// assert!(shout.sort_bot_ids);
/// assert_eq!(shout.bot_ids.as_ref().map(Vec::len), Some(2));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShoutAction {
    /// Event name, e.g. `onClick`.
    pub event_name: String,
    /// Explicit targets, or `None` for all bots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_ids: Option<Vec<BotId>>,
    /// Bot representing the acting user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<BotId>,
    /// Argument passed as `that`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub argument: Option<JsonValue>,
    /// Process targets in ascending id order (otherwise caller order).
    #[serde(default = "default_sort")]
    pub sort_bot_ids: bool,
}

fn default_sort() -> bool {
    true
}

/// Maps a present field (even `null`) to `Some`.
fn present<'de, D>(deserializer: D) -> Result<Option<JsonValue>, D::Error>
where
    D: Deserializer<'de>,
{
    JsonValue::deserialize(deserializer).map(Some)
}

impl ShoutAction {
    /// Shout to every bot, no argument, sorted targets.
    #[must_use]
    pub fn new(event_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            bot_ids: None,
            user_id: None,
            argument: None,
            sort_bot_ids: true,
        }
    }

    /// Restricts the shout to `ids`.
    #[must_use]
    pub fn to<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<BotId>,
    {
        self.bot_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the argument.
    #[must_use]
    pub fn with_argument(mut self, argument: JsonValue) -> Self {
        self.argument = Some(argument);
        self
    }

    /// Keeps the caller's target order.
    #[must_use]
    pub fn unsorted(mut self) -> Self {
        self.sort_bot_ids = false;
        self
    }

    /// Sets the acting user.
    #[must_use]
    pub fn from_user(mut self, user_id: impl Into<BotId>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_argument_is_none() {
        let shout: ShoutAction = serde_json::from_value(json!({"event_name": "x"})).unwrap();
        assert_eq!(shout.argument, None);
        assert!(shout.sort_bot_ids);
        assert_eq!(shout.bot_ids, None);
    }

    #[test]
    fn null_argument_is_some_null() {
        let shout: ShoutAction =
            serde_json::from_value(json!({"event_name": "x", "argument": null})).unwrap();
        assert_eq!(shout.argument, Some(JsonValue::Null));
    }

    #[test]
    fn builder() {
        let shout = ShoutAction::new("x").to(["a"]).unsorted().from_user("u");
        assert!(!shout.sort_bot_ids);
        assert_eq!(shout.user_id, Some(BotId::new("u")));
        assert_eq!(shout.bot_ids, Some(vec![BotId::new("a")]));
    }
}
