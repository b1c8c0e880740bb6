//! Bot actions.
//!
//! Every action carries an [`ActionId`] minted by an [`ActionSequence`]
//! when it is created. A [`ActionKind::Reject`] names its target by that
//! id, so "the same action" means "the same id", never structural
//! equality.

use crate::ShoutAction;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use tagbot_types::{Bot, BotId, Tags};

/// Batch-local sequence number of an emitted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub u64);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "act:{}", self.0)
    }
}

/// Monotonic source of [`ActionId`]s for one batch.
///
/// # Example
///
/// ```
/// use tagbot_event::{ActionKind, ActionSequence};
///
/// let mut seq = ActionSequence::new();
/// let a = seq.mint(ActionKind::toast("hi"));
/// let b = seq.mint(ActionKind::toast("hi"));
/// assert!(a.id < b.id);
/// assert_ne!(a, b);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ActionSequence {
    next: u64,
}

impl ActionSequence {
    /// Creates a sequence starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Creates a sequence whose first id is `first`.
    #[must_use]
    pub fn starting_at(first: u64) -> Self {
        Self { next: first }
    }

    /// Returns the next id.
    pub fn next_id(&mut self) -> ActionId {
        let id = ActionId(self.next.max(1));
        self.next = id.0 + 1;
        id
    }

    /// Ensures every later id is greater than `id`.
    ///
    /// Used when a batch receives actions minted elsewhere, so that new
    /// ids never collide with theirs.
    pub fn advance_past(&mut self, id: ActionId) {
        if self.next <= id.0 {
            self.next = id.0 + 1;
        }
    }

    /// Wraps `kind` into an action with a fresh id.
    pub fn mint(&mut self, kind: ActionKind) -> BotAction {
        BotAction {
            id: self.next_id(),
            kind,
        }
    }
}

/// An emitted action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotAction {
    /// Sequence id.
    pub id: ActionId,
    /// What the action does.
    #[serde(flatten)]
    pub kind: ActionKind,
}

impl BotAction {
    /// Returns `true` for add/remove/update/transaction actions.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::AddBot { .. }
                | ActionKind::RemoveBot { .. }
                | ActionKind::UpdateBot { .. }
                | ActionKind::Transaction { .. }
        )
    }

    /// Returns the rejected action id if this is a reject.
    #[must_use]
    pub fn rejected(&self) -> Option<ActionId> {
        match self.kind {
            ActionKind::Reject { target } => Some(target),
            _ => None,
        }
    }

    /// Snake-case type name, as used in the JSON `type` field.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

/// The closed set of action variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// A bot was created.
    AddBot {
        /// Id of the new bot.
        bot_id: BotId,
        /// The bot as created.
        bot: Bot,
    },
    /// A bot was removed.
    RemoveBot {
        /// Id of the removed bot.
        bot_id: BotId,
    },
    /// Tag patch; `null` deletes a tag.
    UpdateBot {
        /// Id of the updated bot.
        bot_id: BotId,
        /// Changed tags.
        update: Tags,
    },
    /// Wrapper equivalent to emitting `events` in order.
    Transaction {
        /// Wrapped actions.
        events: Vec<BotAction>,
    },
    /// Dispatch a named event to listening bots.
    Shout(ShoutAction),
    /// Remove a previously emitted action from the final list.
    Reject {
        /// Id of the action to remove.
        target: ActionId,
    },
    /// Show a message to the user.
    Toast {
        /// Message text.
        message: String,
    },
    /// Navigate the current view.
    GoToUrl {
        /// Destination.
        url: String,
    },
    /// Open a URL in a new view.
    OpenUrl {
        /// Destination.
        url: String,
    },
    /// Send an HTTP request.
    Webhook {
        /// HTTP method.
        method: String,
        /// Target URL.
        url: String,
        /// Request body.
        #[serde(default)]
        data: JsonValue,
    },
    /// Any other side effect, carried through unchanged.
    Custom {
        /// Action name.
        name: String,
        /// Opaque payload.
        #[serde(default)]
        payload: JsonValue,
    },
}

impl ActionKind {
    /// `AddBot` for `bot`.
    #[must_use]
    pub fn add_bot(bot: Bot) -> Self {
        Self::AddBot {
            bot_id: bot.id.clone(),
            bot,
        }
    }

    /// `RemoveBot` for `id`.
    #[must_use]
    pub fn remove_bot(id: impl Into<BotId>) -> Self {
        Self::RemoveBot { bot_id: id.into() }
    }

    /// `UpdateBot` for `id`.
    #[must_use]
    pub fn update_bot(id: impl Into<BotId>, update: Tags) -> Self {
        Self::UpdateBot {
            bot_id: id.into(),
            update,
        }
    }

    /// `Reject` targeting `target`.
    #[must_use]
    pub fn reject(target: ActionId) -> Self {
        Self::Reject { target }
    }

    /// `Toast` with `message`.
    #[must_use]
    pub fn toast(message: impl Into<String>) -> Self {
        Self::Toast {
            message: message.into(),
        }
    }

    /// Snake-case type name, as used in the JSON `type` field.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::AddBot { .. } => "add_bot",
            Self::RemoveBot { .. } => "remove_bot",
            Self::UpdateBot { .. } => "update_bot",
            Self::Transaction { .. } => "transaction",
            Self::Shout(_) => "shout",
            Self::Reject { .. } => "reject",
            Self::Toast { .. } => "toast",
            Self::GoToUrl { .. } => "go_to_url",
            Self::OpenUrl { .. } => "open_url",
            Self::Webhook { .. } => "webhook",
            Self::Custom { .. } => "custom",
        }
    }
}
