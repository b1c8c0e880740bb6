//! Folding actions into a local state copy.
//!
//! The dispatch runtime never calls these; they exist for the owner of a
//! [`BotsState`] (and for tests) to apply a resolved action list.

use crate::{ActionKind, BotAction};
use tagbot_types::BotsState;

/// Expands every `Transaction` in place, recursively, preserving order.
#[must_use]
pub fn flatten_transactions(actions: Vec<BotAction>) -> Vec<BotAction> {
    let mut out = Vec::with_capacity(actions.len());
    let mut stack: Vec<std::vec::IntoIter<BotAction>> = vec![actions.into_iter()];
    while let Some(iter) = stack.last_mut() {
        match iter.next() {
            Some(BotAction {
                kind: ActionKind::Transaction { events },
                ..
            }) => stack.push(events.into_iter()),
            Some(action) => out.push(action),
            None => {
                stack.pop();
            }
        }
    }
    out
}

/// Applies structural actions to `state`. Other actions are ignored.
///
/// Updates to bots that are missing or tombstoned are dropped.
pub fn apply_actions(state: &mut BotsState, actions: &[BotAction]) {
    for action in actions {
        match &action.kind {
            ActionKind::AddBot { bot, .. } => state.insert(bot.clone()),
            ActionKind::RemoveBot { bot_id } => state.tombstone(bot_id),
            ActionKind::UpdateBot { bot_id, update } => {
                if let Some(bot) = state.get_mut(bot_id.as_str()) {
                    bot.apply_update(update);
                }
            }
            ActionKind::Transaction { events } => apply_actions(state, events),
            _ => {}
        }
    }
}
