//! Destroy cascade.
//!
//! Destroying a bot also destroys every bot it created, transitively,
//! following the `creator` tag. A bot whose `destroyable` tag is `false`
//! survives and shields its whole subtree.

use crate::config::TagNamesConfig;
use crate::{CalculationContext, DispatchError};
use std::collections::HashSet;
use tagbot_event::{ActionKind, BotAction};
use tagbot_types::{BotId, TagValue};

/// Tag reads and action minting needed by the cascade.
pub trait TagSource {
    /// Candidate bot ids, ascending.
    fn candidate_ids(&self) -> Vec<BotId>;

    /// Current value of `tag` on `id`.
    ///
    /// # Errors
    ///
    /// Sources that evaluate formulas propagate their failures.
    fn tag_value(&mut self, id: &BotId, tag: &str) -> Result<TagValue, DispatchError>;

    /// Names of the creator and destroyable tags.
    fn tag_names(&self) -> &TagNamesConfig;

    /// Wraps `kind` with a fresh action id.
    fn mint_action(&mut self, kind: ActionKind) -> BotAction;
}

/// Reads pending-aware raw values. Formula tags are not evaluated, so a
/// formula `destroyable` counts as destroyable.
impl TagSource for CalculationContext {
    fn candidate_ids(&self) -> Vec<BotId> {
        self.bot_ids()
    }

    fn tag_value(&mut self, id: &BotId, tag: &str) -> Result<TagValue, DispatchError> {
        Ok(self.raw_tag(id, tag))
    }

    fn tag_names(&self) -> &TagNamesConfig {
        &self.config().tags
    }

    fn mint_action(&mut self, kind: ActionKind) -> BotAction {
        self.mint(kind)
    }
}

/// `RemoveBot` actions for `bot_id` and its creator subtree, pre-order
/// depth-first with siblings in id order.
///
/// Returns nothing if `bot_id` is unknown or not destroyable. Terminates
/// on creator cycles; each bot is removed at most once.
///
/// # Errors
///
/// Propagates tag read failures from `source`.
pub fn calculate_destroy_bot_events<S>(
    source: &mut S,
    bot_id: &BotId,
) -> Result<Vec<BotAction>, DispatchError>
where
    S: TagSource + ?Sized,
{
    let names = source.tag_names().clone();
    let ids = source.candidate_ids();
    if !ids.contains(bot_id) || !is_destroyable(source, bot_id, &names)? {
        return Ok(Vec::new());
    }

    let mut destroyed = HashSet::from([bot_id.clone()]);
    let mut events = vec![source.mint_action(ActionKind::remove_bot(bot_id.clone()))];
    let mut stack = vec![children(source, &ids, bot_id, &names)?.into_iter()];

    while let Some(siblings) = stack.last_mut() {
        let Some(child) = siblings.next() else {
            stack.pop();
            continue;
        };
        if destroyed.contains(&child) || !is_destroyable(source, &child, &names)? {
            continue;
        }
        destroyed.insert(child.clone());
        events.push(source.mint_action(ActionKind::remove_bot(child.clone())));
        let grandchildren: Vec<BotId> = children(source, &ids, &child, &names)?
            .into_iter()
            .filter(|id| !destroyed.contains(id))
            .collect();
        stack.push(grandchildren.into_iter());
    }

    Ok(events)
}

fn is_destroyable<S>(source: &mut S, id: &BotId, names: &TagNamesConfig) -> Result<bool, DispatchError>
where
    S: TagSource + ?Sized,
{
    Ok(source.tag_value(id, &names.destroyable)?.as_flag(true))
}

fn children<S>(
    source: &mut S,
    ids: &[BotId],
    parent: &BotId,
    names: &TagNamesConfig,
) -> Result<Vec<BotId>, DispatchError>
where
    S: TagSource + ?Sized,
{
    let mut found = Vec::new();
    for id in ids {
        if id == parent {
            continue;
        }
        if source.tag_value(id, &names.creator)?.as_str() == Some(parent.as_str()) {
            found.push(id.clone());
        }
    }
    Ok(found)
}
