//! Reject resolution.

use std::collections::{HashMap, HashSet};
use tagbot_event::{ActionId, BotAction};
use tracing::trace;

/// Removes rejected actions and the rejects themselves.
///
/// Scans from the end so that a reject only reaches actions emitted
/// before it. Each reject cancels one occurrence of its target; rejecting
/// an action that is not in the list does nothing. The result keeps the
/// original order and holds each action id at most once.
///
/// # Example
///
/// ```
/// use tagbot_event::{ActionKind, ActionSequence};
/// use tagbot_runtime::resolve_rejected_actions;
///
/// let mut seq = ActionSequence::new();
/// let toast = seq.mint(ActionKind::toast("hi"));
/// let other = seq.mint(ActionKind::toast("bye"));
/// let reject = seq.mint(ActionKind::reject(toast.id));
///
/// let kept = resolve_rejected_actions(vec![toast, other.clone(), reject]);
/// assert_eq!(kept, vec![other]);
/// ```
#[must_use]
pub fn resolve_rejected_actions(actions: Vec<BotAction>) -> Vec<BotAction> {
    let mut rejected: HashMap<ActionId, usize> = HashMap::new();
    let mut kept = Vec::with_capacity(actions.len());

    for action in actions.into_iter().rev() {
        if let Some(count) = rejected.get_mut(&action.id) {
            if *count > 0 {
                *count -= 1;
                trace!(action = %action.id, "dropping rejected action");
                continue;
            }
        }
        if let Some(target) = action.rejected() {
            *rejected.entry(target).or_insert(0) += 1;
            continue;
        }
        kept.push(action);
    }
    kept.reverse();

    let mut seen = HashSet::with_capacity(kept.len());
    kept.retain(|action| seen.insert(action.id));
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagbot_event::{ActionKind, ActionSequence};

    #[test]
    fn reject_inverse() {
        let mut seq = ActionSequence::new();
        let a = seq.mint(ActionKind::toast("a"));
        let r = seq.mint(ActionKind::reject(a.id));
        assert!(resolve_rejected_actions(vec![a, r]).is_empty());
    }

    #[test]
    fn reject_of_absent_action_is_inert() {
        let mut seq = ActionSequence::new();
        let a = seq.mint(ActionKind::toast("a"));
        let r = seq.mint(ActionKind::reject(ActionId(999)));
        assert_eq!(resolve_rejected_actions(vec![a.clone(), r]), vec![a]);
    }

    #[test]
    fn reject_only_reaches_earlier_actions() {
        let mut seq = ActionSequence::new();
        let a = seq.mint(ActionKind::toast("a"));
        let r = seq.mint(ActionKind::reject(a.id));
        // Same action appearing again after the reject survives.
        let kept = resolve_rejected_actions(vec![a.clone(), r, a.clone()]);
        assert_eq!(kept, vec![a]);
    }

    #[test]
    fn each_reject_cancels_one_occurrence() {
        let mut seq = ActionSequence::new();
        let a = seq.mint(ActionKind::toast("a"));
        let r1 = seq.mint(ActionKind::reject(a.id));
        let r2 = seq.mint(ActionKind::reject(a.id));
        let kept = resolve_rejected_actions(vec![a.clone(), a.clone(), r1, r2]);
        assert!(kept.is_empty());
    }

    #[test]
    fn rejecting_a_reject() {
        let mut seq = ActionSequence::new();
        let a = seq.mint(ActionKind::toast("a"));
        let r1 = seq.mint(ActionKind::reject(a.id));
        let r2 = seq.mint(ActionKind::reject(r1.id));
        let kept = resolve_rejected_actions(vec![a.clone(), r1, r2]);
        assert_eq!(kept, vec![a]);
    }

    #[test]
    fn duplicates_are_removed_keeping_first() {
        let mut seq = ActionSequence::new();
        let a = seq.mint(ActionKind::toast("a"));
        let b = seq.mint(ActionKind::toast("b"));
        let kept = resolve_rejected_actions(vec![a.clone(), b.clone(), a.clone()]);
        assert_eq!(kept, vec![a, b]);
    }
}
