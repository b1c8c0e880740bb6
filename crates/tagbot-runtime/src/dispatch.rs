//! Shout and whisper dispatch.
//!
//! # Flow
//!
//! ```text
//! dispatch(shout)
//!   │
//!   ├─ resolve targets (all bots, or the whisper list; sorted by default)
//!   │
//!   ├─ for each listening target, every matching listener script:
//!   │    ├─ open a write frame
//!   │    ├─ run the script; it calls back through ScriptHost
//!   │    │    (get_tag / set_tag / emit / shout / create / destroy)
//!   │    └─ close the frame: one UpdateBot per written bot
//!   │
//!   └─ onShout (same targets) + onAnyShout (all bots), unless this is
//!      itself a meta shout; their scripts may rewrite `responses`
//! ```
//!
//! Everything runs depth-first on the calling thread. A nested `shout`
//! returns only after its own meta shouts have finished.

use crate::config::{RuntimeConfig, TagNamesConfig};
use crate::destroy::{calculate_destroy_bot_events, TagSource};
use crate::listener::{matching_listeners, Listener, TagFilter};
use crate::resolve::resolve_rejected_actions;
use crate::sandbox::{Script, ScriptArgument, ScriptHost, ScriptKind};
use crate::{CalculationContext, DispatchError, EnergyMeter};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashSet;
use std::rc::Rc;
use tagbot_event::{flatten_transactions, ActionKind, BotAction, ShoutAction};
use tagbot_types::{Bot, BotId, TagValue, Tags};
use tracing::{debug, trace, warn};

/// Sent to the same targets after every shout.
pub const ON_SHOUT: &str = "onShout";
/// Sent to every bot after every shout.
pub const ON_ANY_SHOUT: &str = "onAnyShout";
/// Sent to every bot for each action of a batch.
pub const ON_ANY_ACTION: &str = "onAnyAction";
/// Whispered to a freshly created bot.
pub const ON_CREATE: &str = "onCreate";
/// Whispered to bots about to be destroyed.
pub const ON_DESTROY: &str = "onDestroy";
/// Listeners of this event receive their partner as `that.bot`.
pub const COMBINE: &str = "combine";

/// Outcome of one dispatch call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionResults {
    /// Emitted actions, in execution order.
    pub events: Vec<BotAction>,
    /// Non-null, non-empty listener return values.
    pub results: Vec<JsonValue>,
    /// Bots that ran at least one listener.
    pub listeners: Vec<BotId>,
}

impl ActionResults {
    /// Whether any listener ran.
    #[must_use]
    pub fn has_listeners(&self) -> bool {
        !self.listeners.is_empty()
    }
}

/// The explicit state of one dispatch batch, handed to every script run.
///
/// Holds a stack of action buffers: each script run pushes one, every
/// action it emits (directly or through nested shouts) lands in it, and
/// the run pops it when done.
pub struct DispatchContext<'c> {
    context: &'c mut CalculationContext,
    buffers: Vec<Vec<BotAction>>,
    evaluating: Vec<(BotId, String)>,
    destroying: HashSet<BotId>,
    depth: usize,
    user_id: Option<BotId>,
}

impl<'c> DispatchContext<'c> {
    /// Creates a dispatch context over `context`.
    pub fn new(context: &'c mut CalculationContext) -> Self {
        let user_id = context.user_id().cloned();
        Self {
            context,
            buffers: vec![Vec::new()],
            evaluating: Vec::new(),
            destroying: HashSet::new(),
            depth: 0,
            user_id,
        }
    }

    /// Overrides the acting user when `user_id` is set.
    #[must_use]
    pub fn with_user(mut self, user_id: Option<BotId>) -> Self {
        if user_id.is_some() {
            self.user_id = user_id;
        }
        self
    }

    /// The underlying calculation context.
    #[must_use]
    pub fn context(&self) -> &CalculationContext {
        self.context
    }

    /// Dispatches `shout` with a shared, mutable `argument`.
    ///
    /// `argument = None` binds the targets positionally. Listener scripts
    /// may modify the argument; later listeners see the modification.
    ///
    /// # Errors
    ///
    /// Any script failure, energy exhaustion, formula cycle, or depth
    /// overflow aborts the call.
    pub fn dispatch(
        &mut self,
        shout: &ShoutAction,
        argument: &mut Option<JsonValue>,
        execute_on_shout: bool,
    ) -> Result<ActionResults, DispatchError> {
        self.enter()?;
        self.buffers.push(Vec::new());
        let outcome = self.run_shout(shout, argument, execute_on_shout);
        let events = self.buffers.pop().unwrap_or_default();
        self.depth -= 1;

        let (results, listeners) = outcome?;
        debug!(
            event = %shout.event_name,
            listeners = listeners.len(),
            events = events.len(),
            depth = self.depth,
            "shout finished"
        );
        Ok(ActionResults {
            events,
            results,
            listeners,
        })
    }

    /// Flushes tag writes made outside any listener run.
    pub fn flush_updates(&mut self) -> Vec<BotAction> {
        self.context.get_bot_updates()
    }

    fn enter(&mut self) -> Result<(), DispatchError> {
        let max_depth = self.context.config().dispatch.max_depth;
        if self.depth >= max_depth {
            return Err(DispatchError::DepthExceeded {
                depth: self.depth + 1,
                max_depth,
            });
        }
        self.depth += 1;
        Ok(())
    }

    fn push_events(&mut self, events: impl IntoIterator<Item = BotAction>) {
        match self.buffers.last_mut() {
            Some(buffer) => buffer.extend(events),
            None => self.buffers.push(events.into_iter().collect()),
        }
    }

    fn resolve_targets(&self, shout: &ShoutAction) -> Vec<BotId> {
        let mut targets = match &shout.bot_ids {
            None => self.context.bot_ids(),
            Some(ids) => ids
                .iter()
                .filter(|id| {
                    let known = self.context.has_bot(id.as_str());
                    if !known {
                        warn!(bot = %id, event = %shout.event_name, "skipping unknown target");
                    }
                    known
                })
                .cloned()
                .collect(),
        };
        if shout.sort_bot_ids {
            targets.sort();
        }
        targets
    }

    fn run_shout(
        &mut self,
        shout: &ShoutAction,
        argument: &mut Option<JsonValue>,
        execute_on_shout: bool,
    ) -> Result<(Vec<JsonValue>, Vec<BotId>), DispatchError> {
        let targets = self.resolve_targets(shout);
        debug!(
            event = %shout.event_name,
            targets = targets.len(),
            depth = self.depth,
            "dispatching shout"
        );

        let listening_tag = self.context.config().tags.listening.clone();
        let mut results = Vec::new();
        let mut listeners = Vec::new();

        for bot_id in &targets {
            // An earlier listener may have destroyed it.
            if !self.context.has_bot(bot_id.as_str()) {
                continue;
            }
            if !self.get_tag(bot_id, &listening_tag)?.as_flag(true) {
                trace!(bot = %bot_id, "not listening");
                continue;
            }

            let scripts = self
                .context
                .merged_tags(bot_id)
                .map(|tags| matching_listeners(&tags, &shout.event_name))
                .unwrap_or_default();

            let mut ran = false;
            for listener in &scripts {
                let partner = self.find_partner(bot_id, &targets, listener.filter.as_ref())?;
                if listener.filter.is_some() && partner.is_none() {
                    continue;
                }
                ran = true;

                let (events, value) = if shout.event_name == COMBINE {
                    let partner = partner.map(|id| self.bot_json(&id));
                    let mut combined = combine_argument(argument.as_ref(), partner);
                    self.run_listener(bot_id, listener, ScriptArgument::Value(&mut combined))?
                } else {
                    match argument.as_mut() {
                        Some(value) => {
                            self.run_listener(bot_id, listener, ScriptArgument::Value(value))?
                        }
                        None => {
                            self.run_listener(bot_id, listener, ScriptArgument::Targets(&targets))?
                        }
                    }
                };
                self.push_events(events);
                if is_result(&value) {
                    results.push(value);
                }
            }

            if ran {
                listeners.push(bot_id.clone());
            }
        }

        if execute_on_shout {
            results =
                self.run_meta_shouts(shout, argument.as_ref(), &targets, &listeners, results)?;
        }
        Ok((results, listeners))
    }

    /// Sends `onShout` and `onAnyShout`, lending `results` to them as
    /// `responses`, and returns whatever they left there.
    fn run_meta_shouts(
        &mut self,
        shout: &ShoutAction,
        argument: Option<&JsonValue>,
        targets: &[BotId],
        listeners: &[BotId],
        results: Vec<JsonValue>,
    ) -> Result<Vec<JsonValue>, DispatchError> {
        let mut meta = Some(json!({
            "that": argument.cloned().unwrap_or(JsonValue::Null),
            "name": shout.event_name,
            "targets": targets.iter().map(|id| self.bot_json(id)).collect::<Vec<_>>(),
            "listeners": listeners.iter().map(|id| self.bot_json(id)).collect::<Vec<_>>(),
            "responses": results,
        }));

        let live_targets: Vec<BotId> = targets
            .iter()
            .filter(|id| self.context.has_bot(id.as_str()))
            .cloned()
            .collect();
        let on_shout = ShoutAction {
            event_name: ON_SHOUT.to_string(),
            bot_ids: Some(live_targets),
            user_id: shout.user_id.clone(),
            argument: None,
            sort_bot_ids: false,
        };
        let outcome = self.dispatch(&on_shout, &mut meta, false)?;
        self.push_events(outcome.events);

        let on_any_shout = ShoutAction {
            event_name: ON_ANY_SHOUT.to_string(),
            bot_ids: None,
            user_id: shout.user_id.clone(),
            argument: None,
            sort_bot_ids: true,
        };
        let outcome = self.dispatch(&on_any_shout, &mut meta, false)?;
        self.push_events(outcome.events);

        Ok(take_responses(meta))
    }

    /// The first other target satisfying `filter` (or any other target
    /// when there is no filter).
    fn find_partner(
        &mut self,
        bot_id: &BotId,
        targets: &[BotId],
        filter: Option<&TagFilter>,
    ) -> Result<Option<BotId>, DispatchError> {
        for other in targets {
            if other == bot_id || !self.context.has_bot(other.as_str()) {
                continue;
            }
            match filter {
                None => return Ok(Some(other.clone())),
                Some(filter) => {
                    if filter.matches(&self.get_tag(other, &filter.tag)?) {
                        return Ok(Some(other.clone()));
                    }
                }
            }
        }
        Ok(None)
    }

    fn run_listener(
        &mut self,
        bot_id: &BotId,
        listener: &Listener,
        argument: ScriptArgument<'_>,
    ) -> Result<(Vec<BotAction>, JsonValue), DispatchError> {
        trace!(bot = %bot_id, tag = %listener.tag, "running listener");
        let script = Script {
            this: bot_id,
            tag: &listener.tag,
            source: &listener.script,
            kind: ScriptKind::Listener,
        };
        self.context.begin_updates();
        let outcome = self.run_script(&script, argument);
        let updates = self.context.end_updates();
        let (mut events, value) = outcome?;
        events.extend(updates);
        Ok((events, value))
    }

    fn run_script(
        &mut self,
        script: &Script<'_>,
        argument: ScriptArgument<'_>,
    ) -> Result<(Vec<BotAction>, JsonValue), DispatchError> {
        let sandbox = self.context.sandbox();
        self.buffers.push(Vec::new());
        let result = sandbox.run(script, argument, self);
        let events = self.buffers.pop().unwrap_or_default();

        // A script may have swallowed the exhaustion error.
        if self.context.energy().is_exhausted() {
            return Err(DispatchError::OutOfEnergy);
        }
        result.map(|value| (events, value))
    }

    fn evaluate_formula(
        &mut self,
        id: &BotId,
        tag: &str,
        expression: &str,
    ) -> Result<TagValue, DispatchError> {
        if let Some(value) = self.context.cached(id, tag) {
            return Ok(value.clone());
        }
        if self.evaluating.iter().any(|(bot, t)| bot == id && t == tag) {
            return Err(DispatchError::FormulaCycle {
                bot: id.clone(),
                tag: tag.to_string(),
            });
        }

        self.enter()?;
        self.evaluating.push((id.clone(), tag.to_string()));
        let script = Script {
            this: id,
            tag,
            source: expression,
            kind: ScriptKind::Formula,
        };
        let result = self.run_script(&script, ScriptArgument::Nothing);
        self.evaluating.pop();
        self.depth -= 1;

        let (events, value) = result?;
        self.push_events(events);
        let value = TagValue::from_json(value);
        trace!(bot = %id, tag, "formula evaluated");
        self.context.cache_value(id, tag, value.clone());
        Ok(value)
    }

    /// `{id, tags}` snapshot with pending writes applied.
    fn bot_json(&self, id: &BotId) -> JsonValue {
        let tags: Map<String, JsonValue> = self
            .context
            .merged_tags(id)
            .unwrap_or_default()
            .iter()
            .map(|(tag, value)| (tag.clone(), value.to_json()))
            .collect();
        json!({ "id": id, "tags": tags })
    }
}

impl ScriptHost for DispatchContext<'_> {
    fn user_id(&self) -> Option<BotId> {
        self.user_id.clone()
    }

    fn energy(&self) -> Rc<EnergyMeter> {
        Rc::clone(self.context.energy())
    }

    fn config(&self) -> &RuntimeConfig {
        self.context.config()
    }

    fn bot_ids(&self) -> Vec<BotId> {
        self.context.bot_ids()
    }

    fn has_bot(&self, id: &str) -> bool {
        self.context.has_bot(id)
    }

    fn bot_tags(&self, id: &BotId) -> Option<Tags> {
        self.context.merged_tags(id)
    }

    fn get_tag(&mut self, id: &BotId, tag: &str) -> Result<TagValue, DispatchError> {
        let tag = self.context.tag_key(id, tag);
        // Pending writes are returned as written.
        if let Some(value) = self.context.capture().pending(id, tag) {
            return Ok(value.clone());
        }
        let raw = match self.context.bot(id.as_str()) {
            Some(bot) => bot.tag(tag).clone(),
            None => return Ok(TagValue::Null),
        };
        match raw {
            TagValue::Formula(expression) => self.evaluate_formula(id, tag, &expression),
            other => Ok(other),
        }
    }

    fn set_tag(
        &mut self,
        id: &BotId,
        tag: &str,
        value: TagValue,
    ) -> Result<TagValue, DispatchError> {
        let tag = self.context.tag_key(id, tag);
        if !self.context.has_bot(id.as_str()) {
            warn!(bot = %id, tag, "ignoring write to unknown bot");
            return Ok(value);
        }
        trace!(bot = %id, tag, "set tag");
        Ok(self.context.set_tag(id, tag, value))
    }

    fn emit(&mut self, kind: ActionKind) -> BotAction {
        let action = self.context.mint(kind);
        trace!(action = %action.id, kind = action.type_name(), "emit");
        self.push_events([action.clone()]);
        action
    }

    fn shout(&mut self, shout: ShoutAction) -> Result<Vec<JsonValue>, DispatchError> {
        let mut argument = shout.argument.clone();
        let outcome = self.dispatch(&shout, &mut argument, true)?;
        self.push_events(outcome.events);
        Ok(outcome.results)
    }

    fn create_bot(&mut self, creator: Option<BotId>, tags: Tags) -> Result<BotId, DispatchError> {
        let id = self.context.mint_bot_id();
        let mut tags: Tags = tags.into_iter().filter(|(_, v)| !v.is_null()).collect();
        if let Some(creator) = creator {
            let creator_tag = self.context.config().tags.creator.clone();
            tags.insert(creator_tag, TagValue::String(creator.to_string()));
        }
        let bot = Bot::with_tags(id.clone(), tags);
        debug!(bot = %id, "creating bot");

        self.emit(ActionKind::add_bot(bot.clone()));
        self.context.add_bot(bot);

        let on_create = ShoutAction::new(ON_CREATE).to([id.clone()]);
        let outcome = self.dispatch(&on_create, &mut None, true)?;
        self.push_events(outcome.events);
        Ok(id)
    }

    fn destroy_bot(&mut self, id: &BotId) -> Result<(), DispatchError> {
        if self.destroying.contains(id) || !self.context.has_bot(id.as_str()) {
            return Ok(());
        }
        let removals = calculate_destroy_bot_events(self, id)?;
        let removed: Vec<BotId> = removals
            .iter()
            .filter_map(|action| match &action.kind {
                ActionKind::RemoveBot { bot_id } => Some(bot_id.clone()),
                _ => None,
            })
            .collect();
        if removed.is_empty() {
            return Ok(());
        }
        debug!(bot = %id, cascade = removed.len(), "destroying bot");
        self.destroying.extend(removed.iter().cloned());

        let on_destroy = ShoutAction::new(ON_DESTROY).to(removed.clone()).unsorted();
        let outcome = self.dispatch(&on_destroy, &mut None, true);
        for bot_id in &removed {
            self.destroying.remove(bot_id);
        }
        self.push_events(outcome?.events);

        for bot_id in &removed {
            self.context.remove_bot(bot_id);
        }
        self.push_events(removals);
        Ok(())
    }
}

/// Evaluates formulas, unlike the raw [`CalculationContext`] source.
impl TagSource for DispatchContext<'_> {
    fn candidate_ids(&self) -> Vec<BotId> {
        self.context.bot_ids()
    }

    fn tag_value(&mut self, id: &BotId, tag: &str) -> Result<TagValue, DispatchError> {
        self.get_tag(id, tag)
    }

    fn tag_names(&self) -> &TagNamesConfig {
        &self.context.config().tags
    }

    fn mint_action(&mut self, kind: ActionKind) -> BotAction {
        self.context.mint(kind)
    }
}

fn is_result(value: &JsonValue) -> bool {
    !matches!(value, JsonValue::Null) && value.as_str() != Some("")
}

fn combine_argument(argument: Option<&JsonValue>, partner: Option<JsonValue>) -> JsonValue {
    let partner = partner.unwrap_or(JsonValue::Null);
    match argument {
        Some(JsonValue::Object(map)) => {
            let mut map = map.clone();
            map.insert("bot".to_string(), partner);
            JsonValue::Object(map)
        }
        _ => json!({ "bot": partner }),
    }
}

/// Reads `responses` back out of a meta-shout argument. Scripts may have
/// replaced it with an empty table, which serializes as an object.
fn take_responses(meta: Option<JsonValue>) -> Vec<JsonValue> {
    let responses = match meta {
        Some(JsonValue::Object(mut map)) => map.remove("responses"),
        _ => None,
    };
    match responses {
        Some(JsonValue::Array(items)) => items,
        Some(JsonValue::Object(map)) if map.is_empty() => Vec::new(),
        None | Some(JsonValue::Null) => Vec::new(),
        Some(other) => vec![other],
    }
}

/// Dispatches `shout` over `context`.
///
/// # Example
///
/// ```
/// use std::rc::Rc;
/// use serde_json::json;
/// use tagbot_event::ShoutAction;
/// use tagbot_runtime::testing::ScriptedSandbox;
/// use tagbot_runtime::{calculate_action_results, CalculationContext};
/// use tagbot_types::Bot;
///
/// let sandbox = ScriptedSandbox::new().with_script("answer", |_| Ok(json!(42)));
/// let mut context = CalculationContext::new(
///     [Bot::new("a").tag_with("#ask", "answer")],
///     Rc::new(sandbox),
/// );
///
/// let results = calculate_action_results(&mut context, &ShoutAction::new("ask")).unwrap();
/// assert_eq!(results.results, vec![json!(42)]);
/// assert!(results.has_listeners());
/// ```
///
/// # Errors
///
/// Returns the first fatal [`DispatchError`]; no partial events.
pub fn calculate_action_results(
    context: &mut CalculationContext,
    shout: &ShoutAction,
) -> Result<ActionResults, DispatchError> {
    calculate_action_results_with(context, shout, true)
}

/// [`calculate_action_results`] with control over the meta shouts.
///
/// # Errors
///
/// Returns the first fatal [`DispatchError`]; no partial events.
pub fn calculate_action_results_with(
    context: &mut CalculationContext,
    shout: &ShoutAction,
    execute_on_shout: bool,
) -> Result<ActionResults, DispatchError> {
    let mut dispatch = DispatchContext::new(context).with_user(shout.user_id.clone());
    let mut argument = shout.argument.clone();
    let mut results = dispatch.dispatch(shout, &mut argument, execute_on_shout)?;
    results.events.extend(dispatch.flush_updates());
    Ok(results)
}

/// Runs a batch of actions.
///
/// Every input action is first announced with `onAnyAction` (argument
/// `{action}`), so scripts may reject it. Surviving shouts are then
/// dispatched and replaced by their events; other actions pass through.
/// The combined list is resolved with [`resolve_rejected_actions`].
///
/// # Errors
///
/// Returns the first fatal [`DispatchError`]; no partial events.
pub fn calculate_actions(
    context: &mut CalculationContext,
    actions: Vec<BotAction>,
) -> Result<Vec<BotAction>, DispatchError> {
    let actions = flatten_transactions(actions);
    if let Some(max) = actions.iter().map(|action| action.id).max() {
        context.reserve_action_ids(max);
    }

    let mut dispatch = DispatchContext::new(context);
    let mut screened = Vec::with_capacity(actions.len());
    for action in actions {
        let announced = serde_json::to_value(&action)
            .map_err(|e| DispatchError::InvalidArgument(e.to_string()))?;
        let mut argument = Some(json!({ "action": announced }));
        let outcome = dispatch.dispatch(&ShoutAction::new(ON_ANY_ACTION), &mut argument, false)?;
        // Rejects only reach actions listed before them.
        screened.push(action);
        screened.extend(outcome.events);
    }

    let mut out = Vec::new();
    for action in resolve_rejected_actions(screened) {
        match &action.kind {
            ActionKind::Shout(shout) => {
                let mut argument = shout.argument.clone();
                let mut nested = DispatchContext::new(&mut *dispatch.context)
                    .with_user(shout.user_id.clone());
                let outcome = nested.dispatch(shout, &mut argument, true)?;
                out.extend(outcome.events);
            }
            _ => out.push(action),
        }
    }
    out.extend(dispatch.flush_updates());
    Ok(resolve_rejected_actions(out))
}
