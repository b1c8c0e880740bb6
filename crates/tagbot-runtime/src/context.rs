//! Per-batch calculation context.

use crate::config::RuntimeConfig;
use crate::ids::{BotIdSource, UuidIdSource};
use crate::sandbox::ScriptSandbox;
use crate::{EnergyMeter, TagUpdateCapture};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tagbot_event::{ActionId, ActionKind, ActionSequence, BotAction};
use tagbot_types::{tag_name, Bot, BotId, BotsState, TagValue, Tags, TAG_PREFIX};

/// Everything one dispatch batch reads and accumulates.
///
/// Owns an id-sorted copy of the participating bots. The copy is local:
/// `add_bot`/`remove_bot` keep it in step with the actions the batch has
/// emitted so far, but nothing is ever written back to a [`BotsState`].
///
/// # Example
///
/// ```
/// use std::rc::Rc;
/// use tagbot_runtime::testing::ScriptedSandbox;
/// use tagbot_runtime::CalculationContext;
/// use tagbot_types::Bot;
///
/// let context = CalculationContext::new(
///     [Bot::new("b"), Bot::new("a")],
///     Rc::new(ScriptedSandbox::new()),
/// );
/// let ids: Vec<_> = context.objects().iter().map(|b| b.id.as_str()).collect();
/// assert_eq!(ids, ["a", "b"]);
/// ```
pub struct CalculationContext {
    objects: Vec<Bot>,
    cache: HashMap<(BotId, String), TagValue>,
    capture: TagUpdateCapture,
    sequence: ActionSequence,
    sandbox: Rc<dyn ScriptSandbox>,
    energy: Rc<EnergyMeter>,
    ids: Box<dyn BotIdSource>,
    user_id: Option<BotId>,
    config: RuntimeConfig,
}

impl CalculationContext {
    /// Creates a context over `bots` with default configuration.
    ///
    /// Later duplicates of an id replace earlier ones.
    pub fn new(bots: impl IntoIterator<Item = Bot>, sandbox: Rc<dyn ScriptSandbox>) -> Self {
        let mut objects: Vec<Bot> = Vec::new();
        for bot in bots {
            insert_sorted(&mut objects, bot);
        }
        let config = RuntimeConfig::default();
        Self {
            objects,
            cache: HashMap::new(),
            capture: TagUpdateCapture::new(),
            sequence: ActionSequence::new(),
            sandbox,
            energy: Rc::new(EnergyMeter::new(config.energy.budget)),
            ids: Box::new(UuidIdSource),
            user_id: None,
            config,
        }
    }

    /// Creates a context over the active bots of `state`.
    pub fn from_state(state: &BotsState, sandbox: Rc<dyn ScriptSandbox>) -> Self {
        Self::new(state.active().cloned(), sandbox)
    }

    /// Sets the acting user.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<BotId>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Replaces the id source used by `create`.
    #[must_use]
    pub fn with_id_source(mut self, ids: impl BotIdSource + 'static) -> Self {
        self.ids = Box::new(ids);
        self
    }

    /// Applies `config`. Resets the energy meter to the configured budget.
    #[must_use]
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.energy = Rc::new(EnergyMeter::new(config.energy.budget));
        self.config = config;
        self
    }

    /// Replaces the action sequence.
    #[must_use]
    pub fn with_sequence(mut self, sequence: ActionSequence) -> Self {
        self.sequence = sequence;
        self
    }

    /// Bots, ascending by id.
    #[must_use]
    pub fn objects(&self) -> &[Bot] {
        &self.objects
    }

    /// Ids of all bots, ascending.
    #[must_use]
    pub fn bot_ids(&self) -> Vec<BotId> {
        self.objects.iter().map(|bot| bot.id.clone()).collect()
    }

    /// Looks up a bot by id.
    #[must_use]
    pub fn bot(&self, id: &str) -> Option<&Bot> {
        self.position(id).ok().map(|i| &self.objects[i])
    }

    /// Whether `id` is in the context.
    #[must_use]
    pub fn has_bot(&self, id: &str) -> bool {
        self.position(id).is_ok()
    }

    /// Inserts `bot` in id order, replacing a bot with the same id.
    pub fn add_bot(&mut self, bot: Bot) {
        insert_sorted(&mut self.objects, bot);
    }

    /// Removes and returns the bot with `id`.
    pub fn remove_bot(&mut self, id: &BotId) -> Option<Bot> {
        let index = self.position(id.as_str()).ok()?;
        self.cache.retain(|(bot, _), _| bot != id);
        self.capture.forget(id);
        Some(self.objects.remove(index))
    }

    /// Raw tags of `id` with pending writes applied.
    #[must_use]
    pub fn merged_tags(&self, id: &BotId) -> Option<Tags> {
        self.bot(id.as_str()).map(|bot| self.capture.merged_tags(bot))
    }

    /// The key `tag` refers to on `id`.
    ///
    /// A `#name` spelling that the bot does not hold verbatim (pending or
    /// stored) means the data tag `name`.
    #[must_use]
    pub fn tag_key<'t>(&self, id: &BotId, tag: &'t str) -> &'t str {
        if !tag.starts_with(TAG_PREFIX) || self.capture.pending(id, tag).is_some() {
            return tag;
        }
        match self.bot(id.as_str()) {
            Some(bot) if bot.tags.contains_key(tag) => tag,
            _ => tag_name(tag),
        }
    }

    /// Pending-aware raw value; formulas come back unevaluated.
    #[must_use]
    pub fn raw_tag(&self, id: &BotId, tag: &str) -> TagValue {
        let tag = self.tag_key(id, tag);
        if let Some(value) = self.capture.pending(id, tag) {
            return value.clone();
        }
        self.bot(id.as_str())
            .map(|bot| bot.tag(tag).clone())
            .unwrap_or_default()
    }

    /// Memoized formula result.
    #[must_use]
    pub fn cached(&self, id: &BotId, tag: &str) -> Option<&TagValue> {
        self.cache.get(&(id.clone(), tag.to_string()))
    }

    /// Memoizes a formula result.
    pub fn cache_value(&mut self, id: &BotId, tag: &str, value: TagValue) {
        self.cache.insert((id.clone(), tag.to_string()), value);
    }

    /// Records a pending write and invalidates that one cache entry.
    pub fn set_tag(&mut self, id: &BotId, tag: &str, value: TagValue) -> TagValue {
        self.cache.remove(&(id.clone(), tag.to_string()));
        self.capture.set_tag(id, tag, value)
    }

    /// The pending-write capture.
    #[must_use]
    pub fn capture(&self) -> &TagUpdateCapture {
        &self.capture
    }

    /// Flushes the innermost write frame into `UpdateBot` actions. Outside a
    /// listener run that is the writes made by no listener.
    pub fn get_bot_updates(&mut self) -> Vec<BotAction> {
        self.capture.get_bot_updates(&mut self.sequence)
    }

    /// Opens a write frame for one listener run.
    pub fn begin_updates(&mut self) {
        self.capture.push_frame();
    }

    /// Closes the innermost write frame into `UpdateBot` actions.
    pub fn end_updates(&mut self) -> Vec<BotAction> {
        self.capture.pop_frame(&mut self.sequence)
    }

    /// Makes every later action id greater than `id`.
    pub fn reserve_action_ids(&mut self, id: ActionId) {
        self.sequence.advance_past(id);
    }

    /// Wraps `kind` with a fresh action id.
    pub fn mint(&mut self, kind: ActionKind) -> BotAction {
        self.sequence.mint(kind)
    }

    /// A fresh bot id.
    pub fn mint_bot_id(&mut self) -> BotId {
        self.ids.next_bot_id()
    }

    /// The batch energy meter.
    #[must_use]
    pub fn energy(&self) -> &Rc<EnergyMeter> {
        &self.energy
    }

    /// The script sandbox.
    #[must_use]
    pub fn sandbox(&self) -> Rc<dyn ScriptSandbox> {
        Rc::clone(&self.sandbox)
    }

    /// The acting user.
    #[must_use]
    pub fn user_id(&self) -> Option<&BotId> {
        self.user_id.as_ref()
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn position(&self, id: &str) -> Result<usize, usize> {
        self.objects.binary_search_by(|bot| bot.id.as_str().cmp(id))
    }
}

impl fmt::Debug for CalculationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalculationContext")
            .field("objects", &self.objects.len())
            .field("cache", &self.cache.len())
            .field("capture", &self.capture)
            .field("sequence", &self.sequence)
            .field("energy", &self.energy)
            .field("user_id", &self.user_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn insert_sorted(objects: &mut Vec<Bot>, bot: Bot) {
    match objects.binary_search_by(|probe| probe.id.cmp(&bot.id)) {
        Ok(i) => objects[i] = bot,
        Err(i) => objects.insert(i, bot),
    }
}
