//! The seam between the dispatch engine and a script interpreter.
//!
//! ```text
//! dispatch ──run(script, argument, host)──▶ ScriptSandbox
//!    ▲                                          │
//!    └──── get_tag / set_tag / shout / emit ────┘
//!                  (ScriptHost)
//! ```
//!
//! The engine knows nothing about the script language. A sandbox receives
//! the script text plus an explicit [`ScriptHost`] for the duration of one
//! run; every library function it exposes calls back through that host.
//! Nothing is stored in globals between runs.

use crate::config::RuntimeConfig;
use crate::{DispatchError, EnergyMeter};
use serde_json::Value as JsonValue;
use std::rc::Rc;
use tagbot_event::{ActionKind, BotAction, ShoutAction};
use tagbot_types::{BotId, TagValue, Tags};

/// What a script is being run as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    /// A listener: statements, optional `return`.
    Listener,
    /// A formula: one expression whose value is the tag value.
    Formula,
}

/// One script to run.
#[derive(Debug, Clone, Copy)]
pub struct Script<'a> {
    /// Bot bound to `this`.
    pub this: &'a BotId,
    /// Tag the script was read from.
    pub tag: &'a str,
    /// Script text, with any `@` / `=` marker already removed.
    pub source: &'a str,
    /// Listener or formula.
    pub kind: ScriptKind,
}

/// The value bound to `that`.
#[derive(Debug)]
pub enum ScriptArgument<'a> {
    /// An explicit argument. The sandbox writes the script's final view
    /// of it back, so listeners of one shout share one argument object.
    Value(&'a mut JsonValue),
    /// No argument: targets are bound positionally (`arg0`, `arg1`, …)
    /// and `that` aliases the second one.
    Targets(&'a [BotId]),
    /// Nothing is bound (formulas).
    Nothing,
}

/// Executes scripts.
pub trait ScriptSandbox {
    /// Runs `script` and returns its result.
    ///
    /// # Errors
    ///
    /// Any error is fatal for the whole dispatch call. Errors raised by
    /// host callbacks must be returned unchanged.
    fn run(
        &self,
        script: &Script<'_>,
        argument: ScriptArgument<'_>,
        host: &mut dyn ScriptHost,
    ) -> Result<JsonValue, DispatchError>;
}

/// Operations a running script may perform.
///
/// Implemented by the dispatch engine and handed to the sandbox for
/// every run.
pub trait ScriptHost {
    /// Acting user, if any.
    fn user_id(&self) -> Option<BotId>;

    /// Batch energy meter.
    fn energy(&self) -> Rc<EnergyMeter>;

    /// Effective configuration.
    fn config(&self) -> &RuntimeConfig;

    /// Ids of every bot in the context, ascending.
    fn bot_ids(&self) -> Vec<BotId>;

    /// Whether `id` is in the context.
    fn has_bot(&self, id: &str) -> bool;

    /// Raw tags of `id` with pending writes applied; formulas are not
    /// evaluated.
    fn bot_tags(&self, id: &BotId) -> Option<Tags>;

    /// Pending-aware, formula-evaluated tag value. Missing bots and tags
    /// read as null.
    ///
    /// # Errors
    ///
    /// Propagates formula failures.
    fn get_tag(&mut self, id: &BotId, tag: &str) -> Result<TagValue, DispatchError>;

    /// Records a pending write and returns `value`.
    ///
    /// # Errors
    ///
    /// Reserved for hosts that validate writes.
    fn set_tag(&mut self, id: &BotId, tag: &str, value: TagValue)
        -> Result<TagValue, DispatchError>;

    /// Appends an action to the running script's output.
    fn emit(&mut self, kind: ActionKind) -> BotAction;

    /// Runs a nested shout and returns its results.
    ///
    /// # Errors
    ///
    /// Propagates any failure of the nested dispatch.
    fn shout(&mut self, shout: ShoutAction) -> Result<Vec<JsonValue>, DispatchError>;

    /// Creates a bot, whispers `onCreate` to it and returns its id.
    ///
    /// # Errors
    ///
    /// Propagates failures of the `onCreate` listeners.
    fn create_bot(&mut self, creator: Option<BotId>, tags: Tags) -> Result<BotId, DispatchError>;

    /// Destroys `id` and its creator subtree.
    ///
    /// # Errors
    ///
    /// Propagates failures of the `onDestroy` listeners.
    fn destroy_bot(&mut self, id: &BotId) -> Result<(), DispatchError>;
}
