//! Test support: a sandbox whose scripts are Rust closures.
//!
//! Lets the dispatch engine be exercised without an interpreter. A tag's
//! script text is used as a key into the registered closures.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use tagbot_event::ShoutAction;
//! use tagbot_runtime::calculate_action_results;
//! use tagbot_runtime::testing::{bot, context, ScriptedSandbox};
//! use tagbot_types::TagValue;
//!
//! let sandbox = ScriptedSandbox::new().with_script("paint", |call| {
//!     let this = call.this.clone();
//!     call.host.set_tag(&this, "color", TagValue::from("red"))?;
//!     Ok(json!(null))
//! });
//! let mut ctx = context(vec![bot("a", json!({"#paint": "paint"}))], sandbox);
//!
//! let results = calculate_action_results(&mut ctx, &ShoutAction::new("paint")).unwrap();
//! assert_eq!(results.events.len(), 1);
//! assert!(results.results.is_empty());
//! ```

use crate::sandbox::{Script, ScriptArgument, ScriptHost, ScriptKind, ScriptSandbox};
use crate::{CalculationContext, DispatchError, SequentialIdSource};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::rc::Rc;
use tagbot_types::{Bot, BotId, TagValue, Tags};

/// One invocation of a scripted closure.
pub struct ScriptCall<'a, 'h> {
    /// Bot bound to `this`.
    pub this: &'a BotId,
    /// Tag the script came from.
    pub tag: &'a str,
    /// Listener or formula.
    pub kind: ScriptKind,
    /// The value bound to `that`.
    pub argument: ScriptArgument<'a>,
    /// Host callbacks.
    pub host: &'a mut (dyn ScriptHost + 'h),
}

impl ScriptCall<'_, '_> {
    /// The explicit argument, if any.
    #[must_use]
    pub fn that(&self) -> Option<&JsonValue> {
        match &self.argument {
            ScriptArgument::Value(value) => Some(&**value),
            _ => None,
        }
    }

    /// Mutable access to the explicit argument, if any.
    pub fn that_mut(&mut self) -> Option<&mut JsonValue> {
        match &mut self.argument {
            ScriptArgument::Value(value) => Some(&mut **value),
            _ => None,
        }
    }

    /// Positional targets of an argument-less shout.
    #[must_use]
    pub fn targets(&self) -> &[BotId] {
        match &self.argument {
            ScriptArgument::Targets(ids) => *ids,
            _ => &[],
        }
    }
}

type ScriptFn = Rc<dyn Fn(&mut ScriptCall<'_, '_>) -> Result<JsonValue, DispatchError>>;

/// Sandbox running registered closures.
///
/// Every run costs [`with_cost`](Self::with_cost) energy units (1 by
/// default). Formula sources are looked up the same way as listener
/// sources.
#[derive(Clone)]
pub struct ScriptedSandbox {
    scripts: HashMap<String, ScriptFn>,
    cost: u64,
}

impl ScriptedSandbox {
    /// Creates a sandbox with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            cost: 1,
        }
    }

    /// Registers `script` under `name`.
    #[must_use]
    pub fn with_script<F>(mut self, name: &str, script: F) -> Self
    where
        F: Fn(&mut ScriptCall<'_, '_>) -> Result<JsonValue, DispatchError> + 'static,
    {
        self.scripts.insert(name.to_string(), Rc::new(script));
        self
    }

    /// Sets the energy cost of one run.
    #[must_use]
    pub fn with_cost(mut self, units: u64) -> Self {
        self.cost = units;
        self
    }
}

impl Default for ScriptedSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptSandbox for ScriptedSandbox {
    fn run(
        &self,
        script: &Script<'_>,
        argument: ScriptArgument<'_>,
        host: &mut dyn ScriptHost,
    ) -> Result<JsonValue, DispatchError> {
        host.energy().consume(self.cost)?;
        let name = script.source.trim();
        let Some(f) = self.scripts.get(name) else {
            return Err(DispatchError::script(
                script.this,
                script.tag,
                format!("unknown script '{name}'"),
            ));
        };
        let mut call = ScriptCall {
            this: script.this,
            tag: script.tag,
            kind: script.kind,
            argument,
            host,
        };
        f(&mut call)
    }
}

/// Builds a bot from a JSON tag object. Non-object input yields no tags.
#[must_use]
pub fn bot(id: &str, tags: JsonValue) -> Bot {
    let tags: Tags = match tags {
        JsonValue::Object(map) => map
            .into_iter()
            .map(|(tag, value)| (tag, TagValue::from_json(value)))
            .collect(),
        _ => Tags::new(),
    };
    Bot::with_tags(id, tags)
}

/// A context over `bots` minting `new-1`, `new-2`, … for created bots.
#[must_use]
pub fn context(bots: Vec<Bot>, sandbox: ScriptedSandbox) -> CalculationContext {
    CalculationContext::new(bots, Rc::new(sandbox)).with_id_source(SequentialIdSource::new("new"))
}
