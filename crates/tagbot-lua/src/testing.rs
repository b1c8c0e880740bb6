//! Lua end-to-end testing harness.
//!
//! Wraps a [`CalculationContext`] backed by a [`LuaSandbox`] with
//! deterministic bot ids (`new-1`, `new-2`, …).
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use tagbot_lua::testing::LuaHarness;
//! use tagbot_runtime::testing::bot;
//!
//! let mut harness = LuaHarness::new(vec![
//!     bot("a", json!({"#hello": "@return 'hi from ' .. this.id"})),
//! ])
//! .unwrap();
//!
//! let results = harness.shout("hello").unwrap();
//! assert_eq!(results.results, vec![json!("hi from a")]);
//! ```

use crate::{LuaSandbox, LuaSandboxError};
use std::rc::Rc;
use tagbot_event::{BotAction, ShoutAction};
use tagbot_runtime::config::RuntimeConfig;
use tagbot_runtime::{
    calculate_action_results, calculate_actions, calculate_destroy_bot_events, ActionResults,
    CalculationContext, DispatchError, SequentialIdSource,
};
use tagbot_types::{Bot, BotId, TagValue};

/// Test harness running real Lua scripts.
pub struct LuaHarness {
    context: CalculationContext,
}

impl LuaHarness {
    /// Creates a harness over `bots`.
    ///
    /// # Errors
    ///
    /// Returns [`LuaSandboxError`] if the VM cannot be set up.
    pub fn new(bots: Vec<Bot>) -> Result<Self, LuaSandboxError> {
        let sandbox = LuaSandbox::new()?;
        let context = CalculationContext::new(bots, Rc::new(sandbox))
            .with_id_source(SequentialIdSource::new("new"));
        Ok(Self { context })
    }

    /// Replaces the configuration (and with it the energy budget).
    #[must_use]
    pub fn with_config(self, config: RuntimeConfig) -> Self {
        Self {
            context: self.context.with_config(config),
        }
    }

    /// Sets the acting user.
    #[must_use]
    pub fn with_user(self, user_id: impl Into<BotId>) -> Self {
        Self {
            context: self.context.with_user(user_id),
        }
    }

    /// Shouts `event` to every bot, without an argument.
    ///
    /// # Errors
    ///
    /// Propagates the dispatch failure.
    pub fn shout(&mut self, event: &str) -> Result<ActionResults, DispatchError> {
        self.dispatch(&ShoutAction::new(event))
    }

    /// Dispatches an arbitrary shout.
    ///
    /// # Errors
    ///
    /// Propagates the dispatch failure.
    pub fn dispatch(&mut self, shout: &ShoutAction) -> Result<ActionResults, DispatchError> {
        calculate_action_results(&mut self.context, shout)
    }

    /// Runs a batch of actions.
    ///
    /// # Errors
    ///
    /// Propagates the dispatch failure.
    pub fn run(&mut self, actions: Vec<BotAction>) -> Result<Vec<BotAction>, DispatchError> {
        calculate_actions(&mut self.context, actions)
    }

    /// Destroy cascade for `id`, without running any script.
    ///
    /// # Errors
    ///
    /// Propagates the dispatch failure.
    pub fn destroy_events(&mut self, id: &str) -> Result<Vec<BotAction>, DispatchError> {
        calculate_destroy_bot_events(&mut self.context, &BotId::new(id))
    }

    /// Raw tag of `id` with pending writes applied.
    #[must_use]
    pub fn tag(&self, id: &str, tag: &str) -> TagValue {
        self.context.raw_tag(&BotId::new(id), tag)
    }

    /// The underlying context.
    #[must_use]
    pub fn context(&self) -> &CalculationContext {
        &self.context
    }

    /// Mutable access to the underlying context.
    pub fn context_mut(&mut self) -> &mut CalculationContext {
        &mut self.context
    }
}
