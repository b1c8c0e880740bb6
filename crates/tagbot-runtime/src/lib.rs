//! Reactive action dispatch for tagbot.
//!
//! Given a snapshot of bots and a shout, runs every matching listener
//! script and returns what should happen as an ordered list of actions.
//! Nothing is applied to any store here.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ CalculationContext (one per batch)                       │
//! │   objects (id-sorted) · formula cache · TagUpdateCapture │
//! │   ActionSequence · EnergyMeter · Rc<dyn ScriptSandbox>   │
//! └────────────────────────────┬─────────────────────────────┘
//!                              │ &mut
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │ DispatchContext: impl ScriptHost                         │
//! │   action buffer stack · depth · formula-in-progress set  │
//! └────────────────────────────┬─────────────────────────────┘
//!                              │ run(script, argument, host)
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │ ScriptSandbox (Lua in tagbot-lua, closures in testing)   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Entry points
//!
//! | Function | Purpose |
//! |----------|---------|
//! | [`calculate_action_results`] | Dispatch one shout |
//! | [`calculate_actions`] | Run a batch of actions with `onAnyAction` screening |
//! | [`calculate_destroy_bot_events`] | Destroy cascade for one bot |
//! | [`resolve_rejected_actions`] | Strip rejected actions |
//!
//! # Errors
//!
//! Every failure is a [`DispatchError`] and aborts the whole call.

mod capture;
pub mod config;
mod context;
pub mod destroy;
mod dispatch;
mod energy;
mod error;
mod ids;
pub mod listener;
mod resolve;
pub mod sandbox;
pub mod testing;

pub use capture::TagUpdateCapture;
pub use context::CalculationContext;
pub use destroy::{calculate_destroy_bot_events, TagSource};
pub use dispatch::{
    calculate_action_results, calculate_action_results_with, calculate_actions, ActionResults,
    DispatchContext, COMBINE, ON_ANY_ACTION, ON_ANY_SHOUT, ON_CREATE, ON_DESTROY, ON_SHOUT,
};
pub use energy::EnergyMeter;
pub use error::DispatchError;
pub use ids::{BotIdSource, SequentialIdSource, UuidIdSource};
pub use resolve::resolve_rejected_actions;
pub use sandbox::{Script, ScriptArgument, ScriptHost, ScriptKind, ScriptSandbox};
