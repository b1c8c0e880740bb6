//! Core types for tagbot.
//!
//! This crate holds the value types every other tagbot crate agrees on:
//!
//! | Type | Role |
//! |------|------|
//! | [`BotId`] | Unique, immutable bot identifier |
//! | [`TagValue`] | Closed sum type of everything a tag can hold |
//! | [`Bot`] | Id plus tag map |
//! | [`BotsState`] | Snapshot of the authoritative store (with tombstones) |
//! | [`ErrorCode`] | Machine-readable error codes shared by all error enums |
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  tagbot-types   : BotId, TagValue, Bot, BotsState  ◄── HERE  │
//! │  tagbot-event   : BotAction, ActionId, ShoutAction          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  tagbot-runtime : context, capture, dispatch, destroy,      │
//! │                   reject resolution                         │
//! │  tagbot-lua     : Lua sandbox + script library              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  tagbot-cli     : command-line driver                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use tagbot_types::{Bot, BotsState, TagValue};
//!
//! let state = BotsState::from_bots([
//!     Bot::new("a").tag_with("color", "red"),
//!     Bot::new("b").tag_with("size", 2),
//! ])
//! .unwrap();
//!
//! assert_eq!(state.get("a").unwrap().tag("#color"), &TagValue::from("red"));
//! ```

mod bot;
mod error;
mod id;
mod value;

pub use bot::{tag_name, try_tag_name, Bot, BotsState, TAG_PREFIX};
pub use error::{assert_error_code, assert_error_codes, ErrorCode, TypesError};
pub use id::BotId;
pub use value::{number_to_json, TagValue, Tags, FORMULA_PREFIX};
