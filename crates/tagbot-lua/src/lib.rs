//! Lua scripting for tagbot.
//!
//! Provides [`LuaSandbox`], the [`ScriptSandbox`](tagbot_runtime::ScriptSandbox)
//! that runs tag scripts in an embedded Lua 5.4 VM.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              LuaSandbox (Rust)                      │
//! │  impl ScriptSandbox for LuaSandbox                  │
//! │  ┌───────────────────────────────────────────────┐  │
//! │  │  lua: Lua (mlua)        prelude: bot proxies  │  │
//! │  └───────────────────────────────────────────────┘  │
//! │                         │ per run: scope + env      │
//! │                         ▼                           │
//! │  ┌───────────────────────────────────────────────┐  │
//! │  │  env = safe std subset + library              │  │
//! │  │  this / bot / tags / that / arg0..            │  │
//! │  └───────────────────────────────────────────────┘  │
//! │                         │ ScriptHost callbacks      │
//! │                         ▼                           │
//! │              DispatchContext (tagbot-runtime)       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Example Scripts
//!
//! A listener tag holds statements; its optional `return` value becomes a
//! shout result:
//!
//! ```lua
//! -- #onClick
//! @
//! this.tags.clicks = (this.tags.clicks or 0) + 1
//! if this.tags.clicks > 3 then
//!     toast("enough!")
//! end
//! return this.tags.clicks
//! ```
//!
//! A formula tag holds one expression:
//!
//! ```lua
//! -- #area
//! =this.tags.width * this.tags.height
//! ```

mod error;
mod library;
mod sandbox;
pub mod testing;
mod types;

pub use error::LuaSandboxError;
pub use sandbox::LuaSandbox;
