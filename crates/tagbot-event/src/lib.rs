//! Action types for tagbot.
//!
//! The dispatch runtime never mutates state. Everything a script wants
//! to happen is described by a [`BotAction`]:
//!
//! | Group | Variants |
//! |-------|----------|
//! | Structural | `AddBot`, `RemoveBot`, `UpdateBot`, `Transaction` |
//! | Behavioral | `Shout` (see [`ShoutAction`]), `Reject` |
//! | Side effect | `Toast`, `GoToUrl`, `OpenUrl`, `Webhook`, `Custom` |
//!
//! Side effects are opaque to the runtime: they are carried through in
//! order and interpreted by whoever consumes the final list.
//!
//! # Identity
//!
//! Actions are compared for rejection by [`ActionId`], a batch-local
//! sequence number handed out by [`ActionSequence`].

mod action;
mod apply;
mod shout;

pub use action::{ActionId, ActionKind, ActionSequence, BotAction};
pub use apply::{apply_actions, flatten_transactions};
pub use shout::ShoutAction;
