//! Dispatch errors.
//!
//! Every variant aborts the whole dispatch call: the caller receives no
//! partial event list and must treat the batch as "nothing happened".
//!
//! | Error | Code |
//! |-------|------|
//! | [`DispatchError::OutOfEnergy`] | `DISPATCH_OUT_OF_ENERGY` |
//! | [`DispatchError::Script`] | `DISPATCH_SCRIPT_FAILED` |
//! | [`DispatchError::FormulaCycle`] | `DISPATCH_FORMULA_CYCLE` |
//! | [`DispatchError::DepthExceeded`] | `DISPATCH_DEPTH_EXCEEDED` |
//! | [`DispatchError::InvalidArgument`] | `DISPATCH_INVALID_ARGUMENT` |
//! | [`DispatchError::Sandbox`] | `DISPATCH_SANDBOX_FAILURE` |
//!
//! The enum is `Clone` so that an error raised deep inside a nested shout
//! can cross the script boundary (wrapped in the interpreter's own error
//! type) and be recovered unchanged by the outer sandbox run.

use tagbot_types::{BotId, ErrorCode};
use thiserror::Error;

/// Fatal, batch-aborting dispatch error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The batch energy budget hit zero.
    #[error("ran out of energy")]
    OutOfEnergy,

    /// A listener or formula script failed.
    #[error("script error in {bot}.{tag}: {message}")]
    Script {
        /// Bot owning the script.
        bot: BotId,
        /// Tag holding the script.
        tag: String,
        /// Interpreter message.
        message: String,
    },

    /// A formula (transitively) read its own value.
    #[error("formula cycle at {bot}.{tag}")]
    FormulaCycle {
        /// Bot owning the formula.
        bot: BotId,
        /// Formula tag.
        tag: String,
    },

    /// Nested shouts went deeper than the configured limit.
    #[error("dispatch depth limit exceeded (depth={depth}, max={max_depth})")]
    DepthExceeded {
        /// Depth that was attempted.
        depth: usize,
        /// Configured maximum.
        max_depth: usize,
    },

    /// A library call received an argument it cannot use.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The sandbox itself failed (VM setup, value conversion).
    #[error("sandbox failure: {0}")]
    Sandbox(String),
}

impl DispatchError {
    /// Creates a [`DispatchError::Script`].
    pub fn script(bot: &BotId, tag: &str, message: impl Into<String>) -> Self {
        Self::Script {
            bot: bot.clone(),
            tag: tag.to_string(),
            message: message.into(),
        }
    }
}

impl ErrorCode for DispatchError {
    fn code(&self) -> &'static str {
        match self {
            Self::OutOfEnergy => "DISPATCH_OUT_OF_ENERGY",
            Self::Script { .. } => "DISPATCH_SCRIPT_FAILED",
            Self::FormulaCycle { .. } => "DISPATCH_FORMULA_CYCLE",
            Self::DepthExceeded { .. } => "DISPATCH_DEPTH_EXCEEDED",
            Self::InvalidArgument(_) => "DISPATCH_INVALID_ARGUMENT",
            Self::Sandbox(_) => "DISPATCH_SANDBOX_FAILURE",
        }
    }

    fn is_recoverable(&self) -> bool {
        // Retrying the same batch on the same snapshot fails the same way.
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagbot_types::assert_error_codes;

    #[test]
    fn codes_follow_convention() {
        let bot = BotId::new("a");
        assert_error_codes(
            &[
                DispatchError::OutOfEnergy,
                DispatchError::script(&bot, "onClick", "boom"),
                DispatchError::FormulaCycle {
                    bot: bot.clone(),
                    tag: "x".into(),
                },
                DispatchError::DepthExceeded {
                    depth: 65,
                    max_depth: 64,
                },
                DispatchError::InvalidArgument("x".into()),
                DispatchError::Sandbox("x".into()),
            ],
            "DISPATCH_",
        );
    }

    #[test]
    fn display_script() {
        let err = DispatchError::script(&BotId::new("a"), "onClick", "boom");
        assert_eq!(err.to_string(), "script error in a.onClick: boom");
    }

    #[test]
    fn display_depth_exceeded() {
        let err = DispatchError::DepthExceeded {
            depth: 5,
            max_depth: 4,
        };
        assert_eq!(
            err.to_string(),
            "dispatch depth limit exceeded (depth=5, max=4)"
        );
    }

    #[test]
    fn nothing_is_recoverable() {
        assert!(!DispatchError::OutOfEnergy.is_recoverable());
    }
}
