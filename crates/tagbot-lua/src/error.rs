//! Error types for the Lua sandbox.

use tagbot_runtime::DispatchError;
use tagbot_types::ErrorCode;
use thiserror::Error;

/// Errors raised while setting up a [`LuaSandbox`](crate::LuaSandbox).
///
/// Script failures are not represented here: once a sandbox exists, every
/// failure of a run is a [`DispatchError`].
#[derive(Debug, Error)]
pub enum LuaSandboxError {
    /// The built-in prelude failed to load.
    #[error("failed to load prelude: {0}")]
    Prelude(#[source] mlua::Error),

    /// The memory limit could not be applied.
    #[error("failed to set memory limit: {0}")]
    MemoryLimit(#[source] mlua::Error),
}

impl ErrorCode for LuaSandboxError {
    fn code(&self) -> &'static str {
        match self {
            Self::Prelude(_) => "LUA_PRELUDE_FAILED",
            Self::MemoryLimit(_) => "LUA_MEMORY_LIMIT_FAILED",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

impl From<LuaSandboxError> for DispatchError {
    fn from(err: LuaSandboxError) -> Self {
        DispatchError::Sandbox(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagbot_types::assert_error_codes;

    #[test]
    fn codes_follow_convention() {
        assert_error_codes(
            &[
                LuaSandboxError::Prelude(mlua::Error::RuntimeError("x".into())),
                LuaSandboxError::MemoryLimit(mlua::Error::RuntimeError("y".into())),
            ],
            "LUA_",
        );
    }

    #[test]
    fn converts_to_dispatch_error() {
        let err: DispatchError =
            LuaSandboxError::Prelude(mlua::Error::RuntimeError("boom".into())).into();
        assert!(matches!(err, DispatchError::Sandbox(msg) if msg.contains("boom")));
    }

    #[test]
    fn display_carries_the_lua_message() {
        let err = LuaSandboxError::MemoryLimit(mlua::Error::RuntimeError("no allocator".into()));
        assert!(err.to_string().starts_with("failed to set memory limit"));
        assert!(err.to_string().contains("no allocator"));
    }
}
