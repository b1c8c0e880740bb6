//! Unified error interface for tagbot.
//!
//! Every error enum in the workspace implements [`ErrorCode`] so callers
//! can branch on a stable machine-readable code instead of matching on
//! display strings.
//!
//! # Code Format
//!
//! - **UPPER_SNAKE_CASE**: e.g. `"DISPATCH_OUT_OF_ENERGY"`
//! - **Crate-prefixed**: `TYPES_`, `DISPATCH_`, `CONFIG_`, `LUA_`
//! - **Stable**: codes are part of the public contract
//!
//! # Example
//!
//! ```
//! use tagbot_types::ErrorCode;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     NotFound(String),
//!     Busy,
//! }
//!
//! impl ErrorCode for MyError {
//!     fn code(&self) -> &'static str {
//!         match self {
//!             Self::NotFound(_) => "MY_NOT_FOUND",
//!             Self::Busy => "MY_BUSY",
//!         }
//!     }
//!
//!     fn is_recoverable(&self) -> bool {
//!         matches!(self, Self::Busy)
//!     }
//! }
//!
//! assert_eq!(MyError::Busy.code(), "MY_BUSY");
//! assert!(!MyError::NotFound("x".into()).is_recoverable());
//! ```

use thiserror::Error;

/// Machine-readable error code interface.
pub trait ErrorCode {
    /// Returns a stable, crate-prefixed, UPPER_SNAKE_CASE code.
    fn code(&self) -> &'static str;

    /// Returns whether retrying (with a new snapshot or corrected
    /// input) may succeed.
    fn is_recoverable(&self) -> bool;
}

/// Errors raised while validating bot data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    /// Bot id was empty.
    #[error("bot id must not be empty")]
    EmptyBotId,

    /// Tag name was empty (after stripping a leading `#`).
    #[error("tag name must not be empty")]
    EmptyTagName,

    /// A bot appeared twice in one state snapshot.
    #[error("duplicate bot id: {0}")]
    DuplicateBot(String),

    /// State entry key and bot id disagree.
    #[error("state key '{key}' does not match bot id '{id}'")]
    MismatchedKey {
        /// Key in the state map.
        key: String,
        /// Id stored in the bot.
        id: String,
    },
}

impl ErrorCode for TypesError {
    fn code(&self) -> &'static str {
        match self {
            Self::EmptyBotId => "TYPES_EMPTY_BOT_ID",
            Self::EmptyTagName => "TYPES_EMPTY_TAG_NAME",
            Self::DuplicateBot(_) => "TYPES_DUPLICATE_BOT",
            Self::MismatchedKey { .. } => "TYPES_MISMATCHED_KEY",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

/// Validates that an error code follows the workspace conventions.
///
/// # Panics
///
/// Panics if the code is empty, lacks `expected_prefix`, or is not
/// UPPER_SNAKE_CASE. Intended for tests.
pub fn assert_error_code<E: ErrorCode>(err: &E, expected_prefix: &str) {
    let code = err.code();

    assert!(!code.is_empty(), "Error code must not be empty");
    assert!(
        code.starts_with(expected_prefix),
        "Error code '{}' must start with prefix '{}'",
        code,
        expected_prefix
    );
    assert!(
        is_upper_snake_case(code),
        "Error code '{}' must be UPPER_SNAKE_CASE",
        code
    );
}

/// Validates every error in `errors`. See [`assert_error_code`].
pub fn assert_error_codes<E: ErrorCode>(errors: &[E], expected_prefix: &str) {
    for err in errors {
        assert_error_code(err, expected_prefix);
    }
}

fn is_upper_snake_case(s: &str) -> bool {
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn types_error_codes() {
        assert_error_codes(
            &[
                TypesError::EmptyBotId,
                TypesError::EmptyTagName,
                TypesError::DuplicateBot("a".into()),
                TypesError::MismatchedKey {
                    key: "a".into(),
                    id: "b".into(),
                },
            ],
            "TYPES_",
        );
    }

    #[test]
    fn types_errors_are_not_recoverable() {
        assert!(!TypesError::EmptyBotId.is_recoverable());
    }

    #[test]
    fn display_mismatched_key() {
        let err = TypesError::MismatchedKey {
            key: "a".into(),
            id: "b".into(),
        };
        assert_eq!(err.to_string(), "state key 'a' does not match bot id 'b'");
    }

    #[test]
    #[should_panic(expected = "must start with prefix")]
    fn assert_error_code_wrong_prefix() {
        assert_error_code(&TypesError::EmptyBotId, "DISPATCH_");
    }

    #[test]
    fn upper_snake_case_rules() {
        assert!(is_upper_snake_case("HELLO_WORLD"));
        assert!(is_upper_snake_case("ERROR_123"));
        assert!(!is_upper_snake_case(""));
        assert!(!is_upper_snake_case("Hello"));
        assert!(!is_upper_snake_case("_HELLO"));
        assert!(!is_upper_snake_case("HELLO__WORLD"));
    }
}
