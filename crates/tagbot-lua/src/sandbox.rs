//! The Lua implementation of [`ScriptSandbox`].
//!
//! # Security Model
//!
//! Every run gets a fresh **whitelist-only** environment table. Only safe
//! standard library functions are copied in; `os`, `io`, `debug`,
//! `require`, `load`, `loadfile` and `dofile` are never reachable.
//!
//! # Energy
//!
//! An instruction-count hook charges the batch [`EnergyMeter`] one unit
//! every `energy.step` VM instructions. The hook is installed by the
//! outermost run of a batch and removed when it returns; nested runs
//! (scripts that shout, formulas read by scripts) share it.
//!
//! [`EnergyMeter`]: tagbot_runtime::EnergyMeter
//!
//! # Host Errors
//!
//! Library functions wrap host failures with [`mlua::Error::external`].
//! When the run fails, the original [`DispatchError`] is dug out of the
//! callback chain and returned unchanged, so an error raised in a nested
//! shout reaches the caller as-is.

use crate::library;
use crate::types::{Marshal, Prelude};
use crate::LuaSandboxError;
use mlua::{HookTriggers, Lua, Table, Value, VmState};
use serde_json::Value as JsonValue;
use std::cell::{Cell, RefCell};
use tagbot_runtime::{DispatchError, Script, ScriptArgument, ScriptHost, ScriptKind, ScriptSandbox};
use tracing::trace;

/// Standard functions copied into every environment.
const SAFE_FUNCTIONS: &[&str] = &[
    "tostring",
    "tonumber",
    "type",
    "pairs",
    "ipairs",
    "next",
    "select",
    "error",
    "pcall",
    "xpcall",
    "assert",
    "rawget",
    "rawset",
    "rawlen",
    "rawequal",
    "setmetatable",
    "getmetatable",
];

/// Standard libraries copied into every environment.
const SAFE_LIBRARIES: &[&str] = &["math", "string", "table"];

/// Runs tag scripts in an embedded Lua 5.4 VM.
///
/// One sandbox serves any number of batches; it holds no per-batch state
/// besides the nesting depth of the run in progress.
///
/// # Example
///
/// ```
/// use std::rc::Rc;
/// use serde_json::json;
/// use tagbot_event::ShoutAction;
/// use tagbot_lua::LuaSandbox;
/// use tagbot_runtime::{calculate_action_results, CalculationContext};
/// use tagbot_types::Bot;
///
/// let sandbox = LuaSandbox::new().unwrap();
/// let mut context = CalculationContext::new(
///     [Bot::new("a").tag_with("#ask", "@return this.id .. '!'")],
///     Rc::new(sandbox),
/// );
///
/// let results = calculate_action_results(&mut context, &ShoutAction::new("ask")).unwrap();
/// assert_eq!(results.results, vec![json!("a!")]);
/// ```
pub struct LuaSandbox {
    lua: Lua,
    prelude: Prelude,
    depth: Cell<usize>,
}

impl LuaSandbox {
    /// Creates a sandbox with a fresh VM.
    ///
    /// # Errors
    ///
    /// Returns [`LuaSandboxError::Prelude`] if the built-in helpers fail
    /// to load.
    pub fn new() -> Result<Self, LuaSandboxError> {
        let lua = Lua::new();
        let prelude = Prelude::load(&lua).map_err(LuaSandboxError::Prelude)?;
        Ok(Self {
            lua,
            prelude,
            depth: Cell::new(0),
        })
    }

    /// Caps VM memory at `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`LuaSandboxError::MemoryLimit`] if the allocator does not
    /// support limits.
    pub fn with_memory_limit(self, bytes: usize) -> Result<Self, LuaSandboxError> {
        self.lua
            .set_memory_limit(bytes)
            .map_err(LuaSandboxError::MemoryLimit)?;
        Ok(self)
    }

    fn execute(
        &self,
        script: &Script<'_>,
        argument: ScriptArgument<'_>,
        host: &mut dyn ScriptHost,
    ) -> Result<JsonValue, DispatchError> {
        let source = match script.kind {
            ScriptKind::Listener => script.source.to_string(),
            ScriptKind::Formula => format!("return {}", script.source),
        };
        let name = format!("={}.{}", script.this, script.tag);
        let host = RefCell::new(host);

        let outcome = self.lua.scope(|scope| {
            let env = build_sandbox_env(&self.lua)?;
            let marshal = Marshal::new(&self.lua, &self.prelude, &host);
            let marshal = library::install(scope, &env, marshal, script.this)?;

            let this = marshal.bot(script.this)?;
            if let Value::Table(bot) = &this {
                env.set("tags", bot.get::<Value>("tags")?)?;
            }
            env.set("this", this.clone())?;
            env.set("bot", this)?;

            let writes_back = match &argument {
                ScriptArgument::Value(value) => {
                    env.set("that", marshal.to_lua(value)?)?;
                    true
                }
                ScriptArgument::Targets(ids) => {
                    for (index, id) in ids.iter().enumerate() {
                        env.set(format!("arg{index}"), marshal.bot(id)?)?;
                    }
                    if let Some(second) = ids.get(1) {
                        env.set("that", marshal.bot(second)?)?;
                    }
                    false
                }
                ScriptArgument::Nothing => false,
            };

            let chunk = self
                .lua
                .load(source.as_str())
                .set_name(name.as_str())
                .set_environment(env.clone());
            let value: Value = chunk.eval()?;

            let result = marshal.to_json(value)?;
            let that = if writes_back {
                Some(marshal.to_json(env.get::<Value>("that")?)?)
            } else {
                None
            };
            Ok((result, that))
        });

        match outcome {
            Ok((result, that)) => {
                if let (ScriptArgument::Value(slot), Some(that)) = (argument, that) {
                    *slot = that;
                }
                Ok(result)
            }
            Err(err) => Err(dispatch_error(&err).unwrap_or_else(|| {
                DispatchError::script(script.this, script.tag, format_lua_error(&err))
            })),
        }
    }
}

impl std::fmt::Debug for LuaSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaSandbox")
            .field("depth", &self.depth.get())
            .finish_non_exhaustive()
    }
}

impl ScriptSandbox for LuaSandbox {
    fn run(
        &self,
        script: &Script<'_>,
        argument: ScriptArgument<'_>,
        host: &mut dyn ScriptHost,
    ) -> Result<JsonValue, DispatchError> {
        let energy = host.energy();
        energy.consume(1)?;

        let outermost = self.depth.get() == 0;
        if outermost {
            let step = host.config().energy.step.max(1);
            self.lua.set_hook(
                HookTriggers::new().every_nth_instruction(step),
                move |_lua, _debug| {
                    energy.consume(1).map_err(mlua::Error::external)?;
                    Ok(VmState::Continue)
                },
            );
        }

        trace!(bot = %script.this, tag = script.tag, kind = ?script.kind, "lua run");
        self.depth.set(self.depth.get() + 1);
        let result = self.execute(script, argument, host);
        self.depth.set(self.depth.get() - 1);

        if outermost {
            self.lua.remove_hook();
        }
        result
    }
}

/// Builds the whitelist-only environment table.
fn build_sandbox_env(lua: &Lua) -> mlua::Result<Table> {
    let env = lua.create_table()?;
    let globals = lua.globals();

    for name in SAFE_FUNCTIONS.iter().chain(SAFE_LIBRARIES) {
        let value = globals.get::<Value>(*name)?;
        if !matches!(value, Value::Nil) {
            env.set(*name, value)?;
        }
    }

    // 5.4 only ships `table.unpack`.
    if let Value::Table(table) = globals.get::<Value>("table")? {
        env.set("unpack", table.get::<Value>("unpack")?)?;
    }

    Ok(env)
}

/// Finds a [`DispatchError`] raised by a host callback.
fn dispatch_error(err: &mlua::Error) -> Option<DispatchError> {
    match err {
        mlua::Error::ExternalError(inner) => inner.downcast_ref::<DispatchError>().cloned(),
        mlua::Error::CallbackError { cause, .. } | mlua::Error::WithContext { cause, .. } => {
            dispatch_error(cause)
        }
        _ => None,
    }
}

/// Format an `mlua::Error` into a user-facing message.
fn format_lua_error(err: &mlua::Error) -> String {
    match err {
        mlua::Error::RuntimeError(msg) => msg.clone(),
        mlua::Error::CallbackError { cause, .. } => format_lua_error(cause),
        mlua::Error::SyntaxError { message, .. } => format!("compile error: {message}"),
        _ => err.to_string(),
    }
}
