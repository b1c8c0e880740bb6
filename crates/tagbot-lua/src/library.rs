//! The functions scripts can call.
//!
//! Every function is created inside the run's [`mlua::Scope`] and closes
//! over that run's [`Marshal`], so nothing outlives the run and no state
//! is shared between runs through globals.
//!
//! | Function | Host operation |
//! |----------|----------------|
//! | `getTag`, `setTag` | `get_tag`, `set_tag` |
//! | `getBot`, `getBots`, `getBotTagValues`, `byTag`, `byMod` | `bot_ids` + `get_tag` |
//! | `shout`, `whisper` | `shout` |
//! | `create`, `destroy` | `create_bot`, `destroy_bot` |
//! | `reject`, `toast`, `goToURL`, `openURL`, `webhook`, `action` | `emit` |
//! | `getUser` | `user_id` |
//! | `log`, `print` | tracing |

use crate::types::{is_truthy, lua_display, Accessors, Marshal};
use mlua::{Function, MultiValue, Result as LuaResult, Scope, Table, Value};
use serde_json::Value as JsonValue;
use tagbot_event::{ActionId, ActionKind, ShoutAction};
use tagbot_types::{BotId, TagValue, Tags};
use tracing::{debug, error, info, trace, warn};

/// Registers the library in `env` and returns `marshal` with live bots
/// enabled.
pub(crate) fn install<'scope, 'a: 'scope, 'h: 'a>(
    scope: &'scope Scope<'scope, '_>,
    env: &Table,
    marshal: Marshal<'a, 'h>,
    this: &BotId,
) -> LuaResult<Marshal<'a, 'h>> {
    let m = marshal.clone();
    let get_tag = scope.create_function(move |_, (target, tag): (Value, String)| {
        let Some(id) = bot_ref(&m, &target)? else {
            return Ok(Value::Nil);
        };
        let value = m.with_host(|host| host.get_tag(&id, &tag))?;
        m.tag_to_lua(&value)
    })?;

    let m = marshal.clone();
    let set_tag = scope.create_function(move |_, (target, tag, value): (Value, String, Value)| {
        let ids = bot_refs(&m, &target)?;
        let tag_value = m.to_tag_value(value.clone())?;
        for id in &ids {
            m.with_host(|host| host.set_tag(id, &tag, tag_value.clone()))?;
        }
        Ok(value)
    })?;

    env.set("getTag", get_tag.clone())?;
    env.set("setTag", set_tag.clone())?;
    let marshal = marshal.with_accessors(Accessors { get_tag, set_tag });

    install_queries(scope, env, &marshal)?;
    install_dispatch(scope, env, &marshal)?;
    install_actions(scope, env, &marshal)?;
    install_logging(scope, env, &marshal, this)?;
    Ok(marshal)
}

fn install_queries<'scope, 'a: 'scope, 'h: 'a>(
    scope: &'scope Scope<'scope, '_>,
    env: &Table,
    marshal: &Marshal<'a, 'h>,
) -> LuaResult<()> {
    let m = marshal.clone();
    env.set(
        "getBots",
        scope.create_function(move |_, args: MultiValue| {
            let filters = parse_filters(args)?;
            let ids = matching_bots(&m, &filters)?;
            m.bots(&ids)
        })?,
    )?;

    let m = marshal.clone();
    env.set(
        "getBot",
        scope.create_function(move |_, args: MultiValue| {
            let filters = parse_filters(args)?;
            match matching_bots(&m, &filters)?.first() {
                Some(id) => m.bot(id),
                None => Ok(Value::Nil),
            }
        })?,
    )?;

    let m = marshal.clone();
    env.set(
        "getBotTagValues",
        scope.create_function(move |_, (tag, filter): (String, Value)| {
            let ids = m.peek_host(|host| host.bot_ids()).unwrap_or_default();
            let mut values = Vec::new();
            for id in &ids {
                let value = m.with_host(|host| host.get_tag(id, &tag))?;
                if value.is_null() || !value_passes(&m, &value, &filter)? {
                    continue;
                }
                values.push(value.to_json());
            }
            m.to_lua(&JsonValue::Array(values))
        })?,
    )?;

    let m = marshal.clone();
    env.set(
        "byTag",
        scope.create_function(move |_, (tag, filter): (String, Value)| {
            let get_tag = accessor(&m)?;
            m.prelude()
                .by_tag
                .call::<Function>((get_tag, tag, filter))
        })?,
    )?;

    let m = marshal.clone();
    env.set(
        "byMod",
        scope.create_function(move |_, mod_table: Table| {
            let get_tag = accessor(&m)?;
            m.prelude().by_mod.call::<Function>((get_tag, mod_table))
        })?,
    )?;

    let m = marshal.clone();
    env.set(
        "getUser",
        scope.create_function(move |_, ()| {
            let user = m
                .peek_host(|host| host.user_id().filter(|id| host.has_bot(id.as_str())))
                .flatten();
            match user {
                Some(id) => m.bot(&id),
                None => Ok(Value::Nil),
            }
        })?,
    )?;

    Ok(())
}

fn install_dispatch<'scope, 'a: 'scope, 'h: 'a>(
    scope: &'scope Scope<'scope, '_>,
    env: &Table,
    marshal: &Marshal<'a, 'h>,
) -> LuaResult<()> {
    let m = marshal.clone();
    env.set(
        "shout",
        scope.create_function(move |_, (name, arg): (String, Value)| {
            let shout = ShoutAction::new(name);
            run_shout(&m, shout, arg)
        })?,
    )?;

    let m = marshal.clone();
    env.set(
        "whisper",
        scope.create_function(move |_, (targets, name, arg): (Value, String, Value)| {
            let ids = bot_refs(&m, &targets)?;
            let mut shout = ShoutAction::new(name).to(ids);
            shout.sort_bot_ids = m
                .peek_host(|host| host.config().dispatch.default_sort_bot_ids)
                .unwrap_or(true);
            run_shout(&m, shout, arg)
        })?,
    )?;

    let m = marshal.clone();
    env.set(
        "create",
        scope.create_function(move |_, args: MultiValue| {
            let mut args = args.into_iter();
            let mut mods = Vec::new();
            let creator = match args.next() {
                None | Some(Value::Nil) => None,
                Some(first) => match bot_ref(&m, &first)? {
                    Some(id) => Some(id),
                    None => {
                        mods.push(first);
                        None
                    }
                },
            };
            mods.extend(args);

            let mut tags = Tags::new();
            for mod_value in mods {
                merge_mod(&m, &mut tags, mod_value)?;
            }
            let id = m.with_host(|host| host.create_bot(creator, tags))?;
            m.bot(&id)
        })?,
    )?;

    let m = marshal.clone();
    env.set(
        "destroy",
        scope.create_function(move |_, target: Value| {
            for id in bot_refs(&m, &target)? {
                m.with_host(|host| host.destroy_bot(&id))?;
            }
            Ok(())
        })?,
    )?;

    Ok(())
}

fn install_actions<'scope, 'a: 'scope, 'h: 'a>(
    scope: &'scope Scope<'scope, '_>,
    env: &Table,
    marshal: &Marshal<'a, 'h>,
) -> LuaResult<()> {
    let m = marshal.clone();
    env.set(
        "reject",
        scope.create_function(move |_, action: Value| {
            for id in action_ids(&action)? {
                m.with_host(|host| Ok(host.emit(ActionKind::reject(id))))?;
            }
            Ok(())
        })?,
    )?;

    let m = marshal.clone();
    env.set(
        "toast",
        scope.create_function(move |_, message: Value| {
            let message = message_text(&m, message)?;
            emit(&m, ActionKind::toast(message))
        })?,
    )?;

    let m = marshal.clone();
    env.set(
        "goToURL",
        scope.create_function(move |_, url: String| emit(&m, ActionKind::GoToUrl { url }))?,
    )?;

    let m = marshal.clone();
    env.set(
        "openURL",
        scope.create_function(move |_, url: String| emit(&m, ActionKind::OpenUrl { url }))?,
    )?;

    let m = marshal.clone();
    env.set(
        "webhook",
        scope.create_function(move |_, options: Table| {
            let method = options
                .get::<Option<String>>("method")?
                .unwrap_or_else(|| "GET".to_string())
                .to_ascii_uppercase();
            let url: String = options.get("url")?;
            let data = m.to_json(options.get::<Value>("data")?)?;
            emit(&m, ActionKind::Webhook { method, url, data })
        })?,
    )?;

    let m = marshal.clone();
    env.set(
        "action",
        scope.create_function(move |_, (name, payload): (String, Value)| {
            let payload = m.to_json(payload)?;
            emit(&m, ActionKind::Custom { name, payload })
        })?,
    )?;

    Ok(())
}

fn install_logging<'scope, 'a: 'scope, 'h: 'a>(
    scope: &'scope Scope<'scope, '_>,
    env: &Table,
    marshal: &Marshal<'a, 'h>,
    this: &BotId,
) -> LuaResult<()> {
    let bot = this.clone();
    env.set(
        "print",
        scope.create_function(move |_, args: MultiValue| {
            let parts: Vec<String> = args.iter().map(lua_display).collect();
            debug!(bot = %bot, "[lua] {}", parts.join("\t"));
            Ok(())
        })?,
    )?;

    let m = marshal.clone();
    let bot = this.clone();
    env.set(
        "log",
        scope.create_function(move |_, (level, message): (String, Value)| {
            let text = message_text(&m, message)?;
            match level.to_ascii_lowercase().as_str() {
                "trace" => trace!(bot = %bot, "[lua] {text}"),
                "debug" => debug!(bot = %bot, "[lua] {text}"),
                "warn" | "warning" => warn!(bot = %bot, "[lua] {text}"),
                "error" => error!(bot = %bot, "[lua] {text}"),
                _ => info!(bot = %bot, "[lua] {text}"),
            }
            Ok(())
        })?,
    )?;

    Ok(())
}

/// One `getBots` argument.
enum BotFilter {
    /// `(tag)`: tag is set.
    Has(String),
    /// `(tag, value)`: tag equals value.
    Equals(String, Value),
    /// `(tag, fn)`: `fn(value)` is truthy.
    TagTest(String, Function),
    /// `fn`: `fn(bot)` is truthy.
    Test(Function),
}

fn parse_filters(args: MultiValue) -> LuaResult<Vec<BotFilter>> {
    let mut filters = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg {
            Value::Function(f) => filters.push(BotFilter::Test(f)),
            Value::String(s) => {
                let tag = s.to_str()?.to_string();
                match args.next() {
                    None | Some(Value::Nil) => filters.push(BotFilter::Has(tag)),
                    Some(Value::Function(f)) => filters.push(BotFilter::TagTest(tag, f)),
                    Some(value) => filters.push(BotFilter::Equals(tag, value)),
                }
            }
            Value::Nil => {}
            other => {
                return Err(mlua::Error::RuntimeError(format!(
                    "getBots: unsupported filter of type {}",
                    other.type_name()
                )))
            }
        }
    }
    Ok(filters)
}

fn matching_bots(m: &Marshal<'_, '_>, filters: &[BotFilter]) -> LuaResult<Vec<BotId>> {
    let ids = m.peek_host(|host| host.bot_ids()).unwrap_or_default();
    let mut matched = Vec::new();
    'bots: for id in ids {
        for filter in filters {
            let pass = match filter {
                BotFilter::Has(tag) => !m.with_host(|host| host.get_tag(&id, tag))?.is_null(),
                BotFilter::Equals(tag, expected) => {
                    let value = m.with_host(|host| host.get_tag(&id, tag))?;
                    value.to_json() == m.to_json(expected.clone())?
                }
                BotFilter::TagTest(tag, test) => {
                    let value = m.with_host(|host| host.get_tag(&id, tag))?;
                    is_truthy(&test.call::<Value>(m.tag_to_lua(&value)?)?)
                }
                BotFilter::Test(test) => is_truthy(&test.call::<Value>(m.bot(&id)?)?),
            };
            if !pass {
                continue 'bots;
            }
        }
        matched.push(id);
    }
    Ok(matched)
}

/// `getBotTagValues` filter: nil passes everything, a function is a test,
/// anything else must be equal.
fn value_passes(m: &Marshal<'_, '_>, value: &TagValue, filter: &Value) -> LuaResult<bool> {
    match filter {
        Value::Nil => Ok(true),
        Value::Function(test) => Ok(is_truthy(&test.call::<Value>(m.tag_to_lua(value)?)?)),
        other => Ok(value.to_json() == m.to_json(other.clone())?),
    }
}

fn run_shout(m: &Marshal<'_, '_>, mut shout: ShoutAction, arg: Value) -> LuaResult<Value> {
    shout.argument = match arg {
        Value::Nil => None,
        other => Some(m.to_json(other)?),
    };
    shout.user_id = m.peek_host(|host| host.user_id()).flatten();
    let results = m.with_host(|host| host.shout(shout))?;
    m.to_lua(&JsonValue::Array(results))
}

fn emit(m: &Marshal<'_, '_>, kind: ActionKind) -> LuaResult<Value> {
    let action = m.with_host(|host| Ok(host.emit(kind)))?;
    let json = serde_json::to_value(&action).map_err(mlua::Error::external)?;
    m.to_lua(&json)
}

fn accessor(m: &Marshal<'_, '_>) -> LuaResult<Function> {
    m.accessors()
        .map(|accessors| accessors.get_tag.clone())
        .ok_or_else(|| mlua::Error::RuntimeError("bot accessors are not ready".into()))
}

/// Adds the tags of one `create` mod: a bot contributes its tags, a table
/// its fields.
fn merge_mod(m: &Marshal<'_, '_>, tags: &mut Tags, mod_value: Value) -> LuaResult<()> {
    if let Some(id) = m.live_bot_id(&mod_value)? {
        let source = m.peek_host(|host| host.bot_tags(&id)).flatten();
        tags.extend(source.unwrap_or_default());
        return Ok(());
    }
    match m.to_json(mod_value)? {
        JsonValue::Object(map) => {
            // Keys are kept verbatim: `#onCreate` must stay a listener.
            for (tag, value) in map {
                tags.insert(tag, TagValue::from_json(value));
            }
            Ok(())
        }
        JsonValue::Null => Ok(()),
        JsonValue::Array(items) if items.is_empty() => Ok(()),
        other => Err(mlua::Error::RuntimeError(format!(
            "create: expected a table of tags, got {other}"
        ))),
    }
}

/// A bot id from a bot table, an `{id}` table, or an id string.
fn bot_ref(m: &Marshal<'_, '_>, value: &Value) -> LuaResult<Option<BotId>> {
    match value {
        Value::String(s) => Ok(Some(BotId::new(s.to_str()?.to_string()))),
        Value::Table(table) => {
            if let Some(id) = m.live_bot_id(value)? {
                return Ok(Some(id));
            }
            match table.raw_get::<Value>("id")? {
                Value::String(s) => Ok(Some(BotId::new(s.to_str()?.to_string()))),
                _ => Ok(None),
            }
        }
        _ => Ok(None),
    }
}

/// Like [`bot_ref`], but also accepts a list.
fn bot_refs(m: &Marshal<'_, '_>, value: &Value) -> LuaResult<Vec<BotId>> {
    if let Some(id) = bot_ref(m, value)? {
        return Ok(vec![id]);
    }
    let mut ids = Vec::new();
    if let Value::Table(table) = value {
        for index in 1..=table.raw_len() {
            let item: Value = table.raw_get(index)?;
            ids.extend(bot_ref(m, &item)?);
        }
    }
    Ok(ids)
}

/// Ids of an action table, or of a list of them.
fn action_ids(value: &Value) -> LuaResult<Vec<ActionId>> {
    let Value::Table(table) = value else {
        return Ok(Vec::new());
    };
    if let Some(id) = action_id(&table.raw_get::<Value>("id")?) {
        return Ok(vec![id]);
    }
    let mut ids = Vec::new();
    for index in 1..=table.raw_len() {
        if let Value::Table(item) = table.raw_get::<Value>(index)? {
            ids.extend(action_id(&item.raw_get::<Value>("id")?));
        }
    }
    Ok(ids)
}

fn action_id(value: &Value) -> Option<ActionId> {
    match value {
        Value::Integer(i) => u64::try_from(*i).ok().map(ActionId),
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(ActionId(*n as u64)),
        _ => None,
    }
}

/// Strings verbatim, tables as JSON, everything else as `tostring` would.
fn message_text(m: &Marshal<'_, '_>, value: Value) -> LuaResult<String> {
    match value {
        Value::Table(_) => Ok(m.to_json(value)?.to_string()),
        other => Ok(lua_display(&other)),
    }
}
