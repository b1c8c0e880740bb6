//! Value conversion between JSON and Lua.
//!
//! Bots cross the boundary in two shapes:
//!
//! | Direction | Shape |
//! |-----------|-------|
//! | JSON → Lua | `{id, tags}` object naming a known bot becomes a live bot table |
//! | Lua → JSON | live bot table becomes an `{id, tags}` snapshot (pending writes applied) |
//!
//! A live bot is `{ id = "...", tags = <proxy> }` whose `tags` proxy reads
//! through `getTag` and writes through `setTag`. The proxy metatables come
//! from a small Lua prelude loaded once per VM.

use mlua::{Function, Lua, LuaSerdeExt, Result as LuaResult, Table, Value};
use serde_json::{Map, Value as JsonValue};
use std::cell::RefCell;
use tagbot_runtime::{DispatchError, ScriptHost};
use tagbot_types::{number_to_json, BotId, TagValue};

/// Tables nested deeper than this are rejected (they are almost always
/// self-referencing).
const MAX_NESTING: usize = 64;

const PRELUDE: &str = r#"
local Bot = { __name = "bot" }

local function makeBot(id, getTag, setTag)
  local tags = setmetatable({}, {
    __index = function(_, tag) return getTag(id, tag) end,
    __newindex = function(_, tag, value) setTag(id, tag, value) end,
  })
  return setmetatable({ id = id, tags = tags }, Bot)
end

local function botId(value)
  if type(value) == "table" and getmetatable(value) == Bot then
    return value.id
  end
  return nil
end

local function byTag(getTag, tag, filter)
  if filter == nil then
    return function(bot) return getTag(bot, tag) ~= nil end
  elseif type(filter) == "function" then
    return function(bot) return not not filter(getTag(bot, tag)) end
  end
  return function(bot) return getTag(bot, tag) == filter end
end

local function byMod(getTag, mod)
  return function(bot)
    for tag, value in pairs(mod) do
      if getTag(bot, tag) ~= value then return false end
    end
    return true
  end
end

return { makeBot = makeBot, botId = botId, byTag = byTag, byMod = byMod }
"#;

/// Helpers implemented in Lua, shared by every run.
pub(crate) struct Prelude {
    make_bot: Function,
    bot_id: Function,
    pub(crate) by_tag: Function,
    pub(crate) by_mod: Function,
}

impl Prelude {
    pub(crate) fn load(lua: &Lua) -> LuaResult<Self> {
        let exports: Table = lua.load(PRELUDE).set_name("=prelude").eval()?;
        Ok(Self {
            make_bot: exports.get("makeBot")?,
            bot_id: exports.get("botId")?,
            by_tag: exports.get("byTag")?,
            by_mod: exports.get("byMod")?,
        })
    }
}

/// The `getTag` / `setTag` pair a live bot's proxy calls.
#[derive(Clone)]
pub(crate) struct Accessors {
    pub(crate) get_tag: Function,
    pub(crate) set_tag: Function,
}

/// Converts values for one script run and mediates host access.
///
/// Library callbacks never hold the host across a call back into Lua:
/// each host operation borrows it for exactly that operation.
#[derive(Clone)]
pub(crate) struct Marshal<'a, 'h> {
    pub(crate) lua: &'a Lua,
    prelude: &'a Prelude,
    host: &'a RefCell<&'h mut (dyn ScriptHost + 'h)>,
    accessors: Option<Accessors>,
}

impl<'a, 'h> Marshal<'a, 'h> {
    pub(crate) fn new(
        lua: &'a Lua,
        prelude: &'a Prelude,
        host: &'a RefCell<&'h mut (dyn ScriptHost + 'h)>,
    ) -> Self {
        Self {
            lua,
            prelude,
            host,
            accessors: None,
        }
    }

    /// Enables live bots, backed by `accessors`.
    pub(crate) fn with_accessors(mut self, accessors: Accessors) -> Self {
        self.accessors = Some(accessors);
        self
    }

    pub(crate) fn prelude(&self) -> &Prelude {
        self.prelude
    }

    pub(crate) fn accessors(&self) -> Option<&Accessors> {
        self.accessors.as_ref()
    }

    /// Runs `f` with exclusive access to the host.
    pub(crate) fn with_host<R>(
        &self,
        f: impl FnOnce(&mut (dyn ScriptHost + 'h)) -> Result<R, DispatchError>,
    ) -> LuaResult<R> {
        let mut host = self.host.try_borrow_mut().map_err(|_| {
            mlua::Error::external(DispatchError::Sandbox(
                "host is already in use by an outer call".into(),
            ))
        })?;
        f(&mut **host).map_err(mlua::Error::external)
    }

    /// Runs `f` with shared access to the host, or returns `None` when a
    /// host operation is in progress.
    pub(crate) fn peek_host<R>(&self, f: impl FnOnce(&(dyn ScriptHost + 'h)) -> R) -> Option<R> {
        self.host.try_borrow().ok().map(|host| f(&**host))
    }

    /// A live bot for `id`, or a plain `{id}` table before the accessors
    /// exist.
    pub(crate) fn bot(&self, id: &BotId) -> LuaResult<Value> {
        match &self.accessors {
            Some(accessors) => self.prelude.make_bot.call::<Value>((
                id.as_str(),
                accessors.get_tag.clone(),
                accessors.set_tag.clone(),
            )),
            None => {
                let table = self.lua.create_table()?;
                table.set("id", id.as_str())?;
                Ok(Value::Table(table))
            }
        }
    }

    /// A Lua array of live bots.
    pub(crate) fn bots(&self, ids: &[BotId]) -> LuaResult<Value> {
        let table = self.array()?;
        for (index, id) in ids.iter().enumerate() {
            table.raw_set(index + 1, self.bot(id)?)?;
        }
        Ok(Value::Table(table))
    }

    /// Id of a live bot table.
    pub(crate) fn live_bot_id(&self, value: &Value) -> LuaResult<Option<BotId>> {
        if !matches!(value, Value::Table(_)) {
            return Ok(None);
        }
        let id: Option<String> = self.prelude.bot_id.call(value.clone())?;
        Ok(id.map(BotId::new))
    }

    pub(crate) fn tag_to_lua(&self, value: &TagValue) -> LuaResult<Value> {
        self.to_lua(&value.to_json())
    }

    pub(crate) fn to_tag_value(&self, value: Value) -> LuaResult<TagValue> {
        Ok(TagValue::from_json(self.to_json(value)?))
    }

    /// Converts JSON to Lua. Array nulls become the serde null sentinel so
    /// positions survive; object nulls are dropped.
    pub(crate) fn to_lua(&self, value: &JsonValue) -> LuaResult<Value> {
        match value {
            JsonValue::Null => Ok(Value::Nil),
            JsonValue::Bool(b) => Ok(Value::Boolean(*b)),
            JsonValue::Number(n) => Ok(match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Number(n.as_f64().unwrap_or(0.0)),
            }),
            JsonValue::String(s) => Ok(Value::String(self.lua.create_string(s)?)),
            JsonValue::Array(items) => {
                let table = self.array()?;
                for (index, item) in items.iter().enumerate() {
                    let item = match self.to_lua(item)? {
                        Value::Nil => self.lua.null(),
                        other => other,
                    };
                    table.raw_set(index + 1, item)?;
                }
                Ok(Value::Table(table))
            }
            JsonValue::Object(map) => {
                if let Some(bot) = self.rehydrate(map)? {
                    return Ok(bot);
                }
                let table = self.lua.create_table()?;
                for (key, item) in map {
                    table.raw_set(key.as_str(), self.to_lua(item)?)?;
                }
                Ok(Value::Table(table))
            }
        }
    }

    /// Converts Lua to JSON.
    pub(crate) fn to_json(&self, value: Value) -> LuaResult<JsonValue> {
        self.to_json_at(value, 0)
    }

    fn to_json_at(&self, value: Value, depth: usize) -> LuaResult<JsonValue> {
        if depth > MAX_NESTING {
            return Err(mlua::Error::SerializeError(
                "table nesting too deep (cyclic table?)".into(),
            ));
        }
        match value {
            Value::Nil => Ok(JsonValue::Null),
            Value::Boolean(b) => Ok(JsonValue::Bool(b)),
            Value::Integer(i) => Ok(JsonValue::from(i)),
            Value::Number(n) => Ok(number_to_json(n)),
            Value::String(s) => Ok(JsonValue::String(s.to_str()?.to_string())),
            Value::LightUserData(ud) if ud.0.is_null() => Ok(JsonValue::Null),
            Value::Table(table) => {
                if let Some(id) = self.live_bot_id(&Value::Table(table.clone()))? {
                    return Ok(self.snapshot(&id));
                }
                self.table_to_json(table, depth)
            }
            other => Err(mlua::Error::SerializeError(format!(
                "cannot convert {} to JSON",
                other.type_name()
            ))),
        }
    }

    fn table_to_json(&self, table: Table, depth: usize) -> LuaResult<JsonValue> {
        let len = table.raw_len();
        if len > 0 {
            let mut items = Vec::with_capacity(len);
            for index in 1..=len {
                let item: Value = table.raw_get(index)?;
                items.push(self.to_json_at(item, depth + 1)?);
            }
            return Ok(JsonValue::Array(items));
        }

        let mut map = Map::new();
        for pair in table.clone().pairs::<Value, Value>() {
            let (key, item) = pair?;
            let key = match key {
                Value::String(s) => s.to_str()?.to_string(),
                Value::Integer(i) => i.to_string(),
                Value::Number(n) => n.to_string(),
                _ => continue,
            };
            map.insert(key, self.to_json_at(item, depth + 1)?);
        }
        if map.is_empty() {
            // Only serde knows whether an empty table was an array.
            return self.lua.from_value(Value::Table(table));
        }
        Ok(JsonValue::Object(map))
    }

    /// `{id, tags}` for `id`, with pending writes applied.
    pub(crate) fn snapshot(&self, id: &BotId) -> JsonValue {
        let tags: Map<String, JsonValue> = self
            .peek_host(|host| host.bot_tags(id))
            .flatten()
            .unwrap_or_default()
            .iter()
            .map(|(tag, value)| (tag.clone(), value.to_json()))
            .collect();
        serde_json::json!({ "id": id, "tags": tags })
    }

    fn rehydrate(&self, map: &Map<String, JsonValue>) -> LuaResult<Option<Value>> {
        if self.accessors.is_none() || map.len() != 2 || !map.contains_key("tags") {
            return Ok(None);
        }
        let Some(id) = map.get("id").and_then(JsonValue::as_str) else {
            return Ok(None);
        };
        let known = self.peek_host(|host| host.has_bot(id)).unwrap_or(false);
        if !known {
            return Ok(None);
        }
        self.bot(&BotId::new(id)).map(Some)
    }

    fn array(&self) -> LuaResult<Table> {
        // An empty serde array carries mlua's array marker.
        match self.lua.to_value(&JsonValue::Array(Vec::new()))? {
            Value::Table(table) => Ok(table),
            _ => self.lua.create_table(),
        }
    }
}

/// Lua truthiness.
pub(crate) fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Nil | Value::Boolean(false))
}

/// Renders a value the way `print` / `tostring` would.
pub(crate) fn lua_display(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => {
            if n.fract() == 0.0 && n.is_finite() {
                format!("{n:.1}")
            } else {
                format!("{n}")
            }
        }
        Value::String(s) => s
            .to_str()
            .map_or_else(|_| "<invalid utf8>".into(), |s| s.to_string()),
        Value::Table(_) => format!("table: {:p}", value.to_pointer()),
        Value::Function(_) => format!("function: {:p}", value.to_pointer()),
        _ => format!("{value:?}"),
    }
}
