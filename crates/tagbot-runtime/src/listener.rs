//! Listener tag parsing.
//!
//! | Tag | Listens to | Filter |
//! |-----|-----------|--------|
//! | `onClick()` | `onClick` | - |
//! | `#onClick` | `onClick` | - |
//! | `#onClick()` | `onClick` | - |
//! | `combine(#kind:key)` | `combine` | another target has `kind === "key"` |
//!
//! A bare `onClick` tag is plain data, not a listener.

use tagbot_types::{TagValue, Tags, TAG_PREFIX};

/// Marker some scripts start with; ignored.
pub const SCRIPT_PREFIX: char = '@';

/// A parsed listener tag name.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerTag<'a> {
    /// Event the tag listens to.
    pub event: &'a str,
    /// Partner requirement, if any.
    pub filter: Option<TagFilter>,
}

/// `#tag:value` requirement on another target of the same shout.
#[derive(Debug, Clone, PartialEq)]
pub struct TagFilter {
    /// Tag to read on the other target.
    pub tag: String,
    /// Value it must strictly equal.
    pub value: TagValue,
}

impl TagFilter {
    /// Parses `#tag:value` (the `#` is optional).
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let text = text.strip_prefix(TAG_PREFIX).unwrap_or(text);
        let (tag, value) = text.split_once(':')?;
        let tag = tag.trim();
        if tag.is_empty() {
            return None;
        }
        Some(Self {
            tag: tag.to_string(),
            value: parse_filter_value(value.trim()),
        })
    }

    /// Strict equality: a number never equals its string spelling.
    #[must_use]
    pub fn matches(&self, value: &TagValue) -> bool {
        match (&self.value, value) {
            (TagValue::Number(a), TagValue::Number(b)) => a == b,
            (TagValue::Bool(a), TagValue::Bool(b)) => a == b,
            (TagValue::String(a), TagValue::String(b)) => a == b,
            _ => false,
        }
    }
}

fn parse_filter_value(text: &str) -> TagValue {
    for quote in ['"', '\''] {
        if let Some(inner) = text
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return TagValue::String(inner.to_string());
        }
    }
    match text {
        "true" => TagValue::Bool(true),
        "false" => TagValue::Bool(false),
        _ => match text.parse::<f64>() {
            Ok(n) if n.is_finite() => TagValue::Number(n),
            _ => TagValue::String(text.to_string()),
        },
    }
}

/// Parses a tag name as a listener, or `None` if it is not one.
///
/// # Example
///
/// ```
/// use tagbot_runtime::listener::parse_listener_tag;
///
/// assert_eq!(parse_listener_tag("#onClick").map(|l| l.event), Some("onClick"));
/// assert_eq!(parse_listener_tag("onClick()").map(|l| l.event), Some("onClick"));
/// assert!(parse_listener_tag("onClick").is_none());
/// ```
#[must_use]
pub fn parse_listener_tag(tag: &str) -> Option<ListenerTag<'_>> {
    let (hashed, body) = match tag.strip_prefix(TAG_PREFIX) {
        Some(rest) => (true, rest),
        None => (false, tag),
    };

    let (event, filter) = match body.strip_suffix(')') {
        Some(call) => {
            let open = call.find('(')?;
            let args = call[open + 1..].trim();
            let filter = if args.is_empty() {
                None
            } else {
                Some(TagFilter::parse(args)?)
            };
            (&call[..open], filter)
        }
        None if hashed => (body, None),
        None => return None,
    };

    if event.is_empty() || event.contains(['(', ')', TAG_PREFIX, ':']) {
        return None;
    }
    Some(ListenerTag { event, filter })
}

/// Script text of a tag value, with the `@` marker removed.
#[must_use]
pub fn script_text(value: &TagValue) -> Option<&str> {
    let text = value.as_str()?.trim();
    let text = text.strip_prefix(SCRIPT_PREFIX).unwrap_or(text).trim();
    (!text.is_empty()).then_some(text)
}

/// One script a bot runs for an event.
#[derive(Debug, Clone, PartialEq)]
pub struct Listener {
    /// Tag holding the script.
    pub tag: String,
    /// Partner requirement.
    pub filter: Option<TagFilter>,
    /// Script source.
    pub script: String,
}

/// Every listener in `tags` for `event`, in tag-name order.
#[must_use]
pub fn matching_listeners(tags: &Tags, event: &str) -> Vec<Listener> {
    tags.iter()
        .filter_map(|(tag, value)| {
            let parsed = parse_listener_tag(tag)?;
            if parsed.event != event {
                return None;
            }
            Some(Listener {
                tag: tag.clone(),
                filter: parsed.filter,
                script: script_text(value)?.to_string(),
            })
        })
        .collect()
}
