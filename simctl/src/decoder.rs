//! ResponseDecoder - turns console replies into values or structured errors.
//!
//! Replies come in three shapes:
//! - serialized tables (`{...}`), usually the `{a = ok, b = payload}` envelope
//!   written by a protected call;
//! - bare text printed by a script (`rcon.print(x)`);
//! - error banners produced by the console itself when a chunk fails.
//!
//! The envelope heuristic is a known fragility: a legitimate payload that is
//! itself a table with only `a` (boolean) and `b` fields is indistinguishable
//! from an envelope.

use lua_codec::{encode, ParseError, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::time::{Duration, Instant};

/// Banner the remote side prefixes to errors raised inside interface calls.
pub const INTERFACE_ERROR_BANNER: &str = "Error when running interface function";
/// Everything from this marker on is a stack trace, not part of the message.
pub const TRACEBACK_MARKER: &str = "stack traceback";

const COMMAND_ERROR_BANNER: &str = "Cannot execute command";
const CHUNK_ERROR_MARKER: &str = "[string \"";

static COMMAND_BANNER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*Cannot execute command\.?\s*(?:Error:\s*)?").expect("command banner regex")
});

static LOCATION_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*(?:\[string "[^"]*"\]|[^\s:"]+\.lua|__[\w-]+__/[^\s:]*):\d+:\s*"#)
        .expect("location regex")
});
static INTERFACE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[\w-]+\.[\w-]+:\s*").expect("interface name regex"));
static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]*)""#).expect("quoted regex"));

/// A reply the remote side flagged as a failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResult {
    /// Human-readable message, best effort.
    pub message: String,
    /// The reply exactly as received, for diagnostics.
    pub raw_reply: String,
    pub traceback: Option<String>,
}

impl ErrorResult {
    pub fn new(message: impl Into<String>, raw_reply: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            raw_reply: raw_reply.into(),
            traceback: None,
        }
    }
}

impl fmt::Display for ErrorResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ErrorResult {}

/// A successfully decoded reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub value: Value,
    /// Time between the reference timestamp and the end of decoding.
    pub elapsed: Duration,
}

/// Decode a reply; `started` is when the request was issued.
pub fn decode(reply: &str, started: Instant) -> Result<Decoded, ErrorResult> {
    let value = decode_value(reply)?;
    Ok(Decoded {
        value,
        elapsed: started.elapsed(),
    })
}

/// [`decode`] without the timing.
pub fn decode_value(reply: &str) -> Result<Value, ErrorResult> {
    let text = reply.trim();
    if text.is_empty() {
        return Ok(Value::Nil);
    }

    if text.starts_with('{') {
        match decode_tabular(text) {
            Ok(value) => return classify_envelope(value, reply),
            Err(e) if !is_failure_banner(text) => {
                tracing::debug!("reply is not a serialized table ({}), keeping text", e);
                return Ok(Value::String(text.to_string()));
            }
            Err(_) => {}
        }
    }

    if is_failure_banner(text) {
        return Err(banner_error(text, reply));
    }

    Ok(lua_codec::decode(text).unwrap_or_else(|_| Value::String(text.to_string())))
}

/// Decode a serialized table, then clean it (inventory-like tables collapse
/// to `name -> count` maps).
pub fn decode_tabular(reply: &str) -> Result<Value, ParseError> {
    lua_codec::decode(reply.trim()).map(clean)
}

/// Recursively collapse inventory-like collections.
///
/// A non-empty collection whose every element is a map with both `name` and
/// `count` becomes a `name -> count` map. Counts of repeated names add up.
pub fn clean(value: Value) -> Value {
    match value {
        Value::List(items) => match collapse_inventory(items.iter()) {
            Some(inventory) => inventory,
            None => Value::List(items.into_iter().map(clean).collect()),
        },
        Value::Map(map) => match collapse_inventory(map.values()) {
            Some(inventory) => inventory,
            None => Value::Map(map.into_iter().map(|(k, v)| (k, clean(v))).collect()),
        },
        other => other,
    }
}

fn collapse_inventory<'a>(mut entries: impl Iterator<Item = &'a Value>) -> Option<Value> {
    let mut inventory = indexmap::IndexMap::<String, Value>::new();
    let mut seen_any = false;
    entries.try_for_each(|entry| {
        let name = entry.get("name")?.as_str()?;
        let count = entry.get("count")?;
        if !matches!(count, Value::Integer(_) | Value::Number(_)) {
            return None;
        }
        seen_any = true;
        let total = match (inventory.get(name), count) {
            (Some(Value::Integer(a)), Value::Integer(b)) => match a.checked_add(*b) {
                Some(sum) => Value::Integer(sum),
                None => Value::Number(*a as f64 + *b as f64),
            },
            (Some(prev), _) => Value::Number(prev.as_f64()? + count.as_f64()?),
            (None, _) => count.clone(),
        };
        inventory.insert(name.to_string(), total);
        Some(())
    })?;
    seen_any.then_some(Value::Map(inventory))
}

fn classify_envelope(value: Value, raw: &str) -> Result<Value, ErrorResult> {
    if let Value::Map(map) = &value {
        let envelope_keys = map.keys().all(|k| k == "a" || k == "b");
        if envelope_keys {
            if let Some(Value::Boolean(ok)) = map.get("a") {
                if *ok {
                    return Ok(map.get("b").cloned().unwrap_or(Value::Nil));
                }
                return Err(describe_error(map.get("b"), raw));
            }
        }
    }
    Ok(value)
}

/// Build an error from the `b` half of a failed envelope.
fn describe_error(payload: Option<&Value>, raw: &str) -> ErrorResult {
    match payload {
        Some(Value::String(text)) => error_from_text(text, raw),
        Some(table @ Value::Map(_)) => {
            let message = ["message", "error", "msg"]
                .iter()
                .find_map(|k| table.get(k).and_then(Value::as_str));
            let mut error = match message {
                Some(text) => error_from_text(text, raw),
                None => ErrorResult::new(encode(table), raw),
            };
            if let Some(trace) = table.get("traceback").and_then(Value::as_str) {
                error.traceback = Some(trace.to_string());
            }
            error
        }
        Some(Value::Nil) | None => ErrorResult::new("unknown remote error", raw),
        Some(other) => ErrorResult::new(encode(other), raw),
    }
}

fn error_from_text(text: &str, raw: &str) -> ErrorResult {
    if text.contains(INTERFACE_ERROR_BANNER) {
        let (message, traceback) = extract_interface_error(text);
        return ErrorResult {
            message,
            raw_reply: raw.to_string(),
            traceback,
        };
    }
    let (head, traceback) = split_traceback(text);
    let message = strip_location(head);
    ErrorResult {
        message: if message.is_empty() {
            text.trim().to_string()
        } else {
            message
        },
        raw_reply: raw.to_string(),
        traceback,
    }
}

fn is_failure_banner(text: &str) -> bool {
    let last_line = text.lines().last().unwrap_or(text);
    last_line.contains(CHUNK_ERROR_MARKER)
        || text.starts_with(COMMAND_ERROR_BANNER)
        || text.contains(INTERFACE_ERROR_BANNER)
}

fn banner_error(text: &str, raw: &str) -> ErrorResult {
    if text.contains(INTERFACE_ERROR_BANNER) {
        return error_from_text(text, raw);
    }
    let (head, traceback) = split_traceback(text);
    let line = head
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or(head);
    let line = COMMAND_BANNER.replace(line, "");
    let line = line.trim_start_matches(|c: char| c == ':' || c == ' ');
    // Quoting heuristics would pick the chunk source out of a location.
    let message = if LOCATION_PREFIX.is_match(line) {
        strip_location(line)
    } else {
        extract_message(line)
    };
    ErrorResult {
        message: if message.is_empty() {
            line.trim().to_string()
        } else {
            message
        },
        raw_reply: raw.to_string(),
        traceback,
    }
}

/// Pull the message and trace out of an interface-call failure.
///
/// `Error when running interface function actions.move_to: file.lua:12: no path\nstack traceback: ...`
/// yields `("no path", Some("stack traceback: ..."))`.
pub fn extract_interface_error(text: &str) -> (String, Option<String>) {
    let after = match text.find(INTERFACE_ERROR_BANNER) {
        Some(pos) => &text[pos + INTERFACE_ERROR_BANNER.len()..],
        None => text,
    };
    let (head, traceback) = split_traceback(after);
    let without_name = INTERFACE_NAME.replace(head, "");
    let message = strip_location(&without_name);
    if message.is_empty() {
        (extract_message(head), traceback)
    } else {
        (message, traceback)
    }
}

fn split_traceback(text: &str) -> (&str, Option<String>) {
    match text.find(TRACEBACK_MARKER) {
        Some(pos) => (&text[..pos], Some(text[pos..].trim().to_string())),
        None => (text, None),
    }
}

/// Remove leading `file.lua:12:`-style locations, possibly nested.
fn strip_location(text: &str) -> String {
    let mut rest = text.trim();
    while let Some(m) = LOCATION_PREFIX.find(rest) {
        if m.end() == 0 {
            break;
        }
        rest = rest[m.end()..].trim();
    }
    rest.to_string()
}

/// Best-effort human-readable message from error text.
///
/// Prefers the last double-quoted substring; otherwise the text after the
/// final `:`, skipping a trailing `in main chunk`. Falls back to the input.
pub fn extract_message(text: &str) -> String {
    if let Some(quoted) = QUOTED
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .last()
    {
        return quoted.to_string();
    }

    let mut segments: Vec<&str> = text
        .split(':')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if segments.last() == Some(&"in main chunk") {
        segments.pop();
    }
    match segments.last() {
        Some(last) => last.to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_failed_envelope_is_error() {
        let err = decode_value(r#"{a = false, b = "boom"}"#).unwrap_err();
        assert_eq!(err.message, "boom");
        assert_eq!(err.raw_reply, r#"{a = false, b = "boom"}"#);
    }

    #[test]
    fn test_successful_envelope_unwraps_list() {
        let value = decode_value("{a = true, b = {1, 2, 3}}").unwrap();
        assert_eq!(value, Value::from(vec![1, 2, 3]));
    }

    #[test]
    fn test_successful_envelope_without_payload_is_nil() {
        assert_eq!(decode_value(r#"{["a"] = true}"#).unwrap(), Value::Nil);
    }

    #[test]
    fn test_table_with_extra_keys_is_not_an_envelope() {
        let value = decode_value("{a = false, b = 1, c = 2}").unwrap();
        assert_eq!(value.get("c"), Some(&Value::Integer(2)));
    }

    #[test]
    fn test_array_like_and_inventory_like() {
        assert_eq!(
            decode_tabular(r#"{[1]="x",[2]="y",[3]="z"}"#).unwrap(),
            Value::from(vec!["x", "y", "z"])
        );
        let inventory = decode_tabular(
            r#"{{name="iron-plate", count=5}, {name="coal", count=3}, {name="iron-plate", count=2}}"#,
        )
        .unwrap();
        assert_eq!(
            inventory,
            Value::map([("iron-plate", 7), ("coal", 3)])
        );
        let keyed = decode_tabular(r#"{slot1 = {name="wood", count=5}}"#).unwrap();
        assert_eq!(keyed, Value::map([("wood", 5)]));
    }

    #[test]
    fn test_single_entity_is_not_inventory() {
        let value = decode_tabular(r#"{name="x", count=5}"#).unwrap();
        assert_eq!(value, Value::map([("name", Value::from("x")), ("count", 5.into())]));
    }

    #[test]
    fn test_location_is_stripped_from_error_payload() {
        let err =
            decode_value(r#"{a = false, b = "__level__/control.lua:41: Could not find a path"}"#)
                .unwrap_err();
        assert_eq!(err.message, "Could not find a path");
    }

    #[test]
    fn test_interface_error_banner() {
        let reply = "{a = false, b = \"Error when running interface function actions.place_entity: \
                     __level__/place.lua:12: No space at (3, 4)\\nstack traceback:\\n\\t[C]: in function 'error'\"}";
        let err = decode_value(reply).unwrap_err();
        assert_eq!(err.message, "No space at (3, 4)");
        assert!(err
            .traceback
            .as_deref()
            .unwrap()
            .starts_with("stack traceback"));
    }

    #[test]
    fn test_table_error_payload_uses_its_fields() {
        let err = decode_value(
            r#"{a = false, b = {message = "inventory full", traceback = "stack traceback: ..."}}"#,
        )
        .unwrap_err();
        assert_eq!(err.message, "inventory full");
        assert_eq!(err.traceback.as_deref(), Some("stack traceback: ..."));
    }

    #[test]
    fn test_raw_chunk_error_banner() {
        let err = decode_value(
            "[string \"local x = nil; x.y = 1\"]:1: attempt to index local 'x' (a nil value)",
        )
        .unwrap_err();
        assert_eq!(err.message, "attempt to index local 'x' (a nil value)");
    }

    #[test]
    fn test_command_error_banner_keeps_message_not_chunk_source() {
        let err = decode_value(
            "Cannot execute command. Error: [string \"game.print(x.y)\"]:1: attempt to index global 'x' (a nil value)",
        )
        .unwrap_err();
        assert_eq!(err.message, "attempt to index global 'x' (a nil value)");
        assert!(err.raw_reply.starts_with("Cannot execute command"));
    }

    #[test]
    fn test_command_error_banner_without_location() {
        let err = decode_value(r#"Cannot execute command. Error: unknown entity "iron-chest2""#)
            .unwrap_err();
        assert_eq!(err.message, "iron-chest2");
    }

    #[test]
    fn test_inventory_counts_overflow_to_number() {
        let inventory = decode_tabular(&format!(
            r#"{{{{name="coal", count={max}}}, {{name="coal", count=1}}}}"#,
            max = i64::MAX
        ))
        .unwrap();
        assert_eq!(
            inventory.get("coal"),
            Some(&Value::Number(i64::MAX as f64 + 1.0))
        );
    }

    #[test]
    fn test_plain_text_and_scalars() {
        assert_eq!(decode_value("").unwrap(), Value::Nil);
        assert_eq!(decode_value("123\n").unwrap(), Value::Integer(123));
        assert_eq!(decode_value("hello world").unwrap(), Value::from("hello world"));
    }

    #[test]
    fn test_decode_reports_elapsed() {
        let started = Instant::now();
        let decoded = decode("true", started).unwrap();
        assert_eq!(decoded.value, Value::Boolean(true));
        assert!(decoded.elapsed <= started.elapsed());
    }

    #[test]
    fn test_extract_message_prefers_last_quote() {
        assert_eq!(
            extract_message(r#"Cannot place "stone-furnace" over "coal""#),
            "coal"
        );
    }

    #[test]
    fn test_extract_message_skips_main_chunk() {
        assert_eq!(
            extract_message("foo.lua:3: entity is not valid: in main chunk"),
            "entity is not valid"
        );
    }

    #[test]
    fn test_extract_message_falls_back_to_input() {
        assert_eq!(extract_message(""), "");
        assert_eq!(extract_message(":::"), ":::");
        assert_eq!(extract_message("plain"), "plain");
    }
}
